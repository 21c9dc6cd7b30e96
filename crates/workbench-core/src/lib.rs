//! workbench-core: Core library for Incident Workbench
//!
//! Turns a set of incident records into named groups of related incidents.
//!
//! # Architecture
//!
//! ```text
//! Incidents → Embedder (+ VectorCache) → HierarchicalClusterer / AutoKSelector
//!                                                   ↓
//!                                   ClusterNamer → ClusterRun → SqliteStore
//! ```
//!
//! # Modules
//!
//! - `model`: Incidents, embeddings, clusters and runs
//! - `inference`: Inference service capability and the offline hash backend
//! - `cache`: Per-incident vector ownership
//! - `embedder`: Batched, idempotent embedding
//! - `clustering`: Linkage validation, dendrogram, silhouette, automatic k
//! - `namer`: Structured-generation cluster names with fallback
//! - `metrics`: Resolution-time statistics and breakdowns
//! - `orchestrator`: End-to-end clustering run
//! - `storage`: SQLite persistence
//! - `config`: Configuration management
//! - `logging`: Structured logging
//! - `retry`: Exponential backoff
//!
//! # Safety
//!
//! This crate forbids unsafe code.

#![forbid(unsafe_code)]

pub mod cache;
pub mod clustering;
pub mod config;
pub mod embedder;
pub mod error;
pub mod inference;
pub mod logging;
pub mod metrics;
pub mod model;
pub mod namer;
pub mod orchestrator;
pub mod retry;
pub mod storage;

pub use error::{Error, Result};

/// Version of the workbench-core library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
