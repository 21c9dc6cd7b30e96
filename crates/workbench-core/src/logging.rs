//! Structured logging for the workbench
//!
//! Uses `tracing` with a pretty or JSON-lines formatter on stderr and an
//! optional append-only log file.
//!
//! ```ignore
//! use workbench_core::logging::{init_logging, LogConfig};
//! use workbench_core::config::LogFormat;
//!
//! let config = LogConfig {
//!     level: "info".to_string(),
//!     format: LogFormat::Pretty,
//!     file: None,
//! };
//! init_logging(&config)?;
//! ```
//!
//! # Correlation Fields
//!
//! Use these field names consistently in spans and events:
//! - `run_id`: Cluster run identifier
//! - `incident_id`, `incidents`: Incident identity or count
//! - `batch`, `model`: Embedding batch context
//! - `k`, `score`, `label`: Clustering context
//!
//! Incident descriptions are never logged; titles only at `debug`.

use std::fs::File;
use std::io;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};
use tracing_subscriber::fmt::format::{Format, Json, JsonFields};
use tracing_subscriber::fmt::time::SystemTime;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

pub use crate::config::LogFormat;

static INSTALLED: OnceLock<()> = OnceLock::new();

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Where and how much to log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Level filter; `RUST_LOG` wins when set
    pub level: String,
    pub format: LogFormat,
    /// Append-only copy of every event
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info.as_str().to_string(),
            format: LogFormat::default(),
            file: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("logging already initialized")]
    AlreadyInitialized,

    #[error("invalid log level: {0}")]
    InvalidLevel(String),

    #[error("cannot open log file: {0}")]
    File(#[from] io::Error),

    #[error("cannot install subscriber: {0}")]
    Install(#[from] tracing_subscriber::util::TryInitError),
}

/// Install the global subscriber: stderr plus the optional log file.
///
/// Only the first call takes effect; later calls return
/// [`LogError::AlreadyInitialized`].
pub fn init_logging(config: &LogConfig) -> Result<(), LogError> {
    if INSTALLED.get().is_some() {
        return Err(LogError::AlreadyInitialized);
    }

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => {
            let level: LogLevel = config.level.parse().map_err(LogError::InvalidLevel)?;
            EnvFilter::new(level.as_str())
        }
    };

    let mut layers = vec![event_layer(config.format, Target::Stderr)];
    if let Some(path) = config.file.as_deref() {
        let file = open_log_file(path)?;
        layers.push(event_layer(config.format, Target::File(Arc::new(file))));
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()?;
    let _ = INSTALLED.set(());

    tracing::debug!(
        level = %config.level,
        format = %config.format,
        file = ?config.file,
        "Logging initialized"
    );
    Ok(())
}

enum Target {
    Stderr,
    File(Arc<File>),
}

/// One formatting layer. ANSI colour only for pretty output on stderr.
fn event_layer(format: LogFormat, target: Target) -> BoxedLayer {
    match (format, target) {
        (LogFormat::Pretty, Target::Stderr) => fmt::layer()
            .with_writer(io::stderr)
            .with_target(true)
            .with_ansi(true)
            .boxed(),
        (LogFormat::Pretty, Target::File(file)) => fmt::layer()
            .with_writer(file)
            .with_target(true)
            .with_ansi(false)
            .boxed(),
        (LogFormat::Json, Target::Stderr) => json_layer().with_writer(io::stderr).boxed(),
        (LogFormat::Json, Target::File(file)) => json_layer().with_writer(file).boxed(),
    }
}

type JsonLayer<S> = fmt::Layer<S, JsonFields, Format<Json, SystemTime>>;

fn json_layer<S>() -> JsonLayer<S> {
    fmt::layer()
        .json()
        .with_timer(SystemTime)
        .with_current_span(true)
        .with_span_list(false)
        .flatten_event(true)
}

/// Open for append, creating the file (mode 0600) and its directory (0700).
fn open_log_file(path: &Path) -> io::Result<File> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        if !dir.exists() {
            std::fs::create_dir_all(dir)?;
            #[cfg(unix)]
            std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))?;
        }
    }
    let created = !path.exists();
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    #[cfg(unix)]
    if created {
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(file)
}

/// Create a span with the standard correlation fields.
///
/// ```ignore
/// let span = workbench_core::workbench_span!("cluster_run", run_id = %run_id, incidents = 42);
/// let _guard = span.enter();
/// ```
#[macro_export]
macro_rules! workbench_span {
    ($name:expr $(, $($field:tt)+)?) => {
        tracing::info_span!($name $(, $($field)+)?)
    };
}

/// Levels accepted in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub const ALL: [Self; 5] = [Self::Trace, Self::Debug, Self::Info, Self::Warn, Self::Error];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        if wanted == "warning" {
            return Ok(Self::Warn);
        }
        Self::ALL
            .into_iter()
            .find(|level| level.as_str() == wanted)
            .ok_or_else(|| format!("unknown log level '{s}' (use trace, debug, info, warn or error)"))
    }
}
