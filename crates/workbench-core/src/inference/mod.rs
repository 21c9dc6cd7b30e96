//! Inference service capability.
//!
//! Text-to-vector conversion and structured generation are delegated to an
//! external service. The pipeline only sees this narrow interface, so tests
//! and offline runs can inject a deterministic implementation.

mod hash;

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

use crate::error::Remediation;

pub use hash::HashInference;

/// Embedding dimension produced by the default embedding model.
pub const EMBEDDING_DIMENSION: usize = 768;

/// Boxed future returned by [`InferenceService`] operations.
pub type InferenceFuture<'a, T> =
    Pin<Box<dyn Future<Output = std::result::Result<T, InferenceError>> + Send + 'a>>;

/// Failure modes of the inference service.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InferenceError {
    /// Connection refused or reset
    #[error("could not reach inference service: {0}")]
    Unreachable(String),

    /// Request exceeded its deadline
    #[error("inference request timed out: {0}")]
    Timeout(String),

    /// The requested model is not installed on the service
    #[error("model not found: {0}")]
    ModelNotFound(String),

    /// Non-success HTTP status
    #[error("inference service returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// The response arrived but could not be used
    #[error("malformed inference response: {0}")]
    Malformed(String),

    /// The backend does not implement the operation
    #[error("operation not supported by {backend}: {operation}")]
    Unsupported {
        backend: String,
        operation: &'static str,
    },
}

impl InferenceError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::Unreachable(_) | Self::Timeout(_) => {
                Remediation::new("Start the inference service and retry.")
                    .command("Start Ollama", "ollama serve")
                    .command("Offline run", "iwb cluster run --offline")
                    .alternative("Point inference.base_url (or WORKBENCH_OLLAMA_URL) at a running service.")
            }
            Self::ModelNotFound(model) => {
                Remediation::new(format!("Pull the missing model '{model}'."))
                    .command("Pull model", format!("ollama pull {model}"))
                    .alternative("Change inference.embedding_model in the config file.")
            }
            Self::Http { .. } => Remediation::new("The inference service rejected the request.")
                .command("Check service", "ollama list")
                .alternative("Inspect the service logs for the failing request."),
            Self::Malformed(_) => {
                Remediation::new("The inference service returned unexpected output.")
                    .command("Check models", "ollama list")
                    .alternative("Verify inference.embedding_dimension matches the model output.")
            }
            Self::Unsupported { .. } => {
                Remediation::new("Use a backend that supports the requested operation.")
                    .command("Online run", "iwb cluster run")
            }
        }
    }

    /// Whether a retry could plausibly succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Unreachable(_) | Self::Timeout(_) => true,
            Self::Http { status, .. } => matches!(status, 408 | 425 | 429 | 500..=599),
            Self::ModelNotFound(_) | Self::Malformed(_) | Self::Unsupported { .. } => false,
        }
    }
}

/// Identity of an inference backend, for logs and run metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InferenceInfo {
    pub backend: String,
    pub embedding_model: String,
    pub generation_model: String,
}

impl fmt::Display for InferenceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (embed={}, generate={})",
            self.backend, self.embedding_model, self.generation_model
        )
    }
}

/// Capability interface over the external text-inference service.
pub trait InferenceService: Send + Sync {
    fn info(&self) -> InferenceInfo;

    /// Embed an ordered batch of texts; the response is parallel to the input.
    fn embed_batch<'a>(&'a self, texts: &'a [String]) -> InferenceFuture<'a, Vec<Vec<f32>>>;

    /// Generate text constrained to a JSON schema. The raw response is returned
    /// unparsed; callers validate it.
    fn generate_structured<'a>(
        &'a self,
        prompt: &'a str,
        schema: &'a serde_json::Value,
    ) -> InferenceFuture<'a, String>;

    fn is_available(&self) -> InferenceFuture<'_, bool> {
        Box::pin(async { Ok(true) })
    }

    /// Tag stored alongside every vector this service produces.
    fn embedding_model(&self) -> String {
        self.info().embedding_model
    }
}
