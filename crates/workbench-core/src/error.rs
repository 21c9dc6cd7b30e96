//! Error types for workbench-core

use std::fmt::Write;
use thiserror::Error;

use crate::inference::InferenceError;

/// Remediation command for resolving an error
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RemediationCommand {
    /// Short label describing the command purpose
    pub label: String,
    /// Command to run
    pub command: String,
}

/// Actionable remediation guidance for an error
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Remediation {
    /// One-line summary of how to fix the issue
    pub summary: String,
    /// Suggested commands to resolve or diagnose the issue
    pub commands: Vec<RemediationCommand>,
    /// Additional alternative guidance
    pub alternatives: Vec<String>,
}

impl Remediation {
    /// Create a new remediation with a summary
    #[must_use]
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            commands: Vec::new(),
            alternatives: Vec::new(),
        }
    }

    /// Add a suggested command
    #[must_use]
    pub fn command(mut self, label: impl Into<String>, command: impl Into<String>) -> Self {
        self.commands.push(RemediationCommand {
            label: label.into(),
            command: command.into(),
        });
        self
    }

    /// Add an alternative suggestion
    #[must_use]
    pub fn alternative(mut self, alternative: impl Into<String>) -> Self {
        self.alternatives.push(alternative.into());
        self
    }

    /// Render remediation text for human-readable output
    #[must_use]
    pub fn render_plain(&self) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "To fix:");
        let _ = writeln!(output, "  {}", self.summary);

        if !self.commands.is_empty() {
            let _ = writeln!(output, "  Commands:");
            for cmd in &self.commands {
                let _ = writeln!(output, "    - {}: {}", cmd.label, cmd.command);
            }
        }

        if !self.alternatives.is_empty() {
            let _ = writeln!(output, "  Alternatives:");
            for alt in &self.alternatives {
                let _ = writeln!(output, "    - {alt}");
            }
        }

        output
    }
}

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for workbench-core
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid clustering configuration; caller-correctable, never retried
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// Not enough incidents (or vectors) for the requested operation
    #[error("Insufficient data: need at least {needed} {context}, got {got}")]
    InsufficientData {
        needed: usize,
        got: usize,
        context: &'static str,
    },

    /// The inference service failed or returned unusable output
    #[error("Inference service unavailable: {0}")]
    ServiceUnavailable(#[from] InferenceError),

    /// Structured generation output did not match the expected schema
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Vectors handed to the clusterer are unusable (ragged, empty, non-finite)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Storage errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Config file errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Runtime errors (blocking task failures, etc.)
    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl Error {
    /// Shorthand for [`Error::InsufficientData`].
    #[must_use]
    pub fn insufficient(needed: usize, got: usize, context: &'static str) -> Self {
        Self::InsufficientData {
            needed,
            got,
            context,
        }
    }

    /// Return remediation guidance when available.
    #[must_use]
    pub fn remediation(&self) -> Option<Remediation> {
        match self {
            Self::Configuration(err) => Some(err.remediation()),
            Self::InsufficientData { needed, got, .. } => Some(
                Remediation::new(format!(
                    "Only {got} usable incidents are available; at least {needed} are required."
                ))
                .command("Import incidents", "iwb incidents import <file.json>")
                .command("Check embeddings", "iwb embed")
                .alternative("Request a smaller fixed cluster count with --k."),
            ),
            Self::ServiceUnavailable(err) => Some(err.remediation()),
            Self::SchemaMismatch(_) => Some(
                Remediation::new("The generation model returned output that did not match the schema.")
                    .command("Re-run clustering", "iwb cluster run")
                    .alternative("Switch inference.generation_model to a model that supports JSON output."),
            ),
            Self::InvalidInput(_) => Some(
                Remediation::new("Stored embeddings are inconsistent; re-embed the incident set.")
                    .command("Re-embed", "iwb embed")
                    .alternative("Check that inference.embedding_dimension matches the model."),
            ),
            Self::Storage(err) => Some(err.remediation()),
            Self::Config(err) => Some(err.remediation()),
            Self::Io(_) => Some(
                Remediation::new("The database or log path could not be read or written.")
                    .command("Show configured paths", "iwb config show")
                    .alternative("Pass --db with a writable location."),
            ),
            Self::Json(_) => Some(
                Remediation::new("Incident files must be a JSON array of incident records.")
                    .command("Import incidents", "iwb incidents import <file.json>")
                    .alternative("Each record needs at least id, title and occurred_at (RFC 3339)."),
            ),
            Self::Runtime(_) => Some(
                Remediation::new("An internal task failed. Retry the command.")
                    .command("Verbose run", "iwb --log-level debug cluster run")
                    .alternative("If the issue persists, report it with the debug log."),
            ),
        }
    }
}

/// Invalid (method, metric) combinations and parameter values
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// Ward linkage is only defined for Euclidean distances
    #[error(
        "ward linkage is incompatible with {metric} distance; use average or complete linkage, or the euclidean metric"
    )]
    WardRequiresEuclidean { metric: String },

    #[error("unknown linkage method: {0} (expected one of: average, complete, single, ward)")]
    UnknownMethod(String),

    #[error("unknown distance metric: {0} (expected one of: cosine, euclidean)")]
    UnknownMetric(String),

    #[error("cluster count must be at least 1, got {0}")]
    InvalidClusterCount(usize),

    #[error("invalid k range: k_min={k_min}, k_max={k_max}")]
    InvalidKRange { k_min: usize, k_max: usize },
}

impl ConfigurationError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::WardRequiresEuclidean { .. } => {
                Remediation::new("Pick a linkage method that is valid for the chosen metric.")
                    .command("Average linkage", "iwb cluster run --method average --metric cosine")
                    .command("Ward linkage", "iwb cluster run --method ward --metric euclidean")
            }
            Self::UnknownMethod(_) | Self::UnknownMetric(_) => {
                Remediation::new("Use a supported linkage method and distance metric.")
                    .command("Defaults", "iwb cluster run --method average --metric cosine")
            }
            Self::InvalidClusterCount(_) => Remediation::new("Request at least one cluster.")
                .command("Auto-select k", "iwb cluster run"),
            Self::InvalidKRange { .. } => {
                Remediation::new("Set clustering.k_min >= 2 and clustering.k_max >= k_min.")
                    .command("Show config", "iwb config show")
            }
        }
    }
}

/// Storage-specific errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Database schema version ({current}) is newer than supported ({supported})")]
    SchemaTooNew { current: i32, supported: i32 },

    #[error("Invalid database value: {0}")]
    InvalidValue(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

impl StorageError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::Database(_) => Remediation::new(
                "Database operation failed. Check data directory permissions and retry.",
            )
            .command("Show config", "iwb config show")
            .alternative("Ensure no other process holds a write lock on the database."),
            Self::SchemaTooNew { current, supported } => Remediation::new(format!(
                "Database schema version {current} is newer than supported ({supported}). Upgrade iwb."
            ))
            .command("Check version", "iwb --version")
            .alternative("Point --db at a database created by this version."),
            Self::InvalidValue(_) => Remediation::new(
                "The database contains a value this version cannot decode.",
            )
            .command("Re-embed", "iwb embed")
            .alternative("Restore the database from a backup."),
            Self::NotFound(_) => Remediation::new("The requested record was not found.")
                .command("List runs", "iwb cluster list")
                .alternative("Verify the identifier and retry."),
            Self::LockPoisoned => Remediation::new(
                "A previous operation panicked while holding the database handle.",
            )
            .command("Retry", "iwb cluster run")
            .alternative("Restart the process."),
        }
    }
}

/// Config file errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    ReadFailed(String, String),

    #[error("Failed to parse config: {0}")]
    ParseFailed(String),

    #[error("Invalid config: {0}")]
    ValidationError(String),
}

impl ConfigError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::ReadFailed(path, _) => {
                Remediation::new(format!("Check that {path} exists and is readable."))
                    .command("Show config", "iwb config show")
            }
            Self::ParseFailed(_) => Remediation::new("Fix the TOML syntax in the config file.")
                .command("Show effective config", "iwb config show")
                .alternative("Delete the file to fall back to defaults."),
            Self::ValidationError(_) => {
                Remediation::new("Correct the rejected setting in the config file.")
                    .command("Show effective config", "iwb config show")
            }
        }
    }
}
