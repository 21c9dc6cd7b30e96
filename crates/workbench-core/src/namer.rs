//! Cluster naming through structured generation.
//!
//! Naming never fails a run: an unavailable service or a response that does
//! not match the schema yields the deterministic fallback `Cluster {label}`
//! with an empty summary.

use std::fmt::Write;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::inference::InferenceService;
use crate::model::char_prefix;

pub const DEFAULT_SAMPLE_SIZE: usize = 20;
pub const DEFAULT_NAMING_DESCRIPTION_CHARS: usize = 200;
/// The prompt asks for 3-6 words; parsing accepts up to 12 so slightly
/// verbose names are kept instead of falling back.
const MAX_NAME_WORDS: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamerConfig {
    /// Members included in the prompt
    pub sample_size: usize,
    /// Description prefix length per member
    pub description_chars: usize,
}

impl Default for NamerConfig {
    fn default() -> Self {
        Self {
            sample_size: DEFAULT_SAMPLE_SIZE,
            description_chars: DEFAULT_NAMING_DESCRIPTION_CHARS,
        }
    }
}

/// Name and summary assigned to one cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterName {
    pub name: String,
    pub summary: String,
    /// False when the fallback was used
    pub generated: bool,
}

impl ClusterName {
    pub fn fallback(label: usize) -> Self {
        Self {
            name: format!("Cluster {label}"),
            summary: String::new(),
            generated: false,
        }
    }
}

/// JSON schema sent with every naming request.
pub fn name_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "name": {"type": "string", "description": "Short cluster name, 3-6 words"},
            "summary": {"type": "string", "description": "1-2 sentence summary"}
        },
        "required": ["name", "summary"]
    })
}

/// Validate a raw generation response against [`name_schema`].
pub fn parse_response(raw: &str) -> Result<(String, String)> {
    let value: Value = serde_json::from_str(raw.trim())
        .map_err(|err| Error::SchemaMismatch(format!("response is not JSON: {err}")))?;
    let object = value
        .as_object()
        .ok_or_else(|| Error::SchemaMismatch("response is not a JSON object".to_string()))?;
    let field = |key: &str| -> Result<String> {
        object
            .get(key)
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string())
            .ok_or_else(|| Error::SchemaMismatch(format!("missing string field '{key}'")))
    };
    let name = field("name")?;
    let summary = field("summary")?;

    let words = name.split_whitespace().count();
    if words == 0 {
        return Err(Error::SchemaMismatch("name is empty".to_string()));
    }
    if words > MAX_NAME_WORDS {
        return Err(Error::SchemaMismatch(format!(
            "name has {words} words, at most {MAX_NAME_WORDS} allowed"
        )));
    }
    Ok((name, summary))
}

pub struct ClusterNamer {
    service: Arc<dyn InferenceService>,
    config: NamerConfig,
    schema: Value,
}

impl ClusterNamer {
    pub fn new(service: Arc<dyn InferenceService>) -> Self {
        Self::with_config(service, NamerConfig::default())
    }

    pub fn with_config(service: Arc<dyn InferenceService>, config: NamerConfig) -> Self {
        Self {
            service,
            config,
            schema: name_schema(),
        }
    }

    /// Prompt listing a bounded sample of `(title, description)` members.
    pub fn build_prompt(&self, members: &[(String, String)]) -> String {
        let mut lines = String::new();
        for (title, description) in members.iter().take(self.config.sample_size) {
            let prefix = char_prefix(description, self.config.description_chars).trim();
            if prefix.is_empty() {
                let _ = writeln!(lines, "- {title}");
            } else {
                let _ = writeln!(lines, "- {title}: {prefix}");
            }
        }
        format!(
            "You are an IT incident analyst. Below are related IT incidents that have been \
             grouped into a cluster. Generate a short descriptive name (3-6 words) and a 1-2 \
             sentence summary of their common theme.\n\n\
             Incidents:\n{lines}\n\
             Respond with JSON containing 'name' and 'summary' fields."
        )
    }

    /// Name one cluster. Never fails; see [`ClusterName::fallback`].
    pub async fn name(&self, label: usize, members: &[(String, String)]) -> ClusterName {
        if members.is_empty() {
            return ClusterName::fallback(label);
        }
        let prompt = self.build_prompt(members);
        let raw = match self.service.generate_structured(&prompt, &self.schema).await {
            Ok(raw) => raw,
            Err(err) => {
                warn!(label, error = %err, "Cluster naming service failed; using fallback name");
                return ClusterName::fallback(label);
            }
        };
        match parse_response(&raw) {
            Ok((name, summary)) => {
                debug!(label, name = %name, "Named cluster");
                ClusterName {
                    name,
                    summary,
                    generated: true,
                }
            }
            Err(err) => {
                warn!(
                    label,
                    error = %err,
                    response_len = raw.len(),
                    "Cluster naming response did not match schema; using fallback name"
                );
                ClusterName::fallback(label)
            }
        }
    }
}
