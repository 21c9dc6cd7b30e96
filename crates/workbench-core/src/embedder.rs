//! Incident text to vector conversion.
//!
//! Only incidents without a current vector for the service's model are sent
//! to the inference service, in fixed-size batches. Each batch is written to
//! the cache as soon as it returns, so a failure part-way leaves earlier
//! batches valid.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::cache::VectorCache;
use crate::error::{Error, Result};
use crate::inference::{EMBEDDING_DIMENSION, InferenceError, InferenceService};
use crate::model::{EmbeddingVector, Incident, IncidentId, char_prefix};

pub const DEFAULT_BATCH_SIZE: usize = 32;
pub const DEFAULT_DESCRIPTION_CHARS: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedderConfig {
    /// Texts per inference request
    pub batch_size: usize,
    /// Description prefix length included in the embedded text
    pub description_chars: usize,
    /// Expected vector length; responses of any other length are rejected
    pub dimension: usize,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            description_chars: DEFAULT_DESCRIPTION_CHARS,
            dimension: EMBEDDING_DIMENSION,
        }
    }
}

/// Result of one embed call.
#[derive(Debug, Clone, Default)]
pub struct EmbedOutcome {
    /// Current vector for every requested incident
    pub vectors: BTreeMap<IncidentId, EmbeddingVector>,
    /// Incidents sent to the inference service by this call
    pub embedded: usize,
    /// Incidents that already had a current vector
    pub reused: usize,
    /// Inference requests issued
    pub batches: usize,
}

/// Text submitted for an incident: title, then a bounded description prefix.
pub fn embedding_text(incident: &Incident, description_chars: usize) -> String {
    format!(
        "{}. {}",
        incident.title,
        char_prefix(&incident.description, description_chars)
    )
}

pub struct Embedder {
    service: Arc<dyn InferenceService>,
    cache: Arc<dyn VectorCache>,
    config: EmbedderConfig,
}

impl Embedder {
    pub fn new(service: Arc<dyn InferenceService>, cache: Arc<dyn VectorCache>) -> Self {
        Self::with_config(service, cache, EmbedderConfig::default())
    }

    pub fn with_config(
        service: Arc<dyn InferenceService>,
        cache: Arc<dyn VectorCache>,
        config: EmbedderConfig,
    ) -> Self {
        Self {
            service,
            cache,
            config,
        }
    }

    pub fn config(&self) -> &EmbedderConfig {
        &self.config
    }

    /// Model tag attached to vectors produced by this embedder.
    pub fn model(&self) -> String {
        self.service.embedding_model()
    }

    /// Ensure every incident has a current vector and return them all.
    #[instrument(skip_all, fields(incidents = incidents.len()))]
    pub async fn embed(&self, incidents: &[Incident]) -> Result<EmbedOutcome> {
        let model = self.model();
        let by_id: BTreeMap<IncidentId, &Incident> =
            incidents.iter().map(|inc| (inc.id, inc)).collect();
        let ids: Vec<IncidentId> = by_id.keys().copied().collect();
        let missing = self.cache.missing(&ids, &model)?;

        let mut outcome = EmbedOutcome {
            reused: ids.len() - missing.len(),
            ..EmbedOutcome::default()
        };
        let batch_size = self.config.batch_size.max(1);

        for (batch_index, chunk) in missing.chunks(batch_size).enumerate() {
            let texts: Vec<String> = chunk
                .iter()
                .filter_map(|id| by_id.get(id))
                .map(|inc| embedding_text(inc, self.config.description_chars))
                .collect();
            let raw = self.service.embed_batch(&texts).await?;
            let vectors = self.validate_batch(chunk, raw, &model)?;
            self.cache.replace_many(&vectors)?;
            outcome.batches += 1;
            outcome.embedded += vectors.len();
            debug!(batch = batch_index, size = vectors.len(), model = %model, "Embedded batch");
            outcome
                .vectors
                .extend(vectors.into_iter().map(|v| (v.incident_id(), v)));
        }

        for vector in self.cache.get_many(&ids, &model)? {
            outcome.vectors.entry(vector.incident_id()).or_insert(vector);
        }

        info!(
            embedded = outcome.embedded,
            reused = outcome.reused,
            batches = outcome.batches,
            model = %model,
            "Embedding complete"
        );
        Ok(outcome)
    }

    fn validate_batch(
        &self,
        ids: &[IncidentId],
        raw: Vec<Vec<f32>>,
        model: &str,
    ) -> Result<Vec<EmbeddingVector>> {
        if raw.len() != ids.len() {
            return Err(malformed(format!(
                "expected {} embeddings, got {}",
                ids.len(),
                raw.len()
            )));
        }
        ids.iter()
            .zip(raw)
            .map(|(&id, values)| {
                if values.len() != self.config.dimension {
                    return Err(malformed(format!(
                        "embedding for incident {id} has dimension {}, expected {}",
                        values.len(),
                        self.config.dimension
                    )));
                }
                EmbeddingVector::new(id, model, values).map_err(malformed)
            })
            .collect()
    }
}

fn malformed(message: String) -> Error {
    Error::ServiceUnavailable(InferenceError::Malformed(message))
}
