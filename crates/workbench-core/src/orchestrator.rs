//! End-to-end clustering run.
//!
//! A run is a single sequence: resolve linkage, embed missing incidents,
//! cluster (fixed k or a silhouette sweep), name every cluster, then persist
//! the finished [`ClusterRun`] exactly once. Nothing is written before the
//! final save, so a failed run leaves no trace.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{Instrument, debug, info};

use crate::cache::VectorCache;
use crate::clustering::{
    AutoKSelector, HierarchicalClusterer, LinkageConfig, MIN_VECTORS, Partition, validate_names,
};
use crate::config::Config;
use crate::embedder::{EmbedOutcome, Embedder, EmbedderConfig};
use crate::error::{ConfigurationError, Error, Result};
use crate::inference::InferenceService;
use crate::model::{Cluster, ClusterRun, EmbeddingVector, Incident, IncidentId, RunRequest, RunResult};
use crate::namer::{ClusterNamer, NamerConfig};
use crate::retry::{RetryPolicy, with_retry};

/// Durable destination for finished runs.
///
/// `save_run` may block; the orchestrator calls it from the blocking pool.
pub trait RunSink: Send + Sync {
    /// Write the run and all its clusters atomically.
    fn save_run(&self, run: &ClusterRun) -> Result<()>;
}

/// Settings the orchestrator needs from [`Config`].
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub embedder: EmbedderConfig,
    pub naming: NamerConfig,
    pub selector: AutoKSelector,
    pub default_method: String,
    pub default_metric: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let linkage = LinkageConfig::default();
        Self {
            embedder: EmbedderConfig::default(),
            naming: NamerConfig::default(),
            selector: AutoKSelector::default(),
            default_method: linkage.method().as_str().to_string(),
            default_metric: linkage.metric().as_str().to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            embedder: config.embedder_config(),
            naming: config.naming,
            selector: config.clustering.selector()?,
            default_method: config.clustering.default_method.clone(),
            default_metric: config.clustering.default_metric.clone(),
        })
    }
}

pub struct Orchestrator {
    embedder: Embedder,
    namer: ClusterNamer,
    sink: Arc<dyn RunSink>,
    config: PipelineConfig,
    persist_policy: RetryPolicy,
}

impl Orchestrator {
    pub fn new(
        service: Arc<dyn InferenceService>,
        cache: Arc<dyn VectorCache>,
        sink: Arc<dyn RunSink>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            embedder: Embedder::with_config(Arc::clone(&service), cache, config.embedder),
            namer: ClusterNamer::with_config(service, config.naming),
            sink,
            config,
            persist_policy: RetryPolicy::db_write(),
        }
    }

    #[must_use]
    pub fn with_persist_policy(mut self, policy: RetryPolicy) -> Self {
        self.persist_policy = policy;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Resolve request overrides against configured defaults.
    pub fn resolve_linkage(&self, request: &RunRequest) -> Result<LinkageConfig> {
        let method = request.method.as_deref().unwrap_or(&self.config.default_method);
        let metric = request.metric.as_deref().unwrap_or(&self.config.default_metric);
        Ok(validate_names(method, metric)?)
    }

    /// Embed incidents without clustering them.
    pub async fn embed(&self, incidents: &[Incident]) -> Result<EmbedOutcome> {
        self.embedder.embed(incidents).await
    }

    /// Run the full pipeline over `incidents` and persist the result.
    pub async fn run(&self, incidents: &[Incident], request: RunRequest) -> Result<RunResult> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let span = crate::workbench_span!(
            "cluster_run",
            run_id = %run_id,
            incidents = incidents.len()
        );
        self.run_inner(run_id, incidents, request)
            .instrument(span)
            .await
    }

    async fn run_inner(
        &self,
        run_id: String,
        incidents: &[Incident],
        request: RunRequest,
    ) -> Result<RunResult> {
        let linkage = self.resolve_linkage(&request)?;
        if request.n_clusters == Some(0) {
            return Err(ConfigurationError::InvalidClusterCount(0).into());
        }

        let by_id: BTreeMap<IncidentId, &Incident> =
            incidents.iter().map(|inc| (inc.id, inc)).collect();
        if by_id.len() < MIN_VECTORS {
            return Err(Error::insufficient(MIN_VECTORS, by_id.len(), "incidents to cluster"));
        }

        let outcome = self.embedder.embed(incidents).await?;
        let vectors: Vec<EmbeddingVector> = outcome.vectors.into_values().collect();
        self.check_sufficiency(vectors.len(), request.n_clusters)?;

        let (partition, quality_score) =
            cluster_blocking(linkage, self.config.selector, vectors, request.n_clusters).await?;
        info!(
            k = partition.k(),
            score = ?quality_score,
            method = %linkage.method(),
            metric = %linkage.metric(),
            "Clustered incidents"
        );

        let mut clusters = Vec::with_capacity(partition.k());
        for (label, incident_ids) in partition.groups() {
            let members: Vec<(String, String)> = incident_ids
                .iter()
                .filter_map(|id| by_id.get(id))
                .map(|inc| (inc.title.clone(), inc.description.clone()))
                .collect();
            let named = self.namer.name(label, &members).await;
            debug!(label, size = incident_ids.len(), generated = named.generated, "Cluster named");
            clusters.push(Cluster {
                label,
                name: Some(named.name),
                summary: Some(named.summary),
                incident_ids,
            });
        }

        let run = ClusterRun {
            run_id,
            requested_k: request.n_clusters,
            method: linkage.method(),
            metric: linkage.metric(),
            k: partition.k(),
            quality_score,
            created_at: Utc::now(),
            clusters,
        };
        let run = Arc::new(run);
        with_retry(&self.persist_policy, || {
            persist_blocking(Arc::clone(&self.sink), Arc::clone(&run))
        })
        .await?;
        info!(k = run.k, incidents = run.incident_count(), "Cluster run complete");
        Ok(RunResult::from(run.as_ref()))
    }

    fn check_sufficiency(&self, n: usize, requested_k: Option<usize>) -> Result<()> {
        if n < MIN_VECTORS {
            return Err(Error::insufficient(MIN_VECTORS, n, "embedded incidents"));
        }
        match requested_k {
            Some(k) if k > n => Err(Error::insufficient(k, n, "embedded incidents for the requested k")),
            Some(_) => Ok(()),
            None if n < self.config.selector.min_vectors() => Err(Error::insufficient(
                self.config.selector.min_vectors(),
                n,
                "embedded incidents for automatic k selection",
            )),
            None => Ok(()),
        }
    }
}

/// Cluster an owned copy of the vectors off the async executor.
async fn cluster_blocking(
    linkage: LinkageConfig,
    selector: AutoKSelector,
    vectors: Vec<EmbeddingVector>,
    requested_k: Option<usize>,
) -> Result<(Partition, Option<f64>)> {
    tokio::task::spawn_blocking(move || {
        let clusterer = HierarchicalClusterer::new(linkage);
        let prepared = clusterer.prepare(&vectors)?;
        match requested_k {
            Some(k) => {
                let partition = prepared.partition(k);
                let score = if (2..prepared.len()).contains(&k) {
                    prepared.silhouette(&partition)
                } else {
                    None
                };
                Ok((partition, score))
            }
            None => {
                let selection = selector.select_prepared(&prepared)?;
                Ok((selection.partition, Some(selection.best_score)))
            }
        }
    })
    .await
    .map_err(|err| Error::Runtime(format!("clustering task failed: {err}")))?
}

/// Write a run on the blocking pool; a SQLite sink holds its connection lock
/// for the whole transaction.
async fn persist_blocking(sink: Arc<dyn RunSink>, run: Arc<ClusterRun>) -> Result<()> {
    tokio::task::spawn_blocking(move || sink.save_run(&run))
        .await
        .map_err(|err| Error::Runtime(format!("persist task failed: {err}")))?
}
