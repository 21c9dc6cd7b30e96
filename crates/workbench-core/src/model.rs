//! Domain types: incidents, embeddings, cluster runs.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clustering::{DistanceMetric, LinkageMethod};

/// Stable incident identity assigned by upstream ingestion.
pub type IncidentId = i64;

/// Incident severity, ordered from most to least severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum Severity {
    #[serde(rename = "SEV1")]
    Sev1,
    #[serde(rename = "SEV2")]
    Sev2,
    #[serde(rename = "SEV3")]
    Sev3,
    #[serde(rename = "SEV4")]
    Sev4,
    #[default]
    #[serde(rename = "UNKNOWN")]
    Unknown,
}

impl Severity {
    pub const ALL: [Self; 5] = [Self::Sev1, Self::Sev2, Self::Sev3, Self::Sev4, Self::Unknown];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sev1 => "SEV1",
            Self::Sev2 => "SEV2",
            Self::Sev3 => "SEV3",
            Self::Sev4 => "SEV4",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SEV1" | "1" => Ok(Self::Sev1),
            "SEV2" | "2" => Ok(Self::Sev2),
            "SEV3" | "3" => Ok(Self::Sev3),
            "SEV4" | "4" => Ok(Self::Sev4),
            "UNKNOWN" | "" => Ok(Self::Unknown),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}

/// A short incident record. Never mutated by the clustering core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub id: IncidentId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub occurred_at: DateTime<Utc>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub assignee: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    /// Ticket project key, when the source system has one
    #[serde(default)]
    pub project: Option<String>,
}

impl Incident {
    /// Resolution duration in seconds, if resolved and not clock-skewed.
    #[must_use]
    pub fn resolution_seconds(&self) -> Option<f64> {
        let resolved = self.resolved_at?;
        let millis = resolved.signed_duration_since(self.occurred_at).num_milliseconds();
        if millis < 0 {
            return None;
        }
        Some(millis as f64 / 1000.0)
    }
}

/// Truncate to at most `max_chars` characters on a char boundary.
#[must_use]
pub fn char_prefix(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// A fixed-length vector produced for one incident by one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingVector {
    incident_id: IncidentId,
    model: String,
    values: Vec<f32>,
}

impl EmbeddingVector {
    /// Build a vector, rejecting empty or non-finite values.
    pub fn new(
        incident_id: IncidentId,
        model: impl Into<String>,
        values: Vec<f32>,
    ) -> Result<Self, String> {
        if values.is_empty() {
            return Err(format!("embedding for incident {incident_id} is empty"));
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(format!(
                "embedding for incident {incident_id} contains non-finite values"
            ));
        }
        Ok(Self {
            incident_id,
            model: model.into(),
            values,
        })
    }

    pub fn incident_id(&self) -> IncidentId {
        self.incident_id
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }
}

/// One group of a flat partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    /// Dense label, unique within its run
    pub label: usize,
    pub name: Option<String>,
    pub summary: Option<String>,
    /// Member incidents, sorted ascending
    pub incident_ids: Vec<IncidentId>,
}

impl Cluster {
    pub fn size(&self) -> usize {
        self.incident_ids.len()
    }
}

/// One completed execution of the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterRun {
    pub run_id: String,
    /// `None` means k was selected automatically
    pub requested_k: Option<usize>,
    pub method: LinkageMethod,
    pub metric: DistanceMetric,
    pub k: usize,
    pub quality_score: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub clusters: Vec<Cluster>,
}

impl ClusterRun {
    /// Every member across all clusters.
    pub fn member_ids(&self) -> BTreeSet<IncidentId> {
        self.clusters
            .iter()
            .flat_map(|c| c.incident_ids.iter().copied())
            .collect()
    }

    pub fn incident_count(&self) -> usize {
        self.clusters.iter().map(Cluster::size).sum()
    }
}

/// Run parameters as received from the orchestration layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRequest {
    #[serde(default)]
    pub n_clusters: Option<usize>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub metric: Option<String>,
}

/// Cluster as reported back to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSummary {
    pub label: usize,
    pub name: String,
    pub summary: String,
    pub incident_ids: Vec<IncidentId>,
}

/// Run outcome as reported back to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: String,
    pub resolved_method: LinkageMethod,
    pub resolved_metric: DistanceMetric,
    pub resolved_k: usize,
    pub quality_score: Option<f64>,
    pub clusters: Vec<ClusterSummary>,
}

impl From<&ClusterRun> for RunResult {
    fn from(run: &ClusterRun) -> Self {
        Self {
            run_id: run.run_id.clone(),
            resolved_method: run.method,
            resolved_metric: run.metric,
            resolved_k: run.k,
            quality_score: run.quality_score,
            clusters: run
                .clusters
                .iter()
                .map(|c| ClusterSummary {
                    label: c.label,
                    name: c
                        .name
                        .clone()
                        .unwrap_or_else(|| format!("Cluster {}", c.label)),
                    summary: c.summary.clone().unwrap_or_default(),
                    incident_ids: c.incident_ids.clone(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn incident(occurred: (u32, u32), resolved: Option<(u32, u32)>) -> Incident {
        Incident {
            id: 1,
            title: "t".into(),
            description: String::new(),
            occurred_at: Utc.with_ymd_and_hms(2024, 1, occurred.0, occurred.1, 0, 0).unwrap(),
            resolved_at: resolved
                .map(|(d, h)| Utc.with_ymd_and_hms(2024, 1, d, h, 0, 0).unwrap()),
            severity: Severity::Sev2,
            assignee: None,
            status: None,
            project: None,
        }
    }

    #[test]
    fn severity_parse_and_order() {
        assert_eq!("sev1".parse::<Severity>().unwrap(), Severity::Sev1);
        assert_eq!("3".parse::<Severity>().unwrap(), Severity::Sev3);
        assert_eq!("".parse::<Severity>().unwrap(), Severity::Unknown);
        assert!("p0".parse::<Severity>().is_err());
        assert!(Severity::Sev1 < Severity::Sev4);
        assert_eq!(
            serde_json::to_string(&Severity::Sev2).unwrap(),
            "\"SEV2\""
        );
    }

    #[test]
    fn resolution_seconds() {
        assert_eq!(incident((1, 0), Some((1, 2))).resolution_seconds(), Some(7200.0));
        assert_eq!(incident((1, 0), None).resolution_seconds(), None);
        assert_eq!(incident((2, 0), Some((1, 0))).resolution_seconds(), None);
    }

    #[test]
    fn char_prefix_respects_boundaries() {
        assert_eq!(char_prefix("héllo", 2), "hé");
        assert_eq!(char_prefix("abc", 10), "abc");
        assert_eq!(char_prefix("abc", 0), "");
    }

    #[test]
    fn embedding_vector_rejects_bad_values() {
        assert!(EmbeddingVector::new(1, "m", vec![]).is_err());
        assert!(EmbeddingVector::new(1, "m", vec![f32::NAN]).is_err());
        let v = EmbeddingVector::new(7, "m", vec![0.5, 0.5]).unwrap();
        assert_eq!(v.incident_id(), 7);
        assert_eq!(v.dimension(), 2);
        assert_eq!(v.model(), "m");
    }

    #[test]
    fn run_result_fills_fallback_names() {
        let run = ClusterRun {
            run_id: "r".into(),
            requested_k: None,
            method: LinkageMethod::Average,
            metric: DistanceMetric::Cosine,
            k: 1,
            quality_score: None,
            created_at: Utc::now(),
            clusters: vec![Cluster {
                label: 0,
                name: None,
                summary: None,
                incident_ids: vec![1, 2],
            }],
        };
        let result = RunResult::from(&run);
        assert_eq!(result.clusters[0].name, "Cluster 0");
        assert_eq!(result.clusters[0].summary, "");
        assert_eq!(run.incident_count(), 2);
    }

    #[test]
    fn incident_deserializes_with_defaults() {
        let json = r#"{"id": 3, "title": "API down", "occurred_at": "2024-03-01T10:00:00Z"}"#;
        let inc: Incident = serde_json::from_str(json).unwrap();
        assert_eq!(inc.severity, Severity::Unknown);
        assert!(inc.description.is_empty());
        assert!(inc.resolved_at.is_none());
    }
}
