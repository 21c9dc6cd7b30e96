//! Resolution-time statistics and categorical breakdowns.
//!
//! Pure over an incident slice; independent of clustering.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::{ClusterRun, Incident, IncidentId, Severity};

const SECONDS_PER_HOUR: f64 = 3600.0;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsResult {
    pub total_incidents: usize,
    /// Incidents with a usable resolution duration
    pub resolved_incidents: usize,
    pub sev1_count: usize,
    pub sev2_count: usize,
    pub sev3_count: usize,
    pub sev4_count: usize,
    pub unknown_count: usize,
    pub mean_resolution_hours: Option<f64>,
    pub median_resolution_hours: Option<f64>,
    pub p50_resolution_hours: Option<f64>,
    pub p90_resolution_hours: Option<f64>,
    /// Mean resolution hours per severity, only for severities with data
    pub mttr_by_severity: BTreeMap<String, f64>,
    pub by_severity: BTreeMap<String, usize>,
    pub by_status: BTreeMap<String, usize>,
    /// Keyed by `YYYY-MM` of `occurred_at`
    pub by_month: BTreeMap<String, usize>,
    pub by_assignee: BTreeMap<String, usize>,
    pub by_project: BTreeMap<String, usize>,
}

/// Linear-interpolation percentile over ascending `sorted`, `p` in `[0, 1]`.
///
/// The result is clamped to `[min, max]` of the input.
pub fn percentile(sorted: &[f64], p: f64) -> Option<f64> {
    let (&first, &last) = (sorted.first()?, sorted.last()?);
    let rank = p.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let value = sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64);
    Some(value.clamp(first, last))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsCalculator;

impl MetricsCalculator {
    pub fn new() -> Self {
        Self
    }

    /// Metrics over every incident in `incidents`.
    pub fn compute(&self, incidents: &[Incident]) -> MetricsResult {
        let mut result = MetricsResult {
            total_incidents: incidents.len(),
            ..MetricsResult::default()
        };
        let mut durations = Vec::new();
        let mut by_severity_durations: BTreeMap<Severity, Vec<f64>> = BTreeMap::new();

        for incident in incidents {
            *result
                .by_severity
                .entry(incident.severity.as_str().to_string())
                .or_default() += 1;
            match incident.severity {
                Severity::Sev1 => result.sev1_count += 1,
                Severity::Sev2 => result.sev2_count += 1,
                Severity::Sev3 => result.sev3_count += 1,
                Severity::Sev4 => result.sev4_count += 1,
                Severity::Unknown => result.unknown_count += 1,
            }
            count_nonempty(&mut result.by_status, incident.status.as_deref());
            count_nonempty(&mut result.by_assignee, incident.assignee.as_deref());
            count_nonempty(&mut result.by_project, incident.project.as_deref());
            *result
                .by_month
                .entry(incident.occurred_at.format("%Y-%m").to_string())
                .or_default() += 1;

            if let Some(seconds) = incident.resolution_seconds() {
                durations.push(seconds);
                by_severity_durations
                    .entry(incident.severity)
                    .or_default()
                    .push(seconds);
            }
        }

        durations.sort_by(f64::total_cmp);
        result.resolved_incidents = durations.len();
        result.mean_resolution_hours = mean(&durations).map(|s| s / SECONDS_PER_HOUR);
        result.p50_resolution_hours = percentile(&durations, 0.5).map(|s| s / SECONDS_PER_HOUR);
        result.median_resolution_hours = result.p50_resolution_hours;
        result.p90_resolution_hours = percentile(&durations, 0.9).map(|s| s / SECONDS_PER_HOUR);
        result.mttr_by_severity = by_severity_durations
            .into_iter()
            .filter_map(|(sev, values)| {
                mean(&values).map(|s| (sev.as_str().to_string(), s / SECONDS_PER_HOUR))
            })
            .collect();
        result
    }

    /// Metrics over the incidents whose id is in `ids`.
    pub fn compute_for(&self, incidents: &[Incident], ids: &[IncidentId]) -> MetricsResult {
        let subset: Vec<Incident> = incidents
            .iter()
            .filter(|inc| ids.contains(&inc.id))
            .cloned()
            .collect();
        self.compute(&subset)
    }

    /// Metrics for each cluster of a run, keyed by label.
    pub fn compute_per_cluster(
        &self,
        run: &ClusterRun,
        incidents: &[Incident],
    ) -> BTreeMap<usize, MetricsResult> {
        run.clusters
            .iter()
            .map(|cluster| (cluster.label, self.compute_for(incidents, &cluster.incident_ids)))
            .collect()
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

fn count_nonempty(counts: &mut BTreeMap<String, usize>, key: Option<&str>) {
    if let Some(key) = key.map(str::trim).filter(|k| !k.is_empty()) {
        *counts.entry(key.to_string()).or_default() += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn incident(
        id: IncidentId,
        severity: Severity,
        month: u32,
        hours: Option<i64>,
        status: Option<&str>,
        assignee: Option<&str>,
    ) -> Incident {
        let occurred_at = Utc.with_ymd_and_hms(2024, month, 1, 0, 0, 0).unwrap();
        Incident {
            id,
            title: format!("incident {id}"),
            description: String::new(),
            occurred_at,
            resolved_at: hours.map(|h| occurred_at + chrono::Duration::hours(h)),
            severity,
            assignee: assignee.map(str::to_string),
            status: status.map(str::to_string),
            project: Some("OPS".to_string()),
        }
    }

    #[test]
    fn percentile_interpolates_and_clamps() {
        let data = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(percentile(&data, 0.5), Some(2.5));
        assert!((percentile(&data, 0.9).unwrap() - 3.7).abs() < 1e-12);
        assert_eq!(percentile(&data, 0.0), Some(1.0));
        assert_eq!(percentile(&data, 1.0), Some(4.0));
        assert_eq!(percentile(&data, 7.0), Some(4.0));
        assert_eq!(percentile(&[5.0], 0.9), Some(5.0));
        assert_eq!(percentile(&[], 0.5), None);
    }

    #[test]
    fn durations_and_breakdowns() {
        let incidents = vec![
            incident(1, Severity::Sev1, 1, Some(2), Some("Done"), Some("ana")),
            incident(2, Severity::Sev1, 1, Some(4), Some("Done"), Some("ben")),
            incident(3, Severity::Sev2, 2, Some(10), Some("Done"), Some("ana")),
            incident(4, Severity::Sev3, 2, None, Some("Open"), None),
            incident(5, Severity::Unknown, 3, None, None, Some("")),
        ];
        let m = MetricsCalculator::new().compute(&incidents);

        assert_eq!(m.total_incidents, 5);
        assert_eq!(m.resolved_incidents, 3);
        assert_eq!((m.sev1_count, m.sev2_count, m.sev3_count), (2, 1, 1));
        assert_eq!(m.unknown_count, 1);
        assert!((m.mean_resolution_hours.unwrap() - 16.0 / 3.0).abs() < 1e-9);
        assert_eq!(m.median_resolution_hours, Some(4.0));
        assert_eq!(m.p50_resolution_hours, m.median_resolution_hours);
        assert!((m.p90_resolution_hours.unwrap() - 8.8).abs() < 1e-9);

        assert_eq!(m.mttr_by_severity["SEV1"], 3.0);
        assert_eq!(m.mttr_by_severity["SEV2"], 10.0);
        assert!(!m.mttr_by_severity.contains_key("SEV3"));

        assert_eq!(m.by_severity["SEV1"], 2);
        assert_eq!(m.by_status["Done"], 3);
        assert_eq!(m.by_status.len(), 2);
        assert_eq!(m.by_month["2024-01"], 2);
        assert_eq!(m.by_month["2024-03"], 1);
        assert_eq!(m.by_assignee["ana"], 2);
        assert_eq!(m.by_assignee.len(), 2);
        assert_eq!(m.by_project["OPS"], 5);
    }

    #[test]
    fn negative_durations_are_excluded() {
        let mut skewed = incident(1, Severity::Sev2, 5, Some(1), None, None);
        skewed.resolved_at = Some(skewed.occurred_at - chrono::Duration::hours(3));
        let m = MetricsCalculator::new().compute(&[skewed]);
        assert_eq!(m.total_incidents, 1);
        assert_eq!(m.resolved_incidents, 0);
        assert_eq!(m.mean_resolution_hours, None);
        assert!(m.mttr_by_severity.is_empty());
    }

    #[test]
    fn empty_input() {
        let m = MetricsCalculator::new().compute(&[]);
        assert_eq!(m, MetricsResult::default());
    }

    #[test]
    fn compute_for_filters_by_id() {
        let incidents = vec![
            incident(1, Severity::Sev1, 1, Some(1), None, None),
            incident(2, Severity::Sev2, 1, Some(3), None, None),
        ];
        let m = MetricsCalculator::new().compute_for(&incidents, &[2]);
        assert_eq!(m.total_incidents, 1);
        assert_eq!(m.mean_resolution_hours, Some(3.0));
    }

    #[test]
    fn per_cluster_metrics_follow_membership() {
        use crate::clustering::{DistanceMetric, LinkageMethod};
        use crate::model::Cluster;

        let incidents = vec![
            incident(1, Severity::Sev1, 1, Some(2), None, None),
            incident(2, Severity::Sev2, 1, Some(4), None, None),
            incident(3, Severity::Sev2, 2, None, None, None),
        ];
        let cluster = |label, ids: Vec<IncidentId>| Cluster {
            label,
            name: None,
            summary: None,
            incident_ids: ids,
        };
        let run = ClusterRun {
            run_id: "r".into(),
            requested_k: Some(2),
            method: LinkageMethod::Average,
            metric: DistanceMetric::Cosine,
            k: 2,
            quality_score: None,
            created_at: Utc::now(),
            clusters: vec![cluster(0, vec![1, 2]), cluster(1, vec![3])],
        };
        let per_cluster = MetricsCalculator::new().compute_per_cluster(&run, &incidents);
        assert_eq!(per_cluster.len(), 2);
        assert_eq!(per_cluster[&0].mean_resolution_hours, Some(3.0));
        assert_eq!(per_cluster[&1].total_incidents, 1);
        assert_eq!(per_cluster[&1].resolved_incidents, 0);
    }
}
