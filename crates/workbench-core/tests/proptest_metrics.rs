//! Property-based tests for the metrics module.
//!
//! Covers percentile bounds and monotonicity, severity bookkeeping,
//! and resolution statistics over arbitrary incident sets.

use chrono::{TimeZone, Utc};
use proptest::prelude::*;

use workbench_core::metrics::{MetricsCalculator, percentile};
use workbench_core::model::{Incident, Severity};

// =============================================================================
// Strategies
// =============================================================================

fn arb_severity() -> impl Strategy<Value = Severity> {
    prop_oneof![
        Just(Severity::Sev1),
        Just(Severity::Sev2),
        Just(Severity::Sev3),
        Just(Severity::Sev4),
        Just(Severity::Unknown),
    ]
}

/// Resolution offset in seconds; negative offsets model clock skew.
fn arb_resolution() -> impl Strategy<Value = Option<i64>> {
    prop_oneof![
        2 => Just(None),
        7 => (0i64..2_000_000).prop_map(Some),
        1 => (-10_000i64..0).prop_map(Some),
    ]
}

fn arb_incident() -> impl Strategy<Value = Incident> {
    (
        1i64..1_000_000,
        1_600_000_000i64..1_800_000_000,
        arb_resolution(),
        arb_severity(),
        prop::option::of("[a-z]{1,8}"),
    )
        .prop_map(|(id, occurred, resolution, severity, assignee)| {
            let occurred_at = Utc.timestamp_opt(occurred, 0).unwrap();
            Incident {
                id,
                title: format!("incident {id}"),
                description: String::new(),
                occurred_at,
                resolved_at: resolution.map(|s| occurred_at + chrono::Duration::seconds(s)),
                severity,
                assignee,
                status: None,
                project: None,
            }
        })
}

fn arb_sorted_values() -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(-1.0e6f64..1.0e6, 1..50).prop_map(|mut v| {
        v.sort_by(f64::total_cmp);
        v
    })
}

// =============================================================================
// Percentile
// =============================================================================

proptest! {
    #[test]
    fn proptest_percentile_within_bounds(values in arb_sorted_values(), p in 0.0f64..=1.0) {
        let result = percentile(&values, p).unwrap();
        prop_assert!(result >= values[0]);
        prop_assert!(result <= values[values.len() - 1]);
    }

    #[test]
    fn proptest_percentile_monotone_in_p(
        values in arb_sorted_values(),
        a in 0.0f64..=1.0,
        b in 0.0f64..=1.0,
    ) {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        let at_lo = percentile(&values, lo).unwrap();
        let at_hi = percentile(&values, hi).unwrap();
        prop_assert!(at_lo <= at_hi + 1e-6);
    }
}

// =============================================================================
// Calculator
// =============================================================================

proptest! {
    #[test]
    fn proptest_counts_are_consistent(
        incidents in prop::collection::vec(arb_incident(), 0..40),
    ) {
        let m = MetricsCalculator::new().compute(&incidents);
        prop_assert_eq!(m.total_incidents, incidents.len());
        prop_assert_eq!(
            m.sev1_count + m.sev2_count + m.sev3_count + m.sev4_count + m.unknown_count,
            incidents.len()
        );
        prop_assert_eq!(m.by_severity.values().sum::<usize>(), incidents.len());
        prop_assert_eq!(m.by_month.values().sum::<usize>(), incidents.len());
        prop_assert!(m.by_assignee.values().sum::<usize>() <= incidents.len());
        prop_assert!(m.resolved_incidents <= incidents.len());
    }

    #[test]
    fn proptest_resolution_stats_are_ordered(
        incidents in prop::collection::vec(arb_incident(), 0..40),
    ) {
        let m = MetricsCalculator::new().compute(&incidents);
        let hours: Vec<f64> = incidents
            .iter()
            .filter_map(Incident::resolution_seconds)
            .map(|s| s / 3600.0)
            .collect();
        prop_assert_eq!(m.resolved_incidents, hours.len());
        if hours.is_empty() {
            prop_assert!(m.mean_resolution_hours.is_none());
            prop_assert!(m.p90_resolution_hours.is_none());
        } else {
            let min = hours.iter().copied().fold(f64::INFINITY, f64::min);
            let max = hours.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let mean = m.mean_resolution_hours.unwrap();
            let p50 = m.p50_resolution_hours.unwrap();
            let p90 = m.p90_resolution_hours.unwrap();
            prop_assert!(min >= 0.0);
            prop_assert!(mean >= min - 1e-9 && mean <= max + 1e-9);
            prop_assert!(p50 <= p90 + 1e-9);
            prop_assert!(p90 <= max + 1e-9);
            prop_assert_eq!(m.median_resolution_hours, m.p50_resolution_hours);
        }
    }
}
