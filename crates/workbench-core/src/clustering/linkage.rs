//! Linkage methods, distance metrics, and the pairing rule between them.
//!
//! Ward linkage minimizes within-cluster variance, which is only meaningful
//! for Euclidean distances. [`validate`] is the only way to obtain a
//! [`LinkageConfig`], so an invalid pairing never reaches the clusterer.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

/// Rule for the distance between two clusters during merging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkageMethod {
    /// Mean pairwise distance between members
    Average,
    /// Maximum pairwise distance
    Complete,
    /// Minimum pairwise distance
    Single,
    /// Increase in within-cluster variance (Euclidean only)
    Ward,
}

impl LinkageMethod {
    pub const ALL: [Self; 4] = [Self::Average, Self::Complete, Self::Single, Self::Ward];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Average => "average",
            Self::Complete => "complete",
            Self::Single => "single",
            Self::Ward => "ward",
        }
    }
}

impl fmt::Display for LinkageMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LinkageMethod {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "average" => Ok(Self::Average),
            "complete" => Ok(Self::Complete),
            "single" => Ok(Self::Single),
            "ward" => Ok(Self::Ward),
            _ => Err(ConfigurationError::UnknownMethod(s.to_string())),
        }
    }
}

/// Dissimilarity between two vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    /// 1 - cosine similarity
    Cosine,
    /// L2 norm of the difference
    Euclidean,
}

impl DistanceMetric {
    pub const ALL: [Self; 2] = [Self::Cosine, Self::Euclidean];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cosine => "cosine",
            Self::Euclidean => "euclidean",
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DistanceMetric {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cosine" => Ok(Self::Cosine),
            "euclidean" => Ok(Self::Euclidean),
            _ => Err(ConfigurationError::UnknownMetric(s.to_string())),
        }
    }
}

/// A (method, metric) pair that passed [`validate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkageConfig {
    method: LinkageMethod,
    metric: DistanceMetric,
}

impl LinkageConfig {
    pub fn method(self) -> LinkageMethod {
        self.method
    }

    pub fn metric(self) -> DistanceMetric {
        self.metric
    }
}

impl Default for LinkageConfig {
    fn default() -> Self {
        Self {
            method: LinkageMethod::Average,
            metric: DistanceMetric::Cosine,
        }
    }
}

impl fmt::Display for LinkageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.method, self.metric)
    }
}

/// Check a (method, metric) pair before any distance computation.
pub fn validate(
    method: LinkageMethod,
    metric: DistanceMetric,
) -> Result<LinkageConfig, ConfigurationError> {
    if method == LinkageMethod::Ward && metric != DistanceMetric::Euclidean {
        return Err(ConfigurationError::WardRequiresEuclidean {
            metric: metric.to_string(),
        });
    }
    Ok(LinkageConfig { method, metric })
}

/// Parse and validate string names as they arrive from a run request.
pub fn validate_names(method: &str, metric: &str) -> Result<LinkageConfig, ConfigurationError> {
    validate(method.parse()?, metric.parse()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ward_with_cosine_is_rejected() {
        let err = validate(LinkageMethod::Ward, DistanceMetric::Cosine).unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::WardRequiresEuclidean {
                metric: "cosine".to_string()
            }
        );
    }

    #[test]
    fn ward_with_euclidean_is_accepted() {
        let cfg = validate(LinkageMethod::Ward, DistanceMetric::Euclidean).unwrap();
        assert_eq!(cfg.method(), LinkageMethod::Ward);
        assert_eq!(cfg.metric(), DistanceMetric::Euclidean);
    }

    #[test]
    fn every_non_ward_pair_is_accepted() {
        for method in [LinkageMethod::Average, LinkageMethod::Complete, LinkageMethod::Single] {
            for metric in DistanceMetric::ALL {
                assert!(validate(method, metric).is_ok(), "{method}/{metric}");
            }
        }
    }

    #[test]
    fn names_parse_case_insensitively() {
        let cfg = validate_names("Average", " COSINE ").unwrap();
        assert_eq!(cfg, LinkageConfig::default());
        assert_eq!(cfg.to_string(), "average/cosine");
    }

    #[test]
    fn unknown_names_are_configuration_errors() {
        assert_eq!(
            validate_names("median", "cosine").unwrap_err(),
            ConfigurationError::UnknownMethod("median".to_string())
        );
        assert_eq!(
            validate_names("average", "manhattan").unwrap_err(),
            ConfigurationError::UnknownMetric("manhattan".to_string())
        );
        assert!(matches!(
            validate_names("ward", "cosine"),
            Err(ConfigurationError::WardRequiresEuclidean { .. })
        ));
    }

    #[test]
    fn serde_uses_lowercase_names() {
        assert_eq!(
            serde_json::to_string(&LinkageMethod::Complete).unwrap(),
            "\"complete\""
        );
        let metric: DistanceMetric = serde_json::from_str("\"euclidean\"").unwrap();
        assert_eq!(metric, DistanceMetric::Euclidean);
    }
}
