//! Run configuration for the grid pipeline.
//!
//! Every field has a default, so an empty JSON object `{}` is a complete
//! configuration. Unknown keys are rejected to catch typos in input decks.

use crate::mesh_error::MeshError;
use crate::partitioning::PartitionerConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Cell-to-node weighting.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeAveraging {
    Arithmetic,
    InverseDistance,
    #[default]
    InverseDistanceSquared,
}

/// Source of face-centroid values.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaceAveraging {
    /// Average of the face's node values.
    #[default]
    NodeBased,
    /// Distance-weighted blend of the two adjacent cell values.
    CellBased,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GradientScheme {
    #[default]
    GreenGauss,
    LeastSquares,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlopeLimiter {
    #[default]
    BarthJespersen,
    Venkatakrishnan,
    MinMod,
    Unlimited,
}

/// What to do when a solver update produces a non-finite value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DivergencePolicy {
    /// Log and terminate every rank.
    #[default]
    Abort,
    /// Return the error to the caller and leave the state untouched.
    FailStep,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GridConfig {
    /// Uniform factor applied to node coordinates on ingestion.
    pub scale: f64,
    pub partitioner: PartitionerConfig,
    pub node_averaging: NodeAveraging,
    pub face_averaging: FaceAveraging,
    pub gradient_scheme: GradientScheme,
    pub limiter: SlopeLimiter,
    /// Venkatakrishnan smoothness constant `K`.
    pub venkatakrishnan_k: f64,
    /// Relative tolerance of the per-cell closure check.
    pub closure_tolerance: f64,
    pub divergence_policy: DivergencePolicy,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            scale: 1.0,
            partitioner: PartitionerConfig::default(),
            node_averaging: NodeAveraging::default(),
            face_averaging: FaceAveraging::default(),
            gradient_scheme: GradientScheme::default(),
            limiter: SlopeLimiter::default(),
            venkatakrishnan_k: 5.0,
            closure_tolerance: 1e-10,
            divergence_policy: DivergencePolicy::default(),
        }
    }
}

impl GridConfig {
    pub fn from_json(text: &str) -> Result<Self, MeshError> {
        let cfg: GridConfig =
            serde_json::from_str(text).map_err(|e| MeshError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, MeshError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text).map_err(|e| match e {
            MeshError::Config(msg) => MeshError::Config(format!("{}: {msg}", path.display())),
            other => other,
        })
    }

    pub fn validate(&self) -> Result<(), MeshError> {
        if !(self.scale.is_finite() && self.scale > 0.0) {
            return Err(MeshError::Config(format!(
                "scale must be positive and finite, got {}",
                self.scale
            )));
        }
        if !(self.closure_tolerance >= 0.0) {
            return Err(MeshError::Config("closure_tolerance must be non-negative".into()));
        }
        if !(self.venkatakrishnan_k >= 0.0) {
            return Err(MeshError::Config("venkatakrishnan_k must be non-negative".into()));
        }
        if !(self.partitioner.imbalance_tolerance >= 0.0) {
            return Err(MeshError::Config(
                "partitioner.imbalance_tolerance must be non-negative".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_is_the_default() {
        assert_eq!(GridConfig::from_json("{}").unwrap(), GridConfig::default());
    }

    #[test]
    fn snake_case_knobs() {
        let cfg = GridConfig::from_json(
            r#"{"node_averaging": "arithmetic", "limiter": "venkatakrishnan",
                "partitioner": {"imbalance_tolerance": 0.1}, "divergence_policy": "fail_step"}"#,
        )
        .unwrap();
        assert_eq!(cfg.node_averaging, NodeAveraging::Arithmetic);
        assert_eq!(cfg.limiter, SlopeLimiter::Venkatakrishnan);
        assert_eq!(cfg.partitioner.imbalance_tolerance, 0.1);
        assert_eq!(cfg.partitioner.refinement_passes, PartitionerConfig::default().refinement_passes);
        assert_eq!(cfg.divergence_policy, DivergencePolicy::FailStep);
    }

    #[test]
    fn rejects_typos_and_bad_values() {
        assert!(matches!(GridConfig::from_json(r#"{"scael": 2}"#), Err(MeshError::Config(_))));
        assert!(GridConfig::from_json(r#"{"scale": -1.0}"#).is_err());
    }
}
