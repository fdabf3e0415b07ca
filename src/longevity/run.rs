//! Run Results Document
//!
//! The `results.json` payload of a run. It is written once, at persistence,
//! and re-read verbatim by report retrieval; predictions and metrics never
//! drift between reads.

use crate::longevity::features::{Feature, FeatureRow};
use crate::longevity::metrics::{LdropMetrics, RaScoreDeltas};
use crate::longevity::run_id::RunId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where the training target came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetSource {
    /// The caller supplied a numeric `target` column.
    Supplied,
    /// No labels: `0.8 * first_feature + 0.1` stand-in. Predictions carry no
    /// real predictive value.
    Synthetic,
}

impl TargetSource {
    pub fn is_synthetic(&self) -> bool {
        matches!(self, Self::Synthetic)
    }
}

/// Full results document for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResults {
    pub run_id: RunId,
    pub timestamp: DateTime<Utc>,
    pub mode: String,
    pub row_count: usize,
    /// Regressor identifier (e.g. `random_forest`).
    pub model: String,
    pub target_source: TargetSource,
    /// Features used for fitting, canonical order.
    pub features: Vec<Feature>,
    pub predictions: Vec<f64>,
    pub ldrop_metrics: LdropMetrics,
    pub ra_score_deltas: RaScoreDeltas,
    pub encoded_data: Vec<FeatureRow>,
}
