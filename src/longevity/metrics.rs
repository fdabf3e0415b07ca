//! L-drop Metrics and RA Score Deltas
//!
//! Plain descriptive statistics. `LdropMetrics` looks only at the prediction
//! vector; `RaScoreDeltas` looks only at the encoded feature columns.

use crate::longevity::features::{EncodedTable, Feature};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

/// Predictions strictly below this value count toward the L-drop.
pub const LDROP_THRESHOLD: f64 = 0.5;

/// Summary of prediction quality and spread.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LdropMetrics {
    pub mean_prediction: f64,
    /// Sample standard deviation (0 with fewer than two predictions).
    pub std_prediction: f64,
    pub min_prediction: f64,
    pub max_prediction: f64,
    pub ldrop_threshold: f64,
    pub samples_below_threshold: usize,
}

impl LdropMetrics {
    pub fn from_predictions(predictions: &[f64]) -> Self {
        if predictions.is_empty() {
            return Self {
                mean_prediction: 0.0,
                std_prediction: 0.0,
                min_prediction: 0.0,
                max_prediction: 0.0,
                ldrop_threshold: LDROP_THRESHOLD,
                samples_below_threshold: 0,
            };
        }

        let std_prediction = if predictions.len() < 2 {
            0.0
        } else {
            Statistics::std_dev(predictions.iter())
        };

        Self {
            mean_prediction: Statistics::mean(predictions.iter()),
            std_prediction,
            min_prediction: Statistics::min(predictions.iter()),
            max_prediction: Statistics::max(predictions.iter()),
            ldrop_threshold: LDROP_THRESHOLD,
            samples_below_threshold: predictions.iter().filter(|&&p| p < LDROP_THRESHOLD).count(),
        }
    }

    /// Fraction of predictions below threshold, given the vector length.
    pub fn below_fraction(&self, total: usize) -> f64 {
        if total == 0 {
            0.0
        } else {
            self.samples_below_threshold as f64 / total as f64
        }
    }
}

/// Aggregate movement of the RA feature family across a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RaScoreDeltas {
    pub ra_mean: f64,
    /// Population standard deviation of RA.
    pub ra_std: f64,
    pub ra_delta_mean: f64,
    pub ra_momentum: f64,
    pub ra_stability: f64,
}

impl RaScoreDeltas {
    pub fn from_table(table: &EncodedTable) -> Self {
        let ra = present(table, Feature::Ra);
        let ra_std = if ra.is_empty() {
            0.0
        } else {
            Statistics::population_std_dev(ra.iter())
        };

        Self {
            ra_mean: mean_or_zero(&ra),
            ra_std,
            ra_delta_mean: mean_or_zero(&present(table, Feature::D)),
            ra_momentum: mean_or_zero(&present(table, Feature::M)),
            ra_stability: mean_or_zero(&present(table, Feature::S)),
        }
    }

    /// Named values in persisted order, for rendering.
    pub fn entries(&self) -> [(&'static str, f64); 5] {
        [
            ("ra_mean", self.ra_mean),
            ("ra_std", self.ra_std),
            ("ra_delta_mean", self.ra_delta_mean),
            ("ra_momentum", self.ra_momentum),
            ("ra_stability", self.ra_stability),
        ]
    }
}

fn present(table: &EncodedTable, feature: Feature) -> Vec<f64> {
    if !table.has(feature) {
        return Vec::new();
    }
    table.column(feature).into_iter().flatten().collect()
}

fn mean_or_zero(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        Statistics::mean(values.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::longevity::features::encode;
    use serde_json::json;

    #[test]
    fn counts_strictly_below_threshold() {
        let m = LdropMetrics::from_predictions(&[0.3, 0.6, 0.7, 0.4, 0.8]);
        assert_eq!(m.samples_below_threshold, 2);
        assert_eq!(m.ldrop_threshold, 0.5);
        assert!((m.mean_prediction - 0.56).abs() < 1e-12);
        assert_eq!(m.min_prediction, 0.3);
        assert_eq!(m.max_prediction, 0.8);

        // 0.5 itself is not below.
        let m = LdropMetrics::from_predictions(&[0.5, 0.5]);
        assert_eq!(m.samples_below_threshold, 0);
    }

    #[test]
    fn std_is_sample_and_zero_for_single_value() {
        let m = LdropMetrics::from_predictions(&[1.0, 3.0]);
        assert!((m.std_prediction - 2f64.sqrt()).abs() < 1e-12);

        let m = LdropMetrics::from_predictions(&[0.42]);
        assert_eq!(m.std_prediction, 0.0);
        assert_eq!(m.min_prediction, 0.42);
    }

    #[test]
    fn empty_predictions_are_all_zero() {
        let m = LdropMetrics::from_predictions(&[]);
        assert_eq!(m.samples_below_threshold, 0);
        assert_eq!(m.mean_prediction, 0.0);
        assert_eq!(m.below_fraction(0), 0.0);
    }

    #[test]
    fn deltas_aggregate_feature_columns() {
        let rows = vec![
            json!({"x": 0.0}),
            json!({"x": 1.0}),
            json!({"x": 2.0}),
        ]
        .into_iter()
        .map(|v| v.as_object().cloned().unwrap())
        .collect();
        let table = encode(rows).unwrap();
        let d = RaScoreDeltas::from_table(&table);

        assert!((d.ra_mean - 0.5).abs() < 1e-9);
        // population std of [0, .5, 1]
        assert!((d.ra_std - (1.0f64 / 6.0).sqrt()).abs() < 1e-9);
        // D = [0, .5, .5]
        assert!((d.ra_delta_mean - 1.0 / 3.0).abs() < 1e-9);
        assert!(d.ra_stability > 0.0);
    }

    #[test]
    fn deltas_default_to_zero_without_features() {
        let rows = vec![json!({"name": "only text"})]
            .into_iter()
            .map(|v| v.as_object().cloned().unwrap())
            .collect();
        let table = encode(rows).unwrap();
        assert_eq!(RaScoreDeltas::from_table(&table), RaScoreDeltas::default());
    }
}
