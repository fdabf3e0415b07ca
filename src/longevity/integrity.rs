//! DKIL - Data Knowledge Integrity Lock
//!
//! The lock is the single gate between a persisted run and any release of its
//! outputs (report retrieval, deployment). It is evaluated exactly once, when
//! the run's artifact set is assembled, and persisted as `dkil_lock.json`.
//! Every later check reads the stored verdict; nothing here recomputes it.
//!
//! # Requirement
//!
//! A run passes when the share of predictions strictly below the L-drop
//! threshold is less than [`MAX_BELOW_FRACTION`].

use crate::longevity::metrics::LdropMetrics;
use crate::longevity::run_id::RunId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum share of predictions allowed below threshold (exclusive).
pub const MAX_BELOW_FRACTION: f64 = 0.3;

/// Persisted outcome of the integrity lock for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityVerdict {
    pub run_id: RunId,
    pub timestamp: DateTime<Utc>,
    /// Authoritative pass/fail flag.
    pub integrity_check: bool,
    /// Whether the below-threshold share was within bounds.
    pub threshold_met: bool,
    pub ldrop_threshold: f64,
    pub samples_below_threshold: usize,
    pub total_predictions: usize,
    pub max_below_fraction: f64,
    /// Human-readable failure reason, absent on pass.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl IntegrityVerdict {
    pub fn passed(&self) -> bool {
        self.integrity_check
    }
}

/// Why a run's outputs may not be released.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntegrityRejection {
    /// No verdict was ever persisted for the run.
    NotEstablished,
    /// A verdict exists and failed.
    Failed { reason: String },
}

impl IntegrityRejection {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotEstablished => "DKIL_NOT_ESTABLISHED",
            Self::Failed { .. } => "DKIL_FAILED",
        }
    }

    pub fn description(&self) -> String {
        match self {
            Self::NotEstablished => "DKIL lock file not found".to_string(),
            Self::Failed { reason } => reason.clone(),
        }
    }
}

impl std::fmt::Display for IntegrityRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code(), self.description())
    }
}

/// Evaluation and enforcement of the integrity lock.
pub struct IntegrityLock;

impl IntegrityLock {
    /// Evaluate a run's metrics into a verdict. Called once per run.
    pub fn evaluate(run_id: &RunId, metrics: &LdropMetrics, total_predictions: usize) -> IntegrityVerdict {
        let allowed = total_predictions as f64 * MAX_BELOW_FRACTION;
        let threshold_met = (metrics.samples_below_threshold as f64) < allowed;

        let reason = (!threshold_met).then(|| {
            format!(
                "{} of {} predictions ({:.1}%) fell below the L-drop threshold {}; at most {:.0}% allowed",
                metrics.samples_below_threshold,
                total_predictions,
                metrics.below_fraction(total_predictions) * 100.0,
                metrics.ldrop_threshold,
                MAX_BELOW_FRACTION * 100.0,
            )
        });

        IntegrityVerdict {
            run_id: run_id.clone(),
            timestamp: Utc::now(),
            integrity_check: threshold_met,
            threshold_met,
            ldrop_threshold: metrics.ldrop_threshold,
            samples_below_threshold: metrics.samples_below_threshold,
            total_predictions,
            max_below_fraction: MAX_BELOW_FRACTION,
            reason,
        }
    }

    /// Enforce a stored verdict: absent or failing verdicts are rejected.
    pub fn enforce(stored: Option<IntegrityVerdict>) -> Result<IntegrityVerdict, IntegrityRejection> {
        match stored {
            None => Err(IntegrityRejection::NotEstablished),
            Some(v) if v.passed() => Ok(v),
            Some(v) => Err(IntegrityRejection::Failed {
                reason: v
                    .reason
                    .unwrap_or_else(|| "integrity check did not pass".to_string()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(below: usize) -> LdropMetrics {
        LdropMetrics {
            mean_prediction: 0.6,
            std_prediction: 0.1,
            min_prediction: 0.2,
            max_prediction: 0.9,
            ldrop_threshold: 0.5,
            samples_below_threshold: below,
        }
    }

    #[test]
    fn passes_below_thirty_percent() {
        let id = RunId::generate();
        let v = IntegrityLock::evaluate(&id, &metrics(2), 10);
        assert!(v.passed());
        assert!(v.threshold_met);
        assert!(v.reason.is_none());
        assert_eq!(v.max_below_fraction, 0.3);
    }

    #[test]
    fn fails_at_exactly_thirty_percent() {
        let v = IntegrityLock::evaluate(&RunId::generate(), &metrics(3), 10);
        assert!(!v.passed());
        assert!(v.reason.as_deref().unwrap().contains("3 of 10"));
    }

    #[test]
    fn empty_prediction_set_fails() {
        let v = IntegrityLock::evaluate(&RunId::generate(), &metrics(0), 0);
        assert!(!v.passed());
    }

    #[test]
    fn enforce_maps_absent_and_failing() {
        assert_eq!(IntegrityLock::enforce(None), Err(IntegrityRejection::NotEstablished));

        let failing = IntegrityLock::evaluate(&RunId::generate(), &metrics(5), 5);
        let reason = failing.reason.clone().unwrap();
        assert_eq!(
            IntegrityLock::enforce(Some(failing)),
            Err(IntegrityRejection::Failed { reason })
        );

        let passing = IntegrityLock::evaluate(&RunId::generate(), &metrics(0), 5);
        assert!(IntegrityLock::enforce(Some(passing)).is_ok());
    }

    #[test]
    fn verdict_survives_json_round_trip() {
        let v = IntegrityLock::evaluate(&RunId::generate(), &metrics(1), 5);
        let json = serde_json::to_string(&v).unwrap();
        let back: IntegrityVerdict = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v);
    }

    #[test]
    fn rejection_display_carries_code() {
        let r = IntegrityRejection::NotEstablished;
        assert_eq!(r.to_string(), "[DKIL_NOT_ESTABLISHED] DKIL lock file not found");
    }
}
