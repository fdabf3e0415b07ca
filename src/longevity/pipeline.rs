//! Analysis Pipeline
//!
//! Orchestrates one run end to end:
//!
//! ```text
//! rows -> encode -> select -> target -> fit -> predict -> metrics -> persist
//! ```
//!
//! # Design
//!
//! - Synchronous. The HTTP adapter calls it from the blocking pool.
//! - Each invocation owns a fresh [`RunId`]; runs never share state beyond the
//!   store, which publishes a run's directory with a single rename.
//! - Every failure after input validation carries the [`PipelineStage`] it
//!   happened in. Nothing is visible in the store unless the whole run is.

use crate::longevity::artifact_store::{
    ArtifactFile, ArtifactStore, ArtifactStoreError, DKIL_FILE, REPORT_FILE, RESULTS_FILE,
};
use crate::longevity::features::{encode, EncodedTable, Feature, RawRow};
use crate::longevity::integrity::{IntegrityLock, IntegrityVerdict};
use crate::longevity::metrics::{LdropMetrics, RaScoreDeltas};
use crate::longevity::model::ModelConfig;
use crate::longevity::report::render_html;
use crate::longevity::run::{RunResults, TargetSource};
use crate::longevity::run_id::RunId;
use chrono::Utc;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Optional label column. When absent a synthetic target is used.
pub const TARGET_COLUMN: &str = "target";

/// Mode recorded when the caller does not name one.
pub const DEFAULT_MODE: &str = "tabular";

// =============================================================================
// ERRORS
// =============================================================================

/// Pipeline step, recorded on failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Encode,
    Select,
    Fit,
    Predict,
    Metrics,
    Persist,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Encode => "encode",
            Self::Select => "select",
            Self::Fit => "fit",
            Self::Predict => "predict",
            Self::Metrics => "metrics",
            Self::Persist => "persist",
        }
    }
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub enum AnalysisError {
    /// Caller-supplied rows are unusable (e.g. a non-numeric target).
    InvalidInput(String),
    /// Encoding produced none of the canonical features.
    NoUsableFeatures,
    /// A processing step failed.
    Stage {
        stage: PipelineStage,
        message: String,
    },
}

impl AnalysisError {
    fn stage(stage: PipelineStage, err: impl std::fmt::Display) -> Self {
        Self::Stage {
            stage,
            message: err.to_string(),
        }
    }

    /// Whether the failure was caused by the caller's input.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidInput(_)
                | Self::NoUsableFeatures
                | Self::Stage {
                    stage: PipelineStage::Encode,
                    ..
                }
        )
    }
}

impl std::fmt::Display for AnalysisError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
            Self::NoUsableFeatures => write!(f, "No valid features found for modeling"),
            Self::Stage { stage, message } => write!(f, "{} stage failed: {}", stage, message),
        }
    }
}

impl std::error::Error for AnalysisError {}

// =============================================================================
// PIPELINE
// =============================================================================

/// A completed, persisted run.
#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub results: RunResults,
    pub verdict: IntegrityVerdict,
    pub run_dir: PathBuf,
}

pub struct AnalysisPipeline {
    model: ModelConfig,
    store: Arc<ArtifactStore>,
}

impl AnalysisPipeline {
    pub fn new(model: ModelConfig, store: Arc<ArtifactStore>) -> Self {
        Self { model, store }
    }

    pub fn store(&self) -> &Arc<ArtifactStore> {
        &self.store
    }

    /// Run the full pipeline over `rows`, producing one persisted run.
    pub fn run(&self, rows: Vec<RawRow>, mode: &str) -> Result<AnalysisOutcome, AnalysisError> {
        let started = Instant::now();
        let run_id = RunId::generate();
        let row_count = rows.len();
        info!(run_id = %run_id, rows = row_count, mode, "analysis started");

        let table = encode(rows).map_err(|e| AnalysisError::stage(PipelineStage::Encode, e))?;

        let features = table.features.clone();
        if features.is_empty() {
            warn!(run_id = %run_id, stage = "select", "no usable features");
            return Err(AnalysisError::NoUsableFeatures);
        }
        debug!(run_id = %run_id, ?features, "features selected");

        let x = design_matrix(&table, &features);
        let (y, target_source) = target_vector(&table, &x)?;

        let mut regressor = self.model.build();
        regressor
            .fit(&x, &y)
            .map_err(|e| AnalysisError::stage(PipelineStage::Fit, e))?;
        let predictions = regressor
            .predict(&x)
            .map_err(|e| AnalysisError::stage(PipelineStage::Predict, e))?;
        if predictions.len() != row_count {
            return Err(AnalysisError::stage(
                PipelineStage::Predict,
                format!("{} predictions for {} rows", predictions.len(), row_count),
            ));
        }

        let ldrop_metrics = LdropMetrics::from_predictions(&predictions);
        let ra_score_deltas = RaScoreDeltas::from_table(&table);
        if !ldrop_metrics.mean_prediction.is_finite() || !ldrop_metrics.std_prediction.is_finite() {
            return Err(AnalysisError::stage(
                PipelineStage::Metrics,
                "prediction summary is not finite",
            ));
        }

        let verdict = IntegrityLock::evaluate(&run_id, &ldrop_metrics, predictions.len());

        let results = RunResults {
            run_id: run_id.clone(),
            timestamp: Utc::now(),
            mode: mode.to_string(),
            row_count,
            model: regressor.name().to_string(),
            target_source,
            features,
            predictions,
            ldrop_metrics,
            ra_score_deltas,
            encoded_data: table.rows,
        };

        let run_dir = self
            .persist(&results, &verdict)
            .map_err(|e| AnalysisError::stage(PipelineStage::Persist, e))?;

        info!(
            run_id = %run_id,
            integrity = verdict.passed(),
            below = verdict.samples_below_threshold,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "analysis complete"
        );

        Ok(AnalysisOutcome {
            results,
            verdict,
            run_dir,
        })
    }

    fn persist(
        &self,
        results: &RunResults,
        verdict: &IntegrityVerdict,
    ) -> Result<PathBuf, ArtifactStoreError> {
        let files = [
            ArtifactFile::json(RESULTS_FILE, results)?,
            ArtifactFile::new(REPORT_FILE, render_html(results)),
            ArtifactFile::json(DKIL_FILE, verdict)?,
        ];
        self.store.persist(&results.run_id, &files)
    }
}

/// Feature matrix in canonical feature order; missing values are 0.
fn design_matrix(table: &EncodedTable, features: &[Feature]) -> Vec<Vec<f64>> {
    table
        .rows
        .iter()
        .map(|row| {
            features
                .iter()
                .map(|&f| row.get(f).unwrap_or(0.0))
                .collect()
        })
        .collect()
}

/// Supplied `target` column, or `0.8 * first_feature + 0.1`.
fn target_vector(
    table: &EncodedTable,
    x: &[Vec<f64>],
) -> Result<(Vec<f64>, TargetSource), AnalysisError> {
    if !table.input_columns.iter().any(|c| c == TARGET_COLUMN) {
        let y = x.iter().map(|row| 0.8 * row[0] + 0.1).collect();
        return Ok((y, TargetSource::Synthetic));
    }

    let mut y = Vec::with_capacity(table.rows.len());
    for (idx, row) in table.rows.iter().enumerate() {
        match row.columns.get(TARGET_COLUMN) {
            Some(Value::Number(n)) => match n.as_f64() {
                Some(v) if v.is_finite() => y.push(v),
                _ => {
                    return Err(AnalysisError::InvalidInput(format!(
                        "target at row {} is not a finite number",
                        idx
                    )))
                }
            },
            Some(Value::Null) | None => {
                return Err(AnalysisError::InvalidInput(format!(
                    "target is missing at row {}",
                    idx
                )))
            }
            Some(other) => {
                return Err(AnalysisError::InvalidInput(format!(
                    "target at row {} is not numeric: {}",
                    idx, other
                )))
            }
        }
    }
    Ok((y, TargetSource::Supplied))
}
