//! Longevity Service - the run lifecycle behind one facade.
//!
//! Transport adapters (HTTP, CLI) call into [`LongevityService`] and map
//! [`ServiceError::kind`] onto their own status vocabulary. All methods are
//! blocking; async callers run them on the blocking pool.

use crate::longevity::artifact_store::{
    ArtifactStore, ArtifactStoreError, DKIL_FILE, REPORT_FILE, RESULTS_FILE,
};
use crate::longevity::csv_input::{parse_csv, CsvInputError};
use crate::longevity::deploy_gate::{DeployRequest, DeploymentGate, DeploymentRecord, GateError};
use crate::longevity::features::RawRow;
use crate::longevity::integrity::{IntegrityLock, IntegrityRejection, IntegrityVerdict};
use crate::longevity::model::ModelConfig;
use crate::longevity::pipeline::{AnalysisError, AnalysisOutcome, AnalysisPipeline};
use crate::longevity::run_id::{RunId, RunIdError};
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;
use tracing::warn;

// =============================================================================
// REPORT FORMAT
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportFormat {
    #[default]
    Json,
    Html,
}

impl FromStr for ReportFormat {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "html" => Ok(Self::Html),
            _ => Err(ServiceError::InvalidFormat(s.to_string())),
        }
    }
}

/// A released report.
#[derive(Debug, Clone, PartialEq)]
pub enum ReportDocument {
    /// `results.json`, exactly as stored.
    Json(Value),
    /// `report.html`, exactly as stored.
    Html(String),
}

// =============================================================================
// ERRORS
// =============================================================================

/// Error families, used by adapters to pick a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Integrity,
    Conflict,
    Internal,
}

#[derive(Debug)]
pub enum ServiceError {
    InvalidRunId(RunIdError),
    InvalidFormat(String),
    Csv(CsvInputError),
    Analysis(AnalysisError),
    RunNotFound(RunId),
    ReportMissing(ReportFormat),
    Integrity(IntegrityRejection),
    Gate(GateError),
    Store(ArtifactStoreError),
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidRunId(_) | Self::InvalidFormat(_) | Self::Csv(_) => ErrorKind::Validation,
            Self::Analysis(e) if e.is_input_error() => ErrorKind::Validation,
            Self::Analysis(_) => ErrorKind::Internal,
            Self::RunNotFound(_) | Self::ReportMissing(_) => ErrorKind::NotFound,
            Self::Integrity(_) => ErrorKind::Integrity,
            Self::Gate(e) => match e {
                GateError::InvalidRunId(_) | GateError::MissingKeys | GateError::KeyTooShort => {
                    ErrorKind::Validation
                }
                GateError::NotFound(_) => ErrorKind::NotFound,
                GateError::IntegrityRejected(_) => ErrorKind::Integrity,
                GateError::AlreadyDeployed(_) => ErrorKind::Conflict,
                GateError::Store(s) if s.is_not_found() => ErrorKind::NotFound,
                GateError::Store(_) => ErrorKind::Internal,
            },
            Self::Store(e) if e.is_not_found() => ErrorKind::NotFound,
            Self::Store(_) => ErrorKind::Internal,
        }
    }

    /// Caller-facing message.
    pub fn detail(&self) -> String {
        match self {
            Self::InvalidRunId(e) => e.to_string(),
            Self::InvalidFormat(f) => {
                format!("Invalid report format '{}'. Use 'json' or 'html'.", f)
            }
            Self::Csv(e) => format!("Failed to parse CSV: {}", e),
            Self::Analysis(e) if e.is_input_error() => e.to_string(),
            Self::Analysis(e) => format!("Analysis failed: {}", e),
            Self::RunNotFound(id) => format!("Run ID {} not found", id),
            Self::ReportMissing(ReportFormat::Html) => "HTML report not found".to_string(),
            Self::ReportMissing(ReportFormat::Json) => "JSON report not found".to_string(),
            Self::Integrity(r) => format!("DKIL check failed: {}", r.description()),
            Self::Gate(e) => e.description(),
            Self::Store(e) => e.to_string(),
        }
    }
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.detail())
    }
}

impl std::error::Error for ServiceError {}

impl From<RunIdError> for ServiceError {
    fn from(e: RunIdError) -> Self {
        Self::InvalidRunId(e)
    }
}

impl From<CsvInputError> for ServiceError {
    fn from(e: CsvInputError) -> Self {
        Self::Csv(e)
    }
}

impl From<AnalysisError> for ServiceError {
    fn from(e: AnalysisError) -> Self {
        Self::Analysis(e)
    }
}

impl From<GateError> for ServiceError {
    fn from(e: GateError) -> Self {
        Self::Gate(e)
    }
}

impl From<ArtifactStoreError> for ServiceError {
    fn from(e: ArtifactStoreError) -> Self {
        Self::Store(e)
    }
}

// =============================================================================
// SERVICE
// =============================================================================

pub struct LongevityService {
    store: Arc<ArtifactStore>,
    pipeline: AnalysisPipeline,
    gate: DeploymentGate,
}

impl LongevityService {
    pub fn new(store: Arc<ArtifactStore>, model: ModelConfig) -> Self {
        Self {
            pipeline: AnalysisPipeline::new(model, store.clone()),
            gate: DeploymentGate::new(store.clone()),
            store,
        }
    }

    pub fn store(&self) -> &Arc<ArtifactStore> {
        &self.store
    }

    /// Run the analysis pipeline over JSON rows.
    pub fn analyze(&self, rows: Vec<RawRow>, mode: &str) -> Result<AnalysisOutcome, ServiceError> {
        self.pipeline.run(rows, mode).map_err(|e| {
            warn!(error = %e, "Analysis failed");
            ServiceError::from(e)
        })
    }

    /// Decode a CSV upload, then analyze it.
    pub fn analyze_csv(&self, bytes: &[u8], mode: &str) -> Result<AnalysisOutcome, ServiceError> {
        let rows = parse_csv(bytes)?;
        self.analyze(rows, mode)
    }

    /// Release a stored report, subject to the run's integrity verdict.
    ///
    /// Checks run in order: identifier, format, existence, verdict, artifact.
    pub fn get_report(&self, run_id: &str, format: &str) -> Result<ReportDocument, ServiceError> {
        let run_id = RunId::parse(run_id)?;
        let format: ReportFormat = format.parse()?;

        if !self.store.exists(&run_id) {
            return Err(ServiceError::RunNotFound(run_id));
        }

        self.release_check(&run_id)?;

        let missing = |e: ArtifactStoreError| match e {
            ArtifactStoreError::MissingArtifact { .. } => ServiceError::ReportMissing(format),
            other => ServiceError::Store(other),
        };
        match format {
            ReportFormat::Html => self
                .store
                .read_text(&run_id, REPORT_FILE)
                .map(ReportDocument::Html)
                .map_err(missing),
            ReportFormat::Json => self
                .store
                .read_json::<Value>(&run_id, RESULTS_FILE)
                .map(ReportDocument::Json)
                .map_err(missing),
        }
    }

    /// Deploy a run through the two-key gate.
    pub fn deploy(&self, request: &DeployRequest) -> Result<DeploymentRecord, ServiceError> {
        Ok(self.gate.deploy(request)?)
    }

    /// The stored integrity verdict for a run, pass or fail.
    pub fn verdict(&self, run_id: &str) -> Result<IntegrityVerdict, ServiceError> {
        let run_id = RunId::parse(run_id)?;
        if !self.store.exists(&run_id) {
            return Err(ServiceError::RunNotFound(run_id));
        }
        self.store
            .read_json_opt(&run_id, DKIL_FILE)?
            .ok_or(ServiceError::Integrity(IntegrityRejection::NotEstablished))
    }

    /// The deployment record for a run, if deployed.
    pub fn deployment(&self, run_id: &str) -> Result<Option<DeploymentRecord>, ServiceError> {
        let run_id = RunId::parse(run_id)?;
        Ok(self.gate.record(&run_id)?)
    }

    fn release_check(&self, run_id: &RunId) -> Result<IntegrityVerdict, ServiceError> {
        let stored: Option<IntegrityVerdict> = self.store.read_json_opt(run_id, DKIL_FILE)?;
        IntegrityLock::enforce(stored).map_err(|rejection| {
            warn!(run_id = %run_id, %rejection, "Report blocked by integrity lock");
            ServiceError::Integrity(rejection)
        })
    }
}
