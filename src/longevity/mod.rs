//! RA Longevity run lifecycle.
//!
//! ```text
//! rows ──► features ──► model ──► metrics ──► integrity ──► artifact_store
//!                                                              │
//!                           report / deploy_gate ◄─────────────┘
//! ```
//!
//! - [`features`]: RA, D, M, S, LR encoding
//! - [`metrics`]: L-drop summary and RA score deltas
//! - [`integrity`]: the DKIL verdict, evaluated once per run
//! - [`artifact_store`]: staged, atomically published run directories
//! - [`deploy_gate`]: two-key release of a passing run
//! - [`pipeline`]: one analysis invocation, end to end
//! - [`service`]: facade used by the HTTP and CLI adapters

pub mod artifact_store;
pub mod csv_input;
pub mod deploy_gate;
pub mod features;
pub mod integrity;
pub mod metrics;
pub mod model;
pub mod pipeline;
pub mod report;
pub mod run;
pub mod run_id;
pub mod service;

#[cfg(test)]
mod deploy_gate_tests;

pub use artifact_store::{ArtifactStore, ArtifactStoreError};
pub use deploy_gate::{DeployRequest, DeploymentGate, DeploymentRecord, GateError};
pub use features::{Feature, FeatureRow, RawRow};
pub use integrity::{IntegrityLock, IntegrityRejection, IntegrityVerdict};
pub use model::{ModelConfig, ModelKind, Regressor};
pub use pipeline::{AnalysisError, AnalysisOutcome, AnalysisPipeline, PipelineStage};
pub use run::{RunResults, TargetSource};
pub use run_id::{RunId, RunIdError};
pub use service::{ErrorKind, LongevityService, ReportDocument, ReportFormat, ServiceError};
