//! Deployment Gate - Two-Key Release of a Persisted Run
//!
//! This module is the only path that writes `deployment.json`. A run may be
//! marked deployed if and only if ALL of the following hold, checked in this
//! order:
//!
//! 1. The run identifier is well formed
//! 2. The run exists in the artifact store
//! 3. Its stored DKIL verdict exists and passed (read, never recomputed)
//! 4. Both approval keys are present
//! 5. Both approval keys are at least [`MIN_KEY_CHARS`] characters
//! 6. The run has not already been deployed
//!
//! Key comparison is length-only. Keys are never stored; the record keeps
//! their SHA-256 digests as proof of approval.
//!
//! # Concurrency
//!
//! The gate holds the store's run-scoped lock from the existence check until
//! the record and the regenerated bundle are written, so two concurrent
//! deployments of one run cannot both succeed.

use crate::longevity::artifact_store::{
    ArtifactFile, ArtifactStore, ArtifactStoreError, DEPLOYMENT_FILE, DKIL_FILE,
};
use crate::longevity::integrity::{IntegrityLock, IntegrityRejection, IntegrityVerdict};
use crate::longevity::run_id::{RunId, RunIdError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{info, warn};

/// Minimum length of each approval key, in characters.
pub const MIN_KEY_CHARS: usize = 8;

/// Status string written into every deployment record.
pub const DEPLOYED_STATUS: &str = "deployed";

// =============================================================================
// REQUEST / RECORD
// =============================================================================

/// A caller's request to deploy a run.
#[derive(Debug, Clone, Deserialize)]
pub struct DeployRequest {
    pub run_id: String,
    #[serde(default)]
    pub human_key: String,
    #[serde(default)]
    pub logic_key: String,
    #[serde(default)]
    pub model_name: Option<String>,
}

/// Persisted proof that a run passed the gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub run_id: RunId,
    pub model_name: String,
    pub deployed_at: DateTime<Utc>,
    pub human_key_hash: String,
    pub logic_key_hash: String,
    pub dkil_validated: bool,
    pub status: String,
}

/// Model name used when the caller does not choose one.
pub fn default_model_name(run_id: &RunId) -> String {
    format!("ra_longevity_model_{}", run_id)
}

/// Hex SHA-256 digest of an approval key.
pub fn digest_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug)]
pub enum GateError {
    InvalidRunId(RunIdError),
    NotFound(RunId),
    IntegrityRejected(IntegrityRejection),
    MissingKeys,
    KeyTooShort,
    AlreadyDeployed(RunId),
    Store(ArtifactStoreError),
}

impl GateError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRunId(_) => "INVALID_RUN_ID",
            Self::NotFound(_) => "RUN_NOT_FOUND",
            Self::IntegrityRejected(r) => r.code(),
            Self::MissingKeys => "MISSING_KEYS",
            Self::KeyTooShort => "KEY_TOO_SHORT",
            Self::AlreadyDeployed(_) => "ALREADY_DEPLOYED",
            Self::Store(_) => "STORE_ERROR",
        }
    }

    /// Caller-facing message.
    pub fn description(&self) -> String {
        match self {
            Self::InvalidRunId(e) => e.to_string(),
            Self::NotFound(id) => format!("Run ID {} not found", id),
            Self::IntegrityRejected(r) => format!("DKIL check failed: {}", r.description()),
            Self::MissingKeys => {
                "Both human_key and logic_key are required for deployment".to_string()
            }
            Self::KeyTooShort => {
                format!("Keys must be at least {} characters long", MIN_KEY_CHARS)
            }
            Self::AlreadyDeployed(id) => format!("Run ID {} is already deployed", id),
            Self::Store(e) => e.to_string(),
        }
    }
}

impl std::fmt::Display for GateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code(), self.description())
    }
}

impl std::error::Error for GateError {}

impl From<ArtifactStoreError> for GateError {
    fn from(e: ArtifactStoreError) -> Self {
        Self::Store(e)
    }
}

impl From<RunIdError> for GateError {
    fn from(e: RunIdError) -> Self {
        Self::InvalidRunId(e)
    }
}

// =============================================================================
// GATE
// =============================================================================

pub struct DeploymentGate {
    store: Arc<ArtifactStore>,
}

impl DeploymentGate {
    pub fn new(store: Arc<ArtifactStore>) -> Self {
        Self { store }
    }

    /// Evaluate the gate and, on success, write the deployment record.
    pub fn deploy(&self, request: &DeployRequest) -> Result<DeploymentRecord, GateError> {
        let run_id = RunId::parse(&request.run_id)?;

        if !self.store.exists(&run_id) {
            return Err(GateError::NotFound(run_id));
        }

        let lock = self.store.run_lock(&run_id);
        let _guard = lock.lock();

        let stored: Option<IntegrityVerdict> = self.store.read_json_opt(&run_id, DKIL_FILE)?;
        let verdict = IntegrityLock::enforce(stored).map_err(|rejection| {
            warn!(run_id = %run_id, %rejection, "Deployment blocked by integrity lock");
            GateError::IntegrityRejected(rejection)
        })?;

        validate_keys(&request.human_key, &request.logic_key)?;

        if self.store.has_artifact(&run_id, DEPLOYMENT_FILE) {
            return Err(GateError::AlreadyDeployed(run_id));
        }

        let model_name = match request.model_name.as_deref() {
            Some(name) if !name.trim().is_empty() => name.to_string(),
            _ => default_model_name(&run_id),
        };

        let record = DeploymentRecord {
            run_id: run_id.clone(),
            model_name,
            deployed_at: Utc::now(),
            human_key_hash: digest_key(&request.human_key),
            logic_key_hash: digest_key(&request.logic_key),
            dkil_validated: verdict.passed(),
            status: DEPLOYED_STATUS.to_string(),
        };

        self.store
            .add_file(&run_id, &ArtifactFile::json(DEPLOYMENT_FILE, &record)?)?;

        info!(run_id = %run_id, model = %record.model_name, "Run deployed");
        Ok(record)
    }

    /// The stored deployment record, if the run has been deployed.
    pub fn record(&self, run_id: &RunId) -> Result<Option<DeploymentRecord>, GateError> {
        if !self.store.exists(run_id) {
            return Err(GateError::NotFound(run_id.clone()));
        }
        Ok(self.store.read_json_opt(run_id, DEPLOYMENT_FILE)?)
    }
}

fn validate_keys(human_key: &str, logic_key: &str) -> Result<(), GateError> {
    if human_key.is_empty() || logic_key.is_empty() {
        return Err(GateError::MissingKeys);
    }
    if human_key.chars().count() < MIN_KEY_CHARS || logic_key.chars().count() < MIN_KEY_CHARS {
        return Err(GateError::KeyTooShort);
    }
    Ok(())
}
