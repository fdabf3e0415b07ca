//! Deployment Gate Tests
//!
//! Check ordering, key rules and the one-deployment-per-run rule.

use crate::longevity::artifact_store::{
    ArtifactFile, ArtifactStore, BUNDLE_FILE, DEPLOYMENT_FILE, DKIL_FILE, REPORT_FILE,
};
use crate::longevity::deploy_gate::{
    default_model_name, digest_key, DeployRequest, DeploymentGate, DeploymentRecord, GateError,
    DEPLOYED_STATUS,
};
use crate::longevity::integrity::{IntegrityLock, IntegrityRejection, IntegrityVerdict};
use crate::longevity::metrics::LdropMetrics;
use crate::longevity::run_id::{RunId, RunIdError};
use std::sync::Arc;
use tempfile::TempDir;

// =============================================================================
// TEST HELPERS
// =============================================================================

const HUMAN_KEY: &str = "human-approval-1";
const LOGIC_KEY: &str = "logic-approval-1";

struct Fixture {
    _dir: TempDir,
    store: Arc<ArtifactStore>,
    gate: DeploymentGate,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(ArtifactStore::new(dir.path()).unwrap());
    let gate = DeploymentGate::new(store.clone());
    Fixture {
        _dir: dir,
        store,
        gate,
    }
}

fn verdict(run_id: &RunId, predictions: &[f64]) -> IntegrityVerdict {
    let metrics = LdropMetrics::from_predictions(predictions);
    IntegrityLock::evaluate(run_id, &metrics, predictions.len())
}

/// Persist a run whose verdict is computed from `predictions`.
fn persisted_run(store: &ArtifactStore, predictions: &[f64]) -> RunId {
    let id = RunId::generate();
    let files = [
        ArtifactFile::new(REPORT_FILE, "<html></html>"),
        ArtifactFile::json(DKIL_FILE, &verdict(&id, predictions)).unwrap(),
    ];
    store.persist(&id, &files).unwrap();
    id
}

fn passing_run(store: &ArtifactStore) -> RunId {
    persisted_run(store, &[0.7, 0.8, 0.9, 0.6, 0.75])
}

fn failing_run(store: &ArtifactStore) -> RunId {
    persisted_run(store, &[0.1, 0.2, 0.9, 0.3, 0.4])
}

fn request(run_id: &str, human: &str, logic: &str) -> DeployRequest {
    DeployRequest {
        run_id: run_id.to_string(),
        human_key: human.to_string(),
        logic_key: logic.to_string(),
        model_name: None,
    }
}

// =============================================================================
// SUCCESS PATH
// =============================================================================

#[test]
fn test_passing_run_with_valid_keys_deploys() {
    let f = fixture();
    let id = passing_run(&f.store);

    let record = f.gate.deploy(&request(id.as_str(), HUMAN_KEY, LOGIC_KEY)).unwrap();

    assert_eq!(record.run_id, id);
    assert_eq!(record.model_name, default_model_name(&id));
    assert_eq!(record.status, DEPLOYED_STATUS);
    assert!(record.dkil_validated);
    assert_eq!(record.human_key_hash, digest_key(HUMAN_KEY));
    assert_eq!(record.logic_key_hash.len(), 64);
    assert_ne!(record.human_key_hash, record.logic_key_hash);

    let stored: DeploymentRecord = f.store.read_json(&id, DEPLOYMENT_FILE).unwrap();
    assert_eq!(stored, record);
    assert_eq!(f.gate.record(&id).unwrap(), Some(record));
}

#[test]
fn test_supplied_model_name_is_kept() {
    let f = fixture();
    let id = passing_run(&f.store);
    let mut req = request(id.as_str(), HUMAN_KEY, LOGIC_KEY);
    req.model_name = Some("longevity-v2".to_string());

    let record = f.gate.deploy(&req).unwrap();
    assert_eq!(record.model_name, "longevity-v2");
}

#[test]
fn test_deployment_regenerates_bundle() {
    let f = fixture();
    let id = passing_run(&f.store);
    assert!(!f.store.bundle_entries(&id).unwrap().contains(&DEPLOYMENT_FILE.to_string()));

    f.gate.deploy(&request(id.as_str(), HUMAN_KEY, LOGIC_KEY)).unwrap();

    let entries = f.store.bundle_entries(&id).unwrap();
    assert_eq!(entries, vec![DEPLOYMENT_FILE, DKIL_FILE, REPORT_FILE]);
    assert!(!entries.contains(&BUNDLE_FILE.to_string()));
}

#[test]
fn test_uppercase_run_id_resolves() {
    let f = fixture();
    let id = passing_run(&f.store);
    let upper = id.as_str().to_ascii_uppercase();

    let record = f.gate.deploy(&request(&upper, HUMAN_KEY, LOGIC_KEY)).unwrap();
    assert_eq!(record.run_id, id);
}

// =============================================================================
// CHECK ORDER
// =============================================================================

#[test]
fn test_malformed_run_id_rejected() {
    let f = fixture();
    let err = f.gate.deploy(&request("not-a-uuid", HUMAN_KEY, LOGIC_KEY)).unwrap_err();
    assert!(matches!(err, GateError::InvalidRunId(RunIdError::InvalidFormat)));

    let err = f.gate.deploy(&request("../etc/passwd", HUMAN_KEY, LOGIC_KEY)).unwrap_err();
    assert!(matches!(err, GateError::InvalidRunId(RunIdError::PathTraversal)));
}

#[test]
fn test_unknown_run_is_not_found_even_with_bad_keys() {
    let f = fixture();
    let id = RunId::generate();
    let err = f.gate.deploy(&request(id.as_str(), "", "")).unwrap_err();
    assert!(matches!(err, GateError::NotFound(_)));
    assert_eq!(err.description(), format!("Run ID {} not found", id));
}

#[test]
fn test_unknown_runs_leave_no_lock_entries() {
    let f = fixture();
    for _ in 0..1000 {
        let id = RunId::generate();
        let err = f.gate.deploy(&request(id.as_str(), HUMAN_KEY, LOGIC_KEY)).unwrap_err();
        assert!(matches!(err, GateError::NotFound(_)));
    }
    assert_eq!(f.store.active_locks(), 0);

    let id = passing_run(&f.store);
    f.gate.deploy(&request(id.as_str(), HUMAN_KEY, LOGIC_KEY)).unwrap();
    assert_eq!(f.store.active_locks(), 0);
}

#[test]
fn test_failing_verdict_rejects_before_keys() {
    let f = fixture();
    let id = failing_run(&f.store);

    let err = f.gate.deploy(&request(id.as_str(), "short", "")).unwrap_err();
    match &err {
        GateError::IntegrityRejected(IntegrityRejection::Failed { reason }) => {
            assert!(reason.contains("4 of 5"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(err.description().starts_with("DKIL check failed: "));
    assert!(!f.store.has_artifact(&id, DEPLOYMENT_FILE));
}

#[test]
fn test_missing_verdict_is_not_established() {
    let f = fixture();
    let id = RunId::generate();
    f.store
        .persist(&id, &[ArtifactFile::new(REPORT_FILE, "<html></html>")])
        .unwrap();

    let err = f.gate.deploy(&request(id.as_str(), HUMAN_KEY, LOGIC_KEY)).unwrap_err();
    assert!(matches!(
        err,
        GateError::IntegrityRejected(IntegrityRejection::NotEstablished)
    ));
}

#[test]
fn test_stored_verdict_is_not_recomputed() {
    let f = fixture();
    let id = RunId::generate();
    // Verdict recorded as failed even though its counts would pass.
    let mut stored = verdict(&id, &[0.9, 0.9, 0.9]);
    stored.integrity_check = false;
    stored.reason = Some("recorded failure".to_string());
    f.store
        .persist(&id, &[ArtifactFile::json(DKIL_FILE, &stored).unwrap()])
        .unwrap();

    let err = f.gate.deploy(&request(id.as_str(), HUMAN_KEY, LOGIC_KEY)).unwrap_err();
    assert_eq!(err.description(), "DKIL check failed: recorded failure");
}

// =============================================================================
// KEYS
// =============================================================================

#[test]
fn test_missing_keys_rejected() {
    let f = fixture();
    let id = passing_run(&f.store);

    for (human, logic) in [("", LOGIC_KEY), (HUMAN_KEY, ""), ("", "")] {
        let err = f.gate.deploy(&request(id.as_str(), human, logic)).unwrap_err();
        assert!(matches!(err, GateError::MissingKeys));
        assert_eq!(
            err.description(),
            "Both human_key and logic_key are required for deployment"
        );
    }
}

#[test]
fn test_short_human_key_fails_regardless_of_logic_key() {
    let f = fixture();
    let id = passing_run(&f.store);

    for logic in [LOGIC_KEY, "a-much-longer-logic-key-value", "short"] {
        let err = f.gate.deploy(&request(id.as_str(), "1234567", logic)).unwrap_err();
        assert!(matches!(err, GateError::KeyTooShort));
    }
    assert_eq!(
        GateError::KeyTooShort.description(),
        "Keys must be at least 8 characters long"
    );
    assert!(!f.store.has_artifact(&id, DEPLOYMENT_FILE));
}

#[test]
fn test_key_length_counts_characters() {
    let f = fixture();
    let id = passing_run(&f.store);

    // Seven characters, fourteen bytes.
    let err = f.gate.deploy(&request(id.as_str(), "ééééééé", LOGIC_KEY)).unwrap_err();
    assert!(matches!(err, GateError::KeyTooShort));

    assert!(f.gate.deploy(&request(id.as_str(), "éééééééé", LOGIC_KEY)).is_ok());
}

// =============================================================================
// ONE DEPLOYMENT PER RUN
// =============================================================================

#[test]
fn test_second_deployment_conflicts() {
    let f = fixture();
    let id = passing_run(&f.store);
    let first = f.gate.deploy(&request(id.as_str(), HUMAN_KEY, LOGIC_KEY)).unwrap();

    let err = f.gate.deploy(&request(id.as_str(), HUMAN_KEY, LOGIC_KEY)).unwrap_err();
    assert!(matches!(err, GateError::AlreadyDeployed(_)));
    assert_eq!(err.code(), "ALREADY_DEPLOYED");

    let stored: DeploymentRecord = f.store.read_json(&id, DEPLOYMENT_FILE).unwrap();
    assert_eq!(stored, first);
}

#[test]
fn test_concurrent_deployments_yield_one_record() {
    let f = fixture();
    let id = passing_run(&f.store);
    let gate = Arc::new(DeploymentGate::new(f.store.clone()));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let gate = gate.clone();
            let run_id = id.to_string();
            std::thread::spawn(move || {
                let mut req = request(&run_id, HUMAN_KEY, LOGIC_KEY);
                req.model_name = Some(format!("model-{}", i));
                gate.deploy(&req)
            })
        })
        .collect();

    let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let successes = outcomes.iter().filter(|r| r.is_ok()).count();
    let conflicts = outcomes
        .iter()
        .filter(|r| matches!(r, Err(GateError::AlreadyDeployed(_))))
        .count();
    assert_eq!(successes, 1);
    assert_eq!(conflicts, 7);
}
