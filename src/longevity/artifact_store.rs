//! Run Artifact Storage
//!
//! Directory-per-run storage for analysis artifacts. The directory name is the
//! validated [`RunId`]; its existence is the sole source of truth for whether a
//! run exists.
//!
//! # Layout
//!
//! ```text
//! <root>/
//!   <run_id>/
//!     results.json      predictions, metrics, deltas, encoded rows
//!     report.html       rendered summary
//!     dkil_lock.json    integrity verdict
//!     deployment.json   only after a successful deployment
//!     bundle.zip        every other file above, regenerated on change
//!   .staging-<run_id>/  in-flight persistence, never resolvable as a run
//! ```
//!
//! # Publication
//!
//! A new run is written into a staging directory and published with a single
//! `rename`, so readers either see the complete set or nothing. Files added
//! later (the deployment record, the rebuilt bundle) are written under a
//! temporary dot-name and renamed into place.

use crate::longevity::run_id::RunId;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

pub const RESULTS_FILE: &str = "results.json";
pub const REPORT_FILE: &str = "report.html";
pub const DKIL_FILE: &str = "dkil_lock.json";
pub const DEPLOYMENT_FILE: &str = "deployment.json";
pub const BUNDLE_FILE: &str = "bundle.zip";

const STAGING_PREFIX: &str = ".staging-";

/// One file of a run's artifact set.
#[derive(Debug, Clone)]
pub struct ArtifactFile {
    pub name: &'static str,
    pub contents: Vec<u8>,
}

impl ArtifactFile {
    pub fn new(name: &'static str, contents: impl Into<Vec<u8>>) -> Self {
        Self {
            name,
            contents: contents.into(),
        }
    }

    pub fn json<T: serde::Serialize>(name: &'static str, value: &T) -> Result<Self, ArtifactStoreError> {
        Ok(Self::new(name, serde_json::to_vec_pretty(value)?))
    }
}

/// Storage for run artifacts rooted at a configured directory.
pub struct ArtifactStore {
    root: PathBuf,
    run_locks: Mutex<HashMap<RunId, Weak<Mutex<()>>>>,
}

impl ArtifactStore {
    /// Open (creating if needed) a store at the given root.
    pub fn new<P: Into<PathBuf>>(root: P) -> Result<Self, ArtifactStoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        sweep_staging(&root)?;
        debug!(root = %root.display(), "Artifact store opened");
        Ok(Self {
            root,
            run_locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn run_dir(&self, run_id: &RunId) -> PathBuf {
        self.root.join(run_id.as_str())
    }

    /// Check if a run exists.
    pub fn exists(&self, run_id: &RunId) -> bool {
        self.run_dir(run_id).is_dir()
    }

    /// Run-scoped lock for read-modify-write sequences on one run.
    ///
    /// The map only holds weak handles; an entry lives as long as some caller
    /// holds the returned `Arc` and dead entries are pruned on each call.
    pub fn run_lock(&self, run_id: &RunId) -> Arc<Mutex<()>> {
        let mut locks = self.run_locks.lock();
        locks.retain(|_, lock| lock.strong_count() > 0);
        if let Some(lock) = locks.get(run_id).and_then(Weak::upgrade) {
            return lock;
        }
        let lock = Arc::new(Mutex::new(()));
        locks.insert(run_id.clone(), Arc::downgrade(&lock));
        lock
    }

    /// Number of run locks currently held by some caller.
    pub fn active_locks(&self) -> usize {
        self.run_locks
            .lock()
            .values()
            .filter(|lock| lock.strong_count() > 0)
            .count()
    }

    /// Persist a new run's full artifact set, bundle included.
    ///
    /// Fails with `AlreadyExists` if the run directory is already present.
    /// On any failure the staging directory is removed and nothing becomes
    /// visible under the run id.
    pub fn persist(&self, run_id: &RunId, files: &[ArtifactFile]) -> Result<PathBuf, ArtifactStoreError> {
        let target = self.run_dir(run_id);
        if target.exists() {
            return Err(ArtifactStoreError::AlreadyExists(run_id.to_string()));
        }

        let staging = self.root.join(format!("{}{}", STAGING_PREFIX, run_id));
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }

        let result = (|| -> Result<(), ArtifactStoreError> {
            fs::create_dir(&staging)?;
            for file in files {
                fs::write(staging.join(file.name), &file.contents)?;
            }
            write_bundle(&staging)?;
            fs::rename(&staging, &target)?;
            Ok(())
        })();

        if let Err(e) = result {
            if let Err(cleanup) = fs::remove_dir_all(&staging) {
                if cleanup.kind() != std::io::ErrorKind::NotFound {
                    warn!(run_id = %run_id, error = %cleanup, "Failed to remove staging directory");
                }
            }
            return Err(e);
        }

        info!(run_id = %run_id, files = files.len(), "Persisted run artifacts");
        Ok(target)
    }

    /// Add or replace a file in an existing run and rebuild its bundle.
    ///
    /// Callers that must not race (deployment) hold [`Self::run_lock`].
    pub fn add_file(&self, run_id: &RunId, file: &ArtifactFile) -> Result<(), ArtifactStoreError> {
        let dir = self.existing_run_dir(run_id)?;
        write_atomic(&dir, file.name, &file.contents)?;
        write_bundle(&dir)?;
        debug!(run_id = %run_id, file = file.name, "Added artifact and rebuilt bundle");
        Ok(())
    }

    /// Read an artifact as text.
    pub fn read_text(&self, run_id: &RunId, name: &str) -> Result<String, ArtifactStoreError> {
        let path = self.artifact_path(run_id, name)?;
        Ok(fs::read_to_string(path)?)
    }

    /// Read and decode a JSON artifact.
    pub fn read_json<T: DeserializeOwned>(&self, run_id: &RunId, name: &str) -> Result<T, ArtifactStoreError> {
        let path = self.artifact_path(run_id, name)?;
        let bytes = fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Like [`Self::read_json`] but a missing file (in an existing run) is `None`.
    pub fn read_json_opt<T: DeserializeOwned>(
        &self,
        run_id: &RunId,
        name: &str,
    ) -> Result<Option<T>, ArtifactStoreError> {
        match self.read_json(run_id, name) {
            Ok(v) => Ok(Some(v)),
            Err(ArtifactStoreError::MissingArtifact { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn has_artifact(&self, run_id: &RunId, name: &str) -> bool {
        self.run_dir(run_id).join(name).is_file()
    }

    /// Names of the entries currently inside a run's bundle, sorted.
    pub fn bundle_entries(&self, run_id: &RunId) -> Result<Vec<String>, ArtifactStoreError> {
        let path = self.artifact_path(run_id, BUNDLE_FILE)?;
        let archive = zip::ZipArchive::new(fs::File::open(path)?)?;
        let mut names: Vec<String> = archive.file_names().map(str::to_string).collect();
        names.sort();
        Ok(names)
    }

    /// All published runs, sorted by id. Staging directories are skipped.
    pub fn list_runs(&self) -> Result<Vec<RunId>, ArtifactStoreError> {
        let mut runs = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(id) = entry.file_name().to_str().and_then(|n| RunId::parse(n).ok()) {
                runs.push(id);
            }
        }
        runs.sort();
        Ok(runs)
    }

    fn existing_run_dir(&self, run_id: &RunId) -> Result<PathBuf, ArtifactStoreError> {
        let dir = self.run_dir(run_id);
        if !dir.is_dir() {
            return Err(ArtifactStoreError::RunNotFound(run_id.to_string()));
        }
        Ok(dir)
    }

    fn artifact_path(&self, run_id: &RunId, name: &str) -> Result<PathBuf, ArtifactStoreError> {
        let path = self.existing_run_dir(run_id)?.join(name);
        if !path.is_file() {
            return Err(ArtifactStoreError::MissingArtifact {
                run_id: run_id.to_string(),
                file: name.to_string(),
            });
        }
        Ok(path)
    }
}

/// Write `name` in `dir` via a temporary dot-file and rename.
fn write_atomic(dir: &Path, name: &str, contents: &[u8]) -> Result<(), ArtifactStoreError> {
    let tmp = dir.join(format!(".{}.tmp", name));
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(contents)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, dir.join(name))?;
    Ok(())
}

/// Remove staging directories left behind by an interrupted persist.
fn sweep_staging(root: &Path) -> Result<(), ArtifactStoreError> {
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with(STAGING_PREFIX) || !entry.file_type()?.is_dir() {
            continue;
        }
        match fs::remove_dir_all(entry.path()) {
            Ok(()) => info!(path = %entry.path().display(), "Removed stale staging directory"),
            Err(e) => warn!(path = %entry.path().display(), error = %e, "Failed to remove stale staging directory"),
        }
    }
    Ok(())
}

/// Regenerate `bundle.zip` from every regular artifact file in `dir`.
///
/// Entries are sorted and carry a fixed timestamp so identical artifact sets
/// produce identical archives.
fn write_bundle(dir: &Path) -> Result<(), ArtifactStoreError> {
    let mut names: Vec<String> = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if name == BUNDLE_FILE || name.starts_with('.') {
            continue;
        }
        names.push(name);
    }
    names.sort();

    let mut archive = Vec::new();
    {
        let mut zip = ZipWriter::new(std::io::Cursor::new(&mut archive));
        let options = SimpleFileOptions::default()
            .last_modified_time(zip::DateTime::default())
            .compression_method(zip::CompressionMethod::Deflated);

        for name in &names {
            let content = fs::read(dir.join(name))?;
            zip.start_file(name.as_str(), options)?;
            zip.write_all(&content)?;
        }
        zip.finish()?;
    }

    write_atomic(dir, BUNDLE_FILE, &archive)
}

/// Errors from the artifact store.
#[derive(Debug)]
pub enum ArtifactStoreError {
    Io(std::io::Error),
    Serialization(serde_json::Error),
    Archive(zip::result::ZipError),
    AlreadyExists(String),
    RunNotFound(String),
    MissingArtifact { run_id: String, file: String },
}

impl ArtifactStoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::RunNotFound(_) | Self::MissingArtifact { .. })
    }
}

impl std::fmt::Display for ArtifactStoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {}", e),
            Self::Serialization(e) => write!(f, "Serialization error: {}", e),
            Self::Archive(e) => write!(f, "Archive error: {}", e),
            Self::AlreadyExists(id) => write!(f, "Run ID {} already exists", id),
            Self::RunNotFound(id) => write!(f, "Run ID {} not found", id),
            Self::MissingArtifact { run_id, file } => {
                write!(f, "Artifact {} not found for run {}", file, run_id)
            }
        }
    }
}

impl std::error::Error for ArtifactStoreError {}

impl From<std::io::Error> for ArtifactStoreError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for ArtifactStoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e)
    }
}

impl From<zip::result::ZipError> for ArtifactStoreError {
    fn from(e: zip::result::ZipError) -> Self {
        Self::Archive(e)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_files() -> Vec<ArtifactFile> {
        vec![
            ArtifactFile::json(RESULTS_FILE, &json!({"predictions": [0.1, 0.9]})).unwrap(),
            ArtifactFile::new(REPORT_FILE, "<html></html>"),
            ArtifactFile::json(DKIL_FILE, &json!({"integrity_check": true})).unwrap(),
        ]
    }

    #[test]
    fn test_persist_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();
        let id = RunId::generate();

        store.persist(&id, &sample_files()).unwrap();
        assert!(store.exists(&id));

        let results: serde_json::Value = store.read_json(&id, RESULTS_FILE).unwrap();
        assert_eq!(results["predictions"][1], json!(0.9));
        assert_eq!(store.read_text(&id, REPORT_FILE).unwrap(), "<html></html>");
        assert_eq!(
            store.bundle_entries(&id).unwrap(),
            vec![DKIL_FILE, REPORT_FILE, RESULTS_FILE]
        );
    }

    #[test]
    fn test_already_exists() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();
        let id = RunId::generate();
        store.persist(&id, &sample_files()).unwrap();

        let result = store.persist(&id, &sample_files());
        assert!(matches!(result, Err(ArtifactStoreError::AlreadyExists(_))));
    }

    #[test]
    fn test_not_found_kinds() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();
        let id = RunId::generate();

        let err = store.read_text(&id, REPORT_FILE).unwrap_err();
        assert!(matches!(err, ArtifactStoreError::RunNotFound(_)));
        assert!(err.is_not_found());

        store.persist(&id, &sample_files()).unwrap();
        let err = store.read_text(&id, DEPLOYMENT_FILE).unwrap_err();
        assert!(matches!(err, ArtifactStoreError::MissingArtifact { .. }));

        let missing: Option<serde_json::Value> = store.read_json_opt(&id, DEPLOYMENT_FILE).unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn test_failed_persist_leaves_nothing_visible() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();
        let id = RunId::generate();

        // A file name with a missing parent directory cannot be written.
        let files = vec![ArtifactFile::new("missing/child.json", "{}")];
        assert!(store.persist(&id, &files).is_err());

        assert!(!store.exists(&id));
        assert!(store.list_runs().unwrap().is_empty());
        let leftovers: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_add_file_regenerates_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();
        let id = RunId::generate();
        store.persist(&id, &sample_files()).unwrap();

        let record = ArtifactFile::json(DEPLOYMENT_FILE, &json!({"status": "deployed"})).unwrap();
        store.add_file(&id, &record).unwrap();
        // Adding twice must not produce duplicate archive entries.
        store.add_file(&id, &record).unwrap();

        let entries = store.bundle_entries(&id).unwrap();
        assert_eq!(entries, vec![DEPLOYMENT_FILE, DKIL_FILE, REPORT_FILE, RESULTS_FILE]);

        // No temporary files remain.
        let names: Vec<String> = fs::read_dir(store.run_dir(&id))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert!(names.iter().all(|n| !n.starts_with('.')));
    }

    #[test]
    fn test_add_file_requires_existing_run() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();
        let record = ArtifactFile::new(DEPLOYMENT_FILE, "{}");
        let err = store.add_file(&RunId::generate(), &record).unwrap_err();
        assert!(matches!(err, ArtifactStoreError::RunNotFound(_)));
    }

    #[test]
    fn test_list_runs_skips_staging_and_stray_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();
        let a = RunId::generate();
        let b = RunId::generate();
        store.persist(&a, &sample_files()).unwrap();
        store.persist(&b, &sample_files()).unwrap();
        fs::create_dir(dir.path().join(format!("{}{}", STAGING_PREFIX, RunId::generate()))).unwrap();
        fs::create_dir(dir.path().join("not-a-run")).unwrap();

        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(store.list_runs().unwrap(), expected);
    }

    #[test]
    fn test_run_lock_is_shared_per_run() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();
        let id = RunId::generate();
        let first = store.run_lock(&id);
        let second = store.run_lock(&id);
        assert!(Arc::ptr_eq(&first, &second));
        assert!(!Arc::ptr_eq(&first, &store.run_lock(&RunId::generate())));
        assert_eq!(store.active_locks(), 1);
    }

    #[test]
    fn test_run_locks_are_released_when_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();
        for _ in 0..100 {
            let lock = store.run_lock(&RunId::generate());
            let _guard = lock.lock();
        }
        assert_eq!(store.active_locks(), 0);
        let _held = store.run_lock(&RunId::generate());
        assert_eq!(store.run_locks.lock().len(), 1);
    }

    #[test]
    fn test_open_sweeps_stale_staging_directories() {
        let dir = tempfile::tempdir().unwrap();
        let stale = dir.path().join(format!("{}{}", STAGING_PREFIX, RunId::generate()));
        fs::create_dir(&stale).unwrap();
        fs::write(stale.join(RESULTS_FILE), "{}").unwrap();
        let id = RunId::generate();
        {
            let store = ArtifactStore::new(dir.path()).unwrap();
            store.persist(&id, &sample_files()).unwrap();
        }

        let store = ArtifactStore::new(dir.path()).unwrap();
        assert!(!stale.exists());
        assert!(store.exists(&id));
        assert_eq!(store.list_runs().unwrap(), vec![id]);
    }
}
