//! Artifact persistence.
//!
//! Each work item gets its own directory under the output root. Artifacts
//! are flat markdown/JSON files named `<KEY>_<kind>`; the snapshot carries
//! a blake3 checksum in a sidecar so corruption is detected on load. An
//! advisory lock per key directory keeps two runs from interleaving writes.

use camino::{Utf8Path, Utf8PathBuf};
use fd_lock::RwLock;
use std::fs;
use std::io::Write;
use tracing::{debug, warn};

use planforge_utils::StoreError;
use planforge_validation::AnalysisArtifact;

use crate::snapshot::ExecutionSnapshot;
use crate::work_item::WorkItemKey;

const LOCK_FILE: &str = ".lock";

/// Holds the per-key advisory lock for the duration of a run. The OS lock
/// lives on the open descriptor inside `fd_lock` and is released when the
/// file closes.
pub struct KeyLock {
    lock_path: Utf8PathBuf,
    fd_lock: Option<Box<RwLock<fs::File>>>,
}

impl Drop for KeyLock {
    fn drop(&mut self) {
        // Close the descriptor before unlinking. Removing a still-held
        // lock file would let a racing run create a fresh inode and
        // acquire it while this one is live.
        drop(self.fd_lock.take());
        if let Err(e) = fs::remove_file(&self.lock_path) {
            warn!(path = %self.lock_path, error = %e, "failed to remove lock file");
        }
    }
}

/// A stored analysis plus where it came from.
#[derive(Debug)]
pub struct StoredAnalysis {
    pub artifact: AnalysisArtifact,
    pub path: Utf8PathBuf,
}

/// Filesystem store rooted at the configured output directory.
pub struct ArtifactStore {
    root: Utf8PathBuf,
}

impl ArtifactStore {
    pub fn open(root: impl Into<Utf8PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| StoreError::Io {
            path: root.to_string(),
            source: e,
        })?;
        Ok(Self { root })
    }

    pub fn key_dir(&self, key: &WorkItemKey) -> Utf8PathBuf {
        self.root.join(key.to_string())
    }

    /// Acquire the advisory lock for a key's directory. Fails immediately
    /// when another run holds it; callers do not wait.
    pub fn lock(&self, key: &WorkItemKey) -> Result<KeyLock, StoreError> {
        let dir = self.ensure_key_dir(key)?;
        let lock_path = dir.join(LOCK_FILE);
        let file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&lock_path)
            .map_err(|e| StoreError::Io {
                path: lock_path.to_string(),
                source: e,
            })?;
        let mut fd_lock = Box::new(RwLock::new(file));
        let guard = fd_lock.try_write().map_err(|_| StoreError::LockHeld {
            key: key.to_string(),
        })?;
        let mut file_ref = &*guard;
        let info = format!("pid={}\n", std::process::id());
        file_ref
            .write_all(info.as_bytes())
            .and_then(|()| file_ref.flush())
            .map_err(|e| StoreError::Io {
                path: lock_path.to_string(),
                source: e,
            })?;
        // Dropping the guard would release the OS lock immediately. Forget
        // it: the lock then persists until the descriptor closes in
        // `KeyLock::drop`.
        std::mem::forget(guard);
        debug!(%key, path = %lock_path, "acquired key lock");
        Ok(KeyLock {
            lock_path,
            fd_lock: Some(fd_lock),
        })
    }

    /// The assembled context blob, written before the reasoning call.
    pub fn write_context(&self, key: &WorkItemKey, content: &str) -> Result<Utf8PathBuf, StoreError> {
        self.write_artifact(key, "context.md", content)
    }

    /// The exact prompt sent to the model. Written before the call so a
    /// crashed run still leaves evidence of what was asked.
    pub fn write_prompt(&self, key: &WorkItemKey, content: &str) -> Result<Utf8PathBuf, StoreError> {
        self.write_artifact(key, "prompt.md", content)
    }

    /// The raw model response, before any validation.
    pub fn write_reasoning(
        &self,
        key: &WorkItemKey,
        content: &str,
    ) -> Result<Utf8PathBuf, StoreError> {
        self.write_artifact(key, "reasoning.md", content)
    }

    /// The validated plan in presentation form.
    pub fn write_plan(&self, key: &WorkItemKey, content: &str) -> Result<Utf8PathBuf, StoreError> {
        self.write_artifact(key, "plan.md", content)
    }

    /// The tier-2 selection audit record.
    pub fn write_selection(
        &self,
        key: &WorkItemKey,
        content: &str,
    ) -> Result<Utf8PathBuf, StoreError> {
        self.write_artifact(key, "selection.md", content)
    }

    /// Persist the snapshot as canonical JSON plus a blake3 sidecar.
    pub fn write_snapshot(
        &self,
        key: &WorkItemKey,
        snapshot: &ExecutionSnapshot,
    ) -> Result<Utf8PathBuf, StoreError> {
        let canonical = snapshot.to_canonical_json()?;
        let path = self.write_artifact(key, "snapshot.json", &canonical)?;
        let digest = blake3::hash(canonical.as_bytes()).to_hex().to_string();
        let sidecar = path.with_extension("json.blake3");
        fs::write(&sidecar, format!("{digest}\n")).map_err(|e| StoreError::Io {
            path: sidecar.to_string(),
            source: e,
        })?;
        Ok(path)
    }

    /// Load a snapshot, verifying the sidecar checksum when present.
    pub fn load_snapshot(&self, key: &WorkItemKey) -> Result<Option<ExecutionSnapshot>, StoreError> {
        let path = self.key_dir(key).join(format!("{key}_snapshot.json"));
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path).map_err(|e| StoreError::Io {
            path: path.to_string(),
            source: e,
        })?;

        let sidecar = path.with_extension("json.blake3");
        if sidecar.exists() {
            let expected = fs::read_to_string(&sidecar).map_err(|e| StoreError::Io {
                path: sidecar.to_string(),
                source: e,
            })?;
            let actual = blake3::hash(raw.as_bytes()).to_hex().to_string();
            if expected.trim() != actual {
                return Err(StoreError::ChecksumMismatch {
                    path: path.to_string(),
                });
            }
        } else {
            warn!(path = %path, "snapshot has no checksum sidecar, loading unverified");
        }

        ExecutionSnapshot::from_json(&raw, path.as_str()).map(Some)
    }

    /// Persist the structured analysis the mode router reads as its baseline.
    pub fn write_analysis(
        &self,
        key: &WorkItemKey,
        artifact: &AnalysisArtifact,
    ) -> Result<Utf8PathBuf, StoreError> {
        let path = self.key_dir(key).join(format!("{key}_analysis.json"));
        let json = serde_json::to_string_pretty(artifact).map_err(|e| StoreError::Corrupt {
            path: path.to_string(),
            detail: e.to_string(),
        })?;
        self.write_artifact(key, "analysis.json", &json)
    }

    /// Load the stored analysis if one exists. A corrupt file is an error;
    /// the router must distinguish "no baseline" from "broken baseline".
    pub fn load_analysis(&self, key: &WorkItemKey) -> Result<Option<StoredAnalysis>, StoreError> {
        let path = self.key_dir(key).join(format!("{key}_analysis.json"));
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path).map_err(|e| StoreError::Io {
            path: path.to_string(),
            source: e,
        })?;
        let artifact = serde_json::from_str(&raw).map_err(|e| StoreError::Corrupt {
            path: path.to_string(),
            detail: e.to_string(),
        })?;
        Ok(Some(StoredAnalysis { artifact, path }))
    }

    fn ensure_key_dir(&self, key: &WorkItemKey) -> Result<Utf8PathBuf, StoreError> {
        let dir = self.key_dir(key);
        fs::create_dir_all(&dir).map_err(|e| StoreError::Io {
            path: dir.to_string(),
            source: e,
        })?;
        Ok(dir)
    }

    fn write_artifact(
        &self,
        key: &WorkItemKey,
        suffix: &str,
        content: &str,
    ) -> Result<Utf8PathBuf, StoreError> {
        let dir = self.ensure_key_dir(key)?;
        let path = dir.join(format!("{key}_{suffix}"));
        fs::write(&path, content).map_err(|e| StoreError::Io {
            path: path.to_string(),
            source: e,
        })?;
        debug!(%key, path = %path, bytes = content.len(), "artifact written");
        Ok(path)
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }
}
