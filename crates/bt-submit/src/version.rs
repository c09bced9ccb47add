//! Semantic versions computed for commits
//!
//! Version computation happens elsewhere; the tagger only reads what was
//! recorded. The file store keeps one JSON object mapping
//! `provider:owner/repo@sha` to a version string.

use bt_goal::CommitIdentity;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::adapter::{Result, SubmitError};

/// Lookup of a previously computed version for a commit
pub trait VersionSource: Send + Sync {
    /// `None` when no version was computed for this commit
    fn version_for(&self, commit: &CommitIdentity) -> Result<Option<String>>;
}

/// JSON file-backed version store
pub struct FileVersionStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileVersionStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    /// Record the version computed for `commit`, replacing any earlier value
    pub fn record(&self, commit: &CommitIdentity, version: &str) -> Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| SubmitError::VcsError("version store lock poisoned".to_string()))?;
        let mut versions = self.load()?;
        versions.insert(Self::key(commit), version.to_string());
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(&versions)?)?;
        Ok(())
    }

    fn load(&self) -> Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn key(commit: &CommitIdentity) -> String {
        format!(
            "{}:{}/{}@{}",
            commit.provider_id, commit.owner, commit.repo, commit.sha
        )
    }
}

impl VersionSource for FileVersionStore {
    fn version_for(&self, commit: &CommitIdentity) -> Result<Option<String>> {
        Ok(self.load()?.remove(&Self::key(commit)))
    }
}
