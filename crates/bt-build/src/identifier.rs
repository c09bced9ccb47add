// identifier.rs — Per-repository build numbers.
//
// A build number is read-latest, increment, persist. The store records each
// issued number as a BuildIdentifierBumped-style record; the latest record
// per repository is the counter. Numbers cross the storage boundary as
// decimal strings and are held as u64 in between: a counter that would pass
// u64::MAX is an allocation failure, not a wrap.
//
// Read-then-write is not atomic at the store, so allocation for one
// repository is serialized in-process by a per-repository async mutex.
// Different repositories never wait on each other.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bt_goal::{EventDispatcher, LifecycleEvent, RepoRef};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::BuildError;

/// One issued build number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildIdentifier {
    pub repo: RepoRef,

    /// Decimal string.
    pub sequence: String,

    pub recorded_at: DateTime<Utc>,
}

impl BuildIdentifier {
    pub fn new(repo: RepoRef, sequence: impl Into<String>) -> Self {
        Self {
            repo,
            sequence: sequence.into(),
            recorded_at: Utc::now(),
        }
    }
}

/// Where issued build numbers are recorded.
#[async_trait]
pub trait BuildIdentifierStore: Send + Sync {
    /// The most recent record(s) for a repository. Empty when the
    /// repository has never been built. More than one record means the
    /// store is inconsistent; the allocator copes.
    async fn latest(&self, repo: &RepoRef) -> Result<Vec<BuildIdentifier>, BuildError>;

    async fn record(&self, identifier: &BuildIdentifier) -> Result<(), BuildError>;
}

/// Append-only JSONL log of issued build numbers.
pub struct FileIdentifierStore {
    path: PathBuf,
}

impl FileIdentifierStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Every record for a repository, oldest first.
    pub fn history(&self, repo: &RepoRef) -> Result<Vec<BuildIdentifier>, BuildError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path).map_err(|source| BuildError::Io {
            path: self.path.display().to_string(),
            source,
        })?;

        let mut records = Vec::new();
        for (index, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<BuildIdentifier>(line) {
                Ok(record) if &record.repo == repo => records.push(record),
                Ok(_) => {}
                Err(e) => tracing::warn!(
                    path = %self.path.display(),
                    line = index + 1,
                    "skipping malformed build number record: {}",
                    e
                ),
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl BuildIdentifierStore for FileIdentifierStore {
    async fn latest(&self, repo: &RepoRef) -> Result<Vec<BuildIdentifier>, BuildError> {
        Ok(self.history(repo)?.pop().into_iter().collect())
    }

    async fn record(&self, identifier: &BuildIdentifier) -> Result<(), BuildError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| BuildError::Io {
                path: parent.display().to_string(),
                source,
            })?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| BuildError::Io {
                path: self.path.display().to_string(),
                source,
            })?;
        let json = serde_json::to_string(identifier)?;
        writeln!(file, "{}", json).map_err(|source| BuildError::Io {
            path: self.path.display().to_string(),
            source,
        })
    }
}

/// Issues strictly increasing build numbers per repository.
pub struct BuildNumberAllocator {
    store: Arc<dyn BuildIdentifierStore>,
    dispatcher: Arc<EventDispatcher>,
    locks: Mutex<HashMap<RepoRef, Arc<Mutex<()>>>>,
}

impl BuildNumberAllocator {
    pub fn new(store: Arc<dyn BuildIdentifierStore>, dispatcher: Arc<EventDispatcher>) -> Self {
        Self {
            store,
            dispatcher,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Allocate the next build number for `repo`, as a decimal string.
    pub async fn allocate(&self, repo: &RepoRef) -> Result<String, BuildError> {
        let repo_lock = self.lock_for(repo).await;
        let _guard = repo_lock.lock().await;

        let records = self
            .store
            .latest(repo)
            .await
            .map_err(|e| allocation_error(repo, e.to_string()))?;

        let last = match records.as_slice() {
            [] => 0,
            [only] => parse_sequence(repo, &only.sequence)?,
            many => {
                tracing::warn!(
                    repo = %repo,
                    records = many.len(),
                    "inconsistent build number records, continuing from the highest"
                );
                let mut highest = 0;
                for record in many {
                    highest = highest.max(parse_sequence(repo, &record.sequence)?);
                }
                highest
            }
        };

        let next = last
            .checked_add(1)
            .ok_or_else(|| allocation_error(repo, "build number overflow".to_string()))?;
        let sequence = next.to_string();

        self.store
            .record(&BuildIdentifier::new(repo.clone(), sequence.clone()))
            .await
            .map_err(|e| allocation_error(repo, e.to_string()))?;

        tracing::info!(repo = %repo, build_number = %sequence, "allocated build number");
        self.dispatcher
            .dispatch(&LifecycleEvent::identifier_bumped(repo, &sequence));
        Ok(sequence)
    }

    async fn lock_for(&self, repo: &RepoRef) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(locks.entry(repo.clone()).or_default())
    }
}

fn parse_sequence(repo: &RepoRef, raw: &str) -> Result<u64, BuildError> {
    raw.trim()
        .parse::<u64>()
        .map_err(|e| allocation_error(repo, format!("stored build number '{}' is invalid: {}", raw, e)))
}

fn allocation_error(repo: &RepoRef, reason: String) -> BuildError {
    BuildError::Allocation {
        repo: repo.to_string(),
        reason,
    }
}
