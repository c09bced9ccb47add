// store.rs — GoalStore: the system of record for goal instance state.
//
// The GoalStore trait is what the direct builder and the correlator talk to;
// neither keeps a goal cache of its own. FileGoalStore writes one JSON file
// per instance: `<store_dir>/<goal_id>.json`.
//
// Updates are read-apply-write under the store's lock, so the state machine
// always judges a transition against the persisted record. A stale write
// (e.g. "started" arriving after "passed") is rejected, not silently applied.

use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::commit::CommitIdentity;
use crate::error::GoalError;
use crate::instance::{GoalInstance, GoalState, GoalUpdate, UpdateOutcome};

/// Persistence for goal instances.
#[async_trait]
pub trait GoalStore: Send + Sync {
    /// Save a new instance (overwrites an existing one with the same id).
    async fn create(&self, instance: &GoalInstance) -> Result<(), GoalError>;

    async fn get(&self, id: Uuid) -> Result<Option<GoalInstance>, GoalError>;

    /// All instances on a commit, newest first.
    async fn list_for_commit(&self, commit: &CommitIdentity)
        -> Result<Vec<GoalInstance>, GoalError>;

    /// The newest instance of the named goal on a commit.
    async fn find_goal_instance(
        &self,
        commit: &CommitIdentity,
        goal_name: &str,
    ) -> Result<Option<GoalInstance>, GoalError> {
        Ok(self
            .list_for_commit(commit)
            .await?
            .into_iter()
            .find(|g| g.name == goal_name))
    }

    /// Apply an update to the persisted record.
    async fn update_goal_state(
        &self,
        id: Uuid,
        update: &GoalUpdate,
    ) -> Result<(GoalInstance, UpdateOutcome), GoalError>;
}

/// JSON file-per-instance goal store.
pub struct FileGoalStore {
    store_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileGoalStore {
    /// Create a new store backed by the given directory.
    /// Creates the directory if it doesn't exist.
    pub fn new(store_dir: impl AsRef<Path>) -> Result<Self, GoalError> {
        let store_dir = store_dir.as_ref().to_path_buf();
        fs::create_dir_all(&store_dir).map_err(|source| GoalError::IoError {
            path: store_dir.display().to_string(),
            source,
        })?;
        Ok(Self {
            store_dir,
            write_lock: Mutex::new(()),
        })
    }

    /// List all instances, sorted by creation time (newest first).
    pub fn list(&self) -> Result<Vec<GoalInstance>, GoalError> {
        let mut goals = Vec::new();

        let entries = fs::read_dir(&self.store_dir).map_err(|source| GoalError::IoError {
            path: self.store_dir.display().to_string(),
            source,
        })?;

        for entry in entries {
            let entry = entry.map_err(|source| GoalError::IoError {
                path: self.store_dir.display().to_string(),
                source,
            })?;
            let path = entry.path();

            if path.extension().is_some_and(|ext| ext == "json") {
                let json = fs::read_to_string(&path).map_err(|source| GoalError::IoError {
                    path: path.display().to_string(),
                    source,
                })?;
                match serde_json::from_str::<GoalInstance>(&json) {
                    Ok(goal) => goals.push(goal),
                    Err(e) => tracing::warn!(path = %path.display(), "skipping unreadable goal: {}", e),
                }
            }
        }

        goals.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(goals)
    }

    /// List instances in a given state.
    pub fn list_by_state(&self, state: GoalState) -> Result<Vec<GoalInstance>, GoalError> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|g| g.state == state)
            .collect())
    }

    fn read(&self, id: Uuid) -> Result<Option<GoalInstance>, GoalError> {
        let path = self.goal_file(id);
        if !path.exists() {
            return Ok(None);
        }
        let json = fs::read_to_string(&path).map_err(|source| GoalError::IoError {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Some(serde_json::from_str(&json)?))
    }

    fn write(&self, instance: &GoalInstance) -> Result<(), GoalError> {
        let path = self.goal_file(instance.id);
        let json = serde_json::to_string_pretty(instance)?;
        fs::write(&path, json).map_err(|source| GoalError::IoError {
            path: path.display().to_string(),
            source,
        })
    }

    fn goal_file(&self, id: Uuid) -> PathBuf {
        self.store_dir.join(format!("{}.json", id))
    }
}

#[async_trait]
impl GoalStore for FileGoalStore {
    async fn create(&self, instance: &GoalInstance) -> Result<(), GoalError> {
        let _guard = self.write_lock.lock().await;
        self.write(instance)
    }

    async fn get(&self, id: Uuid) -> Result<Option<GoalInstance>, GoalError> {
        self.read(id)
    }

    async fn list_for_commit(
        &self,
        commit: &CommitIdentity,
    ) -> Result<Vec<GoalInstance>, GoalError> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|g| g.commit.matches(commit))
            .collect())
    }

    async fn update_goal_state(
        &self,
        id: Uuid,
        update: &GoalUpdate,
    ) -> Result<(GoalInstance, UpdateOutcome), GoalError> {
        let _guard = self.write_lock.lock().await;
        let mut instance = self.read(id)?.ok_or(GoalError::NotFound(id))?;
        let outcome = instance.apply(update)?;
        if let UpdateOutcome::Applied { .. } = outcome {
            self.write(&instance)?;
        }
        Ok((instance, outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit::RepoRef;
    use crate::goal::BuildGoal;
    use tempfile::tempdir;

    fn commit(sha: &str) -> CommitIdentity {
        CommitIdentity::new(&RepoRef::new("acme", "widgets", "github"), sha)
    }

    fn make_instance(name: &str, sha: &str) -> GoalInstance {
        let goal = BuildGoal::external(name, "travis");
        GoalInstance::from_template(&goal, Uuid::new_v4(), commit(sha))
    }

    #[tokio::test]
    async fn create_and_get_round_trip() {
        let dir = tempdir().unwrap();
        let store = FileGoalStore::new(dir.path().join("goals")).unwrap();

        let gi = make_instance("build", "abc123");
        store.create(&gi).await.unwrap();

        let found = store.get(gi.id).await.unwrap().unwrap();
        assert_eq!(found.id, gi.id);
        assert_eq!(found.name, "build");
        assert_eq!(found.commit, gi.commit);
    }

    #[tokio::test]
    async fn get_nonexistent_returns_none() {
        let dir = tempdir().unwrap();
        let store = FileGoalStore::new(dir.path().join("goals")).unwrap();
        assert!(store.get(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn find_goal_instance_matches_commit_and_name() {
        let dir = tempdir().unwrap();
        let store = FileGoalStore::new(dir.path().join("goals")).unwrap();

        let build = make_instance("build", "abc123");
        let deploy = make_instance("deploy", "abc123");
        let other_commit = make_instance("build", "def456");
        for gi in [&build, &deploy, &other_commit] {
            store.create(gi).await.unwrap();
        }

        let found = store
            .find_goal_instance(&commit("abc123"), "build")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, build.id);

        let missing = store
            .find_goal_instance(&commit("fff000"), "build")
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn find_goal_instance_prefers_newest_goal_set() {
        let dir = tempdir().unwrap();
        let store = FileGoalStore::new(dir.path().join("goals")).unwrap();

        let mut older = make_instance("build", "abc123");
        older.created_at -= chrono::Duration::minutes(5);
        let newer = make_instance("build", "abc123");
        store.create(&older).await.unwrap();
        store.create(&newer).await.unwrap();

        let found = store
            .find_goal_instance(&commit("abc123"), "build")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, newer.id);
    }

    #[tokio::test]
    async fn update_persists_and_bumps_version() {
        let dir = tempdir().unwrap();
        let store = FileGoalStore::new(dir.path().join("goals")).unwrap();
        let gi = make_instance("build", "abc123");
        store.create(&gi).await.unwrap();

        let (updated, outcome) = store
            .update_goal_state(gi.id, &GoalUpdate::new(GoalState::InProcess, "Building"))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            UpdateOutcome::Applied {
                from: GoalState::Requested
            }
        );
        assert_eq!(updated.version, 1);

        let reloaded = store.get(gi.id).await.unwrap().unwrap();
        assert_eq!(reloaded.state, GoalState::InProcess);
        assert_eq!(reloaded.version, 1);
    }

    #[tokio::test]
    async fn identical_update_twice_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = FileGoalStore::new(dir.path().join("goals")).unwrap();
        let gi = make_instance("build", "abc123");
        store.create(&gi).await.unwrap();

        let update = GoalUpdate::new(GoalState::Success, "Build successful");
        let (first, _) = store.update_goal_state(gi.id, &update).await.unwrap();
        let (second, outcome) = store.update_goal_state(gi.id, &update).await.unwrap();

        assert_eq!(outcome, UpdateOutcome::Unchanged);
        assert_eq!(first.state, second.state);
        assert_eq!(first.description, second.description);
        assert_eq!(first.version, second.version);
    }

    #[tokio::test]
    async fn stale_update_is_rejected_against_persisted_state() {
        let dir = tempdir().unwrap();
        let store = FileGoalStore::new(dir.path().join("goals")).unwrap();
        let gi = make_instance("build", "abc123");
        store.create(&gi).await.unwrap();

        store
            .update_goal_state(gi.id, &GoalUpdate::new(GoalState::Success, "Build successful"))
            .await
            .unwrap();
        let stale = store
            .update_goal_state(gi.id, &GoalUpdate::new(GoalState::InProcess, "Building"))
            .await;
        assert!(matches!(stale, Err(GoalError::InvalidTransition { .. })));

        let reloaded = store.get(gi.id).await.unwrap().unwrap();
        assert_eq!(reloaded.state, GoalState::Success);
    }

    #[tokio::test]
    async fn update_nonexistent_returns_not_found() {
        let dir = tempdir().unwrap();
        let store = FileGoalStore::new(dir.path().join("goals")).unwrap();
        let result = store
            .update_goal_state(Uuid::new_v4(), &GoalUpdate::new(GoalState::InProcess, "x"))
            .await;
        assert!(matches!(result, Err(GoalError::NotFound(_))));
    }

    #[tokio::test]
    async fn list_by_state_filters_correctly() {
        let dir = tempdir().unwrap();
        let store = FileGoalStore::new(dir.path().join("goals")).unwrap();
        let waiting = make_instance("build", "abc123");
        let done = make_instance("build", "def456");
        store.create(&waiting).await.unwrap();
        store.create(&done).await.unwrap();
        store
            .update_goal_state(done.id, &GoalUpdate::new(GoalState::Failure, "Build failed"))
            .await
            .unwrap();

        let failed = store.list_by_state(GoalState::Failure).unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, done.id);
        assert_eq!(store.list_by_state(GoalState::Requested).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn store_survives_reopen() {
        let dir = tempdir().unwrap();
        let store_path = dir.path().join("goals");
        let gi = make_instance("build", "abc123");

        {
            let store = FileGoalStore::new(&store_path).unwrap();
            store.create(&gi).await.unwrap();
        }

        let store = FileGoalStore::new(&store_path).unwrap();
        assert!(store.get(gi.id).await.unwrap().is_some());
    }
}
