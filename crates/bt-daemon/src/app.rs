// app.rs — Wire the stores, dispatcher and configuration for one project.
//
// Everything a command needs is opened here from `.buildtrack/config.toml`.
// Lifecycle events go to the JSONL event log and, for Build* events, into
// the correlator's inbound channel. The receiving end is handed back to the
// caller, which decides whether to run the correlator.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use bt_build::{
    BuildConfig, BuildNumberAllocator, CommandSequenceExecutor, DirectBuilder,
    ExternalBuildCorrelator, FailureReporter, FileIdentifierStore, HttpLogFetcher, ProcessRunner,
    SdmConfiguration, TagSideEffect,
};
use bt_goal::{BuildEvent, ChannelSink, EventDispatcher, FileGoalStore, GoalTracker, LogSink};
use bt_submit::FileVersionStore;
use tokio::sync::mpsc;

pub struct App {
    pub project_root: PathBuf,
    pub config: Arc<SdmConfiguration>,
    pub goals: Arc<FileGoalStore>,
    pub versions: Arc<FileVersionStore>,
    pub dispatcher: Arc<EventDispatcher>,
    pub tracker: GoalTracker,
    allocator: Arc<BuildNumberAllocator>,
    notifications: mpsc::UnboundedSender<BuildEvent>,
}

impl App {
    /// Open the project at `project_root`. Returns the app and the inbound
    /// notification receiver for the correlator.
    pub fn open(project_root: &Path) -> Result<(Self, mpsc::UnboundedReceiver<BuildEvent>)> {
        let config = BuildConfig::for_project(project_root)
            .with_context(|| format!("loading config for {}", project_root.display()))?;
        let stores = config.store.clone();

        let goals = Arc::new(FileGoalStore::new(&stores.goals_dir)?);
        let identifiers = Arc::new(FileIdentifierStore::new(&stores.identifiers_log));
        let versions = Arc::new(FileVersionStore::new(&stores.versions_file));

        let (tx, rx) = mpsc::unbounded_channel();
        let mut dispatcher = EventDispatcher::new();
        dispatcher.add_sink(Box::new(LogSink::new(&stores.events_log)));
        dispatcher.add_sink(Box::new(ChannelSink::new(tx.clone())));
        let dispatcher = Arc::new(dispatcher);

        let config = Arc::new(SdmConfiguration::new(config)?);
        let tracker = GoalTracker::new(goals.clone(), dispatcher.clone());
        let allocator = Arc::new(BuildNumberAllocator::new(identifiers, dispatcher.clone()));

        tracing::info!(
            project_root = %project_root.display(),
            goals = config.registry().len(),
            tagging = config.tagging_enabled(),
            "project opened"
        );

        Ok((
            Self {
                project_root: project_root.to_path_buf(),
                config,
                goals,
                versions,
                dispatcher,
                tracker,
                allocator,
                notifications: tx,
            },
            rx,
        ))
    }

    /// Sender for inbound build notifications.
    pub fn notifications(&self) -> mpsc::UnboundedSender<BuildEvent> {
        self.notifications.clone()
    }

    pub fn correlator(&self) -> Result<ExternalBuildCorrelator> {
        let logs = &self.config.config().logs;
        let reporter = FailureReporter::new(
            Arc::new(HttpLogFetcher::new(logs)?),
            self.config.interpreter().cloned(),
            self.dispatcher.clone(),
        );
        Ok(
            ExternalBuildCorrelator::new(self.config.clone(), self.tracker.clone())
                .with_reporter(Arc::new(reporter)),
        )
    }

    /// A direct builder tagging in the checkout at `checkout`.
    pub fn direct_builder(&self, checkout: &Path) -> Result<DirectBuilder> {
        let tagging = &self.config.config().tagging;
        let adapter = tagging.build_adapter(checkout)?;
        let tagger = TagSideEffect::new(
            Arc::from(adapter),
            self.versions.clone(),
            tagging.enabled,
        );
        Ok(DirectBuilder::new(
            self.config.clone(),
            self.allocator.clone(),
            CommandSequenceExecutor::new(Arc::new(ProcessRunner)),
            self.tracker.clone(),
            self.dispatcher.clone(),
        )
        .with_tagger(Arc::new(tagger)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bt_goal::{BuildStatus, CommitIdentity, GoalInstance, GoalState, GoalStore, RepoRef};
    use tempfile::tempdir;
    use uuid::Uuid;

    #[test]
    fn opens_empty_project_with_defaults() {
        let dir = tempdir().unwrap();
        let (app, _rx) = App::open(dir.path()).unwrap();
        assert!(app.config.registry().is_empty());
        assert!(dir.path().join(".buildtrack/goals").is_dir());
        assert!(app.correlator().is_ok());
        assert!(app.direct_builder(dir.path()).is_ok());
    }

    #[tokio::test]
    async fn queued_notifications_are_handled_before_stopping() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".buildtrack")).unwrap();
        std::fs::write(
            dir.path().join(".buildtrack/config.toml"),
            "[[goals]]\nname = \"ci\"\n\n[goals.fulfillment]\nkind = \"external\"\ntool_name = \"travis\"\n",
        )
        .unwrap();
        let (app, inbound) = App::open(dir.path()).unwrap();

        let commit = CommitIdentity::new(&RepoRef::new("acme", "widgets", "github"), "abc123");
        let template = app.config.goal("ci").unwrap();
        let goal = GoalInstance::from_template(template, Uuid::new_v4(), commit.clone());
        app.goals.create(&goal).await.unwrap();

        app.notifications()
            .send(BuildEvent::new(commit, BuildStatus::Passed, "travis"))
            .unwrap();
        Arc::new(app.correlator().unwrap())
            .run_until(inbound, std::future::ready(()))
            .await;

        let stored = app.goals.get(goal.id).await.unwrap().unwrap();
        assert_eq!(stored.state, GoalState::Success);
    }

    #[test]
    fn unknown_tag_adapter_is_reported() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".buildtrack")).unwrap();
        std::fs::write(
            dir.path().join(".buildtrack/config.toml"),
            "[tagging]\nadapter = \"svn\"\n",
        )
        .unwrap();
        let (app, _rx) = App::open(dir.path()).unwrap();
        assert!(app.direct_builder(dir.path()).is_err());
    }
}
