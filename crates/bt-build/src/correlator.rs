// correlator.rs — Match inbound build notifications to pending goals.
//
// Notifications arrive on an mpsc channel and are handled one at a time by a
// single task, in arrival order. For each one we resolve the repository,
// pick the one goal template the notification reports on (by CI tool, then
// by name), look up the newest instance of it on that commit, let the build
// observers see the notification, then update that goal if its outcome is
// reported from outside.
//
// The correlator holds no goal state of its own. The goal store is the
// system of record, and the state machine behind it refuses to leave a
// terminal state, so a late "started" after "passed" is dropped rather than
// reopening the goal.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use bt_goal::{
    BuildEvent, BuildGoal, CommitIdentity, GoalError, GoalInstance, GoalState, GoalTracker,
    GoalUpdate, RepoRef, UpdateOutcome,
};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::SdmConfiguration;
use crate::direct::LOCAL_PROVIDER;
use crate::error::BuildError;
use crate::report::FailureReporter;

/// Label of the external URL attached to correlated goals.
pub const BUILD_LOG_LABEL: &str = "Build log";

/// Sees every inbound build notification, matched or not.
#[async_trait]
pub trait BuildObserver: Send + Sync {
    async fn on_build(&self, build: &BuildEvent) -> Result<(), BuildError>;

    fn name(&self) -> &str {
        "observer"
    }
}

/// Maps a notification's commit onto a known repository.
pub trait RepoResolver: Send + Sync {
    fn resolve(&self, commit: &CommitIdentity) -> Option<RepoRef>;
}

/// Trusts the owner, name and provider carried by the commit itself.
#[derive(Debug, Clone, Default)]
pub struct CommitRepoResolver;

impl RepoResolver for CommitRepoResolver {
    fn resolve(&self, commit: &CommitIdentity) -> Option<RepoRef> {
        if commit.owner.is_empty() || commit.repo.is_empty() || commit.sha.is_empty() {
            return None;
        }
        Some(commit.repo_ref())
    }
}

/// What a notification did to one matched goal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Correlation {
    Updated { goal_id: Uuid, state: GoalState },

    /// Duplicate notification; nothing written.
    Unchanged { goal_id: Uuid },

    /// The goal is built directly; its own builder owns its state.
    IgnoredDirect { goal_id: Uuid },

    /// The notification would move the goal backwards or out of a
    /// terminal state.
    Stale {
        goal_id: Uuid,
        current: String,
        requested: GoalState,
    },
}

pub struct ExternalBuildCorrelator {
    config: Arc<SdmConfiguration>,
    tracker: GoalTracker,
    resolver: Arc<dyn RepoResolver>,
    reporter: Option<Arc<FailureReporter>>,
}

impl ExternalBuildCorrelator {
    pub fn new(config: Arc<SdmConfiguration>, tracker: GoalTracker) -> Self {
        Self {
            config,
            tracker,
            resolver: Arc::new(CommitRepoResolver),
            reporter: None,
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn RepoResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<FailureReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Handle one notification. `None` means no pending goal matched.
    pub async fn correlate(&self, build: &BuildEvent) -> Result<Option<Correlation>, BuildError> {
        let Some(repo) = self.resolver.resolve(&build.commit) else {
            tracing::debug!(commit = %build.commit, "no repository for notification, ignoring");
            return Ok(None);
        };

        let matched = match self.template_for(build) {
            Some(template) => self
                .tracker
                .store()
                .find_goal_instance(&build.commit, &template.name)
                .await?
                .map(|instance| (template, instance)),
            None => None,
        };

        self.notify_observers(build).await;

        let Some((template, instance)) = matched else {
            tracing::debug!(
                repo = %repo,
                sha = %build.commit.sha,
                provider = %build.provider,
                status = %build.status,
                "no goal instance for notification"
            );
            return Ok(None);
        };
        self.apply(template, instance, build).await.map(Some)
    }

    /// The one goal template a notification reports on.
    ///
    /// Our own events name the direct goal that produced them and never
    /// match an external goal. Anything else is matched on the CI tool;
    /// when several goals share a tool, the notification's name decides.
    fn template_for(&self, build: &BuildEvent) -> Option<&BuildGoal> {
        if build.provider == LOCAL_PROVIDER {
            return build
                .name
                .as_deref()
                .and_then(|name| self.config.goal(name))
                .filter(|template| template.fulfillment.tool_name().is_none());
        }

        let candidates: Vec<&BuildGoal> = self
            .config
            .registry()
            .goals()
            .filter(|template| template.fulfillment.tool_name() == Some(build.provider.as_str()))
            .collect();

        if let Some(name) = build.name.as_deref() {
            if let Some(template) = candidates.iter().copied().find(|t| t.name == name) {
                return Some(template);
            }
        }
        match candidates.as_slice() {
            [] => None,
            [template] => Some(*template),
            _ => {
                tracing::warn!(
                    provider = %build.provider,
                    name = ?build.name,
                    goals = candidates.len(),
                    "notification matches more than one goal, ignoring"
                );
                None
            }
        }
    }

    async fn apply(
        &self,
        template: &BuildGoal,
        instance: GoalInstance,
        build: &BuildEvent,
    ) -> Result<Correlation, BuildError> {
        if !instance.fulfillment.is_external() {
            tracing::debug!(
                goal = %instance.name,
                commit = %instance.commit,
                "goal is fulfilled directly, ignoring notification"
            );
            return Ok(Correlation::IgnoredDirect {
                goal_id: instance.id,
            });
        }

        let state = build.status.goal_state();
        let mut update = GoalUpdate::new(state, template.descriptions.for_state(&state));
        if let Some(url) = &build.build_url {
            update = update.with_url(BUILD_LOG_LABEL, url.clone());
        }

        let (updated, outcome) = match self.tracker.update_goal_state(&instance, update).await {
            Ok(result) => result,
            Err(GoalError::InvalidTransition { from, .. }) => {
                tracing::warn!(
                    goal = %instance.name,
                    commit = %instance.commit,
                    current = %from,
                    status = %build.status,
                    "dropping out-of-order build notification"
                );
                return Ok(Correlation::Stale {
                    goal_id: instance.id,
                    current: from,
                    requested: state,
                });
            }
            Err(e) => return Err(e.into()),
        };

        match outcome {
            UpdateOutcome::Unchanged => Ok(Correlation::Unchanged {
                goal_id: updated.id,
            }),
            UpdateOutcome::Applied { .. } => {
                if updated.state == GoalState::Failure {
                    self.report_failure(&updated, build).await;
                }
                Ok(Correlation::Updated {
                    goal_id: updated.id,
                    state: updated.state,
                })
            }
        }
    }

    async fn notify_observers(&self, build: &BuildEvent) {
        for observer in self.config.observers() {
            if let Err(e) = observer.on_build(build).await {
                tracing::warn!(
                    observer = observer.name(),
                    commit = %build.commit,
                    "build observer failed: {}",
                    e
                );
            }
        }
    }

    async fn report_failure(&self, goal: &GoalInstance, build: &BuildEvent) {
        if let Some(reporter) = &self.reporter {
            reporter.report(goal, build).await;
        }
    }

    /// Consume notifications until every sender is dropped.
    pub async fn run(self: Arc<Self>, rx: mpsc::UnboundedReceiver<BuildEvent>) {
        self.run_until(rx, std::future::pending()).await;
    }

    /// Consume notifications until `shutdown` resolves, then close the
    /// channel and handle whatever was already queued.
    pub async fn run_until<F>(
        self: Arc<Self>,
        mut rx: mpsc::UnboundedReceiver<BuildEvent>,
        shutdown: F,
    ) where
        F: Future<Output = ()>,
    {
        tracing::info!("build correlator started");
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                build = rx.recv() => match build {
                    Some(build) => self.handle(&build).await,
                    None => break,
                },
                _ = &mut shutdown => {
                    rx.close();
                    let mut drained = 0usize;
                    while let Some(build) = rx.recv().await {
                        self.handle(&build).await;
                        drained += 1;
                    }
                    tracing::info!(drained, "build correlator drained its queue");
                    break;
                }
            }
        }
        tracing::info!("build correlator stopped");
    }

    async fn handle(&self, build: &BuildEvent) {
        if let Err(e) = self.correlate(build).await {
            tracing::error!(
                commit = %build.commit,
                status = %build.status,
                "failed to correlate build notification: {}",
                e
            );
        }
    }
}
