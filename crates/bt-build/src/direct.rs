// direct.rs — Direct build orchestration.
//
// A direct build runs on our side, start to finish:
//
//   1. allocate a build number for the repository
//   2. goal → in_process, emit BuildStarted
//   3. run the goal's command sequence in the checkout
//   4. goal → success + BuildPassed + background tag, or
//      goal → failure + BuildFailed with the command error as description
//
// Nothing is tagged unless the goal reached success. Failures to allocate,
// set up or record the outcome abort with an error after failing the goal;
// each is logged with its own message so they can be told apart from a
// command that simply failed.

use std::sync::Arc;

use bt_goal::{
    BuildEvent, BuildStatus, EventDispatcher, Fulfillment, GoalError, GoalExecutionResult,
    GoalInstance, GoalState, GoalTracker, GoalUpdate, LifecycleEvent,
};
use bt_submit::TagResult;
use tokio::task::JoinHandle;

use crate::config::SdmConfiguration;
use crate::error::BuildError;
use crate::executor::{BuildProject, CommandSequenceExecutor};
use crate::identifier::BuildNumberAllocator;
use crate::tagging::TagSideEffect;

/// Provider name on build events we produce ourselves.
pub const LOCAL_PROVIDER: &str = "local";

/// Result code reported for a failed direct build.
pub const FAILURE_CODE: i32 = 1;

/// What a completed direct build handed back.
#[derive(Debug)]
pub struct BuildOutcome {
    pub result: GoalExecutionResult,
    pub build_number: String,

    /// Background tagging, when the build succeeded and tagging is enabled.
    pub tagging: Option<JoinHandle<Option<TagResult>>>,

    /// Combined log of the commands that ran.
    pub log: String,
}

pub struct DirectBuilder {
    config: Arc<SdmConfiguration>,
    allocator: Arc<BuildNumberAllocator>,
    executor: CommandSequenceExecutor,
    tracker: GoalTracker,
    dispatcher: Arc<EventDispatcher>,
    tagger: Option<Arc<TagSideEffect>>,
}

impl DirectBuilder {
    pub fn new(
        config: Arc<SdmConfiguration>,
        allocator: Arc<BuildNumberAllocator>,
        executor: CommandSequenceExecutor,
        tracker: GoalTracker,
        dispatcher: Arc<EventDispatcher>,
    ) -> Self {
        Self {
            config,
            allocator,
            executor,
            tracker,
            dispatcher,
            tagger: None,
        }
    }

    pub fn with_tagger(mut self, tagger: Arc<TagSideEffect>) -> Self {
        self.tagger = Some(tagger);
        self
    }

    /// Build `goal` in `project`.
    ///
    /// `Ok` carries the goal's final result, success or failure. `Err` means
    /// the build never produced a result: no build number, setup failure, or
    /// the outcome could not be recorded. The goal is failed in every case
    /// it can be.
    pub async fn execute(
        &self,
        goal: &GoalInstance,
        project: &BuildProject,
    ) -> Result<BuildOutcome, BuildError> {
        let template = self
            .config
            .goal(&goal.name)
            .ok_or_else(|| BuildError::UnknownGoal(goal.name.clone()))?;
        let Fulfillment::Direct { commands } = &template.fulfillment else {
            return Err(BuildError::NotDirect(goal.name.clone()));
        };

        let current = self
            .tracker
            .store()
            .get(goal.id)
            .await?
            .ok_or(GoalError::NotFound(goal.id))?;
        if current.state.is_terminal() {
            tracing::warn!(goal = %goal.name, state = %current.state, "goal already finished, not building");
            return Err(GoalError::InvalidTransition {
                goal_id: goal.id,
                from: current.state.to_string(),
                to: GoalState::InProcess.to_string(),
            }
            .into());
        }

        let repo = goal.commit.repo_ref();
        let build_number = match self.allocator.allocate(&repo).await {
            Ok(number) => number,
            Err(e) => {
                tracing::error!(goal = %goal.name, repo = %repo, "build aborted: {}", e);
                self.fail_goal(goal, &e.to_string()).await;
                return Err(e);
            }
        };

        if let Err(e) = self
            .tracker
            .update_goal_state(
                goal,
                GoalUpdate::new(GoalState::InProcess, &template.descriptions.in_process),
            )
            .await
        {
            tracing::error!(goal = %goal.name, build_number = %build_number, "could not start goal: {}", e);
            self.emit(goal, BuildStatus::Failed, &build_number);
            return Err(e.into());
        }
        self.emit(goal, BuildStatus::Started, &build_number);
        tracing::info!(
            goal = %goal.name,
            commit = %goal.commit,
            build_number = %build_number,
            "direct build started"
        );

        let report = match self.executor.execute(commands, project, &build_number).await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!(
                    goal = %goal.name,
                    build_number = %build_number,
                    "build setup failed: {}",
                    e
                );
                self.emit(goal, BuildStatus::Failed, &build_number);
                self.fail_goal(goal, &e.to_string()).await;
                return Err(e);
            }
        };

        match report.error {
            Some(message) => {
                tracing::warn!(
                    goal = %goal.name,
                    build_number = %build_number,
                    "build command failed: {}",
                    message
                );
                self.finish(goal, GoalUpdate::new(GoalState::Failure, &message), &build_number)
                    .await?;
                self.emit(goal, BuildStatus::Failed, &build_number);
                Ok(BuildOutcome {
                    result: GoalExecutionResult::failure(message, FAILURE_CODE),
                    build_number,
                    tagging: None,
                    log: report.log,
                })
            }
            None => {
                let description = template.descriptions.completed.clone();
                self.finish(
                    goal,
                    GoalUpdate::new(GoalState::Success, &description),
                    &build_number,
                )
                .await?;
                self.emit(goal, BuildStatus::Passed, &build_number);
                tracing::info!(
                    goal = %goal.name,
                    commit = %goal.commit,
                    build_number = %build_number,
                    commands = report.commands_run,
                    "direct build passed"
                );

                let tagging = self
                    .tagger
                    .as_ref()
                    .filter(|t| t.is_enabled())
                    .map(|t| t.spawn(goal.commit.clone(), build_number.clone()));

                Ok(BuildOutcome {
                    result: GoalExecutionResult::success(description),
                    build_number,
                    tagging,
                    log: report.log,
                })
            }
        }
    }

    /// Record the terminal state. A failure here is a result-handling error:
    /// the build ran but we could not say how it went.
    async fn finish(
        &self,
        goal: &GoalInstance,
        update: GoalUpdate,
        build_number: &str,
    ) -> Result<(), BuildError> {
        if let Err(e) = self.tracker.update_goal_state(goal, update).await {
            tracing::error!(
                goal = %goal.name,
                build_number,
                "failed to handle build result: {}",
                e
            );
            self.emit(goal, BuildStatus::Failed, build_number);
            self.fail_goal(goal, &e.to_string()).await;
            return Err(BuildError::ResultHandling(e.to_string()));
        }
        Ok(())
    }

    /// Best effort: mark `goal` failed with `reason`.
    async fn fail_goal(&self, goal: &GoalInstance, reason: &str) {
        let update = GoalUpdate::new(GoalState::Failure, reason);
        if let Err(e) = self.tracker.update_goal_state(goal, update).await {
            tracing::warn!(goal = %goal.name, "could not mark goal failed: {}", e);
        }
    }

    fn emit(&self, goal: &GoalInstance, status: BuildStatus, build_number: &str) {
        let build = BuildEvent::new(goal.commit.clone(), status, LOCAL_PROVIDER)
            .with_name(goal.name.clone())
            .with_number(build_number);
        self.dispatcher.dispatch(&LifecycleEvent::for_build(build));
    }
}
