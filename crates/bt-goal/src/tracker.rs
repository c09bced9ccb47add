// tracker.rs — GoalTracker: the single entry point for goal state updates.
//
// Both fulfillment paths update goals through here. The tracker writes via
// the GoalStore and publishes GoalStateChanged for writes that actually
// changed something, so a repeated update has no side effect at all.

use std::sync::Arc;

use crate::error::GoalError;
use crate::events::{EventDispatcher, LifecycleEvent};
use crate::instance::{GoalInstance, GoalUpdate, UpdateOutcome};
use crate::store::GoalStore;

#[derive(Clone)]
pub struct GoalTracker {
    store: Arc<dyn GoalStore>,
    dispatcher: Arc<EventDispatcher>,
}

impl GoalTracker {
    pub fn new(store: Arc<dyn GoalStore>, dispatcher: Arc<EventDispatcher>) -> Self {
        Self { store, dispatcher }
    }

    pub fn store(&self) -> &Arc<dyn GoalStore> {
        &self.store
    }

    /// Set state and description, append external URLs.
    pub async fn update_goal_state(
        &self,
        goal: &GoalInstance,
        update: GoalUpdate,
    ) -> Result<(GoalInstance, UpdateOutcome), GoalError> {
        let (updated, outcome) = self.store.update_goal_state(goal.id, &update).await?;

        match outcome {
            UpdateOutcome::Applied { from } => {
                tracing::info!(
                    goal = %updated.name,
                    commit = %updated.commit,
                    from = %from,
                    to = %updated.state,
                    "goal state changed"
                );
                self.dispatcher.dispatch(&LifecycleEvent::goal_state_changed(
                    updated.id,
                    &updated.name,
                    &updated.commit.sha,
                    &from,
                    &updated.state,
                    &updated.description,
                ));
            }
            UpdateOutcome::Unchanged => {
                tracing::debug!(goal = %updated.name, state = %updated.state, "goal update unchanged");
            }
        }

        Ok((updated, outcome))
    }
}
