// instance.rs — GoalInstance: one goal template bound to one commit.
//
// The state machine is deliberately small:
//   Requested → InProcess → { Success | Failure }
//   Requested → { Success | Failure }   (an external report can skip InProcess)
// Success and Failure are terminal. A superseding goal-set creates a new
// instance instead of reopening an old one, so nothing leaves a terminal
// state. Re-applying the current state is allowed and is how duplicate
// notifications stay harmless.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::commit::CommitIdentity;
use crate::error::GoalError;
use crate::goal::{BuildGoal, FulfillmentMethod, GoalEnvironment};

/// The lifecycle state of a goal instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalState {
    /// Implicit start: scheduled, nothing has happened yet.
    Requested,
    InProcess,
    Success,
    Failure,
}

impl fmt::Display for GoalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GoalState::Requested => write!(f, "requested"),
            GoalState::InProcess => write!(f, "in_process"),
            GoalState::Success => write!(f, "success"),
            GoalState::Failure => write!(f, "failure"),
        }
    }
}

impl GoalState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, GoalState::Success | GoalState::Failure)
    }

    /// Check whether moving from this state to `next` is valid.
    pub fn can_transition_to(&self, next: &GoalState) -> bool {
        if self == next {
            return true;
        }
        match self {
            GoalState::Requested => true,
            GoalState::InProcess => next.is_terminal(),
            GoalState::Success | GoalState::Failure => false,
        }
    }
}

/// A link shown next to a goal, such as the build log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalUrl {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub url: String,
}

impl ExternalUrl {
    pub fn new(label: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
            url: url.into(),
        }
    }
}

/// A patch applied through `update_goal_state`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoalUpdate {
    pub state: GoalState,
    pub description: String,
    pub external_urls: Vec<ExternalUrl>,
}

impl GoalUpdate {
    pub fn new(state: GoalState, description: impl Into<String>) -> Self {
        Self {
            state,
            description: description.into(),
            external_urls: Vec::new(),
        }
    }

    pub fn with_url(mut self, label: impl Into<String>, url: impl Into<String>) -> Self {
        self.external_urls.push(ExternalUrl::new(label, url));
        self
    }
}

/// What an update did to the persisted record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The record changed; `from` is the state before the write.
    Applied { from: GoalState },

    /// Same state, same description, no new links. Nothing was written.
    Unchanged,
}

/// One concrete goal on one commit, within one goal-set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoalInstance {
    pub id: Uuid,
    pub goal_set_id: Uuid,

    /// Unique name of the template this instance came from.
    pub name: String,
    pub environment: GoalEnvironment,
    pub commit: CommitIdentity,
    pub state: GoalState,
    pub description: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub external_urls: Vec<ExternalUrl>,

    pub fulfillment: FulfillmentMethod,
    pub retry_feasible: bool,

    /// Bumped on every persisted change.
    #[serde(default)]
    pub version: u64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GoalInstance {
    /// Instantiate `goal` for a goal-set on `commit`, in the Requested state.
    pub fn from_template(goal: &BuildGoal, goal_set_id: Uuid, commit: CommitIdentity) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            goal_set_id,
            name: goal.name.clone(),
            environment: goal.environment,
            commit,
            state: GoalState::Requested,
            description: goal.descriptions.requested.clone(),
            external_urls: Vec::new(),
            fulfillment: goal.fulfillment.method(),
            retry_feasible: goal.retry_feasible,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Override the recorded fulfillment method (e.g. a goal whose outcome
    /// is reported by an integration rather than by a side-effect listener).
    pub fn with_fulfillment(mut self, method: FulfillmentMethod) -> Self {
        self.fulfillment = method;
        if method.is_external() {
            self.retry_feasible = false;
        }
        self
    }

    /// Apply an update in memory. Returns an error if the transition is invalid.
    pub fn apply(&mut self, update: &GoalUpdate) -> Result<UpdateOutcome, GoalError> {
        if !self.state.can_transition_to(&update.state) {
            return Err(GoalError::InvalidTransition {
                goal_id: self.id,
                from: self.state.to_string(),
                to: update.state.to_string(),
            });
        }

        let new_urls: Vec<ExternalUrl> = update
            .external_urls
            .iter()
            .filter(|u| !self.external_urls.iter().any(|e| e.url == u.url))
            .cloned()
            .collect();

        if self.state == update.state
            && self.description == update.description
            && new_urls.is_empty()
        {
            return Ok(UpdateOutcome::Unchanged);
        }

        let from = self.state;
        self.state = update.state;
        self.description = update.description.clone();
        self.external_urls.extend(new_urls);
        self.version += 1;
        self.updated_at = Utc::now();
        Ok(UpdateOutcome::Applied { from })
    }
}

/// What a fulfillment hands back to the orchestration engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoalExecutionResult {
    pub state: GoalState,
    pub description: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub external_urls: Vec<ExternalUrl>,

    /// Process-style result code: 0 on success, non-zero on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i32>,
}

impl GoalExecutionResult {
    pub fn success(description: impl Into<String>) -> Self {
        Self {
            state: GoalState::Success,
            description: description.into(),
            external_urls: Vec::new(),
            code: Some(0),
        }
    }

    pub fn failure(description: impl Into<String>, code: i32) -> Self {
        Self {
            state: GoalState::Failure,
            description: description.into(),
            external_urls: Vec::new(),
            code: Some(code),
        }
    }

    pub fn is_success(&self) -> bool {
        self.state == GoalState::Success
    }
}
