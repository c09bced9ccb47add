//! # bt-goal
//!
//! Build goal templates, goal instances and lifecycle events for Buildtrack.
//!
//! A [`BuildGoal`] is configured once at startup and instantiated per
//! goal-set as a [`GoalInstance`] bound to one commit. The state machine is
//! `requested → in_process → {success, failure}`; terminal states are final.
//!
//! ## Key components
//!
//! - [`BuildGoal`] / [`Fulfillment`] — templates and how they get done
//! - [`GoalRegistry`] — templates registered at startup
//! - [`GoalInstance`] — the per-commit state machine
//! - [`GoalStore`] / [`FileGoalStore`] — persistence, the system of record
//! - [`GoalTracker`] — applies updates and publishes state changes
//! - [`BuildEvent`] / [`LifecycleEvent`] — notifications in and events out
//! - [`EventDispatcher`] / [`NotificationSink`] — event fan-out

pub mod commit;
pub mod error;
pub mod events;
pub mod goal;
pub mod instance;
pub mod store;
pub mod tracker;

pub use commit::{CommitIdentity, RepoRef};
pub use error::GoalError;
pub use events::{
    BuildEvent, BuildStatus, ChannelSink, EventDispatcher, FailureReport, FailureSummary,
    LifecycleEvent, LogSink, MemorySink, NotificationSink,
};
pub use goal::{
    BuildGoal, Fulfillment, FulfillmentMethod, GoalDescriptions, GoalEnvironment, GoalRegistry,
};
pub use instance::{
    ExternalUrl, GoalExecutionResult, GoalInstance, GoalState, GoalUpdate, UpdateOutcome,
};
pub use store::{FileGoalStore, GoalStore};
pub use tracker::GoalTracker;
