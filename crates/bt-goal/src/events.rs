// events.rs — Build notifications, lifecycle events and notification dispatch.
//
// Two kinds of things flow through here:
// - BuildEvent: a build-completion notification. Self-reported by the direct
//   builder or posted by an external CI integration. Immutable once emitted.
// - LifecycleEvent: what we publish for everyone else (dashboards, chat,
//   audit logs). BuildStarted/Passed/Failed wrap a BuildEvent; the rest
//   record build numbers, goal state changes and failure reports.
//
// Sinks are synchronous and must not block: the ChannelSink hands build
// events to the correlator task over an unbounded channel.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::commit::{CommitIdentity, RepoRef};
use crate::error::GoalError;
use crate::instance::GoalState;

/// Raw build status as reported by a build system.
///
/// Statuses are matched exactly; anything else, including a differently
/// cased known status, is kept verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum BuildStatus {
    Started,
    Passed,
    Failed,
    Broken,
    Canceled,
    Other(String),
}

impl BuildStatus {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "started" => BuildStatus::Started,
            "passed" => BuildStatus::Passed,
            "failed" => BuildStatus::Failed,
            "broken" => BuildStatus::Broken,
            "canceled" => BuildStatus::Canceled,
            _ => BuildStatus::Other(raw.to_string()),
        }
    }

    /// Map a raw status onto a goal state.
    ///
    /// Unknown statuses mean "not concluded yet", not "errored".
    pub fn goal_state(&self) -> GoalState {
        match self {
            BuildStatus::Passed => GoalState::Success,
            BuildStatus::Broken | BuildStatus::Failed | BuildStatus::Canceled => {
                GoalState::Failure
            }
            BuildStatus::Started | BuildStatus::Other(_) => GoalState::InProcess,
        }
    }
}

impl From<String> for BuildStatus {
    fn from(raw: String) -> Self {
        BuildStatus::parse(&raw)
    }
}

impl From<BuildStatus> for String {
    fn from(status: BuildStatus) -> Self {
        status.to_string()
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildStatus::Started => write!(f, "started"),
            BuildStatus::Passed => write!(f, "passed"),
            BuildStatus::Failed => write!(f, "failed"),
            BuildStatus::Broken => write!(f, "broken"),
            BuildStatus::Canceled => write!(f, "canceled"),
            BuildStatus::Other(raw) => write!(f, "{}", raw),
        }
    }
}

/// A build notification: "build N of commit C is now in status S".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildEvent {
    pub commit: CommitIdentity,
    pub status: BuildStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_url: Option<String>,

    /// The build system that produced this event (e.g. "travis", "local").
    pub provider: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<String>,

    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl BuildEvent {
    pub fn new(commit: CommitIdentity, status: BuildStatus, provider: impl Into<String>) -> Self {
        Self {
            commit,
            status,
            build_url: None,
            provider: provider.into(),
            name: None,
            number: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.build_url = Some(url.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_number(mut self, number: impl Into<String>) -> Self {
        self.number = Some(number.into());
        self
    }
}

/// Structured reading of a failed build's log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureSummary {
    /// One-line explanation for humans.
    pub message: String,

    /// The log lines that explain the failure.
    #[serde(default)]
    pub relevant_lines: Vec<String>,

    /// Interpreter that produced the summary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interpreter: Option<String>,
}

/// What we tell the notification system about an externally failed build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport {
    pub goal_id: Uuid,
    pub goal_name: String,
    pub commit: CommitIdentity,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_url: Option<String>,

    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<FailureSummary>,

    /// Raw log, when one was fetched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log: Option<String>,
}

/// Events published at key lifecycle points.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum LifecycleEvent {
    BuildStarted {
        build: BuildEvent,
    },

    BuildPassed {
        build: BuildEvent,
    },

    BuildFailed {
        build: BuildEvent,
    },

    /// A build number was issued; the event of record for the allocator.
    BuildIdentifierBumped {
        repo: RepoRef,
        sequence: String,
        timestamp: DateTime<Utc>,
    },

    GoalStateChanged {
        goal_id: Uuid,
        goal_name: String,
        sha: String,
        from_state: String,
        to_state: String,
        description: String,
        timestamp: DateTime<Utc>,
    },

    BuildFailureReported {
        report: FailureReport,
        timestamp: DateTime<Utc>,
    },
}

impl LifecycleEvent {
    /// Get the event type name as a string.
    pub fn event_type(&self) -> &str {
        match self {
            LifecycleEvent::BuildStarted { .. } => "build_started",
            LifecycleEvent::BuildPassed { .. } => "build_passed",
            LifecycleEvent::BuildFailed { .. } => "build_failed",
            LifecycleEvent::BuildIdentifierBumped { .. } => "build_identifier_bumped",
            LifecycleEvent::GoalStateChanged { .. } => "goal_state_changed",
            LifecycleEvent::BuildFailureReported { .. } => "build_failure_reported",
        }
    }

    /// Wrap a build event in the matching Build* variant.
    pub fn for_build(build: BuildEvent) -> Self {
        match build.status.goal_state() {
            GoalState::Success => LifecycleEvent::BuildPassed { build },
            GoalState::Failure => LifecycleEvent::BuildFailed { build },
            GoalState::Requested | GoalState::InProcess => LifecycleEvent::BuildStarted { build },
        }
    }

    /// The wrapped build event, for Build* variants.
    pub fn build(&self) -> Option<&BuildEvent> {
        match self {
            LifecycleEvent::BuildStarted { build }
            | LifecycleEvent::BuildPassed { build }
            | LifecycleEvent::BuildFailed { build } => Some(build),
            _ => None,
        }
    }

    pub fn identifier_bumped(repo: &RepoRef, sequence: &str) -> Self {
        LifecycleEvent::BuildIdentifierBumped {
            repo: repo.clone(),
            sequence: sequence.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn goal_state_changed(
        goal_id: Uuid,
        goal_name: &str,
        sha: &str,
        from: &GoalState,
        to: &GoalState,
        description: &str,
    ) -> Self {
        LifecycleEvent::GoalStateChanged {
            goal_id,
            goal_name: goal_name.to_string(),
            sha: sha.to_string(),
            from_state: from.to_string(),
            to_state: to.to_string(),
            description: description.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn failure_reported(report: FailureReport) -> Self {
        LifecycleEvent::BuildFailureReported {
            report,
            timestamp: Utc::now(),
        }
    }
}

/// Trait for receiving lifecycle events.
///
/// Implementations decide what to do with each event: append to a file,
/// forward to the correlator, post to chat, etc.
pub trait NotificationSink: Send + Sync {
    /// Handle an event. Errors are logged but don't stop the system.
    fn send(&self, event: &LifecycleEvent) -> Result<(), GoalError>;
}

/// Logs events as JSONL to a file (always-on sink).
pub struct LogSink {
    path: PathBuf,
}

impl LogSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl NotificationSink for LogSink {
    fn send(&self, event: &LifecycleEvent) -> Result<(), GoalError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| GoalError::IoError {
                path: parent.display().to_string(),
                source,
            })?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| GoalError::IoError {
                path: self.path.display().to_string(),
                source,
            })?;

        let json = serde_json::to_string(event)?;
        writeln!(file, "{}", json).map_err(|source| GoalError::IoError {
            path: self.path.display().to_string(),
            source,
        })?;

        Ok(())
    }
}

/// Forwards Build* events to the correlator's inbound channel.
///
/// Self-reported builds go through the same path as external ones; the
/// correlator never lets them conclude an externally fulfilled goal.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<BuildEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<BuildEvent>) -> Self {
        Self { tx }
    }
}

impl NotificationSink for ChannelSink {
    fn send(&self, event: &LifecycleEvent) -> Result<(), GoalError> {
        let Some(build) = event.build() else {
            return Ok(());
        };
        self.tx
            .send(build.clone())
            .map_err(|_| GoalError::NotificationError("correlator channel closed".to_string()))
    }
}

/// Keeps every event in memory. Handy for embedders that poll, and for tests.
#[derive(Clone, Default)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<LifecycleEvent>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything received so far.
    pub fn events(&self) -> Vec<LifecycleEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Event type names in arrival order.
    pub fn event_types(&self) -> Vec<String> {
        self.events()
            .iter()
            .map(|e| e.event_type().to_string())
            .collect()
    }
}

impl NotificationSink for MemorySink {
    fn send(&self, event: &LifecycleEvent) -> Result<(), GoalError> {
        let mut events = self
            .events
            .lock()
            .map_err(|_| GoalError::NotificationError("memory sink poisoned".to_string()))?;
        events.push(event.clone());
        Ok(())
    }
}

/// Dispatches events to multiple sinks.
///
/// Errors from individual sinks are logged (via tracing) but don't
/// prevent other sinks from receiving the event.
pub struct EventDispatcher {
    sinks: Vec<Box<dyn NotificationSink>>,
}

impl EventDispatcher {
    /// Create a new dispatcher with no sinks.
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    /// Add a notification sink.
    pub fn add_sink(&mut self, sink: Box<dyn NotificationSink>) {
        self.sinks.push(sink);
    }

    /// Dispatch an event to all sinks.
    pub fn dispatch(&self, event: &LifecycleEvent) {
        tracing::debug!(event_type = event.event_type(), "dispatching event");
        for sink in &self.sinks {
            if let Err(e) = sink.send(event) {
                tracing::warn!("notification sink error: {}", e);
            }
        }
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}
