// error.rs — Error types for build execution and correlation.
//
// The variants follow where in a build things went wrong. Allocation and
// Setup abort a build before any command runs; Command means the build ran
// and failed; ResultHandling means the build ran but we could not record
// the outcome; PostProcessing (tagging, log interpretation) is only ever
// logged.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    /// Could not obtain a build number. Fatal to the build.
    #[error("build number allocation failed for {repo}: {reason}")]
    Allocation { repo: String, reason: String },

    /// The command sequence could not be started.
    #[error("build setup failed: {0}")]
    Setup(String),

    /// A build command exited non-zero or could not be spawned.
    #[error("build command `{command}` failed: {message}")]
    Command { command: String, message: String },

    /// The build ran, but recording its outcome failed.
    #[error("failed to handle build result: {0}")]
    ResultHandling(String),

    /// Tagging or failure reporting failed. Never changes a build outcome.
    #[error("post-processing failed: {0}")]
    PostProcessing(String),

    #[error("failed to fetch build log from {url}: {reason}")]
    LogFetch { url: String, reason: String },

    #[error("no goal template named {0}")]
    UnknownGoal(String),

    #[error("goal {0} is not fulfilled by a direct build")]
    NotDirect(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("goal error: {0}")]
    Goal(#[from] bt_goal::GoalError),

    #[error("submit error: {0}")]
    Submit(#[from] bt_submit::SubmitError),
}
