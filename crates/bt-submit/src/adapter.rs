//! Core TagAdapter trait and result types

use bt_goal::CommitIdentity;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur during VCS operations
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("Adapter not configured: {0}")]
    NotConfigured(String),

    #[error("VCS operation failed: {0}")]
    VcsError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Invalid tag name: {0}")]
    InvalidTagName(String),

    /// Tags are immutable: an existing tag is never moved.
    #[error("Tag already exists: {0}")]
    TagExists(String),
}

pub type Result<T> = std::result::Result<T, SubmitError>;

/// Result of a tag operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagResult {
    /// Tag name as created (e.g. "v1.2.3+build.4")
    pub tag_name: String,

    /// Commit the tag points at
    pub commit_sha: String,

    /// Human-readable message
    pub message: String,

    /// Adapter-specific metadata
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Pluggable adapter for creating immutable version tags
///
/// For Git: annotated tag, optionally pushed to a remote
/// For "none": no-op, returns a synthetic result
pub trait TagAdapter: Send + Sync {
    /// Create `tag_name` pointing at `commit`, annotated with `message`.
    fn create_tag(&self, commit: &CommitIdentity, message: &str, tag_name: &str)
        -> Result<TagResult>;

    /// Adapter display name (for logs)
    fn name(&self) -> &str;
}
