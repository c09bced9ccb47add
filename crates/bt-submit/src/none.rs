//! "None" adapter - tagging disabled at the VCS level

use bt_goal::CommitIdentity;

use crate::adapter::{Result, TagAdapter, TagResult};

/// Fallback adapter that performs no VCS operations
///
/// Selected with `adapter = "none"` when the build should still compute and
/// log tag names without touching the repository.
pub struct NoneAdapter;

impl NoneAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NoneAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl TagAdapter for NoneAdapter {
    fn create_tag(
        &self,
        commit: &CommitIdentity,
        message: &str,
        tag_name: &str,
    ) -> Result<TagResult> {
        tracing::debug!("NoneAdapter: create_tag({}) - no-op", tag_name);
        Ok(TagResult {
            tag_name: tag_name.to_string(),
            commit_sha: commit.sha.clone(),
            message: message.to_string(),
            metadata: [("adapter".to_string(), "none".to_string())]
                .into_iter()
                .collect(),
        })
    }

    fn name(&self) -> &str {
        "none"
    }
}
