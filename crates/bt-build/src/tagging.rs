// tagging.rs — Immutable version tag after a successful direct build.
//
// Tag name is `<version>+build.<sequence>`. The version comes from the
// VersionSource; no version recorded for the commit means no tag, which is
// not an error. Tagging runs off the build's critical path and its failures
// are post-processing warnings only.

use std::sync::Arc;

use bt_goal::CommitIdentity;
use bt_submit::{TagAdapter, TagResult, VersionSource};
use tokio::task::JoinHandle;

use crate::error::BuildError;

pub fn tag_name(version: &str, sequence: &str) -> String {
    format!("{}+build.{}", version, sequence)
}

/// Creates the post-build tag through a VCS adapter.
pub struct TagSideEffect {
    adapter: Arc<dyn TagAdapter>,
    versions: Arc<dyn VersionSource>,
    enabled: bool,
}

impl TagSideEffect {
    pub fn new(
        adapter: Arc<dyn TagAdapter>,
        versions: Arc<dyn VersionSource>,
        enabled: bool,
    ) -> Self {
        Self {
            adapter,
            versions,
            enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Tag `commit` for build `sequence`. `Ok(None)` when tagging is off or
    /// the commit has no recorded version.
    pub async fn apply(
        &self,
        commit: &CommitIdentity,
        sequence: &str,
    ) -> Result<Option<TagResult>, BuildError> {
        if !self.enabled {
            return Ok(None);
        }

        let adapter = Arc::clone(&self.adapter);
        let versions = Arc::clone(&self.versions);
        let commit = commit.clone();
        let sequence = sequence.to_string();

        // Version lookup and the VCS adapter are blocking file/process I/O.
        let joined = tokio::task::spawn_blocking(move || -> Result<Option<TagResult>, BuildError> {
            let Some(version) = versions.version_for(&commit)? else {
                tracing::info!(commit = %commit, "no version recorded for commit, skipping tag");
                return Ok(None);
            };
            let name = tag_name(&version, &sequence);
            let message = format!("Build {} of {}", sequence, commit);
            let result = adapter.create_tag(&commit, &message, &name)?;
            tracing::info!(
                commit = %commit,
                tag = %result.tag_name,
                adapter = adapter.name(),
                "created build tag"
            );
            Ok(Some(result))
        })
        .await;

        match joined {
            Ok(result) => result,
            Err(e) => Err(BuildError::PostProcessing(format!("tagging task failed: {}", e))),
        }
    }

    /// Run [`apply`](Self::apply) in the background. Failures are logged as
    /// warnings; the handle yields the tag when one was created.
    pub fn spawn(
        self: &Arc<Self>,
        commit: CommitIdentity,
        sequence: String,
    ) -> JoinHandle<Option<TagResult>> {
        let tagger = Arc::clone(self);
        tokio::spawn(async move {
            match tagger.apply(&commit, &sequence).await {
                Ok(result) => result,
                Err(e) => {
                    tracing::warn!(
                        commit = %commit,
                        build_number = %sequence,
                        "post-processing failure while tagging: {}",
                        e
                    );
                    None
                }
            }
        })
    }
}
