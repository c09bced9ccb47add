//! Git adapter: annotated, immutable version tags

use bt_goal::CommitIdentity;
use std::process::Command;

use crate::adapter::{Result, SubmitError, TagAdapter, TagResult};
use crate::config::TagConfig;

/// Git adapter creating annotated tags in a checked-out repository
///
/// Features:
/// - Tag name validation via `git check-ref-format`
/// - Refuses to move an existing tag
/// - Optional push of the new tag to the configured remote
pub struct GitAdapter {
    /// Working directory for git operations
    work_dir: std::path::PathBuf,
    config: TagConfig,
}

impl GitAdapter {
    /// Create a new GitAdapter for the given working directory
    pub fn new(work_dir: impl Into<std::path::PathBuf>, config: TagConfig) -> Self {
        Self {
            work_dir: work_dir.into(),
            config,
        }
    }

    /// Run a git command in the working directory
    fn git_cmd(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.work_dir)
            .output()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SubmitError::VcsError(format!(
                "git {} failed: {}",
                args.join(" "),
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Check whether a tag already exists locally
    pub fn tag_exists(&self, tag_name: &str) -> Result<bool> {
        let listed = self.git_cmd(&["tag", "--list", tag_name])?;
        Ok(!listed.is_empty())
    }

    /// Resolve the commit a tag points at
    pub fn tag_target(&self, tag_name: &str) -> Result<String> {
        self.git_cmd(&["rev-list", "-n", "1", tag_name])
    }

    fn validate_tag_name(&self, tag_name: &str) -> Result<()> {
        let refname = format!("refs/tags/{}", tag_name);
        self.git_cmd(&["check-ref-format", &refname])
            .map(|_| ())
            .map_err(|_| SubmitError::InvalidTagName(tag_name.to_string()))
    }
}

impl TagAdapter for GitAdapter {
    fn create_tag(
        &self,
        commit: &CommitIdentity,
        message: &str,
        tag_name: &str,
    ) -> Result<TagResult> {
        self.validate_tag_name(tag_name)?;

        if self.tag_exists(tag_name)? {
            return Err(SubmitError::TagExists(tag_name.to_string()));
        }

        tracing::info!("GitAdapter: tagging {} as {}", commit, tag_name);
        self.git_cmd(&["tag", "-a", tag_name, &commit.sha, "-m", message])?;

        let mut metadata: std::collections::HashMap<String, String> =
            [("adapter".to_string(), "git".to_string())]
                .into_iter()
                .collect();

        if self.config.push {
            let remote = &self.config.remote;
            let refspec = format!("refs/tags/{}", tag_name);
            tracing::info!("GitAdapter: pushing {} to {}", tag_name, remote);
            self.git_cmd(&["push", remote, &refspec])?;
            metadata.insert("remote".to_string(), remote.clone());
        }

        Ok(TagResult {
            tag_name: tag_name.to_string(),
            commit_sha: commit.sha.clone(),
            message: format!("Tagged {} as {}", commit, tag_name),
            metadata,
        })
    }

    fn name(&self) -> &str {
        "git"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bt_goal::RepoRef;
    use std::path::Path;
    use tempfile::tempdir;

    fn init_git_repo(dir: &Path) -> Result<String> {
        Command::new("git")
            .args(["init"])
            .current_dir(dir)
            .output()?;
        Command::new("git")
            .args(["config", "user.name", "Test User"])
            .current_dir(dir)
            .output()?;
        Command::new("git")
            .args(["config", "user.email", "test@example.com"])
            .current_dir(dir)
            .output()?;

        std::fs::write(dir.join("README.md"), "# Test\n")?;
        Command::new("git")
            .args(["add", "."])
            .current_dir(dir)
            .output()?;
        Command::new("git")
            .args(["commit", "-m", "Initial commit"])
            .current_dir(dir)
            .output()?;

        let head = Command::new("git")
            .args(["rev-parse", "HEAD"])
            .current_dir(dir)
            .output()?;
        Ok(String::from_utf8_lossy(&head.stdout).trim().to_string())
    }

    fn commit(sha: &str) -> CommitIdentity {
        CommitIdentity::new(&RepoRef::new("acme", "widgets", "github"), sha)
    }

    #[test]
    fn test_git_adapter_creates_annotated_tag() {
        let dir = tempdir().unwrap();
        let sha = init_git_repo(dir.path()).unwrap();

        let adapter = GitAdapter::new(dir.path(), TagConfig::default());
        let result = adapter
            .create_tag(&commit(&sha), "Build 4 of v1.2.3", "v1.2.3+build.4")
            .unwrap();

        assert_eq!(result.tag_name, "v1.2.3+build.4");
        assert_eq!(result.commit_sha, sha);
        assert!(adapter.tag_exists("v1.2.3+build.4").unwrap());
        assert_eq!(adapter.tag_target("v1.2.3+build.4").unwrap(), sha);
    }

    #[test]
    fn test_git_adapter_never_moves_existing_tag() {
        let dir = tempdir().unwrap();
        let sha = init_git_repo(dir.path()).unwrap();
        let adapter = GitAdapter::new(dir.path(), TagConfig::default());

        adapter
            .create_tag(&commit(&sha), "first", "v1.0.0+build.1")
            .unwrap();
        let again = adapter.create_tag(&commit(&sha), "second", "v1.0.0+build.1");
        assert!(matches!(again, Err(SubmitError::TagExists(_))));
    }

    #[test]
    fn test_git_adapter_rejects_invalid_tag_name() {
        let dir = tempdir().unwrap();
        let sha = init_git_repo(dir.path()).unwrap();
        let adapter = GitAdapter::new(dir.path(), TagConfig::default());

        let result = adapter.create_tag(&commit(&sha), "bad", "v1..2");
        assert!(matches!(result, Err(SubmitError::InvalidTagName(_))));
    }

    #[test]
    fn test_git_adapter_unknown_commit_fails() {
        let dir = tempdir().unwrap();
        init_git_repo(dir.path()).unwrap();
        let adapter = GitAdapter::new(dir.path(), TagConfig::default());

        let result = adapter.create_tag(
            &commit("0000000000000000000000000000000000000000"),
            "missing",
            "v9.9.9+build.1",
        );
        assert!(matches!(result, Err(SubmitError::VcsError(_))));
    }
}
