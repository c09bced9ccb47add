// commit.rs — Repository and commit identity.
//
// CommitIdentity is the correlation key that binds a build notification to a
// goal instance. Branch is carried for display only and never participates
// in matching.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of a repository at a source-control provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
    pub provider_id: String,
}

impl RepoRef {
    pub fn new(
        owner: impl Into<String>,
        name: impl Into<String>,
        provider_id: impl Into<String>,
    ) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            provider_id: provider_id.into(),
        }
    }

    /// `owner/name`, the form used in log lines and tag messages.
    pub fn slug(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.provider_id, self.owner, self.name)
    }
}

/// A commit on a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitIdentity {
    pub owner: String,
    pub repo: String,
    pub provider_id: String,
    pub sha: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

impl CommitIdentity {
    pub fn new(repo: &RepoRef, sha: impl Into<String>) -> Self {
        Self {
            owner: repo.owner.clone(),
            repo: repo.name.clone(),
            provider_id: repo.provider_id.clone(),
            sha: sha.into(),
            branch: None,
        }
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    pub fn repo_ref(&self) -> RepoRef {
        RepoRef::new(&self.owner, &self.repo, &self.provider_id)
    }

    /// Exact match on sha, provider, owner and repo. Branch is ignored: the
    /// same sha pushed to two branches is still the same commit.
    pub fn matches(&self, other: &CommitIdentity) -> bool {
        self.sha == other.sha
            && self.provider_id == other.provider_id
            && self.owner == other.owner
            && self.repo == other.repo
    }

    /// Abbreviated sha for log output.
    pub fn short_sha(&self) -> &str {
        let end = self
            .sha
            .char_indices()
            .nth(7)
            .map(|(i, _)| i)
            .unwrap_or(self.sha.len());
        &self.sha[..end]
    }
}

impl fmt::Display for CommitIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.owner, self.repo, self.short_sha())
    }
}
