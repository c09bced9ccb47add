//! Tagging configuration

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::adapter::{Result, SubmitError, TagAdapter};
use crate::git::GitAdapter;
use crate::none::NoneAdapter;

/// `[tagging]` section of the build config
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagConfig {
    /// Create an immutable version tag after each successful build
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Adapter type: "git" or "none"
    #[serde(default = "default_adapter")]
    pub adapter: String,

    /// Git remote to push tags to
    #[serde(default = "default_remote")]
    pub remote: String,

    /// Push created tags to `remote`
    #[serde(default)]
    pub push: bool,
}

impl Default for TagConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            adapter: default_adapter(),
            remote: default_remote(),
            push: false,
        }
    }
}

// Serde default functions
fn default_enabled() -> bool {
    true
}

fn default_adapter() -> String {
    "git".to_string()
}

fn default_remote() -> String {
    "origin".to_string()
}

impl TagConfig {
    /// Build the adapter named by `adapter` for a checkout at `work_dir`
    pub fn build_adapter(&self, work_dir: &Path) -> Result<Box<dyn TagAdapter>> {
        match self.adapter.as_str() {
            "git" => Ok(Box::new(GitAdapter::new(work_dir, self.clone()))),
            "none" => Ok(Box::new(NoneAdapter::new())),
            other => Err(SubmitError::NotConfigured(format!(
                "unknown tag adapter '{}' (expected \"git\" or \"none\")",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_enable_git_tagging_without_push() {
        let config = TagConfig::default();
        assert!(config.enabled);
        assert_eq!(config.adapter, "git");
        assert!(!config.push);
    }

    #[test]
    fn unknown_adapter_is_rejected() {
        let config = TagConfig {
            adapter: "perforce".to_string(),
            ..TagConfig::default()
        };
        let result = config.build_adapter(Path::new("."));
        assert!(matches!(result, Err(SubmitError::NotConfigured(_))));
    }

    #[test]
    fn none_adapter_is_selectable() {
        let config = TagConfig {
            adapter: "none".to_string(),
            ..TagConfig::default()
        };
        let adapter = config.build_adapter(Path::new(".")).unwrap();
        assert_eq!(adapter.name(), "none");
    }
}
