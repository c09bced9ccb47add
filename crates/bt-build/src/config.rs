// config.rs — Build configuration and the startup configuration object.
//
// BuildConfig is the on-disk `.buildtrack/config.toml`. SdmConfiguration is
// built from it once at startup: goal templates are registered, observers
// subscribed and the log interpreter chosen. It is then shared by `Arc` with
// every component that needs it and never mutated again.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bt_goal::{BuildGoal, GoalRegistry};
use bt_submit::TagConfig;
use serde::{Deserialize, Serialize};

use crate::correlator::BuildObserver;
use crate::error::BuildError;
use crate::report::{LogInterpreter, PatternLogInterpreter};

/// Top-level configuration from `.buildtrack/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildConfig {
    #[serde(default)]
    pub tagging: TagConfig,

    #[serde(default)]
    pub artifacts: ArtifactConfig,

    #[serde(default)]
    pub logs: LogConfig,

    #[serde(default)]
    pub store: StoreConfig,

    /// Goal templates registered at startup.
    #[serde(default)]
    pub goals: Vec<BuildGoal>,
}

/// Artifact linking. Deprecated: kept so old configs still parse.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArtifactConfig {
    #[serde(default)]
    pub link_images: bool,
}

/// Build-log retrieval and interpretation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    /// Fetched logs are cut to their last `max_bytes` bytes.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,

    /// Regexes marking a log line as part of the failure. Empty disables
    /// interpretation; reports then carry the raw log only.
    #[serde(default = "default_error_patterns")]
    pub error_patterns: Vec<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: default_fetch_timeout_secs(),
            max_bytes: default_max_bytes(),
            error_patterns: default_error_patterns(),
        }
    }
}

/// Where the file-backed stores live. Relative paths resolve against the
/// project root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_goals_dir")]
    pub goals_dir: PathBuf,

    #[serde(default = "default_identifiers_log")]
    pub identifiers_log: PathBuf,

    #[serde(default = "default_versions_file")]
    pub versions_file: PathBuf,

    #[serde(default = "default_events_log")]
    pub events_log: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            goals_dir: default_goals_dir(),
            identifiers_log: default_identifiers_log(),
            versions_file: default_versions_file(),
            events_log: default_events_log(),
        }
    }
}

impl StoreConfig {
    /// Anchor relative paths at `root`.
    pub fn resolve(&self, root: &Path) -> Self {
        let anchor = |p: &PathBuf| {
            if p.is_absolute() {
                p.clone()
            } else {
                root.join(p)
            }
        };
        Self {
            goals_dir: anchor(&self.goals_dir),
            identifiers_log: anchor(&self.identifiers_log),
            versions_file: anchor(&self.versions_file),
            events_log: anchor(&self.events_log),
        }
    }
}

// Serde default functions
fn default_fetch_timeout_secs() -> u64 {
    30
}

fn default_max_bytes() -> usize {
    1024 * 1024
}

fn default_error_patterns() -> Vec<String> {
    [
        r"(?i)\berror\b",
        r"(?i)\bfailed\b",
        r"(?i)\bexception\b",
        r"BUILD FAILURE",
        r"^FAIL\b",
    ]
    .iter()
    .map(|p| p.to_string())
    .collect()
}

fn default_goals_dir() -> PathBuf {
    PathBuf::from(".buildtrack/goals")
}

fn default_identifiers_log() -> PathBuf {
    PathBuf::from(".buildtrack/build-numbers.jsonl")
}

fn default_versions_file() -> PathBuf {
    PathBuf::from(".buildtrack/versions.json")
}

fn default_events_log() -> PathBuf {
    PathBuf::from(".buildtrack/events.jsonl")
}

impl BuildConfig {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self, BuildError> {
        let content = std::fs::read_to_string(path).map_err(|source| BuildError::Io {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&content)
            .map_err(|e| BuildError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Load config if the file exists, defaults otherwise. A file that
    /// exists but doesn't parse is still an error.
    pub fn load_or_default(path: &Path) -> Result<Self, BuildError> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!("no config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Load `<root>/.buildtrack/config.toml` and anchor store paths at `root`.
    pub fn for_project(root: &Path) -> Result<Self, BuildError> {
        let mut config = Self::load_or_default(&root.join(".buildtrack").join("config.toml"))?;
        config.store = config.store.resolve(root);
        Ok(config)
    }
}

/// Process-wide configuration, built once during initialization.
pub struct SdmConfiguration {
    config: BuildConfig,
    registry: GoalRegistry,
    observers: Vec<Arc<dyn BuildObserver>>,
    interpreter: Option<Arc<dyn LogInterpreter>>,
}

impl SdmConfiguration {
    /// Register every goal from `config` and pick the default interpreter.
    pub fn new(config: BuildConfig) -> Result<Self, BuildError> {
        let mut registry = GoalRegistry::new();
        for goal in &config.goals {
            registry.register(goal.clone())?;
        }

        let interpreter: Option<Arc<dyn LogInterpreter>> = if config.logs.error_patterns.is_empty()
        {
            None
        } else {
            Some(Arc::new(PatternLogInterpreter::new(
                &config.logs.error_patterns,
            )?))
        };

        if config.artifacts.link_images {
            tracing::warn!("artifacts.link_images is deprecated and has no effect");
        }

        Ok(Self {
            config,
            registry,
            observers: Vec::new(),
            interpreter,
        })
    }

    /// Register a goal template together with its fulfillment.
    pub fn register_fulfillment(&mut self, goal: BuildGoal) -> Result<(), BuildError> {
        self.registry.register(goal)?;
        Ok(())
    }

    /// Subscribe an observer to every inbound build notification.
    pub fn subscribe_to_builds(&mut self, observer: Arc<dyn BuildObserver>) {
        self.observers.push(observer);
    }

    /// Replace the log interpreter; `None` reports raw logs only.
    pub fn set_log_interpreter(&mut self, interpreter: Option<Arc<dyn LogInterpreter>>) {
        self.interpreter = interpreter;
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    pub fn registry(&self) -> &GoalRegistry {
        &self.registry
    }

    pub fn goal(&self, name: &str) -> Option<&BuildGoal> {
        self.registry.get(name)
    }

    pub fn observers(&self) -> &[Arc<dyn BuildObserver>] {
        &self.observers
    }

    pub fn interpreter(&self) -> Option<&Arc<dyn LogInterpreter>> {
        self.interpreter.as_ref()
    }

    pub fn tagging_enabled(&self) -> bool {
        self.config.tagging.enabled
    }
}
