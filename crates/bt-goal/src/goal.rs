// goal.rs — Build goal templates and the registry that holds them.
//
// A BuildGoal is configured once at startup and never mutated afterwards.
// Each goal-set (one per push) instantiates it as a GoalInstance. How the
// work gets done is a sum type: either we run the commands ourselves, or an
// external CI system does and tells us about it later.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::GoalError;
use crate::instance::GoalState;

/// Environment a goal delivers into.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalEnvironment {
    #[default]
    Code,
    Testing,
    Staging,
    Production,
}

impl fmt::Display for GoalEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GoalEnvironment::Code => write!(f, "code"),
            GoalEnvironment::Testing => write!(f, "testing"),
            GoalEnvironment::Staging => write!(f, "staging"),
            GoalEnvironment::Production => write!(f, "production"),
        }
    }
}

/// Text shown to users for each goal state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoalDescriptions {
    pub planned: String,
    pub requested: String,
    pub in_process: String,
    pub completed: String,
    pub failed: String,
}

impl GoalDescriptions {
    /// Stock wording for a build goal.
    pub fn build() -> Self {
        Self {
            planned: "Planned build".to_string(),
            requested: "Ready to build".to_string(),
            in_process: "Building".to_string(),
            completed: "Build successful".to_string(),
            failed: "Build failed".to_string(),
        }
    }

    pub fn for_state(&self, state: &GoalState) -> &str {
        match state {
            GoalState::Requested => &self.requested,
            GoalState::InProcess => &self.in_process,
            GoalState::Success => &self.completed,
            GoalState::Failure => &self.failed,
        }
    }
}

impl Default for GoalDescriptions {
    fn default() -> Self {
        Self::build()
    }
}

/// How a goal's work gets done.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Fulfillment {
    /// Run these commands in the checked-out project, in order.
    Direct { commands: Vec<String> },

    /// An external CI tool does the work and reports back asynchronously.
    External { tool_name: String },
}

impl Fulfillment {
    pub fn method(&self) -> FulfillmentMethod {
        match self {
            Fulfillment::Direct { .. } => FulfillmentMethod::Direct,
            Fulfillment::External { .. } => FulfillmentMethod::SideEffect,
        }
    }

    /// The CI tool reporting on an external goal.
    pub fn tool_name(&self) -> Option<&str> {
        match self {
            Fulfillment::Direct { .. } => None,
            Fulfillment::External { tool_name } => Some(tool_name.as_str()),
        }
    }
}

/// The fulfillment method recorded on a goal instance.
///
/// The correlator only ever writes to instances whose method is
/// `SideEffect` or `ExternallyReported`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FulfillmentMethod {
    Direct,
    SideEffect,
    ExternallyReported,
}

impl FulfillmentMethod {
    pub fn is_external(&self) -> bool {
        matches!(
            self,
            FulfillmentMethod::SideEffect | FulfillmentMethod::ExternallyReported
        )
    }
}

impl fmt::Display for FulfillmentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FulfillmentMethod::Direct => write!(f, "direct"),
            FulfillmentMethod::SideEffect => write!(f, "side_effect"),
            FulfillmentMethod::ExternallyReported => write!(f, "externally_reported"),
        }
    }
}

/// A build goal template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildGoal {
    /// Unique name; goal instances are matched to templates by it.
    pub name: String,

    #[serde(default)]
    pub environment: GoalEnvironment,

    #[serde(default)]
    pub descriptions: GoalDescriptions,

    /// Run alone, never alongside other goals of the same goal-set.
    #[serde(default)]
    pub isolated: bool,

    #[serde(default)]
    pub retry_feasible: bool,

    pub fulfillment: Fulfillment,
}

impl BuildGoal {
    /// A goal we fulfill by running `commands` ourselves. Retry is feasible.
    pub fn direct(name: impl Into<String>, commands: Vec<String>) -> Self {
        Self {
            name: name.into(),
            environment: GoalEnvironment::default(),
            descriptions: GoalDescriptions::build(),
            isolated: false,
            retry_feasible: true,
            fulfillment: Fulfillment::Direct { commands },
        }
    }

    /// A goal fulfilled by an external CI tool. Retry is never feasible: we
    /// cannot ask someone else's CI to run again.
    pub fn external(name: impl Into<String>, tool_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            environment: GoalEnvironment::default(),
            descriptions: GoalDescriptions::build(),
            isolated: false,
            retry_feasible: false,
            fulfillment: Fulfillment::External {
                tool_name: tool_name.into(),
            },
        }
    }

    pub fn with_environment(mut self, environment: GoalEnvironment) -> Self {
        self.environment = environment;
        self
    }

    pub fn with_descriptions(mut self, descriptions: GoalDescriptions) -> Self {
        self.descriptions = descriptions;
        self
    }

    pub fn isolated(mut self) -> Self {
        self.isolated = true;
        self
    }

    /// Check template invariants. Called on registration.
    pub fn validate(&self) -> Result<(), GoalError> {
        if self.name.trim().is_empty() {
            return Err(GoalError::InvalidTemplate {
                name: self.name.clone(),
                reason: "name must not be empty".to_string(),
            });
        }
        match &self.fulfillment {
            Fulfillment::External { .. } if self.retry_feasible => {
                Err(GoalError::InvalidTemplate {
                    name: self.name.clone(),
                    reason: "externally fulfilled goals cannot be retried".to_string(),
                })
            }
            Fulfillment::Direct { commands } if commands.is_empty() => {
                Err(GoalError::InvalidTemplate {
                    name: self.name.clone(),
                    reason: "direct fulfillment needs at least one command".to_string(),
                })
            }
            _ => Ok(()),
        }
    }
}

/// Goal templates registered at startup, keyed by unique name.
#[derive(Debug, Clone, Default)]
pub struct GoalRegistry {
    goals: BTreeMap<String, BuildGoal>,
}

impl GoalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a goal and its fulfillment.
    pub fn register(&mut self, goal: BuildGoal) -> Result<(), GoalError> {
        goal.validate()?;
        if self.goals.contains_key(&goal.name) {
            return Err(GoalError::DuplicateGoal(goal.name));
        }
        tracing::debug!(
            goal = %goal.name,
            method = %goal.fulfillment.method(),
            "registered goal fulfillment"
        );
        self.goals.insert(goal.name.clone(), goal);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&BuildGoal> {
        self.goals.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.goals.keys().map(String::as_str)
    }

    /// Templates in name order.
    pub fn goals(&self) -> impl Iterator<Item = &BuildGoal> {
        self.goals.values()
    }

    pub fn len(&self) -> usize {
        self.goals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.goals.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn external_goals_are_not_retry_feasible() {
        let goal = BuildGoal::external("ci-build", "travis");
        assert!(!goal.retry_feasible);
        assert_eq!(goal.fulfillment.method(), FulfillmentMethod::SideEffect);
        assert!(goal.validate().is_ok());
    }

    #[test]
    fn external_goal_with_retry_is_rejected() {
        let mut goal = BuildGoal::external("ci-build", "travis");
        goal.retry_feasible = true;
        assert!(matches!(
            goal.validate(),
            Err(GoalError::InvalidTemplate { .. })
        ));
    }

    #[test]
    fn direct_goal_requires_commands() {
        let goal = BuildGoal::direct("build", vec![]);
        assert!(goal.validate().is_err());
    }

    #[test]
    fn registry_rejects_duplicate_names() {
        let mut registry = GoalRegistry::new();
        registry
            .register(BuildGoal::direct("build", vec!["make".to_string()]))
            .unwrap();
        let result = registry.register(BuildGoal::external("build", "jenkins"));
        assert!(matches!(result, Err(GoalError::DuplicateGoal(name)) if name == "build"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn descriptions_follow_state() {
        let d = GoalDescriptions::build();
        assert_eq!(d.for_state(&GoalState::InProcess), "Building");
        assert_eq!(d.for_state(&GoalState::Failure), "Build failed");
    }

    #[test]
    fn fulfillment_serializes_with_kind_tag() {
        let goal = BuildGoal::external("ci-build", "circleci");
        let json = serde_json::to_string(&goal).unwrap();
        assert!(json.contains("\"kind\":\"external\""));
        assert!(json.contains("\"tool_name\":\"circleci\""));
    }

    #[test]
    fn only_external_goals_have_a_tool() {
        let mut registry = GoalRegistry::new();
        registry
            .register(BuildGoal::external("ci", "travis"))
            .unwrap();
        registry
            .register(BuildGoal::direct("build", vec!["make".to_string()]))
            .unwrap();

        let tools: Vec<_> = registry
            .goals()
            .map(|g| (g.name.as_str(), g.fulfillment.tool_name()))
            .collect();
        assert_eq!(tools, vec![("build", None), ("ci", Some("travis"))]);
    }

    #[test]
    fn method_external_classification() {
        assert!(FulfillmentMethod::SideEffect.is_external());
        assert!(FulfillmentMethod::ExternallyReported.is_external());
        assert!(!FulfillmentMethod::Direct.is_external());
    }
}
