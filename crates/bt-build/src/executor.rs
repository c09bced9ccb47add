// executor.rs — Run an ordered list of build commands against a checkout.
//
// The process primitive is the CommandRunner trait: one call per command,
// returning an error marker, a message and the captured log. It never fails
// as a Rust error; a command that cannot be spawned is an outcome like any
// other. The CommandSequenceExecutor runs commands through `sh -c` in the
// project directory and stops at the first error.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use bt_goal::CommitIdentity;
use tokio::process::Command;

use crate::error::BuildError;

/// Options for a single command.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub cwd: Option<PathBuf>,
    pub env: HashMap<String, String>,
}

/// What running one command produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutcome {
    /// Set when the command could not be spawned or exited non-zero.
    pub error: Option<String>,

    /// Optional human summary from the runner.
    pub message: Option<String>,

    /// Combined stdout and stderr.
    pub log: String,
}

impl CommandOutcome {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// The process-spawn primitive.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &str, args: &[String], options: &RunOptions) -> CommandOutcome;
}

/// Spawns real processes with `tokio::process`.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, command: &str, args: &[String], options: &RunOptions) -> CommandOutcome {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .envs(&options.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = &options.cwd {
            cmd.current_dir(cwd);
        }

        let output = match cmd.output().await {
            Ok(output) => output,
            Err(e) => {
                return CommandOutcome {
                    error: Some(format!("failed to spawn {}: {}", command, e)),
                    message: None,
                    log: String::new(),
                }
            }
        };

        let mut log = String::from_utf8_lossy(&output.stdout).into_owned();
        log.push_str(&String::from_utf8_lossy(&output.stderr));

        if output.status.success() {
            CommandOutcome {
                error: None,
                message: None,
                log,
            }
        } else {
            let status = match output.status.code() {
                Some(code) => format!("exit code {}", code),
                None => "terminated by signal".to_string(),
            };
            CommandOutcome {
                error: Some(status),
                message: None,
                log,
            }
        }
    }
}

/// The project a direct build runs in.
#[derive(Debug, Clone)]
pub struct BuildProject {
    pub path: PathBuf,
    pub commit: CommitIdentity,
}

impl BuildProject {
    pub fn new(path: impl AsRef<Path>, commit: CommitIdentity) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            commit,
        }
    }
}

/// Result of running a command sequence to completion or first error.
#[derive(Debug, Clone, Default)]
pub struct ExecutionReport {
    /// The failing command's error, already formatted for the goal description.
    pub error: Option<String>,
    pub log: String,
    pub commands_run: usize,
}

impl ExecutionReport {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Shell every build command runs through, as `sh -c <command>`.
const SHELL: &str = "sh";

/// Runs build commands in order through a shell.
pub struct CommandSequenceExecutor {
    runner: Arc<dyn CommandRunner>,
}

impl CommandSequenceExecutor {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Run `commands` in `project`, exporting the build number.
    ///
    /// Returns `Err(BuildError::Setup)` if nothing could be started at all.
    /// A failing command is not an `Err`; it is reported in the returned
    /// [`ExecutionReport`].
    pub async fn execute(
        &self,
        commands: &[String],
        project: &BuildProject,
        build_number: &str,
    ) -> Result<ExecutionReport, BuildError> {
        if commands.is_empty() {
            return Err(BuildError::Setup("no build commands configured".to_string()));
        }
        if !project.path.is_dir() {
            return Err(BuildError::Setup(format!(
                "project directory {} does not exist",
                project.path.display()
            )));
        }

        let mut env = HashMap::new();
        env.insert("BUILD_NUMBER".to_string(), build_number.to_string());
        env.insert("BUILD_SHA".to_string(), project.commit.sha.clone());
        let options = RunOptions {
            cwd: Some(project.path.clone()),
            env,
        };

        let mut report = ExecutionReport::default();
        for command in commands {
            tracing::debug!(command = %command, build_number, "running build command");
            report.log.push_str(&format!("$ {}\n", command));

            let args = vec!["-c".to_string(), command.clone()];
            let outcome = self.runner.run(SHELL, &args, &options).await;
            report.commands_run += 1;
            report.log.push_str(&outcome.log);
            if let Some(message) = &outcome.message {
                report.log.push_str(message);
                report.log.push('\n');
            }

            if let Some(error) = outcome.error {
                report.error = Some(
                    BuildError::Command {
                        command: command.clone(),
                        message: error,
                    }
                    .to_string(),
                );
                break;
            }
        }
        Ok(report)
    }
}
