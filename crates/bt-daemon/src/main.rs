//! # buildtrack
//!
//! Build-goal lifecycle daemon and CLI.
//!
//! `buildtrack serve` runs the correlator task and the webhook endpoint that
//! external CI systems post build notifications to. The other subcommands
//! drive a project's goals from the command line: run a direct build, record
//! a commit's version for tagging, list goal instances.
//!
//! ## Usage
//!
//! ```text
//! buildtrack --project-root . serve --listen 127.0.0.1:7420
//! buildtrack build --goal build --owner acme --repo widgets --sha abc123
//! buildtrack version --owner acme --repo widgets --sha abc123 v1.2.3
//! buildtrack goals --state in_process
//! ```

mod app;
mod http;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use bt_build::BuildProject;
use bt_goal::{CommitIdentity, GoalInstance, GoalState, GoalStore, RepoRef};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tokio::sync::oneshot;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::app::App;
use crate::http::HttpState;

/// Build-goal lifecycle daemon.
#[derive(Parser)]
#[command(name = "buildtrack", about = "Build numbering, direct builds and CI correlation")]
struct Cli {
    /// Project root directory (defaults to current directory).
    #[arg(long, default_value = ".", global = true)]
    project_root: PathBuf,

    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run the correlator and accept build notifications over HTTP.
    Serve {
        #[arg(long, default_value = "127.0.0.1:7420")]
        listen: SocketAddr,
    },

    /// Run a direct build of a goal on a commit.
    Build {
        /// Goal template name.
        #[arg(long)]
        goal: String,

        #[command(flatten)]
        commit: CommitArgs,

        /// Checkout to build in (defaults to the project root).
        #[arg(long)]
        checkout: Option<PathBuf>,
    },

    /// Record the semantic version computed for a commit.
    Version {
        #[command(flatten)]
        commit: CommitArgs,

        version: String,
    },

    /// List goal instances, newest first.
    Goals {
        #[arg(long, value_enum)]
        state: Option<StateArg>,
    },
}

#[derive(Args)]
struct CommitArgs {
    #[arg(long)]
    owner: String,

    #[arg(long)]
    repo: String,

    #[arg(long, default_value = "github")]
    provider: String,

    #[arg(long)]
    sha: String,

    #[arg(long)]
    branch: Option<String>,
}

impl CommitArgs {
    fn identity(&self) -> CommitIdentity {
        let repo = RepoRef::new(&self.owner, &self.repo, &self.provider);
        let commit = CommitIdentity::new(&repo, &self.sha);
        match &self.branch {
            Some(branch) => commit.with_branch(branch),
            None => commit,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
#[value(rename_all = "snake_case")]
enum StateArg {
    Requested,
    InProcess,
    Success,
    Failure,
}

impl From<StateArg> for GoalState {
    fn from(state: StateArg) -> Self {
        match state {
            StateArg::Requested => GoalState::Requested,
            StateArg::InProcess => GoalState::InProcess,
            StateArg::Success => GoalState::Success,
            StateArg::Failure => GoalState::Failure,
        }
    }
}

fn init_tracing(format: LogFormat) -> Result<()> {
    // Logs go to stderr; stdout carries command output.
    let filter = EnvFilter::from_default_env()
        .add_directive("bt_build=info".parse()?)
        .add_directive("bt_goal=info".parse()?)
        .add_directive("buildtrack=info".parse()?);
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format)?;

    let project_root = cli
        .project_root
        .canonicalize()
        .with_context(|| format!("project root {}", cli.project_root.display()))?;
    let (app, inbound) = App::open(&project_root)?;

    match cli.command {
        Command::Serve { listen } => {
            let correlator = Arc::new(app.correlator()?);
            let (stop, stopped) = oneshot::channel::<()>();
            let task = tokio::spawn(correlator.run_until(inbound, async move {
                let _ = stopped.await;
            }));

            let served = http::serve(listen, HttpState::new(app.notifications())).await;
            tracing::info!("buildtrack shutting down, draining accepted notifications");
            let _ = stop.send(());
            task.await.context("correlator task")?;
            served?;
        }
        Command::Build {
            goal,
            commit,
            checkout,
        } => {
            let code = run_build(&app, &goal, commit.identity(), checkout).await?;
            // Self-reported events reach the correlator like any other; hand
            // it what the build queued before exiting.
            Arc::new(app.correlator()?)
                .run_until(inbound, std::future::ready(()))
                .await;
            if code != 0 {
                std::process::exit(code);
            }
        }
        Command::Version { commit, version } => {
            let commit = commit.identity();
            app.versions.record(&commit, &version)?;
            println!("{} {}", commit, version);
        }
        Command::Goals { state } => {
            let goals = match state {
                Some(state) => app.goals.list_by_state(state.into())?,
                None => app.goals.list()?,
            };
            for goal in goals {
                println!("{}", serde_json::to_string(&goal)?);
            }
        }
    }
    Ok(())
}

/// Instantiate `goal` on `commit` and build it. Returns the result code.
async fn run_build(
    app: &App,
    goal: &str,
    commit: CommitIdentity,
    checkout: Option<PathBuf>,
) -> Result<i32> {
    let Some(template) = app.config.goal(goal) else {
        bail!(
            "no goal named '{}' (configured: {})",
            goal,
            app.config.registry().names().collect::<Vec<_>>().join(", ")
        );
    };

    let checkout = checkout.unwrap_or_else(|| app.project_root.clone());
    let instance = GoalInstance::from_template(template, Uuid::new_v4(), commit.clone());
    app.goals.create(&instance).await?;

    let builder = app.direct_builder(&checkout)?;
    let outcome = builder
        .execute(&instance, &BuildProject::new(&checkout, commit))
        .await?;

    if let Some(tagging) = outcome.tagging {
        if let Ok(Some(tag)) = tagging.await {
            println!("tagged {}", tag.tag_name);
        }
    }
    eprint!("{}", outcome.log);
    println!("{}", serde_json::to_string(&outcome.result)?);
    Ok(outcome.result.code.unwrap_or(0))
}
