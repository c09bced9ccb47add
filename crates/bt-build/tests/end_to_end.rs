// end_to_end.rs — Both fulfillment paths wired together the way the daemon
// wires them: file-backed stores, one dispatcher fanning out to a memory sink
// and the correlator channel, a real git checkout for tagging.
//
// Scenarios:
//   A. direct build passes → success, tag <version>+build.<n> on the commit
//   B. direct build fails → failure, code 1, no tag
//   C. external "broken" with a log URL → failure, report carries the log
//   D. external "started" then "passed" through the channel → success

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use bt_build::report::LOG_UNAVAILABLE;
use bt_build::{
    BuildConfig, BuildIdentifier, BuildIdentifierStore, BuildProject, CommandSequenceExecutor,
    Correlation, DirectBuilder, ExternalBuildCorrelator, FailureReporter, FileIdentifierStore,
    HttpLogFetcher, LogConfig, PatternLogInterpreter, ProcessRunner, SdmConfiguration,
    BuildNumberAllocator, TagSideEffect,
};
use bt_goal::{
    BuildEvent, BuildGoal, BuildStatus, ChannelSink, CommitIdentity, EventDispatcher,
    FileGoalStore, GoalInstance, GoalState, GoalStore, GoalTracker, LifecycleEvent, MemorySink,
    RepoRef,
};
use bt_submit::{FileVersionStore, GitAdapter, TagConfig};
use tempfile::TempDir;
use tokio::sync::mpsc;
use uuid::Uuid;

fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(output.status.success(), "git {:?} failed", args);
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Initialize a repository with one commit and return its sha.
fn init_checkout(dir: &Path) -> String {
    git(dir, &["init"]);
    git(dir, &["config", "user.email", "test@test.com"]);
    git(dir, &["config", "user.name", "Test"]);
    std::fs::write(dir.join("README.md"), "# widgets\n").unwrap();
    git(dir, &["add", "."]);
    git(dir, &["commit", "-m", "Initial commit"]);
    git(dir, &["rev-parse", "HEAD"])
}

struct Harness {
    _dir: TempDir,
    checkout: PathBuf,
    repo: RepoRef,
    commit: CommitIdentity,
    goals: Arc<FileGoalStore>,
    identifiers: Arc<FileIdentifierStore>,
    versions: Arc<FileVersionStore>,
    sink: MemorySink,
    rx: mpsc::UnboundedReceiver<BuildEvent>,
    config: Arc<SdmConfiguration>,
    dispatcher: Arc<EventDispatcher>,
    tracker: GoalTracker,
}

impl Harness {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let checkout = dir.path().join("checkout");
        std::fs::create_dir_all(&checkout).unwrap();
        let sha = init_checkout(&checkout);

        let repo = RepoRef::new("acme", "widgets", "github");
        let commit = CommitIdentity::new(&repo, sha).with_branch("main");

        let goals = Arc::new(FileGoalStore::new(dir.path().join("goals")).unwrap());
        let identifiers = Arc::new(FileIdentifierStore::new(
            dir.path().join("build-numbers.jsonl"),
        ));
        let versions = Arc::new(FileVersionStore::new(dir.path().join("versions.json")));

        let (tx, rx) = mpsc::unbounded_channel();
        let sink = MemorySink::new();
        let mut dispatcher = EventDispatcher::new();
        dispatcher.add_sink(Box::new(sink.clone()));
        dispatcher.add_sink(Box::new(ChannelSink::new(tx)));
        let dispatcher = Arc::new(dispatcher);

        let config = BuildConfig {
            goals: vec![
                BuildGoal::direct("build", vec!["echo build".to_string(), "exit 0".to_string()]),
                BuildGoal::direct("lint", vec!["false".to_string()]),
                BuildGoal::external("ci", "travis"),
            ],
            ..BuildConfig::default()
        };
        let config = Arc::new(SdmConfiguration::new(config).unwrap());
        let tracker = GoalTracker::new(goals.clone(), dispatcher.clone());

        Self {
            _dir: dir,
            checkout,
            repo,
            commit,
            goals,
            identifiers,
            versions,
            sink,
            rx,
            config,
            dispatcher,
            tracker,
        }
    }

    fn builder(&self) -> DirectBuilder {
        let allocator = Arc::new(BuildNumberAllocator::new(
            self.identifiers.clone(),
            self.dispatcher.clone(),
        ));
        let tagger = Arc::new(TagSideEffect::new(
            Arc::new(GitAdapter::new(&self.checkout, TagConfig::default())),
            self.versions.clone(),
            true,
        ));
        DirectBuilder::new(
            self.config.clone(),
            allocator,
            CommandSequenceExecutor::new(Arc::new(ProcessRunner)),
            self.tracker.clone(),
            self.dispatcher.clone(),
        )
        .with_tagger(tagger)
    }

    fn correlator(&self) -> ExternalBuildCorrelator {
        let fetcher = HttpLogFetcher::new(&LogConfig::default()).unwrap();
        let interpreter = PatternLogInterpreter::new(&["ERROR".to_string()]).unwrap();
        let reporter = FailureReporter::new(
            Arc::new(fetcher),
            Some(Arc::new(interpreter)),
            self.dispatcher.clone(),
        );
        ExternalBuildCorrelator::new(self.config.clone(), self.tracker.clone())
            .with_reporter(Arc::new(reporter))
    }

    async fn goal(&self, name: &str, commit: &CommitIdentity) -> GoalInstance {
        let template = self.config.goal(name).unwrap();
        let goal = GoalInstance::from_template(template, Uuid::new_v4(), commit.clone());
        self.goals.create(&goal).await.unwrap();
        goal
    }

    fn transitions(&self, goal: &GoalInstance) -> Vec<(String, String)> {
        self.sink
            .events()
            .into_iter()
            .filter_map(|e| match e {
                LifecycleEvent::GoalStateChanged {
                    goal_id,
                    from_state,
                    to_state,
                    ..
                } if goal_id == goal.id => Some((from_state, to_state)),
                _ => None,
            })
            .collect()
    }
}

#[tokio::test]
async fn scenario_a_passing_direct_build_is_tagged() {
    let h = Harness::new();
    h.identifiers
        .record(&BuildIdentifier::new(h.repo.clone(), "3"))
        .await
        .unwrap();
    h.versions.record(&h.commit, "v1.2.3").unwrap();

    let goal = h.goal("build", &h.commit).await;
    let project = BuildProject::new(&h.checkout, h.commit.clone());
    let outcome = h.builder().execute(&goal, &project).await.unwrap();

    assert!(outcome.result.is_success());
    assert_eq!(outcome.build_number, "4");
    assert_eq!(
        h.transitions(&goal),
        vec![
            ("requested".to_string(), "in_process".to_string()),
            ("in_process".to_string(), "success".to_string()),
        ]
    );

    let tag = outcome.tagging.unwrap().await.unwrap().unwrap();
    assert_eq!(tag.tag_name, "v1.2.3+build.4");

    let adapter = GitAdapter::new(&h.checkout, TagConfig::default());
    assert_eq!(adapter.tag_target("v1.2.3+build.4").unwrap(), h.commit.sha);
}

#[tokio::test]
async fn scenario_b_failing_direct_build_is_not_tagged() {
    let h = Harness::new();
    h.versions.record(&h.commit, "v1.2.3").unwrap();

    let goal = h.goal("lint", &h.commit).await;
    let project = BuildProject::new(&h.checkout, h.commit.clone());
    let outcome = h.builder().execute(&goal, &project).await.unwrap();

    assert_eq!(outcome.result.state, GoalState::Failure);
    assert_eq!(outcome.result.code, Some(1));
    assert!(outcome.tagging.is_none());
    assert_eq!(
        h.transitions(&goal),
        vec![
            ("requested".to_string(), "in_process".to_string()),
            ("in_process".to_string(), "failure".to_string()),
        ]
    );
    assert_eq!(git(&h.checkout, &["tag", "--list"]), "");
}

#[tokio::test]
async fn scenario_c_broken_external_build_reports_log() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/log")
        .with_status(200)
        .with_body("running tests\nERROR: widget_spec failed\n")
        .create_async()
        .await;

    let h = Harness::new();
    let commit = CommitIdentity::new(&h.repo, "abc123");
    let goal = h.goal("ci", &commit).await;

    let build = BuildEvent::new(commit, BuildStatus::parse("broken"), "travis")
        .with_url(format!("{}/log", server.url()));
    let result = h.correlator().correlate(&build).await.unwrap();
    assert_eq!(
        result,
        Some(Correlation::Updated {
            goal_id: goal.id,
            state: GoalState::Failure
        })
    );

    let stored = h.goals.get(goal.id).await.unwrap().unwrap();
    assert_eq!(stored.state, GoalState::Failure);
    assert_eq!(stored.external_urls[0].url, format!("{}/log", server.url()));

    let report = h
        .sink
        .events()
        .into_iter()
        .find_map(|e| match e {
            LifecycleEvent::BuildFailureReported { report, .. } => Some(report),
            _ => None,
        })
        .unwrap();
    assert_eq!(report.goal_id, goal.id);
    assert!(report.log.unwrap().contains("ERROR: widget_spec failed"));
    assert_eq!(report.message, "ERROR: widget_spec failed");
}

#[tokio::test]
async fn broken_external_build_is_reported_without_its_log() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/log")
        .with_status(404)
        .create_async()
        .await;

    let h = Harness::new();
    let commit = CommitIdentity::new(&h.repo, "abc123");
    let goal = h.goal("ci", &commit).await;
    let url = format!("{}/log", server.url());

    let build = BuildEvent::new(commit, BuildStatus::Failed, "travis").with_url(url.clone());
    h.correlator().correlate(&build).await.unwrap();

    let stored = h.goals.get(goal.id).await.unwrap().unwrap();
    assert_eq!(stored.state, GoalState::Failure);

    let report = h
        .sink
        .events()
        .into_iter()
        .find_map(|e| match e {
            LifecycleEvent::BuildFailureReported { report, .. } => Some(report),
            _ => None,
        })
        .unwrap();
    assert_eq!(report.goal_id, goal.id);
    assert_eq!(report.build_url.as_deref(), Some(url.as_str()));
    assert_eq!(report.message, LOG_UNAVAILABLE);
    assert!(report.log.is_none());
}

#[tokio::test]
async fn scenario_d_started_then_passed_through_channel() {
    let h = Harness::new();
    let commit = CommitIdentity::new(&h.repo, "def456");
    let goal = h.goal("ci", &commit).await;

    let (tx, rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(Arc::new(h.correlator()).run(rx));
    tx.send(BuildEvent::new(commit.clone(), BuildStatus::Started, "travis"))
        .unwrap();
    tx.send(BuildEvent::new(commit, BuildStatus::Passed, "travis"))
        .unwrap();
    drop(tx);
    task.await.unwrap();

    let stored = h.goals.get(goal.id).await.unwrap().unwrap();
    assert_eq!(stored.state, GoalState::Success);
    assert_eq!(
        h.transitions(&goal),
        vec![
            ("requested".to_string(), "in_process".to_string()),
            ("in_process".to_string(), "success".to_string()),
        ]
    );
}

#[tokio::test]
async fn self_reported_direct_events_are_ignored_by_correlator() {
    let mut h = Harness::new();
    let ci = h.goal("ci", &h.commit).await;
    let goal = h.goal("build", &h.commit).await;
    let project = BuildProject::new(&h.checkout, h.commit.clone());
    h.builder().execute(&goal, &project).await.unwrap();

    let correlator = h.correlator();
    let mut forwarded = 0;
    while let Ok(build) = h.rx.try_recv() {
        forwarded += 1;
        assert_eq!(build.provider, "local");
        let result = correlator.correlate(&build).await.unwrap();
        assert_eq!(result, Some(Correlation::IgnoredDirect { goal_id: goal.id }));
    }
    assert_eq!(forwarded, 2);

    let stored = h.goals.get(goal.id).await.unwrap().unwrap();
    assert_eq!(stored.state, GoalState::Success);

    // The pending CI goal on the same commit waits for travis.
    let pending = h.goals.get(ci.id).await.unwrap().unwrap();
    assert_eq!(pending.state, GoalState::Requested);
    assert!(h.transitions(&ci).is_empty());
}
