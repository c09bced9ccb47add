// report.rs — Failure reports for externally failed builds.
//
// When an external build fails we fetch its log (if the notification carried
// a URL), let a LogInterpreter pull out the lines that matter, and publish a
// BuildFailureReported event. The interpreter is pluggable and optional; with
// none configured the report carries the raw log. A failure is reported even
// when its log cannot be retrieved.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bt_goal::{
    BuildEvent, EventDispatcher, FailureReport, FailureSummary, GoalInstance, LifecycleEvent,
};
use futures::StreamExt;
use regex::Regex;

use crate::config::LogConfig;
use crate::error::BuildError;

/// Message used when a failed build carried no log URL.
pub const NO_LOG_AVAILABLE: &str = "No build log available";

/// Message used when the log URL could not be fetched.
pub const LOG_UNAVAILABLE: &str = "Build log could not be retrieved";

/// Retrieves a build log by URL.
#[async_trait]
pub trait LogFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, BuildError>;
}

/// HTTP log fetcher. Keeps only the tail of oversized logs.
pub struct HttpLogFetcher {
    client: reqwest::Client,
    max_bytes: usize,
}

impl HttpLogFetcher {
    pub fn new(config: &LogConfig) -> Result<Self, BuildError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.fetch_timeout_secs))
            .build()
            .map_err(|e| BuildError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            max_bytes: config.max_bytes,
        })
    }
}

#[async_trait]
impl LogFetcher for HttpLogFetcher {
    async fn fetch(&self, url: &str) -> Result<String, BuildError> {
        let fetch_error = |reason: String| BuildError::LogFetch {
            url: url.to_string(),
            reason,
        };

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| fetch_error(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(fetch_error(format!("HTTP {}", status)));
        }

        let mut log = LogTail::new(self.max_bytes);
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| fetch_error(e.to_string()))?;
            log.push(&chunk);
        }
        Ok(log.into_string())
    }
}

/// The last `max_bytes` bytes of a log read in chunks.
struct LogTail {
    buf: Vec<u8>,
    max_bytes: usize,
}

impl LogTail {
    fn new(max_bytes: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_bytes,
        }
    }

    fn push(&mut self, chunk: &[u8]) {
        if chunk.len() >= self.max_bytes {
            self.buf.clear();
            self.buf
                .extend_from_slice(&chunk[chunk.len() - self.max_bytes..]);
            return;
        }
        self.buf.extend_from_slice(chunk);
        if self.buf.len() > self.max_bytes {
            let excess = self.buf.len() - self.max_bytes;
            self.buf.drain(..excess);
        }
    }

    /// Decode, dropping a character cut in half at the front.
    fn into_string(self) -> String {
        let start = self
            .buf
            .iter()
            .position(|b| b & 0xC0 != 0x80)
            .unwrap_or(self.buf.len());
        String::from_utf8_lossy(&self.buf[start..]).into_owned()
    }
}

/// Turns a raw build log into a structured failure, when it can.
pub trait LogInterpreter: Send + Sync {
    fn interpret(&self, raw: &str) -> Option<FailureSummary>;

    fn name(&self) -> &str;
}

/// Collects the log lines matching any of a set of regexes.
pub struct PatternLogInterpreter {
    patterns: Vec<Regex>,
}

impl PatternLogInterpreter {
    pub fn new(patterns: &[String]) -> Result<Self, BuildError> {
        let patterns = patterns
            .iter()
            .map(|p| {
                Regex::new(p)
                    .map_err(|e| BuildError::Config(format!("invalid error pattern '{}': {}", p, e)))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }
}

impl LogInterpreter for PatternLogInterpreter {
    fn interpret(&self, raw: &str) -> Option<FailureSummary> {
        let relevant: Vec<String> = raw
            .lines()
            .filter(|line| self.patterns.iter().any(|p| p.is_match(line)))
            .map(|line| line.trim_end().to_string())
            .collect();
        let first = relevant.first()?;
        Some(FailureSummary {
            message: first.trim().to_string(),
            relevant_lines: relevant,
            interpreter: Some(self.name().to_string()),
        })
    }

    fn name(&self) -> &str {
        "pattern"
    }
}

/// Builds and publishes failure reports for external builds.
pub struct FailureReporter {
    fetcher: Arc<dyn LogFetcher>,
    interpreter: Option<Arc<dyn LogInterpreter>>,
    dispatcher: Arc<EventDispatcher>,
}

impl FailureReporter {
    pub fn new(
        fetcher: Arc<dyn LogFetcher>,
        interpreter: Option<Arc<dyn LogInterpreter>>,
        dispatcher: Arc<EventDispatcher>,
    ) -> Self {
        Self {
            fetcher,
            interpreter,
            dispatcher,
        }
    }

    /// Publish the failure of `goal` described by `build`.
    ///
    /// A log that cannot be fetched is logged as a post-processing failure
    /// and the report goes out without it.
    pub async fn report(&self, goal: &GoalInstance, build: &BuildEvent) -> FailureReport {
        let mut report = FailureReport {
            goal_id: goal.id,
            goal_name: goal.name.clone(),
            commit: build.commit.clone(),
            build_url: build.build_url.clone(),
            message: NO_LOG_AVAILABLE.to_string(),
            summary: None,
            log: None,
        };

        if let Some(url) = &build.build_url {
            match self.fetcher.fetch(url).await {
                Ok(log) => {
                    let summary = self.interpreter.as_ref().and_then(|i| i.interpret(&log));
                    report.message = match &summary {
                        Some(summary) => summary.message.clone(),
                        None => format!("{} failed; see the build log", goal.name),
                    };
                    report.summary = summary;
                    report.log = Some(log);
                }
                Err(e) => {
                    tracing::warn!(
                        goal = %goal.name,
                        commit = %build.commit,
                        "{}",
                        BuildError::PostProcessing(e.to_string())
                    );
                    report.message = LOG_UNAVAILABLE.to_string();
                }
            }
        }

        tracing::info!(
            goal = %goal.name,
            commit = %build.commit,
            interpreted = report.summary.is_some(),
            "reporting external build failure"
        );
        self.dispatcher
            .dispatch(&LifecycleEvent::failure_reported(report.clone()));
        report
    }
}
