//! # bt-build
//!
//! Build numbering, direct builds and external CI correlation for Buildtrack.
//!
//! Two paths fulfill a build goal and both end in the same goal state
//! machine: [`DirectBuilder`] runs the goal's commands itself, while
//! [`ExternalBuildCorrelator`] matches notifications from an outside CI
//! system to the goal they belong to.
//!
//! ## Key components
//!
//! - [`SdmConfiguration`] — goal templates, observers and interpreter, built once
//! - [`BuildNumberAllocator`] — strictly increasing build numbers per repository
//! - [`CommandSequenceExecutor`] — runs command lists through a [`CommandRunner`]
//! - [`DirectBuilder`] — allocate, run, record, tag
//! - [`ExternalBuildCorrelator`] — notifications in, goal updates out
//! - [`TagSideEffect`] — `<version>+build.<n>` tags after success
//! - [`FailureReporter`] — fetch and interpret logs of failed external builds

pub mod config;
pub mod correlator;
pub mod direct;
pub mod error;
pub mod executor;
pub mod identifier;
pub mod report;
pub mod tagging;

pub use config::{ArtifactConfig, BuildConfig, LogConfig, SdmConfiguration, StoreConfig};
pub use correlator::{
    BuildObserver, CommitRepoResolver, Correlation, ExternalBuildCorrelator, RepoResolver,
};
pub use direct::{BuildOutcome, DirectBuilder};
pub use error::BuildError;
pub use executor::{
    BuildProject, CommandOutcome, CommandRunner, CommandSequenceExecutor, ExecutionReport,
    ProcessRunner, RunOptions,
};
pub use identifier::{
    BuildIdentifier, BuildIdentifierStore, BuildNumberAllocator, FileIdentifierStore,
};
pub use report::{
    FailureReporter, HttpLogFetcher, LogFetcher, LogInterpreter, PatternLogInterpreter,
};
pub use tagging::{tag_name, TagSideEffect};
