//! VCS adapters for Buildtrack
//!
//! This crate provides pluggable adapters for creating immutable version tags
//! after a successful build. The core abstraction is the `TagAdapter` trait,
//! with built-in implementations for Git and a "none" fallback, plus the
//! `VersionSource` lookup the tagger uses to name tags.

pub mod adapter;
pub mod config;
pub mod git;
pub mod none;
pub mod version;

pub use adapter::{SubmitError, TagAdapter, TagResult};
pub use config::TagConfig;
pub use git::GitAdapter;
pub use none::NoneAdapter;
pub use version::{FileVersionStore, VersionSource};
