//! lockbump core library.
//!
//! Refreshes the dependency lock file of a GitHub repository and proposes the
//! result as a pull request: configuration layering, remote authorization,
//! workspace cloning, update strategies and the GitHub client, composed by
//! [`pipeline::Pipeline`].

pub mod command;
pub mod config;
pub mod errors;
pub mod git;
pub mod pipeline;
pub mod stamp;
pub mod strategy;

// Re-exports for convenience.
pub use command::{CommandRunner, ProcessRunner};
pub use config::{ConfigResolver, EffectiveConfig};
pub use errors::CoreError;
pub use pipeline::{Pipeline, PipelineError, RunConfig, RunReport, Stage};
pub use strategy::Strategy;
