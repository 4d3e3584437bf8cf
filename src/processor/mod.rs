//! The unit of work performed for one item.
//!
//! The controller only sees [`ItemProcessor`]; [`ExternalProcessor`] runs a
//! subprocess, tests and embedders can supply in-process implementations.

mod external;

use std::future::Future;
use std::path::Path;

use crate::error::ExecutionError;
use crate::item::ItemConfig;

pub use external::ExternalProcessor;

/// Everything a processor needs to run one item.
#[derive(Debug, Clone, Copy)]
pub struct Invocation<'a> {
    pub item_id: &'a str,
    pub config: &'a ItemConfig,
    /// Temporary YAML file holding `[config]`, valid for the duration of the call.
    pub config_path: &'a Path,
    pub output_dir: &'a Path,
    /// Parallelism hint for the processor. The controller sequences items
    /// itself, so this is always 1.
    pub max_workers: usize,
}

/// Captured output of a successful run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Performs the domain-specific work for one item.
pub trait ItemProcessor {
    fn execute(
        &self,
        invocation: &Invocation<'_>,
    ) -> impl Future<Output = Result<ProcessOutput, ExecutionError>>;
}
