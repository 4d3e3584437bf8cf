//! Resumable, checkpointed batch execution.
//!
//! A [`Controller`] runs a list of items through an [`ItemProcessor`] one at
//! a time, recording each outcome in a JSON checkpoint so that interrupted or
//! partially failed batches pick up where they stopped.

pub mod aggregate;
pub mod checkpoint;
pub mod cli;
pub mod collector;
pub mod config;
pub mod controller;
pub mod error;
pub mod executor;
pub mod item;
pub mod persist;
pub mod processor;
pub mod record;
pub mod telemetry;
pub mod ui;

pub use checkpoint::{CheckpointRecord, CheckpointStore, ItemStatus};
pub use config::CheckrunConfig;
pub use controller::{Controller, RunReport};
pub use error::{CheckrunError, ErrorKind, ExecutionError};
pub use item::{ItemConfig, ItemDetails};
pub use processor::{ExternalProcessor, ItemProcessor};
