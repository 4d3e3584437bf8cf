mod record;
mod store;

pub use record::{CheckpointRecord, ItemStatus};
pub use store::{CheckpointStore, StatusCounts};
