//! The copy engine: selection resolving, collection copy, index copy and scheduling.
#[doc(hidden)]
pub mod bson_helper;
pub mod collection;
pub mod indexes;
mod job;
#[cfg(test)]
pub(crate) mod memory;
mod options;
pub mod resolver;
pub mod safe_cursor;
pub mod scheduler;
pub mod storage;

pub use collection::{copy_collection, CopyOutcome, SkipReason};
pub use indexes::{copy_indexes, IndexReport, IndexSpec};
pub use job::{CopyJob, JobSummary, MongoCopier};
pub use options::{CopyOptions, RetryPolicy};
pub use resolver::{CollectionMapping, CopyTask, DatabaseMapping, Resolver, Selection};
pub use safe_cursor::SafeCursor;
pub use scheduler::{SchedulerReport, TaskScheduler};
pub use storage::{AllocationPreset, BlockCompressor, StorageOptions};
