use super::storage::StorageOptions;
use crate::ID_KEY;
use std::time::Duration;

/// How hard we try before giving up on a failing server operation.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// consecutive cursor failures tolerated while reading one collection.
    pub cursor_max_errors: u32,
    /// pause before a failed cursor is reopened.
    pub cursor_backoff: Duration,
    /// pause before a failed batch insert is written again (only once).
    pub insert_backoff: Duration,
    /// how many times to look for an index whose creation timed out.
    pub index_poll_attempts: u32,
    /// pause between two index lookups.
    pub index_poll_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            cursor_max_errors: 5,
            cursor_backoff: Duration::from_millis(2500),
            insert_backoff: Duration::from_secs(1),
            index_poll_attempts: 30,
            index_poll_interval: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Same budgets, without any waiting.
    pub fn no_wait(&self) -> Self {
        RetryPolicy {
            cursor_backoff: Duration::ZERO,
            insert_backoff: Duration::ZERO,
            index_poll_interval: Duration::ZERO,
            ..self.clone()
        }
    }
}

/// Options of one copy job, shared by every collection copy.
#[derive(Debug, Clone, PartialEq)]
pub struct CopyOptions {
    /// documents per insert batch, `<= 0` means computed from collection statistics.
    pub batch_size: i32,
    /// recreate secondary indexes after documents are copied.
    pub copy_indexes: bool,
    /// drop target collection before copy, unless resuming.
    pub drop_target_first: bool,
    /// continue after the greatest key already present in target.
    pub resume: bool,
    /// don't touch collections which already have documents in target.
    pub skip_existing: bool,
    /// only copy when target has less documents than source.
    pub if_smaller: bool,
    /// create indexes before documents are copied, whatever `copy_indexes` says.
    pub indexes_before: bool,
    /// force `background` on every created index.
    pub indexes_background: bool,
    /// force `sparse` on every created index.
    pub indexes_sparse: bool,
    /// pause after every written batch.
    pub lazy_wait: Option<Duration>,
    /// options of target collections created by the copy.
    pub storage: StorageOptions,
    /// field documents are ordered and resumed by.
    pub key_field: String,
    /// retry budgets of failing server operations.
    pub retry: RetryPolicy,
}

impl Default for CopyOptions {
    fn default() -> Self {
        CopyOptions {
            batch_size: -1,
            copy_indexes: true,
            drop_target_first: false,
            resume: false,
            skip_existing: false,
            if_smaller: false,
            indexes_before: false,
            indexes_background: false,
            indexes_sparse: false,
            lazy_wait: None,
            storage: StorageOptions::default(),
            key_field: ID_KEY.to_string(),
            retry: RetryPolicy::default(),
        }
    }
}
