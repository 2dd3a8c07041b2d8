//! Copy one collection.
use super::indexes;
use super::options::{CopyOptions, RetryPolicy};
use super::safe_cursor::SafeCursor;
use crate::blocking::endpoint::CollectionHandle;
use crate::{Result, SyncError, SYSTEM_COLL_MARKER};
use bson::{doc, Bson, Document};
use std::fmt;
use tracing::{debug, error, info, warn};

/// Auto sized batches stay below this payload.
pub const MAX_BATCH_BYTES: u64 = 4 * 1024 * 1024;
/// Bigger batches don't make inserts faster.
pub const MAX_AUTO_BATCH_SIZE: usize = 200;
/// Batch size when collection statistics are useless.
pub const FALLBACK_BATCH_SIZE: usize = 100;
/// Progress is logged once every this many batches.
const PROGRESS_EVERY_BATCHES: u64 = 150;

/// Why a collection is not copied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// collection belongs to mongodb itself (`system.*`).
    SystemCollection,
    /// source collection doesn't exist (anymore).
    SourceMissing,
    /// capped collections are not supported.
    Capped,
    /// target already has documents and `skip_existing` is set.
    TargetNotEmpty,
    /// target has at least as many documents as source and `if_smaller` is set.
    TargetNotSmaller,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            SkipReason::SystemCollection => "system collection",
            SkipReason::SourceMissing => "source collection doesn't exist",
            SkipReason::Capped => "capped collection",
            SkipReason::TargetNotEmpty => "target collection is not empty",
            SkipReason::TargetNotSmaller => "target collection is not smaller than source",
        };
        f.write_str(reason)
    }
}

/// How a collection copy ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyOutcome {
    /// every document is copied.
    Completed {
        /// documents written by this run.
        documents: u64,
    },
    /// nothing was done.
    Skipped(SkipReason),
    /// details are logged.
    Failed,
}

/// Batch size for documents of `avg_obj_size` bytes.
pub fn auto_batch_size(avg_obj_size: u64) -> usize {
    if avg_obj_size == 0 {
        return FALLBACK_BATCH_SIZE;
    }
    ((MAX_BATCH_BYTES / avg_obj_size) as usize + 1).min(MAX_AUTO_BATCH_SIZE)
}

/// Copy documents (and indexes) from `source` to `target` following `options`.
///
/// Errors never escape: they are logged with both namespaces and reported as
/// [CopyOutcome::Failed], so one broken collection doesn't affect others.
pub fn copy_collection<S, T>(source: &S, target: &T, options: &CopyOptions) -> CopyOutcome
where
    S: CollectionHandle + ?Sized,
    T: CollectionHandle + ?Sized,
{
    match try_copy(source, target, options) {
        Ok(outcome) => {
            match outcome {
                CopyOutcome::Completed { documents } => info!(
                    source = %source.namespace(),
                    target = %target.namespace(),
                    documents,
                    "Copy collection complete"
                ),
                CopyOutcome::Skipped(reason) => info!(
                    source = %source.namespace(),
                    target = %target.namespace(),
                    %reason,
                    "Copy collection skipped"
                ),
                CopyOutcome::Failed => {}
            }
            outcome
        }
        Err(e) => {
            error!(
                source = %source.namespace(),
                target = %target.namespace(),
                ?e,
                "Copy collection failed"
            );
            CopyOutcome::Failed
        }
    }
}

fn try_copy<S, T>(source: &S, target: &T, options: &CopyOptions) -> Result<CopyOutcome>
where
    S: CollectionHandle + ?Sized,
    T: CollectionHandle + ?Sized,
{
    if source.name().contains(SYSTEM_COLL_MARKER) {
        return Ok(CopyOutcome::Skipped(SkipReason::SystemCollection));
    }
    if !source.exists()? {
        warn!(source = %source.namespace(), "Source collection doesn't exist");
        return Ok(CopyOutcome::Skipped(SkipReason::SourceMissing));
    }
    let total = source.count()?;
    match source.is_capped() {
        Ok(true) => {
            warn!(source = %source.namespace(), "Capped collections are not supported");
            return Ok(CopyOutcome::Skipped(SkipReason::Capped));
        }
        Ok(false) => {}
        Err(e) => warn!(source = %source.namespace(), ?e, "Can't check if collection is capped"),
    }

    let batch_size = resolve_batch_size(source, options.batch_size);

    let mut target_exists = target.exists()?;
    let mut resume_from: Option<Bson> = None;
    let mut already_copied = 0;
    if target_exists {
        let target_count = target.count()?;
        if options.skip_existing && target_count > 0 {
            return Ok(CopyOutcome::Skipped(SkipReason::TargetNotEmpty));
        }
        if options.resume {
            resume_from = target.max_key(&options.key_field)?;
            already_copied = target_count;
        }
        if options.if_smaller && target_count >= total {
            return Ok(CopyOutcome::Skipped(SkipReason::TargetNotSmaller));
        }

        let mut drop_first = options.drop_target_first && resume_from.is_none();
        if options.storage.is_requested() && target_count == 0 {
            // storage options can only be set on creation.
            drop_first = true;
        }
        if drop_first {
            info!(target = %target.namespace(), "Drop target collection");
            target.drop_collection()?;
            target_exists = false;
            already_copied = 0;
        }
    }

    if !target_exists {
        if let Err(e) = target.create(options.storage.storage_engine()) {
            warn!(
                target = %target.namespace(),
                ?e,
                "Create target collection failed, let inserts create it"
            );
        }
    }

    if options.indexes_before {
        indexes::copy_indexes(source, target, options)?;
    }

    info!(
        source = %source.namespace(),
        target = %target.namespace(),
        total,
        batch_size,
        resume_from = ?resume_from,
        "Copy collection start"
    );

    let mut written: u64 = 0;
    let mut batches: u64 = 0;
    let mut buffer: Vec<Document> = Vec::with_capacity(batch_size);
    let cursor = SafeCursor::new(
        source,
        &options.key_field,
        doc! {},
        resume_from,
        options.retry.clone(),
    );
    for doc in cursor {
        buffer.push(doc?);
        if buffer.len() < batch_size {
            continue;
        }
        written += write_batch(target, &buffer, &options.retry)?;
        buffer.clear();

        if batches % PROGRESS_EVERY_BATCHES == 0 {
            let done = already_copied + written;
            debug!(
                target = %target.namespace(),
                done,
                total,
                progress = %format!("{}%", percent(done, total)),
                "Copy in progress"
            );
        }
        batches += 1;

        if let Some(wait) = options.lazy_wait {
            std::thread::sleep(wait);
        }
    }
    if !buffer.is_empty() {
        written += write_batch(target, &buffer, &options.retry)?;
    }

    if options.copy_indexes && !options.indexes_before {
        indexes::copy_indexes(source, target, options)?;
    }
    Ok(CopyOutcome::Completed { documents: written })
}

fn resolve_batch_size<S: CollectionHandle + ?Sized>(source: &S, batch_size: i32) -> usize {
    if batch_size > 0 {
        return batch_size as usize;
    }
    match source.stats() {
        Ok(stats) => auto_batch_size(stats.avg_obj_size),
        Err(e) => {
            warn!(source = %source.namespace(), ?e, "Read collection stats failed, use default batch size");
            FALLBACK_BATCH_SIZE
        }
    }
}

/// Insert `docs`, returns how many of them are in target because of this call.
///
/// A failed insert is tried once more.  The failed attempt may have written part of the batch,
/// so duplicate keys are only accepted on the retry.
fn write_batch<T: CollectionHandle + ?Sized>(
    target: &T,
    docs: &[Document],
    retry: &RetryPolicy,
) -> Result<u64> {
    let first_error = match target.insert_many(docs) {
        Ok(inserted) => return Ok(inserted),
        // these documents were in target before the batch, writing again can't help.
        Err(e @ SyncError::DuplicateKeys { .. }) => return Err(e),
        Err(e) => e,
    };
    warn!(target = %target.namespace(), e = ?first_error, size = docs.len(), "Insert batch failed, retry");
    if !retry.insert_backoff.is_zero() {
        std::thread::sleep(retry.insert_backoff);
    }
    match target.insert_many(docs) {
        Ok(inserted) => Ok(inserted),
        Err(SyncError::DuplicateKeys {
            inserted,
            duplicates,
        }) => {
            warn!(
                target = %target.namespace(),
                duplicates,
                inserted,
                "Documents written by the failed insert are skipped"
            );
            Ok(inserted + duplicates as u64)
        }
        Err(e) => Err(e),
    }
}

fn percent(done: u64, total: u64) -> u64 {
    if total == 0 {
        return 100;
    }
    (done * 100 / total).min(100)
}
