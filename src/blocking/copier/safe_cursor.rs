//! Resumable, error tolerant reading of one collection.
use super::options::RetryPolicy;
use crate::blocking::endpoint::{CollectionHandle, DocCursor};
use crate::{Result, SyncError};
use bson::{doc, Bson, Document};
use tracing::warn;

/// Iterates documents of a collection in ascending `key` order.
///
/// Long living server cursors die for many reasons (cursor timeouts, elections, busy servers).
/// When that happens, `SafeCursor` opens a new cursor which starts right after the last key it
/// has yielded, so documents are never yielded twice and never skipped, as long as `key` is
/// unique.  After `cursor_max_errors` consecutive failures the error is yielded and iteration
/// stops.
pub struct SafeCursor<'a, C: CollectionHandle + ?Sized> {
    coll: &'a C,
    key: String,
    filter: Document,
    last_key: Option<Bson>,
    cursor: Option<DocCursor<'a>>,
    consecutive_errors: u32,
    retry: RetryPolicy,
    finished: bool,
}

impl<'a, C: CollectionHandle + ?Sized> SafeCursor<'a, C> {
    /// Create a cursor over `coll` sorted by `key`.
    ///
    /// `filter` narrows the documents, and documents with a key lower or equal to `after` are
    /// never returned.
    pub fn new(
        coll: &'a C,
        key: &str,
        filter: Document,
        after: Option<Bson>,
        retry: RetryPolicy,
    ) -> Self {
        SafeCursor {
            coll,
            key: key.to_string(),
            filter,
            last_key: after,
            cursor: None,
            consecutive_errors: 0,
            retry,
            finished: false,
        }
    }

    /// key value of the latest yielded document (or the initial floor).
    pub fn last_key(&self) -> Option<&Bson> {
        self.last_key.as_ref()
    }

    fn open(&self) -> Result<DocCursor<'a>> {
        let filter = resume_filter(&self.filter, &self.key, self.last_key.as_ref());
        self.coll.find_sorted(filter, &self.key)
    }

    /// Returns the error back if the retry budget is exhausted.
    fn on_error(&mut self, err: SyncError) -> Option<SyncError> {
        self.cursor = None;
        self.consecutive_errors += 1;
        warn!(
            ns = %self.coll.namespace(),
            ?err,
            attempt = self.consecutive_errors,
            max_attempts = self.retry.cursor_max_errors,
            last_key = ?self.last_key,
            "Reading collection failed, reopen cursor after last key"
        );
        if self.consecutive_errors > self.retry.cursor_max_errors {
            return Some(err);
        }
        if !self.retry.cursor_backoff.is_zero() {
            std::thread::sleep(self.retry.cursor_backoff);
        }
        None
    }
}

impl<'a, C: CollectionHandle + ?Sized> Iterator for SafeCursor<'a, C> {
    type Item = Result<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.finished {
            let mut cursor = match self.cursor.take() {
                Some(c) => c,
                None => match self.open() {
                    Ok(c) => c,
                    Err(e) => {
                        if let Some(e) = self.on_error(e) {
                            self.finished = true;
                            return Some(Err(e));
                        }
                        continue;
                    }
                },
            };

            match cursor.next() {
                None => {
                    self.finished = true;
                }
                Some(Ok(doc)) => {
                    self.consecutive_errors = 0;
                    if let Some(key) = doc.get(&self.key) {
                        self.last_key = Some(key.clone());
                    }
                    self.cursor = Some(cursor);
                    return Some(Ok(doc));
                }
                Some(Err(e)) => {
                    if let Some(e) = self.on_error(e) {
                        self.finished = true;
                        return Some(Err(e));
                    }
                }
            }
        }
        None
    }
}

/// Combine `filter` with a `key > after` condition.
pub fn resume_filter(filter: &Document, key: &str, after: Option<&Bson>) -> Document {
    match after {
        None => filter.clone(),
        Some(after) if filter.is_empty() => doc! { key: { "$gt": after.clone() } },
        Some(after) => doc! {
            "$and": [filter.clone(), { key: { "$gt": after.clone() } }]
        },
    }
}
