//! Recreate secondary indexes of a source collection on its target.
use super::bson_helper;
use super::options::{CopyOptions, RetryPolicy};
use crate::blocking::endpoint::CollectionHandle;
use crate::{Result, SyncError};
use bson::{doc, Document};
use std::slice;
use tracing::{debug, error, info, warn};

/// name of the index every collection has on `_id`.
pub const PRIMARY_INDEX_NAME: &str = "_id_";

/// An index definition read from source.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSpec {
    /// index name, unique inside a collection.
    pub name: String,
    /// indexed fields and their directions.
    pub key: Document,
    /// built without blocking the collection.
    pub background: bool,
    /// documents without indexed fields are left out.
    pub sparse: bool,
    /// indexed values are unique.
    pub unique: bool,
    /// `expireAfterSeconds` of ttl indexes.
    pub ttl: Option<i64>,
    /// the whole definition as reported by the server.
    pub raw: Document,
}

impl IndexSpec {
    /// read one entry of `listIndexes`, fails without name or key.
    pub fn from_document(raw: Document) -> Result<Self> {
        Ok(IndexSpec {
            name: raw.get_str("name")?.to_string(),
            key: raw.get_document("key")?.clone(),
            background: bson_helper::get_flag(&raw, "background"),
            sparse: bson_helper::get_flag(&raw, "sparse"),
            unique: bson_helper::get_flag(&raw, "unique"),
            ttl: bson_helper::get_number(&raw, "expireAfterSeconds")
                .ok()
                .map(|secs| secs as i64),
            raw,
        })
    }

    /// true for the `_id` index, which every collection gets on creation.
    pub fn is_primary(&self) -> bool {
        self.name == PRIMARY_INDEX_NAME
    }

    /// Definition for `createIndexes`: the source definition as is, without namespace, with
    /// forced options applied.
    pub fn batched_definition(&self, options: &CopyOptions) -> Document {
        let mut def = self.raw.clone();
        def.remove("ns");
        if options.indexes_background {
            def.insert("background", true);
        }
        if options.indexes_sparse {
            def.insert("sparse", true);
        }
        def
    }

    /// Definition for servers creating one index at a time, only well known options are kept.
    pub fn legacy_definition(&self, options: &CopyOptions) -> Document {
        let mut def = doc! {
            "key": self.key.clone(),
            "name": self.name.as_str(),
        };
        if self.unique {
            def.insert("unique", true);
        }
        if self.background || options.indexes_background {
            def.insert("background", true);
        }
        if self.sparse || options.indexes_sparse {
            def.insert("sparse", true);
        }
        if let Some(ttl) = self.ttl {
            def.insert("expireAfterSeconds", ttl);
        }
        def
    }
}

/// What happened to the indexes of one collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexReport {
    /// secondary indexes found on source.
    pub requested: usize,
    /// indexes present on target afterwards.
    pub created: usize,
    /// creation timed out and the index didn't show up while we waited.
    pub pending: usize,
    /// creation refused by the server.
    pub failed: usize,
}

/// Copy every secondary index of `source` to `target`.
///
/// Creation failures are logged and reported, never returned as errors.  Only failing to read
/// source index definitions is an error.
pub fn copy_indexes<S, T>(source: &S, target: &T, options: &CopyOptions) -> Result<IndexReport>
where
    S: CollectionHandle + ?Sized,
    T: CollectionHandle + ?Sized,
{
    let specs: Vec<IndexSpec> = source
        .list_indexes()?
        .into_iter()
        .filter_map(|raw| match IndexSpec::from_document(raw) {
            Ok(spec) => Some(spec),
            Err(e) => {
                warn!(ns = %source.namespace(), ?e, "Ignore malformed index definition");
                None
            }
        })
        .filter(|spec| !spec.is_primary())
        .collect();

    let mut report = IndexReport {
        requested: specs.len(),
        ..Default::default()
    };
    if specs.is_empty() {
        return Ok(report);
    }

    let batched = match target.server_version() {
        Ok(version) => version.supports_create_indexes(),
        Err(e) => {
            warn!(ns = %target.namespace(), ?e, "Can't read server version, assume createIndexes is supported");
            true
        }
    };

    if batched {
        let defs = specs.iter().map(|s| s.batched_definition(options)).collect();
        match target.create_indexes(defs) {
            Ok(()) => report.created += specs.len(),
            Err(e) => on_create_error(target, &specs, e, &options.retry, &mut report),
        }
    } else {
        for spec in specs.iter() {
            match target.create_index_legacy(spec.legacy_definition(options)) {
                Ok(()) => report.created += 1,
                Err(e) => {
                    on_create_error(target, slice::from_ref(spec), e, &options.retry, &mut report)
                }
            }
        }
    }

    info!(
        ns = %target.namespace(),
        requested = report.requested,
        created = report.created,
        pending = report.pending,
        failed = report.failed,
        "Indexes copied"
    );
    Ok(report)
}

fn on_create_error<T: CollectionHandle + ?Sized>(
    target: &T,
    specs: &[IndexSpec],
    err: SyncError,
    retry: &RetryPolicy,
    report: &mut IndexReport,
) {
    let names: Vec<&str> = specs.iter().map(|s| s.name.as_str()).collect();
    if !err.is_timeout() {
        error!(ns = %target.namespace(), indexes = ?names, ?err, "Create indexes failed");
        report.failed += specs.len();
        return;
    }

    warn!(
        ns = %target.namespace(),
        indexes = ?names,
        ?err,
        "Create indexes timed out, the build may still run on server, wait for it"
    );
    let missing = wait_for_indexes(target, specs, retry);
    report.created += specs.len() - missing.len();
    report.pending += missing.len();
    if !missing.is_empty() {
        warn!(
            ns = %target.namespace(),
            indexes = ?missing,
            "Indexes still missing after waiting, check them manually"
        );
    }
}

/// Poll until every index exists, returns names of the missing ones.
fn wait_for_indexes<'s, T: CollectionHandle + ?Sized>(
    target: &T,
    specs: &'s [IndexSpec],
    retry: &RetryPolicy,
) -> Vec<&'s str> {
    let mut missing: Vec<&str> = specs.iter().map(|s| s.name.as_str()).collect();
    for attempt in 1..=retry.index_poll_attempts {
        if !retry.index_poll_interval.is_zero() {
            std::thread::sleep(retry.index_poll_interval);
        }
        missing.retain(|name| !matches!(target.index_exists(name), Ok(true)));
        if missing.is_empty() {
            break;
        }
        debug!(ns = %target.namespace(), attempt, missing = ?missing, "Indexes not ready yet");
    }
    missing
}
