//! Turns database and collection selections into concrete source/target pairs.
use super::options::CopyOptions;
use crate::blocking::endpoint::Endpoint;
use crate::wildcard;
use crate::{Result, SyncError, LOCAL_DB, SYSTEM_COLL_MARKER, SYSTEM_DB};
use std::sync::Arc;
use tracing::{debug, warn};

/// What a job wants to copy, as given by the user.
///
/// Database and collection tokens are plain names, wildcard patterns (`logs_*`) or rename
/// pairs (`old=new`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
    /// empty means the database selected by the source connection url.
    pub source_databases: Vec<String>,
    /// when not empty, must have the same length as `source_databases`, pairs are made by
    /// position.
    pub target_databases: Vec<String>,
    /// empty means every collection.
    pub collections: Vec<String>,
    /// copy every selected collection of a database into this one collection.
    pub merge_into: Option<String>,
}

/// A source database, and the database its collections are copied to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseMapping {
    /// existing database name, as reported by the source server.
    pub source: String,
    /// name in target, can be a new one.
    pub target: String,
}

/// A source collection, and the collection its documents are copied to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionMapping {
    /// existing collection name, as reported by the source server.
    pub source: String,
    /// name in target, can be a new one.
    pub target: String,
}

/// One collection copy.
#[derive(Debug, Clone)]
pub struct CopyTask {
    /// source and target database.
    pub database: DatabaseMapping,
    /// source and target collection.
    pub collection: CollectionMapping,
    /// shared by all tasks of a job.
    pub options: Arc<CopyOptions>,
}

impl CopyTask {
    /// `db.coll` of the source collection.
    pub fn source_namespace(&self) -> String {
        format!("{}.{}", self.database.source, self.collection.source)
    }

    /// `db.coll` of the target collection.
    pub fn target_namespace(&self) -> String {
        format!("{}.{}", self.database.target, self.collection.target)
    }
}

/// Resolves a [Selection] against the live databases and collections of a source endpoint.
pub struct Resolver<'a, E: Endpoint> {
    source: &'a E,
    selection: &'a Selection,
    database_tokens: Vec<String>,
    same_server: bool,
}

impl<'a, E: Endpoint> Resolver<'a, E> {
    /// Validate `selection` against the source endpoint.
    ///
    /// All configuration errors are raised here, before anything is copied.
    pub fn new(source: &'a E, target: &E, selection: &'a Selection) -> Result<Self> {
        let database_tokens = if selection.source_databases.is_empty() {
            match source.default_database() {
                Some(db) => vec![db],
                None => {
                    return Err(SyncError::Config(
                        "No database selected, give source databases or a database in source url"
                            .to_string(),
                    ))
                }
            }
        } else {
            selection.source_databases.clone()
        };

        if !selection.target_databases.is_empty() {
            if selection.target_databases.len() != database_tokens.len() {
                return Err(SyncError::DatabaseCountMismatch {
                    source_count: database_tokens.len(),
                    target_count: selection.target_databases.len(),
                });
            }
            if let Some(name) = database_tokens
                .iter()
                .chain(selection.target_databases.iter())
                .find(|name| wildcard::has_wildcard(name))
            {
                return Err(SyncError::Config(format!(
                    "Wildcard database name {:?} can't be used together with target databases",
                    name
                )));
            }
        }

        let same_server = match (source.address(), target.address()) {
            (Some(a), Some(b)) => a.same_server(&b),
            _ => false,
        };
        debug!(same_server, "Source and target endpoints compared");

        Ok(Resolver {
            source,
            selection,
            database_tokens,
            same_server,
        })
    }

    /// true if source and target are the same physical server.
    pub fn is_same_server(&self) -> bool {
        self.same_server
    }

    /// Databases to copy.  Names which don't exist on source are skipped with a warning,
    /// `local` and `system` are never copied.
    pub fn databases(&self) -> Result<Vec<DatabaseMapping>> {
        let live: Vec<String> = self
            .source
            .database_names()?
            .into_iter()
            .filter(|name| !is_internal_database(name))
            .collect();
        let mut mappings = vec![];

        if !self.selection.target_databases.is_empty() {
            for (src, dst) in self
                .database_tokens
                .iter()
                .zip(self.selection.target_databases.iter())
            {
                match find_name(&live, src) {
                    Some(src) => mappings.push(DatabaseMapping {
                        source: src,
                        target: dst.clone(),
                    }),
                    None => warn!(database = %src, "Source database not found, skip"),
                }
            }
            return Ok(dedup(mappings));
        }

        for token in self.database_tokens.iter() {
            for (source, target) in expand_token(&live, token) {
                if is_internal_database(&source) {
                    continue;
                }
                mappings.push(DatabaseMapping { source, target });
            }
        }
        Ok(dedup(mappings))
    }

    /// Collections to copy for one database mapping, self copies and system collections are
    /// filtered out.
    pub fn collections(&self, db: &DatabaseMapping) -> Result<Vec<CollectionMapping>> {
        let live: Vec<String> = self
            .source
            .collection_names(&db.source)?
            .into_iter()
            .filter(|name| !is_system_collection(name))
            .collect();

        let mut pairs = vec![];
        if self.selection.collections.is_empty() {
            pairs.extend(live.iter().map(|name| (name.clone(), name.clone())));
        } else {
            for token in self.selection.collections.iter() {
                pairs.extend(expand_token(&live, token));
            }
        }

        let mut mappings = vec![];
        for (source, target) in pairs {
            if is_system_collection(&source) {
                continue;
            }
            let target = match &self.selection.merge_into {
                Some(merged) => merged.clone(),
                None => target,
            };
            // database names are case insensitive on a server.
            if self.same_server && db.source.eq_ignore_ascii_case(&db.target) && source == target {
                warn!(
                    database = %db.source,
                    collection = %source,
                    "Source and target are the same collection on the same server, skip"
                );
                continue;
            }
            mappings.push(CollectionMapping { source, target });
        }
        Ok(dedup(mappings))
    }

    /// Lazily enumerate copy tasks, database after database.
    pub fn tasks(
        &'a self,
        options: Arc<CopyOptions>,
    ) -> Result<impl Iterator<Item = Result<CopyTask>> + 'a> {
        let databases = self.databases()?;
        Ok(databases.into_iter().flat_map(move |db| {
            let options = options.clone();
            match self.collections(&db) {
                Ok(colls) => colls
                    .into_iter()
                    .map(|collection| {
                        Ok(CopyTask {
                            database: db.clone(),
                            collection,
                            options: options.clone(),
                        })
                    })
                    .collect::<Vec<_>>(),
                Err(e) => vec![Err(e)],
            }
        }))
    }
}

fn is_internal_database(name: &str) -> bool {
    name.eq_ignore_ascii_case(LOCAL_DB) || name.eq_ignore_ascii_case(SYSTEM_DB)
}

fn is_system_collection(name: &str) -> bool {
    name.contains(SYSTEM_COLL_MARKER)
}

/// Exact name first, then case insensitive.
fn find_name(live: &[String], name: &str) -> Option<String> {
    live.iter()
        .find(|n| n.as_str() == name)
        .or_else(|| live.iter().find(|n| n.eq_ignore_ascii_case(name)))
        .cloned()
}

/// Expand one selection token into `(source, target)` pairs against existing names.
fn expand_token(live: &[String], token: &str) -> Vec<(String, String)> {
    let token = token.trim();
    if token.is_empty() {
        return vec![];
    }
    if live.iter().any(|n| n == token) {
        return vec![(token.to_string(), token.to_string())];
    }
    if let Some(idx) = token.find('=') {
        if idx > 0 {
            let (src, dst) = (token[..idx].trim(), token[idx + 1..].trim());
            return match find_name(live, src) {
                Some(src) if !dst.is_empty() => vec![(src, dst.to_string())],
                Some(src) => vec![(src.clone(), src)],
                None => {
                    warn!(name = %src, "Source not found, skip");
                    vec![]
                }
            };
        }
    }
    if let Some(found) = find_name(live, token) {
        return vec![(found.clone(), found)];
    }
    if wildcard::has_wildcard(token) {
        let matched: Vec<(String, String)> = live
            .iter()
            .filter(|n| wildcard::is_match(token, n))
            .map(|n| (n.clone(), n.clone()))
            .collect();
        if matched.is_empty() {
            warn!(pattern = %token, "Nothing matches pattern");
        }
        return matched;
    }
    warn!(name = %token, "Source not found, skip");
    vec![]
}

fn dedup<T: PartialEq>(items: Vec<T>) -> Vec<T> {
    let mut result: Vec<T> = Vec::with_capacity(items.len());
    for item in items {
        if !result.contains(&item) {
            result.push(item);
        }
    }
    result
}
