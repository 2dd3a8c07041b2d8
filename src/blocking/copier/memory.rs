//! In-memory server, used by unit tests to run copies without mongod.
//!
//! It understands just enough of the query language for the copier (`$and`, `$gt`, `$gte`,
//! `$lt` and equality), rejects documents with an existing `_id`, and lets tests inject cursor,
//! insert, drop and index failures.
use crate::blocking::endpoint::{
    CollectionHandle, CollectionStats, DocCursor, Endpoint, EndpointAddress, ServerVersion,
};
use crate::{Result, SyncError};
use bson::{doc, Bson, Document};
use std::cmp::Ordering;
use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

const ID_INDEX_NAME: &str = "_id_";

#[derive(Default)]
struct CollState {
    exists: bool,
    docs: Vec<Document>,
    capped: bool,
    storage_engine: Option<Document>,
    indexes: Vec<Document>,
    avg_obj_size: Option<u64>,

    cursor_failures: VecDeque<usize>,
    open_failures: u32,
    insert_failures: u32,
    lost_insert_replies: u32,
    drop_fails: bool,
    stats_fails: bool,
    index_timeout: Option<bool>,
    index_rejected: bool,

    find_calls: usize,
    insert_calls: usize,
    drop_calls: usize,
    batched_index_requests: Vec<Document>,
    legacy_index_requests: Vec<Document>,
}

impl CollState {
    fn add_index(&mut self, index: Document) {
        let name = index.get_str("name").unwrap_or_default().to_string();
        if !self.index_names().contains(&name) {
            self.indexes.push(index);
        }
    }

    fn index_names(&self) -> Vec<String> {
        self.indexes
            .iter()
            .filter_map(|idx| idx.get_str("name").ok().map(String::from))
            .collect()
    }

    /// create requested indexes, fails like a socket timeout when asked to.
    fn build_indexes(&mut self, indexes: Vec<Document>) -> Result<()> {
        if self.index_rejected {
            return Err(SyncError::Config("index options conflict".to_string()));
        }
        match self.index_timeout {
            Some(lands) => {
                if lands {
                    indexes.into_iter().for_each(|idx| self.add_index(idx));
                }
                Err(SyncError::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "index build timed out",
                )))
            }
            None => {
                indexes.into_iter().for_each(|idx| self.add_index(idx));
                Ok(())
            }
        }
    }
}

struct ServerState {
    dbs: BTreeMap<String, BTreeMap<String, Arc<Mutex<CollState>>>>,
    version: ServerVersion,
}

/// An in-memory server.  Clones share the same data.
#[derive(Clone)]
pub struct MemoryEndpoint {
    address: Option<EndpointAddress>,
    default_db: Option<String>,
    server: Arc<Mutex<ServerState>>,
}

impl MemoryEndpoint {
    pub fn new(address: &str) -> Self {
        MemoryEndpoint {
            address: EndpointAddress::parse(address),
            default_db: None,
            server: Arc::new(Mutex::new(ServerState {
                dbs: BTreeMap::new(),
                version: ServerVersion::new(4, 4),
            })),
        }
    }

    /// Same data, reached through another address.
    pub fn alias(&self, address: &str) -> Self {
        MemoryEndpoint {
            address: EndpointAddress::parse(address),
            ..self.clone()
        }
    }

    pub fn with_default_database(mut self, db: &str) -> Self {
        self.default_db = Some(db.to_string());
        self
    }

    pub fn set_version(&self, version: ServerVersion) {
        lock(&self.server).version = version;
    }
}

impl Endpoint for MemoryEndpoint {
    type Collection = MemoryCollection;

    fn database_names(&self) -> Result<Vec<String>> {
        let server = lock(&self.server);
        Ok(server
            .dbs
            .iter()
            .filter(|(_, colls)| colls.values().any(|c| lock(c).exists))
            .map(|(name, _)| name.clone())
            .collect())
    }

    fn collection_names(&self, db: &str) -> Result<Vec<String>> {
        let server = lock(&self.server);
        Ok(server
            .dbs
            .get(db)
            .map(|colls| {
                colls
                    .iter()
                    .filter(|(_, c)| lock(c).exists)
                    .map(|(name, _)| name.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    fn default_database(&self) -> Option<String> {
        self.default_db.clone()
    }

    fn address(&self) -> Option<EndpointAddress> {
        self.address.clone()
    }

    fn collection(&self, db: &str, coll: &str) -> MemoryCollection {
        let state = lock(&self.server)
            .dbs
            .entry(db.to_string())
            .or_default()
            .entry(coll.to_string())
            .or_default()
            .clone();
        MemoryCollection {
            db: db.to_string(),
            name: coll.to_string(),
            state,
            server: self.server.clone(),
        }
    }
}

/// One in-memory collection.
#[derive(Clone)]
pub struct MemoryCollection {
    db: String,
    name: String,
    state: Arc<Mutex<CollState>>,
    server: Arc<Mutex<ServerState>>,
}

impl MemoryCollection {
    fn state(&self) -> MutexGuard<'_, CollState> {
        lock(&self.state)
    }

    /// Create the collection with given documents.
    pub fn seed(&self, docs: Vec<Document>) {
        let mut state = self.state();
        state.exists = true;
        state.docs.extend(docs);
    }

    /// All documents, ordered by `_id`.
    pub fn docs(&self) -> Vec<Document> {
        let mut docs = self.state().docs.clone();
        docs.sort_by(|a, b| cmp_key(a, b, "_id"));
        docs
    }

    pub fn set_capped(&self, capped: bool) {
        self.state().capped = capped;
    }

    pub fn set_avg_obj_size(&self, size: u64) {
        self.state().avg_obj_size = Some(size);
    }

    pub fn add_index(&self, index: Document) {
        self.state().add_index(index);
    }

    pub fn index_names(&self) -> Vec<String> {
        self.state().index_names()
    }

    pub fn index(&self, name: &str) -> Option<Document> {
        self.state()
            .indexes
            .iter()
            .find(|idx| idx.get_str("name").map(|n| n == name).unwrap_or(false))
            .cloned()
    }

    pub fn storage_engine(&self) -> Option<Document> {
        self.state().storage_engine.clone()
    }

    /// Every opened cursor takes the next value, and fails after yielding that many documents.
    pub fn fail_cursor_after(&self, counts: Vec<usize>) {
        self.state().cursor_failures.extend(counts);
    }

    /// The next `n` cursors can't be opened.
    pub fn fail_cursor_opens(&self, n: u32) {
        self.state().open_failures = n;
    }

    /// The next `n` inserts fail.
    pub fn fail_inserts(&self, n: u32) {
        self.state().insert_failures = n;
    }

    /// The next `n` inserts write their documents, but the reply is lost.
    pub fn lose_insert_replies(&self, n: u32) {
        self.state().lost_insert_replies = n;
    }

    pub fn fail_drop(&self) {
        self.state().drop_fails = true;
    }

    pub fn fail_stats(&self) {
        self.state().stats_fails = true;
    }

    /// Index creation requests time out, `lands` tells if the build finishes on the server anyway.
    pub fn time_out_index_builds(&self, lands: bool) {
        self.state().index_timeout = Some(lands);
    }

    /// Index creation requests are refused.
    pub fn reject_index_builds(&self) {
        self.state().index_rejected = true;
    }

    pub fn find_calls(&self) -> usize {
        self.state().find_calls
    }

    pub fn insert_calls(&self) -> usize {
        self.state().insert_calls
    }

    pub fn drop_calls(&self) -> usize {
        self.state().drop_calls
    }

    pub fn batched_index_requests(&self) -> Vec<Document> {
        self.state().batched_index_requests.clone()
    }

    pub fn legacy_index_requests(&self) -> Vec<Document> {
        self.state().legacy_index_requests.clone()
    }
}

impl CollectionHandle for MemoryCollection {
    fn database_name(&self) -> &str {
        &self.db
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn exists(&self) -> Result<bool> {
        Ok(self.state().exists)
    }

    fn is_capped(&self) -> Result<bool> {
        Ok(self.state().capped)
    }

    fn stats(&self) -> Result<CollectionStats> {
        let state = self.state();
        if state.stats_fails {
            return Err(SyncError::Config(format!("collStats failed for {}", self.name)));
        }
        let avg_obj_size = state.avg_obj_size.unwrap_or_else(|| {
            let total: usize = state
                .docs
                .iter()
                .map(|d| bson::to_vec(d).map(|v| v.len()).unwrap_or(0))
                .sum();
            if state.docs.is_empty() {
                0
            } else {
                (total / state.docs.len()) as u64
            }
        });
        Ok(CollectionStats { avg_obj_size })
    }

    fn count(&self) -> Result<u64> {
        Ok(self.state().docs.len() as u64)
    }

    fn find_sorted(&self, filter: Document, sort_key: &str) -> Result<DocCursor<'_>> {
        let mut state = self.state();
        state.find_calls += 1;
        if state.open_failures > 0 {
            state.open_failures -= 1;
            return Err(SyncError::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "can't open cursor",
            )));
        }
        let mut docs: Vec<Document> = state
            .docs
            .iter()
            .filter(|d| matches(&filter, d))
            .cloned()
            .collect();
        docs.sort_by(|a, b| cmp_key(a, b, sort_key));
        Ok(Box::new(MemoryCursor {
            docs: docs.into_iter(),
            yielded: 0,
            fail_after: state.cursor_failures.pop_front(),
        }))
    }

    fn max_key(&self, key: &str) -> Result<Option<Bson>> {
        Ok(self
            .state()
            .docs
            .iter()
            .filter_map(|d| d.get(key))
            .max_by(|a, b| cmp_bson(a, b))
            .cloned())
    }

    fn insert_many(&self, docs: &[Document]) -> Result<u64> {
        let mut state = self.state();
        state.insert_calls += 1;
        if state.insert_failures > 0 {
            state.insert_failures -= 1;
            return Err(SyncError::Io(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "insert failed",
            )));
        }
        state.exists = true;
        let mut inserted = 0;
        let mut duplicates = 0;
        for doc in docs {
            let duplicated = doc
                .get("_id")
                .map(|id| state.docs.iter().any(|d| d.get("_id") == Some(id)))
                .unwrap_or(false);
            if duplicated {
                duplicates += 1;
            } else {
                state.docs.push(doc.clone());
                inserted += 1;
            }
        }
        if state.lost_insert_replies > 0 {
            state.lost_insert_replies -= 1;
            return Err(SyncError::Io(io::Error::new(
                io::ErrorKind::TimedOut,
                "insert reply lost",
            )));
        }
        if duplicates > 0 {
            return Err(SyncError::DuplicateKeys {
                inserted,
                duplicates,
            });
        }
        Ok(inserted)
    }

    fn drop_collection(&self) -> Result<()> {
        let mut state = self.state();
        state.drop_calls += 1;
        if state.drop_fails {
            return Err(SyncError::Config(format!("can't drop {}", self.name)));
        }
        state.exists = false;
        state.docs.clear();
        state.indexes.clear();
        state.storage_engine = None;
        Ok(())
    }

    fn create(&self, storage_engine: Option<Document>) -> Result<()> {
        let mut state = self.state();
        if state.exists {
            return Err(SyncError::Config(format!("collection {} already exists", self.name)));
        }
        state.exists = true;
        state.storage_engine = storage_engine;
        Ok(())
    }

    fn list_indexes(&self) -> Result<Vec<Document>> {
        let state = self.state();
        if !state.exists {
            return Ok(vec![]);
        }
        let mut indexes = vec![doc! {"v": 2, "key": {"_id": 1}, "name": ID_INDEX_NAME}];
        indexes.extend(state.indexes.iter().cloned());
        Ok(indexes)
    }

    fn create_indexes(&self, indexes: Vec<Document>) -> Result<()> {
        let mut state = self.state();
        state.batched_index_requests.extend(indexes.iter().cloned());
        state.build_indexes(indexes)
    }

    fn create_index_legacy(&self, index: Document) -> Result<()> {
        let mut state = self.state();
        state.legacy_index_requests.push(index.clone());
        state.build_indexes(vec![index])
    }

    fn index_exists(&self, name: &str) -> Result<bool> {
        Ok(self.state().index_names().iter().any(|n| n == name))
    }

    fn server_version(&self) -> Result<ServerVersion> {
        Ok(lock(&self.server).version)
    }
}

struct MemoryCursor {
    docs: std::vec::IntoIter<Document>,
    yielded: usize,
    fail_after: Option<usize>,
}

impl Iterator for MemoryCursor {
    type Item = Result<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.fail_after == Some(self.yielded) {
            self.fail_after = None;
            self.docs = Vec::new().into_iter();
            return Some(Err(SyncError::Io(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "cursor killed",
            ))));
        }
        let doc = self.docs.next()?;
        self.yielded += 1;
        Some(Ok(doc))
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn rank(v: &Bson) -> u8 {
    match v {
        Bson::Null => 0,
        Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) => 1,
        Bson::String(_) => 2,
        Bson::ObjectId(_) => 3,
        _ => 4,
    }
}

fn as_f64(v: &Bson) -> Option<f64> {
    match v {
        Bson::Int32(i) => Some(*i as f64),
        Bson::Int64(i) => Some(*i as f64),
        Bson::Double(f) => Some(*f),
        _ => None,
    }
}

fn cmp_bson(a: &Bson, b: &Bson) -> Ordering {
    match (a, b) {
        (Bson::String(x), Bson::String(y)) => x.cmp(y),
        (Bson::ObjectId(x), Bson::ObjectId(y)) => x.bytes().cmp(&y.bytes()),
        _ => match (as_f64(a), as_f64(b)) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            _ => rank(a).cmp(&rank(b)),
        },
    }
}

fn cmp_key(a: &Document, b: &Document, key: &str) -> Ordering {
    match (a.get(key), b.get(key)) {
        (Some(x), Some(y)) => cmp_bson(x, y),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn matches(filter: &Document, doc: &Document) -> bool {
    filter.iter().all(|(key, cond)| {
        if key == "$and" {
            return match cond {
                Bson::Array(parts) => parts.iter().all(|p| match p {
                    Bson::Document(sub) => matches(sub, doc),
                    _ => false,
                }),
                _ => false,
            };
        }
        let value = doc.get(key);
        match cond {
            Bson::Document(ops) if ops.keys().all(|k| k.starts_with('$')) => {
                ops.iter().all(|(op, operand)| {
                    let ord = match value {
                        Some(v) if rank(v) == rank(operand) => cmp_bson(v, operand),
                        _ => return false,
                    };
                    match op.as_str() {
                        "$gt" => ord == Ordering::Greater,
                        "$gte" => ord != Ordering::Less,
                        "$lt" => ord == Ordering::Less,
                        _ => false,
                    }
                })
            }
            _ => value == Some(cond),
        }
    })
}
