//! The boundary between the copy engine and a database server.
//!
//! The engine only talks to servers through [Endpoint] and [CollectionHandle], which keeps the
//! copy algorithms independent from the driver (and testable without a running server).
use crate::Result;
use bson::{Bson, Document};
use std::fmt;
use std::net::{IpAddr, ToSocketAddrs};

/// Lazily evaluated documents coming out of a server cursor.
pub type DocCursor<'a> = Box<dyn Iterator<Item = Result<Document>> + 'a>;

/// A connected (and authenticated) server.
pub trait Endpoint: Send + Sync {
    /// Handle type for one collection on this server.
    type Collection: CollectionHandle;

    /// list all database names on the server.
    fn database_names(&self) -> Result<Vec<String>>;

    /// list all collection names inside database `db`.
    fn collection_names(&self, db: &str) -> Result<Vec<String>>;

    /// database selected by the connection itself, if any.
    fn default_database(&self) -> Option<String>;

    /// physical address of the server behind this endpoint, `None` if it can't be determined.
    fn address(&self) -> Option<EndpointAddress>;

    /// get a handle to collection `coll` in database `db`.  The collection doesn't need to exist.
    fn collection(&self, db: &str, coll: &str) -> Self::Collection;
}

/// Operations the copy engine performs against one collection.
pub trait CollectionHandle: Send + Sync {
    /// database name of this collection.
    fn database_name(&self) -> &str;

    /// collection name.
    fn name(&self) -> &str;

    /// `db.coll` namespace, mostly for logging.
    fn namespace(&self) -> String {
        format!("{}.{}", self.database_name(), self.name())
    }

    /// true if the collection is created.
    fn exists(&self) -> Result<bool>;

    /// true for capped collections, which can't be copied.
    fn is_capped(&self) -> Result<bool>;

    /// statistics from `collStats`.
    fn stats(&self) -> Result<CollectionStats>;

    /// number of documents, collection metadata based counting is fine.
    fn count(&self) -> Result<u64>;

    /// open a cursor over documents matching `filter`, sorted ascending by `sort_key`.
    fn find_sorted(&self, filter: Document, sort_key: &str) -> Result<DocCursor<'_>>;

    /// the greatest value of `key` inside the collection.
    fn max_key(&self, key: &str) -> Result<Option<Bson>>;

    /// insert `docs` unordered, returns how many documents were inserted.
    ///
    /// When the only failures are documents whose key already exists, the others are still
    /// inserted and [SyncError::DuplicateKeys](crate::SyncError::DuplicateKeys) is returned.
    fn insert_many(&self, docs: &[Document]) -> Result<u64>;

    /// drop the collection with its indexes, a missing collection is fine.
    fn drop_collection(&self) -> Result<()>;

    /// create the collection, with optional storage engine options.
    fn create(&self, storage_engine: Option<Document>) -> Result<()>;

    /// raw index definitions, as reported by the server.
    fn list_indexes(&self) -> Result<Vec<Document>>;

    /// create several indexes in one request.
    fn create_indexes(&self, indexes: Vec<Document>) -> Result<()>;

    /// create one index using the mechanism of servers which can't create indexes in batch.
    fn create_index_legacy(&self, index: Document) -> Result<()>;

    /// true if an index named `name` is on the collection.
    fn index_exists(&self, name: &str) -> Result<bool>;

    /// version of the server holding the collection.
    fn server_version(&self) -> Result<ServerVersion>;
}

/// Collection statistics used to tune the copy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CollectionStats {
    /// average document size in bytes, 0 when unknown (e.g. empty collection).
    pub avg_obj_size: u64,
}

/// Server version, only major and minor parts matter to us.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ServerVersion {
    /// major version.
    pub major: u32,
    /// minor version.
    pub minor: u32,
}

impl ServerVersion {
    /// make a `major.minor` version.
    pub fn new(major: u32, minor: u32) -> Self {
        ServerVersion { major, minor }
    }

    /// `createIndexes` command is available since 2.6.
    pub fn supports_create_indexes(&self) -> bool {
        *self >= ServerVersion::new(2, 6)
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// mongodb default port.
pub const DEFAULT_PORT: u16 = 27017;

/// Physical server address, used to detect when source and target are the same server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointAddress {
    /// host name or ip address.
    pub host: String,
    /// tcp port.
    pub port: u16,
}

impl EndpointAddress {
    /// make an address out of host and port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        EndpointAddress {
            host: host.into(),
            port,
        }
    }

    /// Parse `host[:port]`, port defaults to 27017.
    pub fn parse(addr: &str) -> Option<Self> {
        let addr = addr.trim();
        if addr.is_empty() {
            return None;
        }
        // ipv6 literal: [::1]:27017
        if let Some(rest) = addr.strip_prefix('[') {
            let (host, tail) = rest.split_once(']')?;
            let port = match tail.strip_prefix(':') {
                Some(p) => p.parse().ok()?,
                None => DEFAULT_PORT,
            };
            return Some(EndpointAddress::new(host, port));
        }
        match addr.rsplit_once(':') {
            Some((host, port)) => Some(EndpointAddress::new(host, port.parse().ok()?)),
            None => Some(EndpointAddress::new(addr, DEFAULT_PORT)),
        }
    }

    fn resolve_ip(&self) -> Option<IpAddr> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .ok()?
            .next()
            .map(|sock| sock.ip())
    }

    /// Compare by resolved ip address and port, fall back to host name comparison when a
    /// name can't be resolved.
    pub fn same_server(&self, other: &EndpointAddress) -> bool {
        if self.port != other.port {
            return false;
        }
        if self.host.eq_ignore_ascii_case(&other.host) {
            return true;
        }
        match (self.resolve_ip(), other.resolve_ip()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for EndpointAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
