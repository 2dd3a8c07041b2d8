use super::copier::bson_helper;
use super::endpoint::{
    CollectionHandle, CollectionStats, DocCursor, Endpoint, EndpointAddress, ServerVersion,
};
use crate::error::{Result, SyncError};
use crate::ADMIN_DB_NAME;
use bson::{doc, Bson, Document};
use mongodb::error::{Error as MongoError, ErrorKind};
use mongodb::options::{
    CreateCollectionOptions, FindOneOptions, FindOptions, InsertManyOptions,
};
use mongodb::sync::{Client, Collection, Database};
use tracing::debug;

/// duplicate key error code.
const DUPLICATE_KEY_CODE: i32 = 11000;
/// minimum connect / idle timeout we accept on connection urls, in milliseconds.
const MIN_TIMEOUT_MS: u64 = 30_000;

/// A connected mongodb server.
#[derive(Clone)]
pub struct Connection {
    client: Client,
    url: ConnectionUrl,
}

impl Connection {
    /// connect to the server behind `url`.
    ///
    /// The url may omit the `mongodb://` scheme, and gets relaxed connect/idle timeouts unless it
    /// sets its own.
    pub fn new(url: &str) -> Result<Connection> {
        let url = ConnectionUrl::parse(url)?;
        let client = Client::with_uri_str(url.as_str())?;
        Ok(Connection { client, url })
    }

    /// Check if we have enough permissions to run copy progress.
    pub fn check_permissions(&self) -> Result<()> {
        let admin = self.client.database(ADMIN_DB_NAME);
        let checked = admin
            .run_command(doc! {"ping": 1}, None)
            .and_then(|_| self.client.list_database_names(None, None));
        match checked {
            Ok(_) => Ok(()),
            Err(detail) => Err(SyncError::PermissionError {
                uri: self.url.redacted(),
                detail,
            }),
        }
    }

    /// get underlying mongodb client.
    pub fn get_client(&self) -> Client {
        self.client.clone()
    }

    /// get connection url, with password hidden.
    pub fn get_url(&self) -> String {
        self.url.redacted()
    }
}

impl Endpoint for Connection {
    type Collection = MongoCollection;

    fn database_names(&self) -> Result<Vec<String>> {
        Ok(self.client.list_database_names(None, None)?)
    }

    fn collection_names(&self, db: &str) -> Result<Vec<String>> {
        Ok(self.client.database(db).list_collection_names(None)?)
    }

    fn default_database(&self) -> Option<String> {
        self.url.default_database.clone()
    }

    fn address(&self) -> Option<EndpointAddress> {
        // ask the server who the primary is, it's the member our writes go to.
        let reply = self
            .client
            .database(ADMIN_DB_NAME)
            .run_command(doc! {"isMaster": 1}, None);
        let reported = match reply {
            Ok(reply) => reply
                .get_str("primary")
                .or_else(|_| reply.get_str("me"))
                .ok()
                .and_then(EndpointAddress::parse),
            Err(e) => {
                debug!(?e, "Can't get server address from isMaster, use connection url instead");
                None
            }
        };
        reported.or_else(|| self.url.hosts.first().cloned())
    }

    fn collection(&self, db: &str, coll: &str) -> MongoCollection {
        MongoCollection::new(self.client.database(db), coll)
    }
}

/// One mongodb collection.
#[derive(Clone)]
pub struct MongoCollection {
    db: Database,
    name: String,
}

impl MongoCollection {
    /// handle to collection `name` inside `db`.
    pub fn new(db: Database, name: &str) -> Self {
        MongoCollection {
            db,
            name: name.to_string(),
        }
    }

    fn inner(&self) -> Collection<Document> {
        self.db.collection(&self.name)
    }
}

impl CollectionHandle for MongoCollection {
    fn database_name(&self) -> &str {
        self.db.name()
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn exists(&self) -> Result<bool> {
        let names = self.db.list_collection_names(doc! {"name": self.name.as_str()})?;
        Ok(!names.is_empty())
    }

    fn is_capped(&self) -> Result<bool> {
        let mut specs = self.db.list_collections(doc! {"name": self.name.as_str()}, None)?;
        match specs.next() {
            Some(spec) => Ok(spec?.options.capped.unwrap_or(false)),
            None => Ok(false),
        }
    }

    fn stats(&self) -> Result<CollectionStats> {
        let stats = self.db.run_command(doc! {"collStats": self.name.as_str()}, None)?;
        // `avgObjSize` is missing for empty collections.
        let avg_obj_size = bson_helper::get_number(&stats, "avgObjSize").unwrap_or(0.0);
        Ok(CollectionStats {
            avg_obj_size: avg_obj_size as u64,
        })
    }

    fn count(&self) -> Result<u64> {
        Ok(self.inner().estimated_document_count(None)?)
    }

    fn find_sorted(&self, filter: Document, sort_key: &str) -> Result<DocCursor<'_>> {
        let cursor = self.inner().find(
            filter,
            FindOptions::builder().sort(doc! {sort_key: 1}).build(),
        )?;
        Ok(Box::new(cursor.map(|doc| doc.map_err(SyncError::from))))
    }

    fn max_key(&self, key: &str) -> Result<Option<Bson>> {
        let last = self.inner().find_one(
            None,
            FindOneOptions::builder()
                .sort(doc! {key: -1})
                .projection(doc! {key: 1})
                .build(),
        )?;
        Ok(last.and_then(|d| d.get(key).cloned()))
    }

    fn insert_many(&self, docs: &[Document]) -> Result<u64> {
        let result = self.inner().insert_many(
            docs.iter(),
            InsertManyOptions::builder().ordered(false).build(),
        );
        match result {
            Ok(inserted) => Ok(inserted.inserted_ids.len() as u64),
            Err(e) => match duplicate_keys(&e) {
                // unordered insert: every document without a write error went in.
                Some(duplicates) => Err(SyncError::DuplicateKeys {
                    inserted: docs.len().saturating_sub(duplicates) as u64,
                    duplicates,
                }),
                None => Err(SyncError::from(e)),
            },
        }
    }

    fn drop_collection(&self) -> Result<()> {
        Ok(self.inner().drop(None)?)
    }

    fn create(&self, storage_engine: Option<Document>) -> Result<()> {
        self.db.create_collection(
            &self.name,
            CreateCollectionOptions::builder()
                .storage_engine(storage_engine)
                .build(),
        )?;
        Ok(())
    }

    fn list_indexes(&self) -> Result<Vec<Document>> {
        // a collection can hold at most 64 indexes, they always fit in the first batch.
        let reply = self.db.run_command(doc! {"listIndexes": self.name.as_str()}, None)?;
        let batch = reply.get_document("cursor")?.get_array("firstBatch")?;
        Ok(batch
            .iter()
            .filter_map(|idx| idx.as_document().cloned())
            .collect())
    }

    fn create_indexes(&self, indexes: Vec<Document>) -> Result<()> {
        self.db.run_command(
            doc! {
                "createIndexes": self.name.as_str(),
                "indexes": indexes,
            },
            None,
        )?;
        Ok(())
    }

    fn create_index_legacy(&self, mut index: Document) -> Result<()> {
        index.insert("ns", self.namespace());
        self.db
            .collection::<Document>("system.indexes")
            .insert_one(index, None)?;
        Ok(())
    }

    fn index_exists(&self, name: &str) -> Result<bool> {
        Ok(self
            .list_indexes()?
            .iter()
            .any(|idx| idx.get_str("name").map(|n| n == name).unwrap_or(false)))
    }

    fn server_version(&self) -> Result<ServerVersion> {
        let info = self.db.run_command(doc! {"buildInfo": 1}, None)?;
        let parts = info.get_array("versionArray")?;
        let part = |i: usize| -> u32 {
            match parts.get(i) {
                Some(Bson::Int32(v)) => *v as u32,
                Some(Bson::Int64(v)) => *v as u32,
                Some(Bson::Double(v)) => *v as u32,
                _ => 0,
            }
        };
        Ok(ServerVersion::new(part(0), part(1)))
    }
}

/// number of rejected documents, when all of them are rejected for duplicate keys.
fn duplicate_keys(error: &MongoError) -> Option<usize> {
    match error.kind.as_ref() {
        ErrorKind::BulkWrite(failure) if failure.write_concern_error.is_none() => {
            let errors = failure.write_errors.as_ref()?;
            if !errors.is_empty() && errors.iter().all(|e| e.code == DUPLICATE_KEY_CODE) {
                Some(errors.len())
            } else {
                None
            }
        }
        _ => None,
    }
}

/// A normalized mongodb connection url.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionUrl {
    url: String,
    hosts: Vec<EndpointAddress>,
    default_database: Option<String>,
}

impl ConnectionUrl {
    /// Parse `url`, and make sure it has a scheme and reasonable timeouts.
    pub fn parse(url: &str) -> Result<Self> {
        let url = url.trim();
        if url.is_empty() {
            return Err(SyncError::Config("empty mongodb connection url".to_string()));
        }
        let mut url = if url.contains("://") {
            url.to_string()
        } else {
            format!("mongodb://{}", url)
        };
        let (_, rest) = url
            .split_once("://")
            .ok_or_else(|| SyncError::Config(format!("invalid mongodb url {:?}", url)))?;

        let (location, query) = match rest.split_once('?') {
            Some((l, q)) => (l, Some(q)),
            None => (rest, None),
        };
        let (authority, path) = match location.split_once('/') {
            Some((a, p)) => (a, p),
            None => (location, ""),
        };
        let host_list = match authority.rsplit_once('@') {
            Some((_, hosts)) => hosts,
            None => authority,
        };
        let hosts: Vec<EndpointAddress> = host_list
            .split(',')
            .filter_map(EndpointAddress::parse)
            .collect();
        if hosts.is_empty() {
            return Err(SyncError::Config(format!("no host in mongodb url {:?}", url)));
        }
        let default_database = if path.is_empty() {
            None
        } else {
            Some(path.to_string())
        };

        let mut missing = vec![];
        for option in ["connectTimeoutMS", "maxIdleTimeMS"] {
            let already_set = query
                .map(|q| {
                    q.split('&').any(|kv| {
                        kv.split('=')
                            .next()
                            .map(|k| k.eq_ignore_ascii_case(option))
                            .unwrap_or(false)
                    })
                })
                .unwrap_or(false);
            if !already_set {
                missing.push(format!("{}={}", option, MIN_TIMEOUT_MS));
            }
        }
        if !missing.is_empty() {
            let separator = match query {
                None if path.is_empty() && !location.ends_with('/') => "/?",
                None => "?",
                Some("") => "",
                Some(_) => "&",
            };
            url = format!("{}{}{}", url, separator, missing.join("&"));
        }

        Ok(ConnectionUrl {
            url,
            hosts,
            default_database,
        })
    }

    /// full url given to the driver.
    pub fn as_str(&self) -> &str {
        &self.url
    }

    /// hosts listed in the url.
    pub fn hosts(&self) -> &[EndpointAddress] {
        &self.hosts
    }

    /// database in url path, if any.
    pub fn default_database(&self) -> Option<&str> {
        self.default_database.as_deref()
    }

    /// url with password replaced, safe to be logged.
    pub fn redacted(&self) -> String {
        match self.url.split_once("://") {
            Some((scheme, rest)) => match rest.split_once('@') {
                Some((credentials, tail)) if !credentials.contains('/') => {
                    let user = credentials.split(':').next().unwrap_or("");
                    format!("{}://{}:***@{}", scheme, user, tail)
                }
                _ => self.url.clone(),
            },
            None => self.url.clone(),
        }
    }
}
