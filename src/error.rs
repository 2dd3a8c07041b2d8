use bson::document::ValueAccessError;
use mongodb::error::{Error as MongoError, ErrorKind};
use std::result::Result as StdResult;
use thiserror::Error;

/// Errors of mongo_copy.
#[derive(Error, Debug)]
pub enum SyncError {
    /// error returned by mongodb driver.
    #[error("Mongodb connection error: {0}")]
    MongoError(#[from] MongoError),
    /// the user can't run copy on the server behind `uri`.
    #[error("Check permission for {uri:?} failed, detailed: {detail:?}")]
    PermissionError {
        /// server url, password hidden.
        uri: String,
        /// original driver error.
        detail: MongoError,
    },
    /// a server reply doesn't look like expected.
    #[error("Bson value access error: {0}")]
    BsonError(#[from] ValueAccessError),
    /// io error, includes read of configuration files.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// invalid configuration value.
    #[error("Invalid configuration: {0}")]
    Config(String),
    /// configuration file is not valid toml.
    #[error("Configuration file error: {0}")]
    ConfigFile(#[from] toml::de::Error),
    /// target databases are given, but not one per source database.
    #[error("Different number of source ({source_count}) and target ({target_count}) databases")]
    DatabaseCountMismatch {
        /// number of source databases.
        source_count: usize,
        /// number of target databases.
        target_count: usize,
    },
    /// worker threads can't be started.
    #[error("Worker pool error: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
    /// task added after the scheduler stopped.
    #[error("Task scheduler is already closed")]
    SchedulerClosed,
    /// some documents of an insert were rejected because their key already exists.
    #[error("{duplicates} documents of the batch already exist, {inserted} inserted")]
    DuplicateKeys {
        /// documents inserted anyway.
        inserted: u64,
        /// rejected documents.
        duplicates: usize,
    },
}

impl SyncError {
    /// Returns true for I/O or socket level failures, which usually mean that a long running
    /// server operation is still going on after the client gave up waiting for it.
    pub fn is_timeout(&self) -> bool {
        match self {
            SyncError::MongoError(e) => matches!(e.kind.as_ref(), ErrorKind::Io(_)),
            SyncError::Io(_) => true,
            _ => false,
        }
    }
}

/// Result type of mongo_copy.
pub type Result<T> = StdResult<T, SyncError>;
