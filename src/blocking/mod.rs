//! provide mongo copy blocking apis.
mod connection;
pub mod copier;
pub mod endpoint;

pub use connection::{Connection, ConnectionUrl, MongoCollection};
pub use copier::{CopyJob, CopyOptions, JobSummary, MongoCopier, Selection};
pub use endpoint::{CollectionHandle, Endpoint};
