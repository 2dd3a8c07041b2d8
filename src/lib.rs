//! Mongo copy lib, which provides an easily usage api to copy collections from one mongodb to
//! another mongodb.
//!
//! Collections are picked by name, wildcard (`logs_*`) or rename pair (`old=new`), and copied by
//! a pool of workers.  Every collection copy is resumable: documents are read in `_id` order,
//! cursors which die in the middle of a copy are reopened after the last copied key, and a new
//! run with `resume` continues after the greatest key already in target.
//!
//! # MongoCopier example:
//! ```no_run
//! use mongo_copy::{Connection, CopierConfig, MongoCopier};
//!
//! let conf = CopierConfig::from_file("config.toml").unwrap();
//! let job = conf.to_job().unwrap();
//! let source = Connection::new(conf.get_src_url()).unwrap();
//! let target = Connection::new(conf.get_dst_url()).unwrap();
//! let summary = MongoCopier::new(source, target, job).run().unwrap();
//! println!("{} documents copied", summary.documents);
//! ```
#![warn(missing_docs)]

pub mod blocking;
mod config;
mod error;
pub mod wildcard;

/// mongodb internal database for admin.
const ADMIN_DB_NAME: &str = "admin";
/// mongodb internal database, never copied.
const LOCAL_DB: &str = "local";
/// mongodb internal database, never copied.
const SYSTEM_DB: &str = "system";
/// collections whose name contains this marker belong to mongodb itself.
const SYSTEM_COLL_MARKER: &str = "system.";

/// default key documents are ordered and resumed by.
pub const ID_KEY: &str = "_id";

pub use blocking::{Connection, CopyJob, CopyOptions, JobSummary, MongoCopier, Selection};
pub use config::CopierConfig;
pub use error::{Result, SyncError};
