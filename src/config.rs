//! mongo_copy configuration, express in toml.
//!
//! Basic configuration file example:
//! ```toml
//! [src]
//! url = "mongodb://localhost/shop"
//!
//! [dst]
//! url = "mongodb://localhost:27018"
//!
//! [copy]
//! collections = ["users", "orders_*", "items=items_2021"]
//! threads = 4
//! drop_target_first = true
//!
//! [copy.storage]
//! block_compressor = "zlib"
//! ```
use crate::blocking::copier::{
    AllocationPreset, BlockCompressor, CopyJob, CopyOptions, Selection, StorageOptions,
};
use crate::error::{Result, SyncError};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Global mongo copier configuration.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct CopierConfig {
    src: Src,
    dst: Dst,
    #[serde(default)]
    copy: DetailCopyConf,
}

impl CopierConfig {
    /// load configuration from a toml file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        content.parse()
    }

    /// get source mongodb url.
    pub fn get_src_url(&self) -> &str {
        &self.src.url
    }

    /// get destination mongodb url.
    pub fn get_dst_url(&self) -> &str {
        &self.dst.url
    }

    /// get detail copy configuration.
    pub fn get_copy(&self) -> &DetailCopyConf {
        &self.copy
    }

    /// override number of copy threads.
    pub fn set_threads(&mut self, threads: usize) {
        self.copy.threads = threads;
    }

    /// validate configuration and build the copy job out of it.
    pub fn to_job(&self) -> Result<CopyJob> {
        if self.src.url.trim().is_empty() {
            return Err(SyncError::Config("source url is empty".to_string()));
        }
        if self.dst.url.trim().is_empty() {
            return Err(SyncError::Config("target url is empty".to_string()));
        }
        CopyJob::try_from(&self.copy)
    }
}

impl std::str::FromStr for CopierConfig {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }
}

/// Source database configuration.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Src {
    /// Source database url, begins with 'mongodb://' (may be omitted).
    url: String,
}

/// Target database configuration.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Dst {
    /// Target database url.
    url: String,
}

/// Detail copy config, it indicates what to copy and how.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct DetailCopyConf {
    /// source databases, names, wildcards or `source=target` pairs.  Empty means the database
    /// in source url.
    #[serde(default)]
    databases: Vec<String>,
    /// target databases, paired with `databases` by position.
    #[serde(default)]
    target_databases: Vec<String>,
    /// collections, names, wildcards or `source=target` pairs.  Empty means all.
    #[serde(default)]
    collections: Vec<String>,
    #[serde(default)]
    merge_into: Option<String>,
    #[serde(default = "default_threads")]
    threads: usize,
    #[serde(default = "default_batch_size")]
    batch_size: i32,
    #[serde(default = "default_true")]
    copy_indexes: bool,
    #[serde(default)]
    drop_target_first: bool,
    #[serde(default)]
    resume: bool,
    #[serde(default)]
    skip_existing: bool,
    #[serde(default)]
    if_smaller: bool,
    #[serde(default)]
    indexes_before: bool,
    #[serde(default)]
    indexes_background: bool,
    #[serde(default)]
    indexes_sparse: bool,
    /// pause after every batch, in milliseconds, negative means no pause.
    #[serde(default = "default_lazy_wait")]
    lazy_wait_millis: i64,
    #[serde(default)]
    storage: StorageConf,
}

impl Default for DetailCopyConf {
    fn default() -> Self {
        DetailCopyConf {
            databases: vec![],
            target_databases: vec![],
            collections: vec![],
            merge_into: None,
            threads: default_threads(),
            batch_size: default_batch_size(),
            copy_indexes: default_true(),
            drop_target_first: false,
            resume: false,
            skip_existing: false,
            if_smaller: false,
            indexes_before: false,
            indexes_background: false,
            indexes_sparse: false,
            lazy_wait_millis: default_lazy_wait(),
            storage: StorageConf::default(),
        }
    }
}

impl DetailCopyConf {
    /// get number of collections copied concurrently.
    pub fn get_threads(&self) -> usize {
        self.threads
    }
}

/// Storage options for collections created by the copy.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct StorageConf {
    block_compressor: Option<String>,
    allocation: Option<String>,
    config_string: Option<String>,
}

impl TryFrom<&StorageConf> for StorageOptions {
    type Error = SyncError;

    fn try_from(conf: &StorageConf) -> Result<Self> {
        Ok(StorageOptions {
            config_string: conf.config_string.clone(),
            block_compressor: conf
                .block_compressor
                .as_deref()
                .map(str::parse::<BlockCompressor>)
                .transpose()?,
            allocation: conf
                .allocation
                .as_deref()
                .map(str::parse::<AllocationPreset>)
                .transpose()?,
        })
    }
}

impl TryFrom<&DetailCopyConf> for CopyJob {
    type Error = SyncError;

    fn try_from(conf: &DetailCopyConf) -> Result<Self> {
        if !conf.target_databases.is_empty()
            && !conf.databases.is_empty()
            && conf.databases.len() != conf.target_databases.len()
        {
            return Err(SyncError::DatabaseCountMismatch {
                source_count: conf.databases.len(),
                target_count: conf.target_databases.len(),
            });
        }
        let merge_into = conf
            .merge_into
            .as_ref()
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty());

        Ok(CopyJob {
            selection: Selection {
                source_databases: conf.databases.clone(),
                target_databases: conf.target_databases.clone(),
                collections: conf.collections.clone(),
                merge_into,
            },
            threads: conf.threads.max(1),
            options: CopyOptions {
                batch_size: conf.batch_size,
                copy_indexes: conf.copy_indexes,
                drop_target_first: conf.drop_target_first,
                resume: conf.resume,
                skip_existing: conf.skip_existing,
                if_smaller: conf.if_smaller,
                indexes_before: conf.indexes_before,
                indexes_background: conf.indexes_background,
                indexes_sparse: conf.indexes_sparse,
                lazy_wait: u64::try_from(conf.lazy_wait_millis)
                    .ok()
                    .map(Duration::from_millis),
                storage: StorageOptions::try_from(&conf.storage)?,
                ..Default::default()
            },
        })
    }
}

fn default_threads() -> usize {
    1
}

fn default_batch_size() -> i32 {
    -1
}

fn default_true() -> bool {
    true
}

fn default_lazy_wait() -> i64 {
    -1
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [src]
        url = "mongodb://localhost:27017/shop"
        [dst]
        url = "localhost:27018"
    "#;

    #[test]
    fn test_minimal_config_defaults() {
        let conf: CopierConfig = MINIMAL.parse().unwrap();
        assert_eq!(conf.get_src_url(), "mongodb://localhost:27017/shop");
        assert_eq!(conf.get_dst_url(), "localhost:27018");

        let job = conf.to_job().unwrap();
        assert_eq!(job.threads, 1);
        assert_eq!(job.selection, Selection::default());
        assert_eq!(job.options, CopyOptions::default());
    }

    #[test]
    fn test_full_config() {
        let conf: CopierConfig = r#"
            [src]
            url = "mongodb://localhost:27017"
            [dst]
            url = "mongodb://localhost:27018"
            [copy]
            databases = ["a", "b"]
            target_databases = ["x", "y"]
            collections = ["users", "logs_*"]
            threads = 4
            batch_size = 500
            copy_indexes = false
            resume = true
            lazy_wait_millis = 250
            [copy.storage]
            block_compressor = "snappy"
            allocation = "4x"
        "#
        .parse()
        .unwrap();

        let job = conf.to_job().unwrap();
        assert_eq!(job.threads, 4);
        assert_eq!(job.selection.target_databases, vec!["x", "y"]);
        assert_eq!(job.selection.collections, vec!["users", "logs_*"]);
        assert_eq!(job.options.batch_size, 500);
        assert!(!job.options.copy_indexes);
        assert!(job.options.resume);
        assert_eq!(job.options.lazy_wait, Some(Duration::from_millis(250)));
        assert_eq!(job.options.storage.block_compressor, Some(BlockCompressor::Snappy));
        assert_eq!(job.options.storage.allocation, Some(AllocationPreset::X4));
    }

    #[test]
    fn test_invalid_values() {
        let bad_compressor = format!("{}\n[copy.storage]\nblock_compressor = \"lz4\"\n", MINIMAL);
        let conf: CopierConfig = bad_compressor.parse().unwrap();
        assert!(matches!(conf.to_job(), Err(SyncError::Config(_))));

        let mismatch = format!(
            "{}\n[copy]\ndatabases = [\"a\"]\ntarget_databases = [\"x\", \"y\"]\n",
            MINIMAL
        );
        let conf: CopierConfig = mismatch.parse().unwrap();
        assert!(matches!(
            conf.to_job(),
            Err(SyncError::DatabaseCountMismatch { .. })
        ));

        let empty_url = "[src]\nurl = \"\"\n[dst]\nurl = \"localhost\"\n";
        let conf: CopierConfig = empty_url.parse().unwrap();
        assert!(matches!(conf.to_job(), Err(SyncError::Config(_))));

        assert!(matches!(
            "[src]\n".parse::<CopierConfig>(),
            Err(SyncError::ConfigFile(_))
        ));
    }

    #[test]
    fn test_blank_merge_target_is_ignored() {
        let conf: CopierConfig = format!("{}\n[copy]\nmerge_into = \"  \"\n", MINIMAL)
            .parse()
            .unwrap();
        assert_eq!(conf.to_job().unwrap().selection.merge_into, None);
    }

    #[test]
    fn test_lazy_wait_millis() {
        let lazy_wait = |millis: i64| {
            let conf: CopierConfig = format!("{}\n[copy]\nlazy_wait_millis = {}\n", MINIMAL, millis)
                .parse()
                .unwrap();
            conf.to_job().unwrap().options.lazy_wait
        };
        assert_eq!(lazy_wait(-1), None);
        assert_eq!(lazy_wait(-20), None);
        assert_eq!(lazy_wait(0), Some(Duration::ZERO));
        assert_eq!(lazy_wait(15), Some(Duration::from_millis(15)));
    }

    #[test]
    fn test_threads_override() {
        let mut conf: CopierConfig = MINIMAL.parse().unwrap();
        conf.set_threads(8);
        assert_eq!(conf.get_copy().get_threads(), 8);
        assert_eq!(conf.to_job().unwrap().threads, 8);
    }
}
