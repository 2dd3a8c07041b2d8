//! Collection creation options.
//!
//! These are wiredTiger settings which can only be given when a collection is created, they are
//! rendered into a `storageEngine: { wiredTiger: { configString } }` document.
use crate::{Result, SyncError};
use bson::{doc, Document};
use std::str::FromStr;

/// Block compressor of a new collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockCompressor {
    /// no compression.
    None,
    /// `zlib`, better ratio, more cpu.
    Zlib,
    /// `snappy`, the server default.
    Snappy,
}

impl BlockCompressor {
    fn as_str(&self) -> &'static str {
        match self {
            BlockCompressor::None => "none",
            BlockCompressor::Zlib => "zlib",
            BlockCompressor::Snappy => "snappy",
        }
    }
}

impl FromStr for BlockCompressor {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "" | "none" => Ok(BlockCompressor::None),
            "zlib" => Ok(BlockCompressor::Zlib),
            "snappy" => Ok(BlockCompressor::Snappy),
            other => Err(SyncError::Config(format!(
                "unsupported block compressor {:?}, expect one of none, zlib, snappy",
                other
            ))),
        }
    }
}

/// Page size presets, scaling the server defaults
/// (`allocation_size=4KB,internal_page_max=4KB,leaf_page_max=32KB`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationPreset {
    /// `2x`: twice the default sizes, leaf pages 64KB.
    X2,
    /// `4x`: four times the default sizes, leaf pages 64KB.
    X4,
    /// `8x`: eight times the default sizes, leaf pages 128KB.
    X8,
}

impl AllocationPreset {
    fn settings(&self) -> [&'static str; 3] {
        match self {
            AllocationPreset::X2 => [
                "allocation_size=8KB",
                "leaf_page_max=64KB",
                "internal_page_max=8KB",
            ],
            AllocationPreset::X4 => [
                "allocation_size=16KB",
                "leaf_page_max=64KB",
                "internal_page_max=16KB",
            ],
            AllocationPreset::X8 => [
                "allocation_size=32KB",
                "leaf_page_max=128KB",
                "internal_page_max=32KB",
            ],
        }
    }
}

impl FromStr for AllocationPreset {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "2x" => Ok(AllocationPreset::X2),
            "4x" => Ok(AllocationPreset::X4),
            "8x" => Ok(AllocationPreset::X8),
            other => Err(SyncError::Config(format!(
                "unsupported allocation preset {:?}, expect one of 2x, 4x, 8x",
                other
            ))),
        }
    }
}

/// Storage options applied when the copy creates a target collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StorageOptions {
    /// raw wiredTiger config entries, comma separated.
    pub config_string: Option<String>,
    /// overrides `block_compressor` of `config_string`.
    pub block_compressor: Option<BlockCompressor>,
    /// overrides page sizes of `config_string`.
    pub allocation: Option<AllocationPreset>,
}

impl StorageOptions {
    /// Returns true if any creation option is requested.
    pub fn is_requested(&self) -> bool {
        !self.config_entries().is_empty()
    }

    /// Build the final list of wiredTiger config entries.
    ///
    /// Named options win over the same keys in `config_string`.
    pub fn config_entries(&self) -> Vec<String> {
        let mut entries: Vec<String> = self
            .config_string
            .as_deref()
            .unwrap_or("")
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();

        if let Some(compressor) = self.block_compressor {
            remove_keys(&mut entries, &["block_compressor="]);
            entries.push(format!("block_compressor={}", compressor.as_str()));
        }

        if let Some(preset) = self.allocation {
            remove_keys(
                &mut entries,
                &["allocation_size=", "leaf_page_max=", "internal_page_max="],
            );
            entries.extend(preset.settings().iter().map(|s| s.to_string()));
        }
        entries
    }

    /// `storageEngine` document for collection creation, `None` if nothing is requested.
    pub fn storage_engine(&self) -> Option<Document> {
        let entries = self.config_entries();
        if entries.is_empty() {
            return None;
        }
        Some(doc! {
            "wiredTiger": { "configString": entries.join(",") }
        })
    }
}

fn remove_keys(entries: &mut Vec<String>, prefixes: &[&str]) {
    entries.retain(|entry| {
        let entry = entry.to_lowercase();
        !prefixes.iter().any(|p| entry.starts_with(p))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_compressor() {
        assert_eq!("ZLIB".parse::<BlockCompressor>().unwrap(), BlockCompressor::Zlib);
        assert_eq!("".parse::<BlockCompressor>().unwrap(), BlockCompressor::None);
        assert_eq!("none".parse::<BlockCompressor>().unwrap(), BlockCompressor::None);
        assert!("zstd".parse::<BlockCompressor>().is_err());
    }

    #[test]
    fn test_parse_allocation() {
        assert_eq!("4x".parse::<AllocationPreset>().unwrap(), AllocationPreset::X4);
        assert!("3x".parse::<AllocationPreset>().is_err());
    }

    #[test]
    fn test_nothing_requested() {
        let opts = StorageOptions::default();
        assert!(!opts.is_requested());
        assert_eq!(opts.storage_engine(), None);

        let blank = StorageOptions {
            config_string: Some(" , ".to_string()),
            ..Default::default()
        };
        assert!(!blank.is_requested());
    }

    #[test]
    fn test_named_options_override_config_string() {
        let opts = StorageOptions {
            config_string: Some("block_compressor=snappy, leaf_page_max=16KB, os_cache_max=1GB".to_string()),
            block_compressor: Some(BlockCompressor::Zlib),
            allocation: Some(AllocationPreset::X2),
        };
        assert_eq!(
            opts.config_entries(),
            vec![
                "os_cache_max=1GB",
                "block_compressor=zlib",
                "allocation_size=8KB",
                "leaf_page_max=64KB",
                "internal_page_max=8KB",
            ]
        );
    }

    #[test]
    fn test_storage_engine_document() {
        let opts = StorageOptions {
            allocation: Some(AllocationPreset::X8),
            ..Default::default()
        };
        assert_eq!(
            opts.storage_engine(),
            Some(doc! {"wiredTiger": {"configString": "allocation_size=32KB,leaf_page_max=128KB,internal_page_max=32KB"}})
        );
    }
}
