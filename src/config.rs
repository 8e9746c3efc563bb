//! Repository configuration, persisted as `.chronolog/config.json`.
//!
//! Mirrors fields into a `Default` impl so a freshly initialized repository never needs a
//! config file present on disk; `RepoConfig::load` falls back to defaults for any field the
//! file omits via `serde(default)`.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::internal::object::store::CompressionAlgorithm;

/// Watcher & debounce tunables (component D).
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct WatchConfig {
    /// Trailing-edge debounce window in milliseconds. Default 500ms per spec.
    pub debounce_ms: u64,
    /// Bounded in-memory queue size between watcher and ingest worker.
    pub queue_capacity: usize,
    /// Grace period (ms) the daemon waits for the queue to drain on stop.
    pub stop_grace_period_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 500,
            queue_capacity: 1024,
            stop_grace_period_ms: 5_000,
        }
    }
}

/// Ingest tunables (component E).
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct IngestConfig {
    /// Bytes scanned from the start of a file to decide if it's binary (null-byte heuristic).
    pub binary_detection_prefix: usize,
    /// Whether binary files are rejected (`true`) or stored whole (`false`).
    pub forbid_binary: bool,
    /// Bounded retries for a read that observes a mid-read size change.
    pub read_retry_attempts: u32,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            binary_detection_prefix: 8 * 1024,
            forbid_binary: false,
            read_retry_attempts: 5,
        }
    }
}

/// Object store tunables (component A).
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct StoreConfig {
    pub compression: CompressionAlgorithm,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            compression: CompressionAlgorithm::Zlib,
        }
    }
}

/// Search index tunables (component H).
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct SearchConfig {
    /// Default maximum results returned by a query with no explicit limit.
    pub default_max_results: usize,
    /// Case sensitivity default (queries may override per-call).
    pub case_sensitive: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_max_results: 100,
            case_sensitive: false,
        }
    }
}

/// Diff/merge tunables (components G and I).
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct DiffConfig {
    pub context_lines: usize,
    /// Fallback encoding label (as understood by `encoding_rs`) used when a blob isn't valid
    /// UTF-8; lossily decoded rather than refused.
    pub fallback_encoding: String,
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self {
            context_lines: 3,
            fallback_encoding: "windows-1252".to_string(),
        }
    }
}

/// Top-level repository configuration, `.chronolog/config.json`.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct RepoConfig {
    pub watch: WatchConfig,
    pub ingest: IngestConfig,
    pub store: StoreConfig,
    pub search: SearchConfig,
    pub diff: DiffConfig,
}

impl RepoConfig {
    /// Load configuration from `<root>/.chronolog/config.json`, falling back to defaults for
    /// any field missing from the file (or the whole file, if absent).
    pub fn load(config_path: &PathBuf) -> crate::errors::Result<RepoConfig> {
        if !config_path.exists() {
            return Ok(RepoConfig::default());
        }
        let bytes = std::fs::read(config_path)?;
        let cfg = serde_json::from_slice(&bytes)?;
        Ok(cfg)
    }

    pub fn save(&self, config_path: &PathBuf) -> crate::errors::Result<()> {
        let bytes = serde_json::to_vec_pretty(self)?;
        std::fs::write(config_path, bytes)?;
        Ok(())
    }
}
