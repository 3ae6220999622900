//! Configuration for the ledger sync engine.
//!
//! # Example
//!
//! ```
//! use ledger_sync::SyncConfig;
//!
//! // Minimal config (uses defaults)
//! let config = SyncConfig::default();
//! assert_eq!(config.cache_ttl_ms, 24 * 60 * 60 * 1000); // 24h
//!
//! // Full config
//! let config = SyncConfig {
//!     db_path: Some("ledger.db".into()),
//!     max_retries: 5,
//!     ..Default::default()
//! };
//! ```

use serde::Deserialize;

/// Configuration for the sync engine.
///
/// All fields have sensible defaults. Leave `db_path` unset for an
/// in-memory store (tests, demos).
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Path of the SQLite store file; `None` keeps everything in memory
    #[serde(default)]
    pub db_path: Option<String>,

    /// Per-record cache time-to-live in milliseconds (default: 24h)
    #[serde(default = "default_cache_ttl_ms")]
    pub cache_ttl_ms: i64,

    /// Retry budget a queued mutation gets before it is marked failed
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Whether the engine assumes connectivity at startup
    #[serde(default = "default_start_online")]
    pub start_online: bool,
}

fn default_cache_ttl_ms() -> i64 {
    24 * 60 * 60 * 1000
}
fn default_max_retries() -> u32 {
    3
}
fn default_start_online() -> bool {
    true
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            cache_ttl_ms: default_cache_ttl_ms(),
            max_retries: default_max_retries(),
            start_online: default_start_online(),
        }
    }
}
