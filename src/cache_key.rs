//! Cache key derivation
//!
//! A cache key is the hex SHA-256 of the dashboard name immediately followed
//! by the encoded upstream query string. The query string is produced in
//! sorted key order by [`crate::url_builder`], which keeps the key stable.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Length of a derived key in hex characters
pub const CACHE_KEY_LEN: usize = 64;

/// Derive the cache key for a dashboard and its final query string
pub fn derive_cache_key(dashboard: &str, query: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(dashboard.as_bytes());
    hasher.update(query.as_bytes());
    hex::encode(hasher.finalize())
}

/// Location of the cache file for `key` inside `cache_dir`
pub fn cache_path(cache_dir: &Path, key: &str) -> PathBuf {
    cache_dir.join(key)
}
