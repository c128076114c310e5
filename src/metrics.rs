//! Metrics collection for the gateway
//!
//! Thread-safe counters built on atomics. They track requests by outcome,
//! cache hits and misses, upstream fetches, bytes and latencies.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Metrics collector for the gateway
///
/// All operations are thread-safe using atomic operations.
#[derive(Debug, Default)]
pub struct GatewayMetrics {
    // Request outcomes
    total_requests: AtomicU64,
    bad_requests: AtomicU64,
    not_found: AtomicU64,
    config_errors: AtomicU64,

    // Cache statistics
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    cache_write_errors: AtomicU64,
    cache_installs: AtomicU64,

    // Upstream statistics
    upstream_requests: AtomicU64,
    upstream_errors: AtomicU64,

    // Byte statistics
    bytes_from_cache: AtomicU64,
    bytes_from_upstream: AtomicU64,

    // Latency statistics (stored as microseconds)
    total_request_duration_us: AtomicU64,
    total_upstream_duration_us: AtomicU64,
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub bad_requests: u64,
    pub not_found: u64,
    pub config_errors: u64,

    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_write_errors: u64,
    pub cache_installs: u64,

    pub upstream_requests: u64,
    pub upstream_errors: u64,

    pub bytes_from_cache: u64,
    pub bytes_from_upstream: u64,

    pub total_request_duration_us: u64,
    pub total_upstream_duration_us: u64,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an inbound panel request
    pub fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a request rejected for malformed options
    pub fn record_bad_request(&self) {
        self.bad_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a request for an unknown dashboard or path
    pub fn record_not_found(&self) {
        self.not_found.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a request failed by a broken dashboard entry
    pub fn record_config_error(&self) {
        self.config_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a response that could not be stored in the cache
    pub fn record_cache_write_error(&self) {
        self.cache_write_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a cache entry installed under its final name
    pub fn record_cache_install(&self) {
        self.cache_installs.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an upstream fetch
    ///
    /// # Arguments
    /// * `success` - Whether a response was received
    /// * `duration` - Time until the response headers arrived
    pub fn record_upstream(&self, success: bool, duration: Duration) {
        self.upstream_requests.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.upstream_errors.fetch_add(1, Ordering::Relaxed);
        }
        self.total_upstream_duration_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn record_bytes_from_cache(&self, bytes: u64) {
        self.bytes_from_cache.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_bytes_from_upstream(&self, bytes: u64) {
        self.bytes_from_upstream.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_request_duration(&self, duration: Duration) {
        self.total_request_duration_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Get a snapshot of current metrics
    ///
    /// Counters are read one by one, so a snapshot taken under load may not
    /// be perfectly consistent across fields.
    pub fn get_stats(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            bad_requests: self.bad_requests.load(Ordering::Relaxed),
            not_found: self.not_found.load(Ordering::Relaxed),
            config_errors: self.config_errors.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            cache_write_errors: self.cache_write_errors.load(Ordering::Relaxed),
            cache_installs: self.cache_installs.load(Ordering::Relaxed),
            upstream_requests: self.upstream_requests.load(Ordering::Relaxed),
            upstream_errors: self.upstream_errors.load(Ordering::Relaxed),
            bytes_from_cache: self.bytes_from_cache.load(Ordering::Relaxed),
            bytes_from_upstream: self.bytes_from_upstream.load(Ordering::Relaxed),
            total_request_duration_us: self.total_request_duration_us.load(Ordering::Relaxed),
            total_upstream_duration_us: self.total_upstream_duration_us.load(Ordering::Relaxed),
        }
    }

    /// Reset all metrics to zero
    pub fn reset(&self) {
        for counter in [
            &self.total_requests,
            &self.bad_requests,
            &self.not_found,
            &self.config_errors,
            &self.cache_hits,
            &self.cache_misses,
            &self.cache_write_errors,
            &self.cache_installs,
            &self.upstream_requests,
            &self.upstream_errors,
            &self.bytes_from_cache,
            &self.bytes_from_upstream,
            &self.total_request_duration_us,
            &self.total_upstream_duration_us,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

impl MetricsSnapshot {
    /// Calculate cache hit rate as a percentage (0.0 to 100.0)
    pub fn cache_hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            (self.cache_hits as f64 / total as f64) * 100.0
        }
    }

    /// Calculate average request duration in milliseconds
    pub fn avg_request_duration_ms(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            (self.total_request_duration_us as f64 / self.total_requests as f64) / 1000.0
        }
    }

    /// Calculate average upstream duration in milliseconds
    pub fn avg_upstream_duration_ms(&self) -> f64 {
        if self.upstream_requests == 0 {
            0.0
        } else {
            (self.total_upstream_duration_us as f64 / self.upstream_requests as f64) / 1000.0
        }
    }

    /// Calculate upstream failure rate as a percentage (0.0 to 100.0)
    pub fn upstream_failure_rate(&self) -> f64 {
        if self.upstream_requests == 0 {
            0.0
        } else {
            (self.upstream_errors as f64 / self.upstream_requests as f64) * 100.0
        }
    }
}
