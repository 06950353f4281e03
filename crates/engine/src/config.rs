//! Engine configuration.
//!
//! All tuning knobs live here; nothing in the engine hard-codes retry
//! counts or timeouts at the use site. The struct derives `serde` so the
//! embedding application can load it from its own config file.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default part size: 512 KiB.
pub const DEFAULT_PART_SIZE: u32 = 512 * 1024;

/// File size at which the pool reaches its full configured width.
const FULL_POOL_AT: u64 = 100 * 1024 * 1024;

/// Tuning parameters for the transfer engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of pooled connections (degree of parallelism).
    pub pool_size: usize,
    /// Default part size in bytes when the caller does not pick one.
    pub part_size: u32,
    /// Attempts per part before the part (and the session) fails.
    pub max_attempts: u32,
    /// Bound on a single chunk read/write.
    pub chunk_timeout: Duration,
    /// Bound on waiting for a pooled connection.
    pub acquire_wait: Duration,
    /// Pause after a failed connection replacement before trying again.
    pub acquire_retry_delay: Duration,
    /// Consecutive connection-factory failures before the session fails.
    pub factory_failure_threshold: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pool_size: 8,
            part_size: DEFAULT_PART_SIZE,
            max_attempts: 5,
            chunk_timeout: Duration::from_secs(30),
            acquire_wait: Duration::from_secs(30),
            acquire_retry_delay: Duration::from_millis(500),
            factory_failure_threshold: 3,
        }
    }
}

impl EngineConfig {
    /// Connection count for a transfer of `total_size` bytes.
    ///
    /// Scales linearly up to [`pool_size`](Self::pool_size), reaching the
    /// full width at 100 MiB. Small files do not pay for connections they
    /// cannot keep busy.
    pub fn connections_for(&self, total_size: u64) -> usize {
        if total_size >= FULL_POOL_AT {
            return self.pool_size;
        }
        let scaled = (total_size as f64 / FULL_POOL_AT as f64) * self.pool_size as f64;
        (scaled.ceil() as usize).clamp(1, self.pool_size)
    }

    /// Part size appropriate for a transfer of `total_size` bytes.
    ///
    /// Bands: ≤100 MiB → 128 KiB, ≤750 MiB → 256 KiB, larger → 512 KiB.
    pub fn part_size_for(&self, total_size: u64) -> u32 {
        match total_size {
            0..=0x640_0000 => 128 * 1024,
            0x640_0001..=0x2EE0_0000 => 256 * 1024,
            _ => 512 * 1024,
        }
    }
}
