//! Progress and speed reporting.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Byte-level progress of a transfer.
///
/// `bytes_done` is monotonically non-decreasing while the session runs and
/// freezes at the terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub bytes_done: u64,
    pub bytes_total: u64,
}

impl Progress {
    /// Completed fraction in `[0.0, 1.0]`. Zero-byte transfers report 1.0.
    pub fn ratio(&self) -> f64 {
        if self.bytes_total == 0 {
            return 1.0;
        }
        self.bytes_done as f64 / self.bytes_total as f64
    }
}

struct Sample {
    bytes: u64,
    at: Instant,
}

struct SpeedInner {
    samples: Vec<Sample>,
    window: Duration,
    max_samples: usize,
}

/// Transfer speed over a sliding window of byte samples.
///
/// Feed it the byte count of each completed part; ask it for
/// bytes-per-second or an ETA. Thread-safe.
pub struct SpeedCalculator {
    inner: Mutex<SpeedInner>,
}

impl SpeedCalculator {
    /// Creates a calculator with a 5 s window and up to 100 samples.
    pub fn new() -> Self {
        Self::with_window(Duration::from_secs(5), 100)
    }

    /// Creates a calculator with an explicit window and sample cap.
    pub fn with_window(window: Duration, max_samples: usize) -> Self {
        Self {
            inner: Mutex::new(SpeedInner {
                samples: Vec::new(),
                window,
                max_samples,
            }),
        }
    }

    /// Records `bytes` transferred at the current instant.
    pub fn add_sample(&self, bytes: u64) {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();
        inner.samples.push(Sample { bytes, at: now });

        // A window wider than the process uptime has nothing to prune;
        // subtracting it from `now` would underflow.
        if let Some(cutoff) = now.checked_sub(inner.window) {
            inner.samples.retain(|s| s.at >= cutoff);
        }
        if inner.samples.len() > inner.max_samples {
            let excess = inner.samples.len() - inner.max_samples;
            inner.samples.drain(..excess);
        }
    }

    /// Average speed in bytes/second within the window.
    ///
    /// Returns 0.0 with fewer than two samples.
    pub fn bytes_per_second(&self) -> f64 {
        let inner = self.inner.lock().unwrap();
        let [first, .., last] = inner.samples.as_slice() else {
            return 0.0;
        };
        let elapsed = last.at.duration_since(first.at);
        if elapsed.is_zero() {
            return 0.0;
        }
        let total: u64 = inner.samples.iter().map(|s| s.bytes).sum();
        total as f64 / elapsed.as_secs_f64()
    }

    /// Estimated time to move `remaining_bytes` at the current speed.
    pub fn eta(&self, remaining_bytes: u64) -> Option<Duration> {
        let speed = self.bytes_per_second();
        if speed <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(remaining_bytes as f64 / speed))
    }
}

impl Default for SpeedCalculator {
    fn default() -> Self {
        Self::new()
    }
}
