//! Memory sampling.
//!
//! A [`MemorySampler`] produces point-in-time [`MemorySample`]s. The
//! process sampler reads the resident set size from `/proc/self/status`
//! and is inert (`supported == false`) where that file does not exist.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use sysinfo::System;
use tracing::debug;

use crate::cache::current_timestamp_ms;

/// One reading of process memory, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemorySample {
    pub used: u64,
    pub total: u64,
    pub limit: u64,
    /// Unix milliseconds
    pub timestamp: u64,
    pub supported: bool,
}

impl MemorySample {
    pub fn unsupported(timestamp: u64) -> Self {
        Self {
            used: 0,
            total: 0,
            limit: 0,
            timestamp,
            supported: false,
        }
    }

    /// `used / limit`, or `None` when introspection is unavailable or the
    /// limit is zero.
    pub fn ratio(&self) -> Option<f64> {
        if !self.supported || self.limit == 0 {
            return None;
        }
        Some(self.used as f64 / self.limit as f64)
    }
}

/// Source of memory samples.
pub trait MemorySampler: Send + Sync {
    fn sample(&self) -> MemorySample;
}

// == Process Sampler ==

/// Samples this process: `used` is the resident set size, `total` the host
/// memory, `limit` the configured budget.
#[derive(Debug)]
pub struct ProcessMemorySampler {
    limit: u64,
    total: u64,
}

impl ProcessMemorySampler {
    pub fn new(limit: u64) -> Self {
        let mut system = System::new();
        system.refresh_memory();
        Self {
            limit,
            total: system.total_memory(),
        }
    }
}

impl MemorySampler for ProcessMemorySampler {
    fn sample(&self) -> MemorySample {
        let timestamp = current_timestamp_ms();
        match read_rss_bytes() {
            Some(used) => MemorySample {
                used,
                total: self.total,
                limit: self.limit,
                timestamp,
                supported: true,
            },
            None => MemorySample::unsupported(timestamp),
        }
    }
}

fn read_rss_bytes() -> Option<u64> {
    #[cfg(target_os = "linux")]
    {
        let status = match std::fs::read_to_string("/proc/self/status") {
            Ok(status) => status,
            Err(err) => {
                debug!(error = %err, "Cannot read /proc/self/status");
                return None;
            }
        };
        status
            .lines()
            .find_map(|line| line.trim_start().strip_prefix("VmRSS:"))
            .and_then(|rest| rest.split_whitespace().next())
            .and_then(|kb| kb.parse::<u64>().ok())
            .map(|kb| kb.saturating_mul(1024))
    }

    #[cfg(not(target_os = "linux"))]
    {
        debug!("Process memory introspection is not available on this platform");
        None
    }
}

// == Fixed Sampler ==

/// Sampler returning a settable reading. Used for tests and for hosts
/// where the caller measures memory itself.
#[derive(Debug)]
pub struct FixedSampler {
    used: AtomicU64,
    limit: u64,
    supported: bool,
}

impl FixedSampler {
    pub fn new(used: u64, limit: u64) -> Self {
        Self {
            used: AtomicU64::new(used),
            limit,
            supported: true,
        }
    }

    pub fn unsupported() -> Self {
        Self {
            used: AtomicU64::new(0),
            limit: 0,
            supported: false,
        }
    }

    pub fn set_used(&self, used: u64) {
        self.used.store(used, Ordering::Relaxed);
    }
}

impl MemorySampler for FixedSampler {
    fn sample(&self) -> MemorySample {
        let timestamp = current_timestamp_ms();
        if !self.supported {
            return MemorySample::unsupported(timestamp);
        }
        MemorySample {
            used: self.used.load(Ordering::Relaxed),
            total: self.limit,
            limit: self.limit,
            timestamp,
            supported: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ratio() {
        let sample = FixedSampler::new(850, 1000).sample();
        assert_eq!(sample.ratio(), Some(0.85));
    }

    #[test]
    fn test_zero_limit_has_no_ratio() {
        let sample = FixedSampler::new(850, 0).sample();
        assert!(sample.supported);
        assert_eq!(sample.ratio(), None);
    }

    #[test]
    fn test_unsupported_sample_is_inert() {
        let sample = FixedSampler::unsupported().sample();
        assert!(!sample.supported);
        assert_eq!(sample.ratio(), None);
    }

    #[test]
    fn test_set_used() {
        let sampler = FixedSampler::new(0, 100);
        sampler.set_used(42);
        assert_eq!(sampler.sample().used, 42);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_process_sampler_reads_rss() {
        let sample = ProcessMemorySampler::new(1024 * 1024 * 1024).sample();
        assert!(sample.supported);
        assert!(sample.used > 0);
        assert!(sample.total > 0);
    }
}
