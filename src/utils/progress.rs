//! Throughput tracking
//!
//! Byte counter for a single download or unpack that reports the completed
//! fraction to its caller and logs speed at fixed intervals.

use std::time::Instant;

use super::bytes_to_mb;
use crate::{log_debug, log_info};

/// Byte counter with periodic speed logging
pub struct ProgressTracker {
    /// Operation name for logging (e.g., "Download boot")
    operation_name: String,
    /// Module name for logging
    module_name: String,
    /// Total bytes to process (0 if unknown)
    total_bytes: u64,
    processed_bytes: u64,
    start_time: Instant,
    last_log_time: Instant,
    last_log_bytes: u64,
    log_interval_bytes: u64,
}

impl ProgressTracker {
    pub fn new(operation: &str, module: &str, total_bytes: u64, log_interval_mb: u64) -> Self {
        let now = Instant::now();
        Self {
            operation_name: operation.to_string(),
            module_name: module.to_string(),
            total_bytes,
            processed_bytes: 0,
            start_time: now,
            last_log_time: now,
            last_log_bytes: 0,
            log_interval_bytes: log_interval_mb * 1024 * 1024,
        }
    }

    /// Completed fraction in [0, 1]; 0 while the total is unknown
    pub fn fraction(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        (self.processed_bytes as f64 / self.total_bytes as f64).min(1.0)
    }

    pub fn processed_bytes(&self) -> u64 {
        self.processed_bytes
    }

    /// Account for `bytes_added` more bytes and return the new fraction
    pub fn update(&mut self, bytes_added: u64) -> f64 {
        self.processed_bytes += bytes_added;

        if self.log_interval_bytes > 0
            && self.processed_bytes / self.log_interval_bytes
                > self.last_log_bytes / self.log_interval_bytes
        {
            let now = Instant::now();
            let elapsed = now.duration_since(self.last_log_time).as_secs_f64();
            let speed_mbps = if elapsed > 0.0 {
                bytes_to_mb(self.processed_bytes - self.last_log_bytes) / elapsed
            } else {
                0.0
            };

            self.last_log_time = now;
            self.last_log_bytes = self.processed_bytes;

            log_debug!(
                &self.module_name,
                "{} progress: {:.1} MB / {:.1} MB ({:.1}%) @ {:.1} MB/s",
                self.operation_name,
                bytes_to_mb(self.processed_bytes),
                bytes_to_mb(self.total_bytes),
                self.fraction() * 100.0,
                speed_mbps
            );
        }

        self.fraction()
    }

    /// Log completion with average speed
    pub fn finish(&self) {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        let total_mb = bytes_to_mb(self.processed_bytes);
        let avg_speed = if elapsed > 0.0 { total_mb / elapsed } else { 0.0 };

        log_info!(
            &self.module_name,
            "{} complete: {:.1} MB in {:.1}s (avg {:.1} MB/s)",
            self.operation_name,
            total_mb,
            elapsed,
            avg_speed
        );
    }
}
