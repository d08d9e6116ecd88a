//! Throughput metrics for one indexing invocation.

use std::time::Instant;

/// Counters accumulated while indexing; finished once at the end.
#[derive(Debug, Clone)]
pub struct PerformanceMetrics {
    started: Instant,
    duration_secs: f64,
    pub files_processed: u64,
    pub chunks_created: u64,
    pub bytes_processed: u64,
    pub errors_count: u64,
}

impl PerformanceMetrics {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            duration_secs: 0.0,
            files_processed: 0,
            chunks_created: 0,
            bytes_processed: 0,
            errors_count: 0,
        }
    }

    /// Freeze the duration. Rates read zero until this is called.
    pub fn finish(&mut self) {
        self.duration_secs = self.started.elapsed().as_secs_f64();
    }

    pub fn duration_secs(&self) -> f64 {
        self.duration_secs
    }

    pub fn files_per_sec(&self) -> f64 {
        rate(self.files_processed as f64, self.duration_secs)
    }

    pub fn chunks_per_sec(&self) -> f64 {
        rate(self.chunks_created as f64, self.duration_secs)
    }

    pub fn mb_per_sec(&self) -> f64 {
        rate(
            self.bytes_processed as f64 / (1024.0 * 1024.0),
            self.duration_secs,
        )
    }
}

impl Default for PerformanceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn rate(amount: f64, secs: f64) -> f64 {
    if secs > 0.0 { amount / secs } else { 0.0 }
}

impl std::fmt::Display for PerformanceMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} files ({:.1}/s), {} chunks ({:.1}/s), {:.2} MB/s, {} errors in {:.2}s",
            self.files_processed,
            self.files_per_sec(),
            self.chunks_created,
            self.chunks_per_sec(),
            self.mb_per_sec(),
            self.errors_count,
            self.duration_secs
        )
    }
}
