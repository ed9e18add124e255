//! Exchange statistics collection for `--stats` output.

use std::time::{Duration, Instant};

use crate::coupling::Role;

/// Collects iteration counts and transfer timings.
///
/// Created when `--stats` is passed, threaded as `Option<&mut Stats>`.
/// Zero cost when `None`: no timing calls, no counter increments.
pub struct Stats {
    total_start: Instant,
    pub iterations: u32,
    /// Wall time of each iteration's three-component transfer.
    pub transfers: Vec<Duration>,
    pub bytes_moved: usize,
    /// Time spent in the simulated physics.
    pub compute: Duration,
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

impl Stats {
    pub fn new() -> Self {
        Self {
            total_start: Instant::now(),
            iterations: 0,
            transfers: Vec::new(),
            bytes_moved: 0,
            compute: Duration::ZERO,
        }
    }

    /// Record one iteration's transfer.
    pub fn record_transfer(&mut self, duration: Duration, bytes: usize) {
        self.transfers.push(duration);
        self.bytes_moved += bytes;
    }

    pub fn transfer_total(&self) -> Duration {
        self.transfers.iter().sum()
    }

    /// Print the stats table to stderr.
    pub fn display(&self, role: Role, global_rank: usize) {
        let total = self.total_start.elapsed();
        eprintln!();
        eprintln!("=== {role} rank {global_rank} exchange stats ===");
        eprintln!("  Iterations:             {}", self.iterations);
        eprintln!("  Compute:                {:>8.3}s", self.compute.as_secs_f64());

        if !self.transfers.is_empty() {
            let transfer = self.transfer_total();
            let avg = transfer.as_secs_f64() / self.transfers.len() as f64;
            let max = self.transfers.iter().max().copied().unwrap_or_default();
            eprintln!("  Transfers:              {}", self.transfers.len());
            eprintln!("    Total:                {:>8.3}s", transfer.as_secs_f64());
            eprintln!("    Average:              {:>8.3}s", avg);
            eprintln!("    Slowest:              {:>8.3}s", max.as_secs_f64());
            eprintln!("    Bytes moved:          {}", self.bytes_moved);
        }

        eprintln!("  ─────────────────────────────────");
        eprintln!("  Total:                  {:>8.3}s", total.as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfers_accumulate() {
        let mut stats = Stats::new();
        stats.record_transfer(Duration::from_millis(10), 96);
        stats.record_transfer(Duration::from_millis(30), 96);
        assert_eq!(stats.transfer_total(), Duration::from_millis(40));
        assert_eq!(stats.bytes_moved, 192);
    }
}
