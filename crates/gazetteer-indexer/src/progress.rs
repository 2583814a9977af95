//! Progress reporting for indexing passes.

use std::time::Instant;

use tracing::{info, warn};

/// Accumulates per-batch completions and periodically logs throughput.
pub struct ProgressLogger {
    name: String,
    total: u64,
    done: u64,
    start: Instant,
    next_info: u64,
}

impl ProgressLogger {
    pub fn new(name: &str, total: u64) -> Self {
        ProgressLogger {
            name: name.to_string(),
            total,
            done: 0,
            start: Instant::now(),
            next_info: 100,
        }
    }

    /// Record `num` finished rows.
    pub fn add(&mut self, num: usize) {
        self.done += num as u64;
        if self.done < self.next_info {
            return;
        }

        let elapsed = self.start.elapsed().as_secs_f64();
        let per_second = if elapsed > 0.0 {
            self.done as f64 / elapsed
        } else {
            0.0
        };
        let eta = if per_second > 0.0 {
            (self.total.saturating_sub(self.done)) as f64 / per_second
        } else {
            0.0
        };
        info!(
            "Done {} in {:.0} @ {:.3} per second - {} ETA (seconds): {:.2}",
            self.done, elapsed, per_second, self.name, eta
        );
        // Space the next line roughly one second of throughput away.
        self.next_info += (per_second as u64).max(1);
    }

    /// Log the final summary and return the elapsed seconds.
    pub fn done(self) -> f64 {
        let elapsed = self.start.elapsed().as_secs_f64();
        let per_second = if elapsed > 0.0 {
            self.done as f64 / elapsed
        } else {
            0.0
        };
        warn!(
            "Done {}/{} in {:.0} @ {:.3} per second - FINISHED {}",
            self.done, self.total, elapsed, per_second, self.name
        );
        elapsed
    }

    pub fn count(&self) -> u64 {
        self.done
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_accumulates() {
        let mut progress = ProgressLogger::new("rank 15", 1000);
        progress.add(300);
        progress.add(0);
        progress.add(300);
        assert_eq!(progress.count(), 600);
    }

    #[test]
    fn zero_total_pass_completes() {
        let progress = ProgressLogger::new("rank 15", 0);
        assert_eq!(progress.count(), 0);
        assert!(progress.done() >= 0.0);
    }
}
