//! Pool of indexing workers multiplexed on command completion.
//!
//! The pool replaces an I/O readiness selector: every worker connection
//! pings a shared [`Notify`] when its current command has drained, and
//! `next_free_worker` parks there whenever no worker is ready. The scan
//! starts at a rotating offset so a fast worker cannot starve the
//! others.

use std::sync::Arc;

use tokio::sync::Notify;
use tracing::debug;

use crate::worker::IndexWorker;

/// Handle to a worker inside the pool.
pub type WorkerId = usize;

pub struct WorkerPool {
    workers: Vec<IndexWorker>,
    alive: Vec<bool>,
    live: usize,
    ready: Arc<Notify>,
    scan_from: usize,
}

impl WorkerPool {
    pub fn new(mut workers: Vec<IndexWorker>) -> Self {
        let ready = Arc::new(Notify::new());
        for worker in &mut workers {
            worker.register(ready.clone());
        }
        let live = workers.len();
        let alive = vec![true; live];
        WorkerPool {
            workers,
            alive,
            live,
            ready,
            scan_from: 0,
        }
    }

    pub fn has_workers(&self) -> bool {
        self.live > 0
    }

    /// Wait until some worker is ready to accept a command and return
    /// it. Must not be called on an empty pool.
    pub async fn next_free_worker(&mut self) -> WorkerId {
        let ready = self.ready.clone();
        loop {
            let notified = ready.notified();
            tokio::pin!(notified);
            // Register interest before scanning so a completion between
            // the scan and the await cannot be lost.
            notified.as_mut().enable();

            if let Some(id) = self.poll_ready() {
                return id;
            }
            notified.await;
        }
    }

    pub fn worker(&mut self, id: WorkerId) -> &mut IndexWorker {
        &mut self.workers[id]
    }

    /// Close a worker that reported terminal idle during the drain
    /// phase and remove it from scheduling.
    pub async fn shutdown_worker(&mut self, id: WorkerId) {
        if self.alive[id] {
            self.workers[id].close().await;
            self.alive[id] = false;
            self.live -= 1;
            debug!(worker = id, remaining = self.live, "worker shut down");
        }
    }

    /// Close all remaining workers. Called on every pass exit path.
    pub async fn close(&mut self) {
        for id in 0..self.workers.len() {
            if self.alive[id] {
                self.workers[id].close().await;
                self.alive[id] = false;
            }
        }
        self.live = 0;
    }

    fn poll_ready(&mut self) -> Option<WorkerId> {
        let ready: Vec<bool> = self
            .workers
            .iter()
            .zip(&self.alive)
            .map(|(worker, alive)| *alive && worker.is_ready())
            .collect();
        let id = rotate_scan(self.scan_from, &ready)?;
        self.scan_from = (id + 1) % self.workers.len();
        Some(id)
    }
}

/// Return the first set flag at or after `start`, wrapping around.
fn rotate_scan(start: usize, flags: &[bool]) -> Option<usize> {
    let len = flags.len();
    if len == 0 {
        return None;
    }
    (0..len)
        .map(|offset| (start + offset) % len)
        .find(|&idx| flags[idx])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_starts_at_the_given_offset() {
        let flags = [true, true, true, true];
        assert_eq!(rotate_scan(2, &flags), Some(2));
        assert_eq!(rotate_scan(0, &flags), Some(0));
    }

    #[test]
    fn scan_wraps_around() {
        let flags = [true, false, false, false];
        assert_eq!(rotate_scan(2, &flags), Some(0));
    }

    #[test]
    fn no_ready_worker_yields_none() {
        assert_eq!(rotate_scan(1, &[false, false, false]), None);
        assert_eq!(rotate_scan(0, &[]), None);
    }

    #[test]
    fn rotation_distributes_over_equally_ready_workers() {
        // Simulates successive poll_ready rounds with everyone ready:
        // advancing the start index must cycle through all workers.
        let flags = [true, true, true];
        let mut start = 0;
        let mut picked = Vec::new();
        for _ in 0..3 {
            let id = rotate_scan(start, &flags).unwrap();
            picked.push(id);
            start = (id + 1) % flags.len();
        }
        assert_eq!(picked, vec![0, 1, 2]);
    }
}
