//! A single indexing worker driving id slices over an async connection.
//!
//! The worker is a small state machine: a slice of ids is optionally
//! expanded by the runner's prefetch, then updated in sub-batches. The
//! worker never waits for the database itself; it issues one command,
//! yields back to the pool, and picks the result up on the next
//! `continue_slice` call.

use std::sync::Arc;

use gazetteer_db::AsyncConnection;
use gazetteer_tokenizer::Place;
use tokio::sync::Notify;
use tracing::debug;

use crate::error::IndexerError;
use crate::runners::Runner;

/// Worker connections are recycled after this many processed rows to
/// bound backend memory growth on long passes.
const RECONNECT_AFTER_ROWS: u64 = 10_000;

/// Outcome of one `continue_slice` step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceProgress {
    /// No slice in progress; the worker wants new ids.
    Idle,
    /// The slice advanced; the count is the number of rows whose
    /// completion was observed on this call (0 while a command is still
    /// in flight).
    Items(usize),
}

enum Phase {
    NotStarted,
    Prefetching,
    Updating,
}

struct Slice {
    ids: Vec<i64>,
    batch_size: usize,
    phase: Phase,
    places: Vec<Place>,
    next: usize,
    inflight: usize,
}

impl Slice {
    fn finished(&self) -> bool {
        matches!(self.phase, Phase::Updating) && self.next >= self.places.len() && self.inflight == 0
    }
}

/// One async connection bound to one runner, processing one slice of up
/// to 300 ids at a time.
pub struct IndexWorker {
    conn: AsyncConnection,
    runner: Box<dyn Runner>,
    slice: Option<Slice>,
    place_count: u64,
}

impl IndexWorker {
    pub fn new(conn: AsyncConnection, runner: Box<dyn Runner>) -> Self {
        IndexWorker {
            conn,
            runner,
            slice: None,
            place_count: 0,
        }
    }

    /// The runner bound to this worker; the scheduler reads the pass
    /// SQL from it.
    pub fn runner(&self) -> &dyn Runner {
        self.runner.as_ref()
    }

    /// The connection identity, bumped on every reconnect.
    pub fn connection_generation(&self) -> u64 {
        self.conn.generation()
    }

    /// True when the worker can make progress without blocking, i.e.
    /// the previous command has fully drained.
    pub fn is_ready(&self) -> bool {
        self.conn.is_done()
    }

    pub(crate) fn register(&mut self, ready: Arc<Notify>) {
        self.conn.set_ready_signal(ready);
    }

    /// Begin processing a new slice. Illegal while a slice is in
    /// progress.
    pub async fn start_slice(
        &mut self,
        ids: Vec<i64>,
        batch_size: usize,
    ) -> Result<(), IndexerError> {
        if self.slice.is_some() {
            return Err(IndexerError::SliceInProgress);
        }

        if self.place_count > RECONNECT_AFTER_ROWS {
            debug!(
                rows = self.place_count,
                "recycling worker connection to release backend memory"
            );
            self.conn.reconnect().await?;
            self.place_count = 0;
        }

        self.slice = Some(Slice {
            ids,
            batch_size: batch_size.max(1),
            phase: Phase::NotStarted,
            places: Vec::new(),
            next: 0,
            inflight: 0,
        });
        Ok(())
    }

    /// Advance the current slice by one step. Returns
    /// [`SliceProgress::Idle`] when there is nothing to do.
    pub async fn continue_slice(&mut self) -> Result<SliceProgress, IndexerError> {
        let Some(mut slice) = self.slice.take() else {
            return Ok(SliceProgress::Idle);
        };

        if !self.conn.is_done() {
            self.slice = Some(slice);
            return Ok(SliceProgress::Items(0));
        }
        self.conn.wait_done().await?;

        let done = match slice.phase {
            Phase::NotStarted => {
                match self.runner.sql_get_object_info(&slice.ids) {
                    Some(query) => {
                        self.conn.perform(query.sql, query.params)?;
                        slice.phase = Phase::Prefetching;
                    }
                    None => {
                        slice.places = slice.ids.iter().copied().map(Place::from_id).collect();
                        slice.phase = Phase::Updating;
                        self.issue_batch(&mut slice).await?;
                    }
                }
                0
            }
            Phase::Prefetching => {
                let rows = self.conn.fetchall();
                slice.places = rows
                    .iter()
                    .map(Place::from_row)
                    .collect::<Result<_, _>>()?;
                slice.phase = Phase::Updating;
                self.issue_batch(&mut slice).await?;
                0
            }
            Phase::Updating => {
                let done = slice.inflight;
                slice.inflight = 0;
                self.issue_batch(&mut slice).await?;
                done
            }
        };

        if slice.finished() {
            self.place_count += slice.places.len() as u64;
        } else {
            self.slice = Some(slice);
        }
        Ok(SliceProgress::Items(done))
    }

    async fn issue_batch(&mut self, slice: &mut Slice) -> Result<(), IndexerError> {
        if slice.next >= slice.places.len() {
            return Ok(());
        }

        let end = (slice.next + slice.batch_size).min(slice.places.len());
        let query = self
            .runner
            .sql_index_places(&slice.places[slice.next..end])
            .await?;
        self.conn.perform(query.sql, query.params)?;
        slice.inflight = end - slice.next;
        slice.next = end;
        Ok(())
    }

    /// Release the runner and the connection.
    pub async fn close(&mut self) {
        self.runner.close().await;
        self.conn.close().await;
        self.slice = None;
    }
}
