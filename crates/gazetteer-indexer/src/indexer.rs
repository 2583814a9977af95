//! Top-level scheduler for rank-stratified indexing passes.
//!
//! Lower-rank administrative containers must be indexed before their
//! dependents, so the scheduler runs one pass per rank and never starts
//! a pass before the previous one has fully drained. Within a pass the
//! enumeration cursor is owned by the scheduler; workers only ever see
//! disjoint id slices.

use futures::stream::BoxStream;
use futures::StreamExt;
use sqlx::postgres::PgRow;
use sqlx::{Connection, PgConnection, Row};
use tracing::{debug, error, warn};

use gazetteer_db::AsyncConnection;
use gazetteer_tokenizer::Tokenizer;

use crate::error::IndexerError;
use crate::pool::WorkerPool;
use crate::progress::ProgressLogger;
use crate::runners::{BoundaryRunner, InterpolationRunner, PostcodeRunner, RankRunner, Runner};
use crate::worker::{IndexWorker, SliceProgress};

/// Number of ids handed to a worker at a time.
const SLICE_SIZE: usize = 300;
/// Batch size for tables with cheap per-row updates but many rows.
const LARGE_TABLE_BATCH: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    Rank(i32),
    Boundary(i32),
    Interpolations,
    Postcodes,
}

/// The sequence of placex passes for `index_by_rank`. Rank 0 holds
/// country placeholders that depend on everything else, so it runs at
/// the very end of a full run, before interpolations and the rank-30
/// points.
fn rank_passes(minrank: i32, maxrank: i32) -> Vec<(Pass, usize)> {
    let maxrank = maxrank.min(30);
    let mut passes: Vec<(Pass, usize)> = (minrank.max(1)..maxrank)
        .map(|rank| (Pass::Rank(rank), 1))
        .collect();

    if maxrank == 30 {
        passes.push((Pass::Rank(0), 1));
        passes.push((Pass::Interpolations, LARGE_TABLE_BATCH));
        passes.push((Pass::Rank(30), LARGE_TABLE_BATCH));
    } else if maxrank >= minrank.max(1) {
        passes.push((Pass::Rank(maxrank), 1));
    }
    passes
}

/// Boundary passes are useful only in the administrative range; the
/// requested bounds are clamped to `[4, 26)`.
fn boundary_ranks(minrank: i32, maxrank: i32) -> Vec<i32> {
    (minrank.max(4)..maxrank.min(26)).collect()
}

/// Main indexing routine.
pub struct Indexer {
    dsn: String,
    tokenizer: Tokenizer,
    num_threads: usize,
}

impl Indexer {
    pub fn new(dsn: &str, tokenizer: Tokenizer, num_threads: usize) -> Self {
        Indexer {
            dsn: dsn.to_string(),
            tokenizer,
            num_threads: num_threads.max(1),
        }
    }

    /// Index the complete database: root containers, boundaries, then
    /// everything else rank by rank, finishing with postcodes. When
    /// `analyse` is set the database statistics are refreshed between
    /// passes.
    pub async fn index_full(&self, analyse: bool) -> Result<(), IndexerError> {
        let mut conn = PgConnection::connect(&self.dsn).await?;

        self.index_by_rank(0, 4).await?;
        maybe_analyse(&mut conn, analyse).await?;

        self.index_boundaries(0, 30).await?;
        maybe_analyse(&mut conn, analyse).await?;

        self.index_by_rank(5, 25).await?;
        maybe_analyse(&mut conn, analyse).await?;

        self.index_by_rank(26, 30).await?;
        maybe_analyse(&mut conn, analyse).await?;

        self.index_postcodes().await?;
        maybe_analyse(&mut conn, analyse).await?;

        let _ = conn.close().await;
        Ok(())
    }

    /// Index only administrative boundaries within the given rank range.
    pub async fn index_boundaries(&self, minrank: i32, maxrank: i32) -> Result<(), IndexerError> {
        warn!(
            "Starting indexing boundaries using {} threads",
            self.num_threads
        );
        for rank in boundary_ranks(minrank, maxrank) {
            self.index_pass(Pass::Boundary(rank), 1).await?;
        }
        Ok(())
    }

    /// Index all placex entries in the given rank range (inclusive) in
    /// order of their address rank. When rank 30 is requested the
    /// interpolation table and the rank-0 placeholders are indexed as
    /// well.
    pub async fn index_by_rank(&self, minrank: i32, maxrank: i32) -> Result<(), IndexerError> {
        warn!(
            "Starting indexing rank ({} to {}) using {} threads",
            minrank,
            maxrank.min(30),
            self.num_threads
        );
        for (pass, batch) in rank_passes(minrank, maxrank) {
            self.index_pass(pass, batch).await?;
        }
        Ok(())
    }

    /// Index the entries of the location_postcode table.
    pub async fn index_postcodes(&self) -> Result<(), IndexerError> {
        warn!(
            "Starting indexing postcodes using {} threads",
            self.num_threads
        );
        self.index_pass(Pass::Postcodes, LARGE_TABLE_BATCH).await
    }

    /// Mark the database as fully indexed in the status table.
    pub async fn update_status_table(&self) -> Result<(), IndexerError> {
        let mut conn = PgConnection::connect(&self.dsn).await?;
        gazetteer_db::status::set_indexed(&mut conn, true).await?;
        let _ = conn.close().await;
        Ok(())
    }

    async fn make_runner(&self, pass: Pass) -> Result<Box<dyn Runner>, IndexerError> {
        Ok(match pass {
            Pass::Rank(rank) => Box::new(RankRunner::new(
                rank,
                self.tokenizer.name_analyzer().await?,
            )),
            Pass::Boundary(rank) => Box::new(BoundaryRunner::new(
                rank,
                self.tokenizer.name_analyzer().await?,
            )),
            Pass::Interpolations => Box::new(InterpolationRunner::new(
                self.tokenizer.name_analyzer().await?,
            )),
            Pass::Postcodes => Box::new(PostcodeRunner),
        })
    }

    /// Run one pass: pool up the workers, stream the pending ids and
    /// hand out slices until the enumeration is exhausted and all
    /// workers have drained.
    async fn index_pass(&self, pass: Pass, batch: usize) -> Result<(), IndexerError> {
        let mut workers = Vec::with_capacity(self.num_threads);
        for _ in 0..self.num_threads {
            let conn = AsyncConnection::connect(&self.dsn).await?;
            let runner = self.make_runner(pass).await?;
            workers.push(IndexWorker::new(conn, runner));
        }

        let name = workers[0].runner().name();
        let count_sql = workers[0].runner().sql_count_objects();
        let objects_sql = workers[0].runner().sql_get_objects();
        warn!("Starting {} (using batch size {})", name, batch);

        let mut pool = WorkerPool::new(workers);
        let result = self
            .drive_pass(&mut pool, &name, &count_sql, &objects_sql, batch)
            .await;
        pool.close().await;

        if let Err(err) = &result {
            error!(
                "Indexing pass '{}' failed (batch size {}, slice size {}): {}",
                name, batch, SLICE_SIZE, err
            );
        }
        result
    }

    async fn drive_pass(
        &self,
        pool: &mut WorkerPool,
        name: &str,
        count_sql: &str,
        objects_sql: &str,
        batch: usize,
    ) -> Result<(), IndexerError> {
        let mut conn = PgConnection::connect(&self.dsn).await?;

        let total: i64 = sqlx::query_scalar(count_sql).fetch_one(&mut conn).await?;
        debug!("Total number of rows: {}", total);
        let mut progress = ProgressLogger::new(name, total.max(0) as u64);

        {
            let mut rows = sqlx::query(objects_sql).fetch(&mut conn);

            let mut worker_id = pool.next_free_worker().await;
            loop {
                match pool.worker(worker_id).continue_slice().await? {
                    SliceProgress::Idle => {
                        let ids = fetch_ids(&mut rows, SLICE_SIZE).await?;
                        if ids.is_empty() {
                            break;
                        }
                        pool.worker(worker_id).start_slice(ids, batch).await?;
                    }
                    SliceProgress::Items(done) => {
                        progress.add(done);
                        worker_id = pool.next_free_worker().await;
                    }
                }
            }
        }
        let _ = conn.close().await;

        // Let the remaining slices run dry.
        while pool.has_workers() {
            let worker_id = pool.next_free_worker().await;
            match pool.worker(worker_id).continue_slice().await? {
                SliceProgress::Idle => pool.shutdown_worker(worker_id).await,
                SliceProgress::Items(done) => progress.add(done),
            }
        }

        progress.done();
        Ok(())
    }
}

async fn maybe_analyse(conn: &mut PgConnection, analyse: bool) -> Result<(), IndexerError> {
    if analyse {
        sqlx::query("ANALYZE").execute(&mut *conn).await?;
    }
    Ok(())
}

async fn fetch_ids(
    rows: &mut BoxStream<'_, Result<PgRow, sqlx::Error>>,
    limit: usize,
) -> Result<Vec<i64>, IndexerError> {
    let mut ids = Vec::with_capacity(limit);
    while ids.len() < limit {
        match rows.next().await {
            Some(row) => ids.push(row?.try_get(0)?),
            None => break,
        }
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn low_rank_range_runs_each_rank_once() {
        assert_eq!(
            rank_passes(0, 4),
            vec![
                (Pass::Rank(1), 1),
                (Pass::Rank(2), 1),
                (Pass::Rank(3), 1),
                (Pass::Rank(4), 1),
            ]
        );
    }

    #[test]
    fn mid_rank_range_is_inclusive() {
        let passes = rank_passes(5, 25);
        assert_eq!(passes.len(), 21);
        assert_eq!(passes.first(), Some(&(Pass::Rank(5), 1)));
        assert_eq!(passes.last(), Some(&(Pass::Rank(25), 1)));
    }

    #[test]
    fn empty_rank_range_is_a_no_op() {
        assert!(rank_passes(0, 0).is_empty());
    }

    #[test]
    fn rank_30_appends_the_tail_passes() {
        let passes = rank_passes(26, 30);
        assert_eq!(
            passes,
            vec![
                (Pass::Rank(26), 1),
                (Pass::Rank(27), 1),
                (Pass::Rank(28), 1),
                (Pass::Rank(29), 1),
                (Pass::Rank(0), 1),
                (Pass::Interpolations, 20),
                (Pass::Rank(30), 20),
            ]
        );
    }

    #[test]
    fn max_rank_is_clamped_to_30() {
        assert_eq!(rank_passes(28, 99), rank_passes(28, 30));
    }

    #[test]
    fn rank_30_only_still_runs_the_tail() {
        assert_eq!(
            rank_passes(30, 30),
            vec![
                (Pass::Rank(0), 1),
                (Pass::Interpolations, 20),
                (Pass::Rank(30), 20),
            ]
        );
    }

    #[test]
    fn boundary_range_is_clamped_to_the_administrative_ranks() {
        assert_eq!(boundary_ranks(0, 30), (4..26).collect::<Vec<i32>>());
    }

    #[test]
    fn boundary_range_below_4_is_a_no_op() {
        assert!(boundary_ranks(0, 3).is_empty());
    }

    #[test]
    fn boundary_range_inside_bounds_is_half_open() {
        assert_eq!(boundary_ranks(10, 12), vec![10, 11]);
    }
}
