//! A single database connection driven as a pipelined command queue.
//!
//! The worker pool multiplexes many of these connections from one
//! scheduling task. `perform` hands the connection to a background task
//! that runs exactly one command; `is_done` observes completion without
//! blocking, and a shared [`Notify`] stands in for an I/O readiness
//! selector: "ready" means the previous command has fully drained, not
//! merely that the socket buffer has room.

use std::sync::Arc;

use sqlx::postgres::PgRow;
use sqlx::{Connection, PgConnection};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::DbError;
use crate::params::SqlValue;

type QueryOutcome = (Box<PgConnection>, Result<Vec<PgRow>, sqlx::Error>);

enum ConnState {
    Idle(Box<PgConnection>),
    Busy(JoinHandle<QueryOutcome>),
    Closed,
}

/// One long-lived worker connection executing at most one command at a time.
pub struct AsyncConnection {
    dsn: String,
    state: ConnState,
    rows: Vec<PgRow>,
    generation: u64,
    ready: Option<Arc<Notify>>,
}

impl AsyncConnection {
    /// Open a new connection for the given DSN.
    pub async fn connect(dsn: &str) -> Result<Self, DbError> {
        let conn = PgConnection::connect(dsn).await?;
        Ok(AsyncConnection {
            dsn: dsn.to_string(),
            state: ConnState::Idle(Box::new(conn)),
            rows: Vec::new(),
            generation: 1,
            ready: None,
        })
    }

    /// Register the notifier pinged whenever a command finishes draining.
    /// This is the selector-registration step of the worker pool.
    pub fn set_ready_signal(&mut self, ready: Arc<Notify>) {
        self.ready = Some(ready);
    }

    /// Monotonically increasing connection identity; bumped by
    /// [`reconnect`](Self::reconnect). Stands in for a socket fd as the
    /// observable that a reconnect actually happened.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Send a command. Fails if the previous command has not completed.
    pub fn perform(&mut self, sql: String, params: Vec<SqlValue>) -> Result<(), DbError> {
        let mut conn = match std::mem::replace(&mut self.state, ConnState::Closed) {
            ConnState::Idle(conn) => conn,
            ConnState::Busy(handle) => {
                self.state = ConnState::Busy(handle);
                return Err(DbError::CommandInFlight);
            }
            ConnState::Closed => return Err(DbError::ConnectionClosed),
        };

        let ready = self.ready.clone();
        let handle = tokio::spawn(async move {
            let result = run_query(&mut conn, &sql, params).await;
            if let Some(notify) = ready {
                notify.notify_waiters();
            }
            (conn, result)
        });
        self.state = ConnState::Busy(handle);
        Ok(())
    }

    /// True when no command is running, i.e. the connection is ready to
    /// accept the next `perform`.
    pub fn is_done(&self) -> bool {
        match &self.state {
            ConnState::Idle(_) | ConnState::Closed => true,
            ConnState::Busy(handle) => handle.is_finished(),
        }
    }

    /// Harvest a completed command: restore the connection, stash the row
    /// set and surface any query error unchanged. A no-op when idle.
    pub async fn wait_done(&mut self) -> Result<(), DbError> {
        match std::mem::replace(&mut self.state, ConnState::Closed) {
            ConnState::Busy(handle) => {
                let (conn, result) = handle
                    .await
                    .map_err(|err| DbError::TaskFailed(err.to_string()))?;
                self.state = ConnState::Idle(conn);
                self.rows = result?;
            }
            other => self.state = other,
        }
        Ok(())
    }

    /// Take the rows of the most recently completed query.
    pub fn fetchall(&mut self) -> Vec<PgRow> {
        std::mem::take(&mut self.rows)
    }

    /// Close and re-open the underlying connection. Used by workers to
    /// bound server-side memory growth on long passes.
    pub async fn reconnect(&mut self) -> Result<(), DbError> {
        match std::mem::replace(&mut self.state, ConnState::Closed) {
            ConnState::Idle(conn) => {
                let _ = conn.close().await;
            }
            ConnState::Busy(handle) => {
                self.state = ConnState::Busy(handle);
                return Err(DbError::CommandInFlight);
            }
            ConnState::Closed => {}
        }

        let conn = PgConnection::connect(&self.dsn).await?;
        self.state = ConnState::Idle(Box::new(conn));
        self.generation += 1;
        self.rows.clear();
        debug!(generation = self.generation, "worker connection reopened");
        Ok(())
    }

    /// Release the connection. Idempotent; severs any in-flight query.
    pub async fn close(&mut self) {
        match std::mem::replace(&mut self.state, ConnState::Closed) {
            ConnState::Idle(conn) => {
                let _ = conn.close().await;
            }
            ConnState::Busy(handle) => {
                handle.abort();
            }
            ConnState::Closed => {}
        }
        self.rows.clear();
    }
}

async fn run_query(
    conn: &mut PgConnection,
    sql: &str,
    params: Vec<SqlValue>,
) -> Result<Vec<PgRow>, sqlx::Error> {
    let mut query = sqlx::query(sql);
    for param in params {
        query = param.bind(query);
    }
    query.fetch_all(&mut *conn).await
}
