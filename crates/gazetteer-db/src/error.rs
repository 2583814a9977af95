//! Typed errors for the database layer.

use thiserror::Error;

/// Errors raised by connection handling and query dispatch.
#[derive(Debug, Error)]
pub enum DbError {
    /// A new command was issued while the previous one was still running.
    #[error("a command is already in flight on this connection")]
    CommandInFlight,

    /// The connection has been closed and can no longer execute commands.
    #[error("connection is closed")]
    ConnectionClosed,

    /// The background query task died without producing a result.
    #[error("query task failed: {0}")]
    TaskFailed(String),

    /// Any error reported by the database driver. Query errors are
    /// terminal for the running pass; there is no per-query retry.
    #[error(transparent)]
    Sql(#[from] sqlx::Error),
}
