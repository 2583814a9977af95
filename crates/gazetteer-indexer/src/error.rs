//! Typed errors for the indexing engine.

use thiserror::Error;

/// Errors that abort an indexing pass. The engine never retries; rows
/// whose update did not commit keep a positive indexed_status and are
/// picked up by the next run.
#[derive(Debug, Error)]
pub enum IndexerError {
    /// `start_slice` was called while a slice was still being processed.
    #[error("worker already has a slice in progress")]
    SliceInProgress,

    #[error(transparent)]
    Db(#[from] gazetteer_db::DbError),

    #[error(transparent)]
    Tokenizer(#[from] gazetteer_tokenizer::TokenizerError),

    #[error(transparent)]
    Sql(#[from] sqlx::Error),

    #[error("token payload serialization failed: {0}")]
    Payload(#[from] serde_json::Error),
}
