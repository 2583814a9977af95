//! Rank-stratified parallel indexing engine.
//!
//! The [`Indexer`](indexer::Indexer) walks the tables of unindexed
//! places in dependency order and fans each pass out over a pool of
//! pipelined database connections. The per-pass SQL lives in
//! [`runners`]; workers drive slices of ids through an optional prefetch
//! and batched updates.

pub mod error;
pub mod indexer;
pub mod pool;
pub mod progress;
pub mod runners;
pub mod worker;

pub use error::IndexerError;
pub use indexer::Indexer;
pub use runners::Runner;
