//! Database plumbing for the gazetteer indexing engine.
//!
//! The indexing core drives plain `sqlx` connections in two modes: the
//! scheduler streams work ids over an ordinary connection, while every
//! worker owns an [`AsyncConnection`] that executes one command at a time
//! without ever blocking the scheduler between commands.

pub mod connection;
pub mod dsn;
pub mod error;
pub mod params;
pub mod status;

pub use connection::AsyncConnection;
pub use error::DbError;
pub use params::SqlValue;
