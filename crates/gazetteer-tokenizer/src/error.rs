//! Typed errors for the tokenizer crate.

use thiserror::Error;

/// Errors raised during name analysis and phrase maintenance.
#[derive(Debug, Error)]
pub enum TokenizerError {
    /// The configured tokenizer name has no implementation. Fatal at
    /// startup.
    #[error("unknown tokenizer '{0}'")]
    UnknownTokenizer(String),

    /// The analyzer connection was closed and can no longer be used.
    #[error("name analyzer has been closed")]
    AnalyzerClosed,

    /// The phrase settings file could not be read or parsed.
    #[error("invalid phrase settings: {0}")]
    Settings(String),

    /// Downloading a special-phrases wiki page failed.
    #[error("wiki download failed: {0}")]
    Download(#[from] reqwest::Error),

    /// Any error reported by the database driver.
    #[error(transparent)]
    Sql(#[from] sqlx::Error),
}
