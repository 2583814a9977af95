//! Selection of the tokenizer implementation for a database.
//!
//! A tokenizer is bound to the lifetime of a database: it is chosen at
//! import time and must be used consistently afterwards. Only the
//! `legacy` tokenizer exists here; the registry is the seam for adding
//! normalisation variants without touching the indexer.

use crate::analyzer::NameAnalyzer;
use crate::error::TokenizerError;

pub const DEFAULT_TOKENIZER: &str = "legacy";

/// Handle for creating per-worker analyzers against one database.
#[derive(Debug, Clone)]
pub struct Tokenizer {
    dsn: String,
}

impl Tokenizer {
    /// Create a new analyzer with its own connection and caches.
    /// Analyzers are not thread-safe; instantiate one per worker.
    pub async fn name_analyzer(&self) -> Result<NameAnalyzer, TokenizerError> {
        NameAnalyzer::new(&self.dsn).await
    }
}

/// Instantiate the tokenizer with the given name. An unknown name is a
/// configuration error and fatal at startup.
pub fn create_tokenizer(name: &str, dsn: &str) -> Result<Tokenizer, TokenizerError> {
    match name {
        DEFAULT_TOKENIZER => Ok(Tokenizer {
            dsn: dsn.to_string(),
        }),
        other => Err(TokenizerError::UnknownTokenizer(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_tokenizer_is_available() {
        assert!(create_tokenizer("legacy", "postgresql:///gazetteer").is_ok());
    }

    #[test]
    fn unknown_tokenizer_is_a_configuration_error() {
        let err = create_tokenizer("icu", "postgresql:///gazetteer").unwrap_err();
        assert!(matches!(err, TokenizerError::UnknownTokenizer(name) if name == "icu"));
    }
}
