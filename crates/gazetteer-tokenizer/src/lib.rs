//! Name analysis for the gazetteer indexing engine.
//!
//! The tokenizer turns raw place attributes into the `token_info`
//! payload stored on every indexed row and keeps the shared word table
//! stocked with all referenced tokens. Analyzers are not thread-safe;
//! every indexing worker owns one, together with its private caches and
//! its own auto-commit connection.

pub mod analyzer;
pub mod cache;
pub mod error;
pub mod factory;
pub mod hstore;
pub mod phrases;
pub mod place;
pub mod token_info;

pub use analyzer::NameAnalyzer;
pub use error::TokenizerError;
pub use factory::{create_tokenizer, Tokenizer};
pub use phrases::{SpecialPhrase, SpecialPhrasesImporter};
pub use place::Place;
pub use token_info::TokenInfo;
