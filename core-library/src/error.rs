use thiserror::Error;

use crate::models::SearchQueryId;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LibraryError {
    #[error("Invalid entity reference '{0}': expected 'provider:identifier'")]
    InvalidRef(String),

    #[error("Invalid input: {field} - {message}")]
    InvalidInput { field: String, message: String },

    #[error("Search result for query {actual} cannot be merged into query {expected}")]
    QueryMismatch {
        expected: SearchQueryId,
        actual: SearchQueryId,
    },
}

pub type Result<T> = std::result::Result<T, LibraryError>;
