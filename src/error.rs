//! Error handling for recordlite.
//!
//! One crate-level error enum covering schema declaration, query
//! construction, value coercion, and persistence failures, plus a
//! passthrough for the underlying SQLite driver.

use thiserror::Error;

/// Result type alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Invalid model declaration: bad field name, duplicate primary key,
    /// zero-column table, registration after init.
    #[error("schema error: {0}")]
    Schema(String),

    /// A filter/order-by keyword or constructor column that is not a
    /// declared field of the model.
    #[error("'{model}' got non-field keyword(s) {given:?}, available: {available:?}")]
    UnknownFields {
        model: String,
        given: Vec<String>,
        available: Vec<String>,
    },

    /// `get` matched more than one row.
    #[error("query for '{model}' matched more than one row")]
    Ambiguous { model: String },

    /// Malformed query construction, e.g. `create_or_get` without a
    /// unique criterion.
    #[error("query error: {0}")]
    Query(String),

    /// A value that does not satisfy the field's contract.
    #[error("field '{field}': {message}")]
    Value { field: String, message: String },

    /// A `pre_save`/`post_save` hook signalled failure.
    #[error("{phase} for field '{field}' with value '{value}' failed")]
    Hook {
        phase: &'static str,
        field: String,
        value: String,
    },

    /// Persistence misuse outside the hook protocol, e.g. deleting a
    /// record that was never saved.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Invalid expression construction (operator arity).
    #[error("expression error: {0}")]
    Expression(String),

    /// Many-to-many relations are declared but not wired (no
    /// association-table generation).
    #[error("many-to-many relations are not implemented")]
    Unsupported,

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

impl Error {
    pub(crate) fn schema(message: impl Into<String>) -> Self {
        Error::Schema(message.into())
    }

    pub(crate) fn value(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Value {
            field: field.into(),
            message: message.into(),
        }
    }
}
