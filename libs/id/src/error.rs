use thiserror::Error;

/// Why a string is not a valid id of the requested kind.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("id is empty")]
    Empty,

    /// No `_` between prefix and ULID.
    #[error("{0:?} is not of the form prefix_ulid")]
    Malformed(String),

    /// A well-formed id of another resource, e.g. an agent id where a call
    /// id was expected.
    #[error("expected a {expected}_ id, got a {found}_ id")]
    WrongKind {
        expected: &'static str,
        found: String,
    },

    #[error("{input:?} has an invalid ULID: {reason}")]
    BadUlid { input: String, reason: String },
}
