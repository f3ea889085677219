use thiserror::Error;

/// Failures of a single interaction with the remote market form.
///
/// None of these abort a fallback loop or a scheduled run; they are logged at
/// the boundary that owns the attempt.
#[derive(Debug, Error)]
pub enum ScrapeError {
    /// District, market or commodity absent from the form's current options.
    #[error("target not found: {0}")]
    TargetNotFound(String),

    /// The form answered with a shape we do not understand (rejected date,
    /// missing state fields, invalid postback).
    #[error("protocol mismatch: {0}")]
    ProtocolMismatch(String),

    #[error("transient fetch failure: {0}")]
    Transient(String),

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl From<reqwest::Error> for ScrapeError {
    fn from(e: reqwest::Error) -> Self {
        ScrapeError::Transient(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("price store unavailable: {0}")]
    Unavailable(#[from] duckdb::Error),

    #[error("price store io: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt stored row: {0}")]
    Corrupt(String),

    #[error("price store lock poisoned")]
    Poisoned,

    #[error("price store task failed: {0}")]
    Task(String),
}

/// Errors that cross the resolver boundary as error-class results.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("unknown {kind}: {input:?} (supported: {})", supported.join(", "))]
    InputInvalid {
        kind: &'static str,
        input: String,
        supported: Vec<String>,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Fetch(#[from] ScrapeError),
}

impl ResolveError {
    pub fn unknown_city(input: &str, supported: Vec<String>) -> Self {
        ResolveError::InputInvalid { kind: "city", input: input.to_string(), supported }
    }

    pub fn unknown_vegetable(input: &str, supported: Vec<String>) -> Self {
        ResolveError::InputInvalid { kind: "vegetable", input: input.to_string(), supported }
    }
}
