//! Client-side fetch error taxonomy.
//!
//! Every I/O path in this crate returns `Result<T, FetchError>` so callers can
//! distinguish "legitimately empty" from "failed to load". Errors are `Clone`
//! because an in-flight fetch shared by several awaiting callers propagates
//! its failure to all of them.

use thiserror::Error;

/// Result type used across the client shell.
pub type FetchResult<T> = Result<T, FetchError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// The backend rejected the credentials (401). Callers treat this as a
    /// signal to run the logout teardown and return to the login surface.
    #[error("unauthorized")]
    Unauthorized,

    /// Transport-level failure (DNS, connect, broken pipe).
    #[error("network error: {0}")]
    Network(String),

    /// The backend answered with a non-success status.
    #[error("API error ({0}): {1}")]
    Api(u16, String),

    /// The response body did not match the expected shape.
    #[error("parse error: {0}")]
    Parse(String),

    /// The per-request deadline elapsed before the backend answered.
    #[error("request deadline exceeded")]
    Timeout,

    /// The persisted state store failed.
    #[error("state store error: {0}")]
    Store(String),

    /// An operation that must be scoped to a tenant ran without one.
    #[error("no active location context")]
    NoLocation,
}

impl FetchError {
    pub(crate) fn store(err: impl core::fmt::Display) -> Self {
        Self::Store(err.to_string())
    }
}
