//! Error types for DataMonster client operations.
//!
//! This module defines [`DmError`] which covers every failure mode of the client:
//! authentication, transport, payload decoding, and argument validation. Errors
//! propagate to the caller unmodified; no layer downgrades an error to a default
//! value.

use thiserror::Error;

/// Errors that can occur while talking to the DataMonster service.
#[derive(Error, Debug)]
pub enum DmError {
    /// The signing key material is malformed (secret is not valid hex).
    #[error("Bad key material: {0}")]
    Auth(String),

    /// The server answered with a non-200 status.
    #[error("API error ({status} {reason}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// HTTP reason phrase.
        reason: String,
        /// Response body, as text.
        body: String,
    },

    /// The response content type is neither JSON nor a binary table payload.
    #[error("Unexpected content type: {0}")]
    UnsupportedContentType(String),

    /// A binary payload is missing the structural schema metadata the client
    /// requires. Signals a server/library version mismatch.
    #[error("DataMonster does not currently support this request")]
    UnsupportedRequest,

    /// A required field role maps to zero or several physical columns.
    #[error("Expected a single defined column for {role}. Got {columns:?}")]
    SchemaMismatch {
        /// The field role that failed the check.
        role: String,
        /// The physical columns the schema declared for it.
        columns: Vec<String>,
    },

    /// A caller-supplied argument is invalid. Raised before any network call.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A filter value is not representable as a request parameter.
    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    /// A by-ticker or by-name lookup scanned every result without an exact match.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The detail fetch completed but the requested field is absent.
    #[error("No detail field named {0:?}")]
    DetailNotFound(String),

    /// The operation is not supported by the target resource.
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Network-level failure (connection, timeout, TLS).
    #[error("Network error: {0}")]
    Network(String),

    /// A payload could not be decoded.
    #[error("Parse error: {0}")]
    Parse(String),
}

/// Result type alias using [`DmError`].
pub type Result<T> = std::result::Result<T, DmError>;
