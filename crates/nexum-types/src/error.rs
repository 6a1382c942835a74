//! Shared error types for the Nexum system.

use thiserror::Error;

/// Top-level error type for the Nexum system.
///
/// Every failure a request can hit maps onto exactly one of these variants;
/// the controller converts them into structured responses at the connection
/// boundary, the client surfaces them to callers.
#[derive(Error, Debug)]
pub enum NexumError {
    /// A policy or registry call was invalid (e.g. reserved-name registration).
    #[error("Validation error: {0}")]
    Validation(String),

    /// The handshake secret did not match.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The peer has no session, or its session key is stale.
    #[error("Session error: {0}")]
    Session(String),

    /// The method is denied by the authorization policy.
    #[error("Authorization denied: {0}")]
    Authorization(String),

    /// The target object or method does not exist.
    #[error("Dispatch error: {0}")]
    Dispatch(String),

    /// A hosted method failed while executing.
    #[error("Execution error: {0}")]
    Execution(String),

    /// Envelope encryption or decryption failed.
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Alias for Result with NexumError.
pub type NexumResult<T> = Result<T, NexumError>;
