//! Error types for Rapto
//!
//! Provides a unified error type for all operations. Resolver-visible
//! variants carry the exact phrase the server sends back to clients as
//! `ERR: <phrase>`, so Display is the single source of truth for the
//! wire text.

use thiserror::Error;

/// Result type alias using RaptoError
pub type Result<T> = std::result::Result<T, RaptoError>;

/// Unified error type for Rapto operations
#[derive(Debug, Error)]
pub enum RaptoError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Resolver Errors (phrases are the wire text)
    // -------------------------------------------------------------------------
    #[error("command does not exist")]
    CommandNotFound,

    #[error("command does not exist")]
    EmptyQuery,

    #[error("tokens missing")]
    MissingTokens,

    #[error("incompatible types")]
    MismatchType,

    #[error("value too large for type")]
    TypeOverflow,

    #[error("key not found")]
    KeyNotFound,

    #[error("new name correspond to existent key")]
    KeyReplacementExist,

    #[error("persistent saving is failed")]
    SaveFailed,

    #[error("serialized object is invalid.")]
    InvalidObject,

    #[error("metadata is corrupted.")]
    InvalidMetadata,

    #[error("no keys found.")]
    NoKeysFound,

    #[error("invalid argument.")]
    UnknownArgument,

    #[error("excedeed db space limit.")]
    ExceededSpaceLimit,

    // -------------------------------------------------------------------------
    // Codec Errors
    // -------------------------------------------------------------------------
    #[error("unexpected end of stream")]
    EndOfStream,

    #[error("unsupported field type")]
    UnsupportedType,

    // -------------------------------------------------------------------------
    // Session Errors
    // -------------------------------------------------------------------------
    #[error("compatible-version={0}")]
    UnmatchVersion(String),

    #[error("tls-handshake-fail")]
    HandshakeFail,

    #[error("auth-fail")]
    AuthFail,

    #[error("decryption-fail")]
    DecryptionFail,

    #[error("no-connection")]
    NoConnection,

    #[error("unknown")]
    Unknown,

    // -------------------------------------------------------------------------
    // Transport Errors
    // -------------------------------------------------------------------------
    #[error("invalid frame length: {0}")]
    InvalidLength(u64),

    #[error("connection reset by peer")]
    PeerReset,

    // -------------------------------------------------------------------------
    // Configuration / Startup Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),
}

impl RaptoError {
    /// Whether a connection thread should keep reading after this error.
    ///
    /// Timeouts, truncated frames, and out-of-range lengths are
    /// tolerated per the session contract; anything else terminates the
    /// connection. A fully closed socket surfaces as `PeerReset`, which
    /// is not recoverable, so a half-read frame retries at most once
    /// before the reset is seen.
    pub fn is_recoverable_read(&self) -> bool {
        match self {
            RaptoError::InvalidLength(_) | RaptoError::EndOfStream => true,
            RaptoError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolver_phrases_match_wire_text() {
        assert_eq!(RaptoError::KeyNotFound.to_string(), "key not found");
        assert_eq!(RaptoError::MismatchType.to_string(), "incompatible types");
        assert_eq!(
            RaptoError::ExceededSpaceLimit.to_string(),
            "excedeed db space limit."
        );
        assert_eq!(
            RaptoError::KeyReplacementExist.to_string(),
            "new name correspond to existent key"
        );
        assert_eq!(RaptoError::DecryptionFail.to_string(), "decryption-fail");
    }

    #[test]
    fn timeout_reads_are_recoverable() {
        let timeout = RaptoError::Io(std::io::Error::from(std::io::ErrorKind::WouldBlock));
        assert!(timeout.is_recoverable_read());
        assert!(RaptoError::InvalidLength(0).is_recoverable_read());
        assert!(RaptoError::EndOfStream.is_recoverable_read());
        assert!(!RaptoError::PeerReset.is_recoverable_read());
        assert!(!RaptoError::DecryptionFail.is_recoverable_read());
    }
}
