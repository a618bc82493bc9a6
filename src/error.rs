//! Error taxonomy for the wire protocol and storage engine.
//!
//! Transport errors (timeout, disconnect, short write) are fatal to the
//! current operation and never retried. Protocol errors tear down the
//! connection. Application-level rejections (`NO`, `NOPE`) travel over the
//! channel itself and surface here as `Rejected`.

use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, HikupError>;

#[derive(Debug, Error)]
pub enum HikupError {
    /// Socket read exceeded the configured receive timeout.
    #[error("receive timed out")]
    Timeout,

    /// Zero-length read: the peer closed the connection.
    #[error("peer disconnected")]
    Disconnected,

    #[error("transport error: {0}")]
    Io(#[from] io::Error),

    /// Wrong tag prefix, malformed hash list, unexpected message.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Key exchange failed (bad hex, bad key length, missing announcement).
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// Seal/open failure on an established channel.
    #[error("encryption error: {0}")]
    Crypto(String),

    /// Declared and computed content hashes disagree.
    #[error("hash mismatch: declared {declared}, computed {computed}")]
    HashMismatch { declared: String, computed: String },

    /// The peer refused the operation (`NO`, `NOPE`, or a reason string).
    #[error("rejected by peer: {0}")]
    Rejected(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("config error: {0}")]
    Config(String),
}

impl HikupError {
    /// True for errors that should tear down the whole connection rather
    /// than just fail the current operation.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            HikupError::Timeout
                | HikupError::Disconnected
                | HikupError::Io(_)
                | HikupError::Protocol(_)
                | HikupError::Handshake(_)
                | HikupError::Crypto(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatality_split() {
        assert!(HikupError::Timeout.is_fatal());
        assert!(HikupError::Disconnected.is_fatal());
        assert!(HikupError::Protocol("bad tag".into()).is_fatal());

        assert!(!HikupError::Rejected("NO".into()).is_fatal());
        assert!(!HikupError::HashMismatch {
            declared: "aa".into(),
            computed: "bb".into(),
        }
        .is_fatal());
    }
}
