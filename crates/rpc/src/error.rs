//! Error types for RPC sessions.
//!
//! Errors fall in two groups. Protocol errors (bad frames, unexpected
//! message types, malformed payloads) terminate the session they occur
//! in. Remote errors are the `Error` strings carried by a `Return` and
//! only fail the call that produced them, unless the return is fatal.

use thiserror::Error;

/// Errors that can occur while driving or serving an RPC session.
#[derive(Debug, Error)]
pub enum Error {
    /// IO error on the underlying stream
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A frame could not be (de)serialized
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A received line failed the sanitization check
    #[error("{side} received invalid data: {preview}")]
    Unsanitized {
        /// Which end of the session rejected the frame
        side: &'static str,
        /// Escaped prefix of the offending line
        preview: String,
    },

    /// A well-formed frame of a type this side never accepts
    #[error("{side} received unexpected message type: {kind}")]
    UnexpectedMessage {
        /// Which end of the session rejected the frame
        side: &'static str,
        /// The type tag that was received
        kind: String,
    },

    /// The executing side reported an error for a call
    #[error("{0}")]
    Remote(String),

    /// The executing side reported an unrecoverable failure and is exiting
    #[error("fatal: {0}")]
    Fatal(String),

    /// The session ended while a call was waiting for its return
    #[error("session closed: {0}")]
    Closed(String),

    /// An executor name was registered twice
    #[error("{0} is already registered")]
    AlreadyRegistered(String),

    /// No executor is registered under the requested name
    #[error("invalid function: {0}")]
    UnknownFunction(String),

    /// A forwarded log record carried a level we do not know
    #[error("invalid log level: {0}")]
    InvalidLevel(String),
}

impl Error {
    /// Whether this error ends the session it occurred in.
    pub fn is_session_terminal(&self) -> bool {
        !matches!(
            self,
            Self::Remote(_) | Self::AlreadyRegistered(_) | Self::UnknownFunction(_)
        )
    }
}

/// Result alias for RPC operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_is_not_terminal() {
        assert!(!Error::Remote("boom".into()).is_session_terminal());
        assert!(Error::Fatal("boom".into()).is_session_terminal());
        assert!(Error::Closed("eof".into()).is_session_terminal());
    }

    #[test]
    fn test_remote_error_message_is_verbatim() {
        assert_eq!(Error::Remote("no such file".into()).to_string(), "no such file");
    }
}
