//! Error kinds raised by the QPACK encoder.
//!
//! Mirrors the crate-wide split between per-stream and connection-fatal
//! failures (see `crate::quic::error::QuicError`): a bad header name kills
//! one stream, a decoder-stream protocol violation kills the connection.

use crate::error::H3ErrorCode;

/// Non-fatal to the connection: the offending stream is aborted with `code`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamException(pub H3ErrorCode);

impl std::fmt::Display for StreamException {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "stream error {}", self.0)
    }
}

impl std::error::Error for StreamException {}

/// Connection-fatal: the session must close with `code`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionException(pub H3ErrorCode);

impl std::fmt::Display for SessionException {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session error {}", self.0)
    }
}

impl std::error::Error for SessionException {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QpackError {
    Stream(StreamException),
    Session(SessionException),
}

impl QpackError {
    pub fn stream(code: H3ErrorCode) -> Self {
        QpackError::Stream(StreamException(code))
    }

    pub fn session(code: H3ErrorCode) -> Self {
        QpackError::Session(SessionException(code))
    }

    pub fn code(&self) -> H3ErrorCode {
        match self {
            QpackError::Stream(e) => e.0,
            QpackError::Session(e) => e.0,
        }
    }
}

impl std::fmt::Display for QpackError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QpackError::Stream(e) => write!(f, "{e}"),
            QpackError::Session(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for QpackError {}
