//! Error kinds raised by the QUIC session (see `crate::qpack::error` for the
//! encoder's mirror of this same per-stream / connection-fatal split).

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

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuicError {
    Stream(StreamException),
    Session(SessionException),
    /// Surfaced by the transport itself; the session closes and notifies
    /// the listener with the attached message.
    Transport(String),
    /// Buffer/pool acquisition failure: logged, the current iteration fails,
    /// the session stays open.
    Resource,
    /// `create_stream` called for a stream id that already has an endpoint.
    DuplicateStream(u64),
    /// A decoder-stream-style instruction referenced a stream with no
    /// tracked endpoint.
    UnknownStream(u64),
}

impl QuicError {
    pub fn stream(code: H3ErrorCode) -> Self {
        QuicError::Stream(StreamException(code))
    }

    pub fn session(code: H3ErrorCode) -> Self {
        QuicError::Session(SessionException(code))
    }
}

impl std::fmt::Display for QuicError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QuicError::Stream(e) => write!(f, "{e}"),
            QuicError::Session(e) => write!(f, "{e}"),
            QuicError::Transport(msg) => write!(f, "transport error: {msg}"),
            QuicError::Resource => write!(f, "resource acquisition failed"),
            QuicError::DuplicateStream(id) => write!(f, "stream {id} already has an endpoint"),
            QuicError::UnknownStream(id) => write!(f, "no endpoint tracked for stream {id}"),
        }
    }
}

impl std::error::Error for QuicError {}
