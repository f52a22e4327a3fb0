//! Stream Endpoint (spec component C6): a byte-stream view onto one QUIC
//! stream, forwarding every operation to the owning session.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Weak};

use super::error::QuicError;

/// What a `StreamEndpoint` needs from its owning session. `QuicSession<T>`
/// implements this; the endpoint holds only a non-owning `Weak` handle to
/// it, resolving the session/endpoint cyclic reference the data model
/// flags (the session owns its endpoints outright, endpoints point back by
/// handle, not by owning reference).
pub trait SessionHandle: Send + Sync {
    fn fill(&self, stream_id: u64, buf: &[u8]) -> Result<usize, QuicError>;
    fn flush(&self, stream_id: u64, buf: &mut [u8]) -> Result<usize, QuicError>;
    fn shutdown_input(&self, stream_id: u64) -> Result<(), QuicError>;
    fn shutdown_output(&self, stream_id: u64) -> Result<(), QuicError>;
    fn is_finished(&self, stream_id: u64) -> bool;
    fn flush_finished(&self, stream_id: u64);
    fn remove_endpoint(&self, stream_id: u64);
}

pub struct StreamEndpoint {
    stream_id: u64,
    session: Weak<dyn SessionHandle>,
    /// The upper protocol's consumer, registered via `set_reader`. While
    /// unset, drained bytes queue up in `backlog` instead of being lost.
    reader: Mutex<Option<Box<dyn FnMut(&[u8]) + Send>>>,
    backlog: Mutex<VecDeque<u8>>,
}

impl StreamEndpoint {
    pub fn new(stream_id: u64, session: Weak<dyn SessionHandle>) -> Self {
        Self {
            stream_id,
            session,
            reader: Mutex::new(None),
            backlog: Mutex::new(VecDeque::new()),
        }
    }

    /// Registers the upper protocol's byte consumer, immediately replaying
    /// any bytes already queued in the backlog to it. A later call replaces
    /// the previous reader.
    pub fn set_reader(&self, mut reader: Box<dyn FnMut(&[u8]) + Send>) {
        let backlog: Vec<u8> = self.backlog.lock().unwrap().drain(..).collect();
        if !backlog.is_empty() {
            reader(&backlog);
        }
        *self.reader.lock().unwrap() = Some(reader);
    }

    /// Drains and returns whatever bytes have queued up with no reader
    /// registered. Callers that poll rather than register a reader (e.g.
    /// a direct `StreamEndpoint::flush`-style consumer) use this instead.
    pub fn take_backlog(&self) -> Vec<u8> {
        self.backlog.lock().unwrap().drain(..).collect()
    }

    /// Hands `bytes` to the registered reader, or queues them if none is
    /// registered yet.
    fn deliver(&self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let mut reader = self.reader.lock().unwrap();
        match reader.as_mut() {
            Some(reader) => reader(bytes),
            None => self.backlog.lock().unwrap().extend(bytes),
        }
    }

    pub fn stream_id(&self) -> u64 {
        self.stream_id
    }

    pub fn fill(&self, buf: &[u8]) -> Result<usize, QuicError> {
        self.with_session(|session| session.fill(self.stream_id, buf))
    }

    pub fn flush(&self, buf: &mut [u8]) -> Result<usize, QuicError> {
        self.with_session(|session| session.flush(self.stream_id, buf))
    }

    pub fn shutdown_input(&self) -> Result<(), QuicError> {
        self.with_session(|session| session.shutdown_input(self.stream_id))
    }

    pub fn shutdown_output(&self) -> Result<(), QuicError> {
        self.with_session(|session| session.shutdown_output(self.stream_id))
    }

    pub fn is_finished(&self) -> bool {
        match self.session.upgrade() {
            Some(session) => session.is_finished(self.stream_id),
            None => true,
        }
    }

    /// Returns a runnable the dispatch executor runs to drain this stream's
    /// available bytes. Each call to `on_ingress` that sees this stream
    /// readable produces a fresh one of these. Drained bytes are handed to
    /// `deliver` — the registered reader if one exists, the backlog
    /// otherwise — rather than discarded, since `flush` destructively pops
    /// them off the transport's stream queue.
    pub fn on_readable(self: &Arc<Self>) -> Box<dyn FnOnce() + Send> {
        let endpoint = self.clone();
        Box::new(move || {
            let Some(session) = endpoint.session.upgrade() else {
                return;
            };
            let mut buf = [0u8; 4096];
            loop {
                match session.flush(endpoint.stream_id, &mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => endpoint.deliver(&buf[..n]),
                }
            }
        })
    }

    /// Wakes any task waiting to write more to this stream. With no real
    /// waker registry in this crate's scope, the session's own egress loop
    /// (re-entered on every `flush`/timer tick) already covers this, so
    /// there's nothing further to do here.
    pub fn on_writable(&self) {}

    pub fn close(&self) {
        if let Some(session) = self.session.upgrade() {
            session.flush_finished(self.stream_id);
            session.remove_endpoint(self.stream_id);
        }
    }

    fn with_session<R>(&self, f: impl FnOnce(&std::sync::Arc<dyn SessionHandle>) -> Result<R, QuicError>) -> Result<R, QuicError> {
        match self.session.upgrade() {
            Some(session) => f(&session),
            None => Err(QuicError::UnknownStream(self.stream_id)),
        }
    }
}
