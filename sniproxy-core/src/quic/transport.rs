//! The opaque QUIC transport this crate drives (spec §4.3), plus the
//! deterministic test double used instead of a real QUIC implementation —
//! wiring an actual UDP-backed transport is out of scope here.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use super::error::QuicError;
use super::flusher::Buffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownDirection {
    Read,
    Write,
}

/// Every operation the session and flusher need from the underlying QUIC
/// connection object. A production adapter wraps a real QUIC connection
/// type; this crate only implements the trait boundary and the logic that
/// drives it.
pub trait QuicTransport: Send {
    fn feed_cipher(&mut self, bytes: &[u8]) -> Result<(), QuicError>;
    fn drain_cipher(&mut self, buf: &mut [u8]) -> Result<usize, QuicError>;
    fn feed_clear(&mut self, stream_id: u64, buf: &[u8]) -> Result<usize, QuicError>;
    fn drain_clear(&mut self, stream_id: u64, buf: &mut [u8]) -> Result<usize, QuicError>;
    fn feed_fin(&mut self, stream_id: u64);
    fn shutdown_stream(&mut self, stream_id: u64, direction: ShutdownDirection) -> Result<(), QuicError>;
    fn is_established(&self) -> bool;
    fn readable_stream_ids(&self) -> Vec<u64>;
    fn writable_stream_ids(&self) -> Vec<u64>;
    /// Milliseconds until the next timer should fire, or a negative value
    /// if no timer is currently needed.
    fn next_timeout(&self) -> i64;
    fn on_timeout(&mut self);
    fn is_connection_closed(&self) -> bool;
    /// Releases any native resources. Must be safe to call without a prior
    /// `feed_cipher`/`drain_cipher` call ever having succeeded.
    fn dispose(&mut self);
    /// The protocol negotiated over ALPN during the handshake, if any.
    /// Drives connection-factory selection on first stream creation
    /// (spec §4.3) — `None` before the handshake completes or when the
    /// peer offered no ALPN extension.
    fn alpn_protocol(&self) -> Option<String>;
}

/// Where the flusher sends drained ciphertext. A real deployment backs this
/// with a UDP socket and completes `on_complete` once the OS write finishes;
/// tests use `FakeSink`, which completes it inline.
pub trait DatagramSink: Send + Sync {
    fn send(&self, buffer: Buffer, on_complete: Box<dyn FnOnce(Buffer, Result<(), QuicError>) + Send>);
}

/// A synchronous, fully inspectable stand-in for a real QUIC connection.
/// Tests drive its fields directly to script a scenario, then hand it to a
/// `QuicSession` under test.
#[derive(Debug, Default)]
pub struct FakeTransport {
    pub established: bool,
    pub readable: Vec<u64>,
    pub writable: Vec<u64>,
    pub next_timeout_ms: i64,
    pub closed: bool,
    pub disposed: bool,
    pub timeouts_fired: u32,
    pub alpn: Option<String>,
    streams: HashMap<u64, VecDeque<u8>>,
    cipher_out: VecDeque<u8>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self {
            next_timeout_ms: -1,
            ..Default::default()
        }
    }

    /// Queues bytes that `drain_cipher` will hand back, simulating the
    /// transport having ciphertext ready to send.
    pub fn queue_cipher_out(&mut self, bytes: &[u8]) {
        self.cipher_out.extend(bytes);
    }
}

impl QuicTransport for FakeTransport {
    fn feed_cipher(&mut self, _bytes: &[u8]) -> Result<(), QuicError> {
        Ok(())
    }

    fn drain_cipher(&mut self, buf: &mut [u8]) -> Result<usize, QuicError> {
        let n = self.cipher_out.len().min(buf.len());
        for slot in buf.iter_mut().take(n) {
            *slot = self.cipher_out.pop_front().unwrap();
        }
        Ok(n)
    }

    fn feed_clear(&mut self, stream_id: u64, buf: &[u8]) -> Result<usize, QuicError> {
        self.streams.entry(stream_id).or_default().extend(buf);
        Ok(buf.len())
    }

    fn drain_clear(&mut self, stream_id: u64, buf: &mut [u8]) -> Result<usize, QuicError> {
        let Some(data) = self.streams.get_mut(&stream_id) else {
            return Ok(0);
        };
        let n = data.len().min(buf.len());
        for slot in buf.iter_mut().take(n) {
            *slot = data.pop_front().unwrap();
        }
        Ok(n)
    }

    fn feed_fin(&mut self, _stream_id: u64) {}

    fn shutdown_stream(&mut self, _stream_id: u64, _direction: ShutdownDirection) -> Result<(), QuicError> {
        Ok(())
    }

    fn is_established(&self) -> bool {
        self.established
    }

    fn readable_stream_ids(&self) -> Vec<u64> {
        self.readable.clone()
    }

    fn writable_stream_ids(&self) -> Vec<u64> {
        self.writable.clone()
    }

    fn next_timeout(&self) -> i64 {
        self.next_timeout_ms
    }

    fn on_timeout(&mut self) {
        self.timeouts_fired += 1;
    }

    fn is_connection_closed(&self) -> bool {
        self.closed
    }

    fn dispose(&mut self) {
        self.disposed = true;
    }

    fn alpn_protocol(&self) -> Option<String> {
        self.alpn.clone()
    }
}

/// Collects every datagram handed to it, in order, for assertions. Completes
/// every send inline, synchronously, so tests can assert on `sent()`
/// immediately after triggering an egress iteration.
#[derive(Default)]
pub struct FakeSink {
    sent: Mutex<Vec<Vec<u8>>>,
}

impl FakeSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().unwrap().clone()
    }
}

impl DatagramSink for FakeSink {
    fn send(&self, buffer: Buffer, on_complete: Box<dyn FnOnce(Buffer, Result<(), QuicError>) + Send>) {
        self.sent.lock().unwrap().push(buffer.data.clone());
        on_complete(buffer, Ok(()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_transport_round_trips_clear_bytes_per_stream() {
        let mut t = FakeTransport::new();
        t.feed_clear(4, b"hello").unwrap();
        let mut buf = [0u8; 16];
        let n = t.drain_clear(4, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello");
    }

    #[test]
    fn fake_transport_streams_are_independent() {
        let mut t = FakeTransport::new();
        t.feed_clear(0, b"a").unwrap();
        t.feed_clear(1, b"b").unwrap();
        let mut buf = [0u8; 1];
        assert_eq!(t.drain_clear(0, &mut buf).unwrap(), 1);
        assert_eq!(buf[0], b'a');
    }
}
