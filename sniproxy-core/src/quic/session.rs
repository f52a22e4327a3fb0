//! QUIC Session (spec component C4): the per-connection driver tying the
//! transport, the stream endpoints, the executor, and the flusher together.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use dashmap::DashMap;
use tracing::{info, warn};

use super::endpoint::{SessionHandle, StreamEndpoint};
use super::error::QuicError;
use super::executor::{SessionExecutor, Task};
use super::factory::ConnectionFactory;
use super::flusher::{Flusher, FlushAction, QUICHE_MIN_CLIENT_INITIAL_LEN};
use super::transport::{DatagramSink, QuicTransport, ShutdownDirection};
use crate::error::H3ErrorCode;
use sniproxy_config::QuicConfig;

struct SessionCore<T: QuicTransport> {
    transport: Mutex<T>,
    remote_addr: Mutex<SocketAddr>,
    local_addr: SocketAddr,
    connection_id: u64,
    endpoints: DashMap<u64, Arc<StreamEndpoint>>,
    flusher: Flusher,
    sink: Arc<dyn DatagramSink>,
    executor: Arc<dyn SessionExecutor>,
    max_concurrent_streams: u32,
    closed: AtomicBool,
    /// Picks the upper-layer handler for a stream by the transport's
    /// negotiated ALPN protocol. Empty means no enforcement: every stream
    /// is created with no factory notified (the test-double-only path most
    /// unit tests exercise).
    factories: Vec<Arc<dyn ConnectionFactory>>,
}

impl<T: QuicTransport + 'static> SessionCore<T> {
    fn fill(&self, stream_id: u64, buf: &[u8]) -> Result<usize, QuicError> {
        self.transport.lock().unwrap().feed_clear(stream_id, buf)
    }

    fn flush(&self, stream_id: u64, buf: &mut [u8]) -> Result<usize, QuicError> {
        let n = self.transport.lock().unwrap().drain_clear(stream_id, buf)?;
        Ok(n)
    }

    fn shutdown_input(&self, stream_id: u64) -> Result<(), QuicError> {
        self.transport.lock().unwrap().shutdown_stream(stream_id, ShutdownDirection::Read)
    }

    fn shutdown_output(&self, stream_id: u64) -> Result<(), QuicError> {
        self.transport.lock().unwrap().shutdown_stream(stream_id, ShutdownDirection::Write)
    }

    fn is_finished(&self, stream_id: u64) -> bool {
        !self.endpoints.contains_key(&stream_id)
    }

    fn flush_finished(&self, stream_id: u64) {
        self.transport.lock().unwrap().feed_fin(stream_id);
    }

    fn remove_endpoint(&self, stream_id: u64) {
        self.endpoints.remove(&stream_id);
    }

    /// One flusher iteration: drain ciphertext, re-arm the timer, and send
    /// if there's anything drained. Closes the session if the transport
    /// reports the connection closed with nothing left to drain. The send
    /// itself is asynchronous (spec §4.3): this returns `Scheduled` as soon
    /// as the buffer has been handed to the sink, and the buffer is only
    /// released, with iteration resumed, once `on_complete` fires — which
    /// may be inline (as `FakeSink` does) or from another thread entirely.
    fn egress_iterate(self: &Arc<Self>) -> FlushAction {
        let mut buffer = self.flusher.acquire(QUICHE_MIN_CLIENT_INITIAL_LEN);
        let drained = self.transport.lock().unwrap().drain_cipher(&mut buffer.data);

        let next_timeout = self.transport.lock().unwrap().next_timeout();
        let weak_self = Arc::downgrade(self);
        self.flusher.rearm(
            next_timeout,
            Box::new(move || {
                if let Some(core) = weak_self.upgrade() {
                    core.transport.lock().unwrap().on_timeout();
                    core.egress_iterate();
                }
            }),
        );

        let drained = match drained {
            Ok(n) => n,
            Err(e) => {
                self.flusher.release(buffer);
                warn!(connection_id = self.connection_id, error = %e, "ciphertext drain failed");
                return FlushAction::Idle;
            }
        };

        if drained == 0 {
            self.flusher.release(buffer);
            if self.transport.lock().unwrap().is_connection_closed() {
                self.close();
            }
            return FlushAction::Idle;
        }

        buffer.data.truncate(drained);
        let connection_id = self.connection_id;
        let weak_self = Arc::downgrade(self);
        self.sink.send(
            buffer,
            Box::new(move |buffer, result| {
                let Some(core) = weak_self.upgrade() else {
                    return;
                };
                core.flusher.release(buffer);
                match result {
                    Ok(()) => {
                        core.egress_iterate();
                    }
                    Err(e) => {
                        warn!(connection_id, error = %e, "datagram send failed");
                    }
                }
            }),
        );
        FlushAction::Scheduled
    }

    /// Idempotent: the transport is disposed exactly once regardless of how
    /// many times this is called.
    fn close(self: &Arc<Self>) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.endpoints.clear();
        self.flusher.rearm(-1, Box::new(|| {}));
        self.transport.lock().unwrap().dispose();
        info!(connection_id = self.connection_id, "quic session closed");
    }
}

impl<T: QuicTransport + 'static> SessionHandle for SessionCore<T> {
    fn fill(&self, stream_id: u64, buf: &[u8]) -> Result<usize, QuicError> {
        SessionCore::fill(self, stream_id, buf)
    }

    fn flush(&self, stream_id: u64, buf: &mut [u8]) -> Result<usize, QuicError> {
        SessionCore::flush(self, stream_id, buf)
    }

    fn shutdown_input(&self, stream_id: u64) -> Result<(), QuicError> {
        SessionCore::shutdown_input(self, stream_id)
    }

    fn shutdown_output(&self, stream_id: u64) -> Result<(), QuicError> {
        SessionCore::shutdown_output(self, stream_id)
    }

    fn is_finished(&self, stream_id: u64) -> bool {
        SessionCore::is_finished(self, stream_id)
    }

    fn flush_finished(&self, stream_id: u64) {
        SessionCore::flush_finished(self, stream_id);
    }

    fn remove_endpoint(&self, stream_id: u64) {
        SessionCore::remove_endpoint(self, stream_id);
    }
}

/// Per-connection QUIC driver (spec component C4). Cheap to clone — clones
/// share the same underlying state via `Arc`.
pub struct QuicSession<T: QuicTransport>(Arc<SessionCore<T>>);

impl<T: QuicTransport> Clone for QuicSession<T> {
    fn clone(&self) -> Self {
        QuicSession(self.0.clone())
    }
}

impl<T: QuicTransport + 'static> QuicSession<T> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        connection_id: u64,
        remote_addr: SocketAddr,
        local_addr: SocketAddr,
        transport: T,
        sink: Arc<dyn DatagramSink>,
        executor: Arc<dyn SessionExecutor>,
        flusher: Flusher,
        config: &QuicConfig,
        factories: Vec<Arc<dyn ConnectionFactory>>,
    ) -> Self {
        QuicSession(Arc::new(SessionCore {
            transport: Mutex::new(transport),
            remote_addr: Mutex::new(remote_addr),
            local_addr,
            connection_id,
            endpoints: DashMap::new(),
            flusher,
            sink,
            executor,
            max_concurrent_streams: config.max_concurrent_streams,
            closed: AtomicBool::new(false),
            factories,
        }))
    }

    pub fn connection_id(&self) -> u64 {
        self.0.connection_id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        *self.0.remote_addr.lock().unwrap()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.0.local_addr
    }

    fn handle(&self) -> Weak<dyn SessionHandle> {
        Arc::downgrade(&self.0)
    }

    /// The single canonical creation site for stream endpoints: both
    /// `on_ingress`'s lazy lookups and `create_stream`'s explicit creation
    /// funnel through here. When factories are configured, the transport's
    /// negotiated ALPN protocol must match one of them or the session closes
    /// with a protocol error (spec §4.3/C4) — an endpoint with no upper-layer
    /// handler able to claim it is a configuration mistake, not a retryable
    /// condition.
    pub fn get_or_create_endpoint(&self, stream_id: u64) -> Result<Arc<StreamEndpoint>, QuicError> {
        if let Some(existing) = self.0.endpoints.get(&stream_id) {
            return Ok(existing.clone());
        }

        let factory = if self.0.factories.is_empty() {
            None
        } else {
            let alpn = self.0.transport.lock().unwrap().alpn_protocol();
            match super::factory::select_factory(&self.0.factories, alpn.as_deref()) {
                Some(factory) => Some(factory.clone()),
                None => {
                    warn!(stream_id, alpn = ?alpn, "no connection factory matches negotiated ALPN protocol");
                    self.0.close();
                    return Err(QuicError::session(H3ErrorCode::H3_GENERAL_PROTOCOL_ERROR));
                }
            }
        };

        if self.0.endpoints.len() as u32 >= self.0.max_concurrent_streams {
            warn!(
                stream_id,
                limit = self.0.max_concurrent_streams,
                "exceeding configured concurrent-stream soft cap"
            );
        }
        let endpoint = Arc::new(StreamEndpoint::new(stream_id, self.handle()));
        self.0.endpoints.insert(stream_id, endpoint.clone());
        if let Some(factory) = factory {
            factory.on_stream_created(&endpoint);
        }
        Ok(endpoint)
    }

    /// Explicit creation: unlike `get_or_create_endpoint`, this fails if the
    /// stream already has one. Callers that want idempotent lookup (e.g.
    /// `on_ingress`) should call `get_or_create_endpoint` directly instead.
    pub fn create_stream(&self, stream_id: u64) -> Result<Arc<StreamEndpoint>, QuicError> {
        if self.0.endpoints.contains_key(&stream_id) {
            return Err(QuicError::DuplicateStream(stream_id));
        }
        self.get_or_create_endpoint(stream_id)
    }

    /// Feeds one ingress datagram, then dispatches the resulting work: a
    /// single task for all writable streams, one task per readable stream,
    /// in that order. The ingress thread runs the first task inline; the
    /// rest are submitted to the executor.
    pub fn on_ingress(&self, remote_addr: SocketAddr, datagram: &[u8]) -> Result<(), QuicError> {
        *self.0.remote_addr.lock().unwrap() = remote_addr;
        self.0.transport.lock().unwrap().feed_cipher(datagram)?;

        let established = self.0.transport.lock().unwrap().is_established();
        if !established {
            self.0.egress_iterate();
            return Ok(());
        }

        let (writable, readable) = {
            let transport = self.0.transport.lock().unwrap();
            (transport.writable_stream_ids(), transport.readable_stream_ids())
        };

        let mut tasks: Vec<Task> = Vec::new();
        if !writable.is_empty() {
            let session = self.clone();
            tasks.push(Box::new(move || session.drain_writable(&writable)));
        }
        for stream_id in readable {
            let session = self.clone();
            tasks.push(Box::new(move || session.drain_readable(stream_id)));
        }

        let mut tasks = tasks.into_iter();
        if let Some(first) = tasks.next() {
            self.0.executor.run_inline(first);
        }
        for task in tasks {
            self.0.executor.submit(task);
        }
        Ok(())
    }

    fn drain_writable(&self, stream_ids: &[u64]) {
        for &id in stream_ids {
            if let Some(endpoint) = self.0.endpoints.get(&id) {
                endpoint.on_writable();
            }
        }
    }

    fn drain_readable(&self, stream_id: u64) {
        if let Some(endpoint) = self.0.endpoints.get(&stream_id) {
            let endpoint = endpoint.clone();
            (endpoint.on_readable())();
        }
    }

    pub fn shutdown_input(&self, stream_id: u64) -> Result<(), QuicError> {
        self.0.shutdown_input(stream_id)
    }

    pub fn shutdown_output(&self, stream_id: u64) -> Result<(), QuicError> {
        self.0.shutdown_output(stream_id)
    }

    pub fn fill(&self, stream_id: u64, buf: &[u8]) -> Result<usize, QuicError> {
        self.0.fill(stream_id, buf)
    }

    /// Drains cleartext for `stream_id` into `buf`, then re-runs the egress
    /// loop (spec: "flush(id, buf) -> n (with implicit egress flush)").
    pub fn flush(&self, stream_id: u64, buf: &mut [u8]) -> Result<usize, QuicError> {
        let n = self.0.flush(stream_id, buf)?;
        self.0.egress_iterate();
        Ok(n)
    }

    pub fn flush_finished(&self, stream_id: u64) {
        self.0.flush_finished(stream_id);
    }

    pub fn is_finished(&self, stream_id: u64) -> bool {
        self.0.is_finished(stream_id)
    }

    /// Fired by the flusher's timer; calls `transport.on_timeout()` then
    /// re-enters the egress loop.
    pub fn on_timer_fired(&self) {
        self.0.transport.lock().unwrap().on_timeout();
        self.0.egress_iterate();
    }

    /// Closes every endpoint, stops the flusher's timer, and disposes the
    /// transport exactly once. Idempotent: a second call is a no-op.
    pub fn close(&self) {
        self.0.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quic::executor::InlineExecutor;
    use crate::quic::flusher::{Flusher, HeapBufferPool, ManualScheduler};
    use crate::quic::transport::{FakeSink, FakeTransport};
    use std::net::{IpAddr, Ipv4Addr};

    fn addr() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 4433)
    }

    fn config() -> QuicConfig {
        QuicConfig {
            max_concurrent_streams: 100,
            max_idle_timeout_ms: 30_000,
            max_datagram_size: 1350,
        }
    }

    fn new_session(transport: FakeTransport) -> (QuicSession<FakeTransport>, Arc<FakeSink>) {
        let sink = Arc::new(FakeSink::new());
        let flusher = Flusher::new(Arc::new(HeapBufferPool), Arc::new(ManualScheduler::new()));
        let session = QuicSession::new(
            1,
            addr(),
            addr(),
            transport,
            sink.clone(),
            Arc::new(InlineExecutor),
            flusher,
            &config(),
            Vec::new(),
        );
        (session, sink)
    }

    #[test]
    fn get_or_create_endpoint_is_idempotent() {
        let (session, _sink) = new_session(FakeTransport::new());
        let a = session.get_or_create_endpoint(4).unwrap();
        let b = session.get_or_create_endpoint(4).unwrap();
        assert_eq!(a.stream_id(), b.stream_id());
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn create_stream_rejects_duplicates() {
        let (session, _sink) = new_session(FakeTransport::new());
        session.create_stream(4).unwrap();
        assert!(matches!(session.create_stream(4), Err(QuicError::DuplicateStream(4))));
    }

    struct RecordingFactory {
        proto: &'static str,
        created: Mutex<Vec<u64>>,
    }

    impl ConnectionFactory for RecordingFactory {
        fn protocol(&self) -> &str {
            self.proto
        }
        fn on_stream_created(&self, endpoint: &Arc<StreamEndpoint>) {
            self.created.lock().unwrap().push(endpoint.stream_id());
        }
    }

    fn new_session_with_factories(
        transport: FakeTransport,
        factories: Vec<Arc<dyn ConnectionFactory>>,
    ) -> (QuicSession<FakeTransport>, Arc<FakeSink>) {
        let sink = Arc::new(FakeSink::new());
        let flusher = Flusher::new(Arc::new(HeapBufferPool), Arc::new(ManualScheduler::new()));
        let session = QuicSession::new(
            1,
            addr(),
            addr(),
            transport,
            sink.clone(),
            Arc::new(InlineExecutor),
            flusher,
            &config(),
            factories,
        );
        (session, sink)
    }

    #[test]
    fn matching_alpn_notifies_the_selected_factory() {
        let mut transport = FakeTransport::new();
        transport.alpn = Some("h3".to_string());
        let factory = Arc::new(RecordingFactory {
            proto: "h3",
            created: Mutex::new(Vec::new()),
        });
        let (session, _sink) = new_session_with_factories(transport, vec![factory.clone()]);

        session.get_or_create_endpoint(4).unwrap();
        assert_eq!(*factory.created.lock().unwrap(), vec![4]);
    }

    #[test]
    fn unmatched_alpn_closes_the_session_with_a_protocol_error() {
        let mut transport = FakeTransport::new();
        transport.alpn = Some("spdy".to_string());
        let factory: Arc<dyn ConnectionFactory> = Arc::new(RecordingFactory {
            proto: "h3",
            created: Mutex::new(Vec::new()),
        });
        let (session, _sink) = new_session_with_factories(transport, vec![factory]);

        let err = session.get_or_create_endpoint(4).unwrap_err();
        assert!(matches!(err, QuicError::Session(_)));
        assert!(session.0.closed.load(Ordering::SeqCst));
    }

    #[test]
    fn close_is_idempotent_and_disposes_transport_once() {
        let (session, _sink) = new_session(FakeTransport::new());
        session.close();
        session.close();
        // Dispose runs inside the transport, which we can't inspect after
        // being moved into the session; idempotence is exercised via the
        // `closed` flag guarding every call, so a second close must be a
        // pure no-op (no panic, no double-dispose).
    }

    #[test]
    fn on_ingress_before_established_triggers_a_direct_flush() {
        let mut transport = FakeTransport::new();
        transport.established = false;
        transport.queue_cipher_out(b"short-flight");
        let (session, sink) = new_session(transport);

        session.on_ingress(addr(), b"client-initial").unwrap();
        assert_eq!(sink.sent(), vec![b"short-flight".to_vec()]);
    }
}
