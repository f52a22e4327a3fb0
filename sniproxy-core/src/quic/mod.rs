//! The QUIC session multiplexer: one driver per connection, dispatching
//! ingress work across an eat-what-you-kill executor and draining egress
//! through a single re-armable-timer flusher.
//!
//! ```text
//! QuicSession::on_ingress(addr, datagram)
//!     -> feeds ciphertext into the transport
//!     -> dispatches a writable-streams task + one readable-stream task per id
//!     -> QuicSession::flush()/fill() on stream endpoints re-enters the
//!        egress loop, which drains ciphertext and re-arms the timer
//! ```
//!
//! A production QUIC backend behind `QuicTransport` is out of scope; this
//! module implements the trait boundary and the session/flusher logic that
//! drives it, tested against `transport::FakeTransport`.

pub mod endpoint;
pub mod error;
pub mod executor;
pub mod factory;
pub mod flusher;
mod session;
pub mod transport;

pub use endpoint::{SessionHandle, StreamEndpoint};
pub use error::QuicError;
pub use executor::{InlineExecutor, SessionExecutor, TokioExecutor};
pub use factory::{ConnectionFactory, select_factory};
pub use flusher::{Buffer, BufferPool, Flusher, FlushAction, HeapBufferPool, ManualScheduler, Scheduler, TokioScheduler};
pub use session::QuicSession;
pub use transport::{DatagramSink, FakeSink, FakeTransport, QuicTransport, ShutdownDirection};
