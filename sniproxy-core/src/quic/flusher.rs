//! The flusher (spec component C5): a single-writer state machine that
//! drains ciphertext from the transport, re-arms the session's one
//! outstanding timer, and hands drained bytes to a datagram sink.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

/// Minimum client-initial-sized buffer the flusher acquires per iteration,
/// named after the constant of the same purpose in real QUIC stacks.
pub const QUICHE_MIN_CLIENT_INITIAL_LEN: usize = 1200;

#[derive(Debug)]
pub struct Buffer {
    pub data: Vec<u8>,
}

impl Buffer {
    pub fn new(capacity: usize) -> Self {
        Self { data: vec![0u8; capacity] }
    }
}

pub trait BufferPool: Send + Sync {
    fn acquire(&self, min_capacity: usize) -> Buffer;
    fn release(&self, buffer: Buffer);
}

/// Plain heap allocation per acquire, no pooling. Sufficient for this
/// crate's scope; a production deployment would back this with a real
/// pool (arena, slab, or the transport library's own buffers).
pub struct HeapBufferPool;

impl BufferPool for HeapBufferPool {
    fn acquire(&self, min_capacity: usize) -> Buffer {
        Buffer::new(min_capacity.max(QUICHE_MIN_CLIENT_INITIAL_LEN))
    }

    fn release(&self, _buffer: Buffer) {}
}

pub trait Scheduler: Send + Sync {
    /// Arms a one-shot timer for `millis` from now, replacing any
    /// previously armed timer. `on_fire` runs when it expires unless
    /// cancelled first.
    fn arm(&self, millis: u64, on_fire: Box<dyn FnOnce() + Send>);
    fn cancel(&self);
}

/// Deterministic scheduler for tests: records the last-armed duration and
/// how many times `cancel` ran, without a background thread or clock.
#[derive(Default)]
pub struct ManualScheduler {
    armed_millis: Mutex<Option<u64>>,
    cancels: AtomicU32,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn armed_millis(&self) -> Option<u64> {
        *self.armed_millis.lock().unwrap()
    }

    pub fn cancel_count(&self) -> u32 {
        self.cancels.load(Ordering::SeqCst)
    }
}

impl Scheduler for ManualScheduler {
    fn arm(&self, millis: u64, _on_fire: Box<dyn FnOnce() + Send>) {
        *self.armed_millis.lock().unwrap() = Some(millis);
    }

    fn cancel(&self) {
        *self.armed_millis.lock().unwrap() = None;
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }
}

/// Backs the timer with `tokio::time::sleep` on a spawned task; `arm`
/// always cancels the previous handle first, so at most one timer is ever
/// outstanding.
#[derive(Default)]
pub struct TokioScheduler {
    handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl TokioScheduler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Scheduler for TokioScheduler {
    fn arm(&self, millis: u64, on_fire: Box<dyn FnOnce() + Send>) {
        self.cancel();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(millis)).await;
            on_fire();
        });
        *self.handle.lock().unwrap() = Some(handle);
    }

    fn cancel(&self) {
        if let Some(handle) = self.handle.lock().unwrap().take() {
            handle.abort();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushAction {
    /// No more ciphertext to emit; the caller re-iterates on the next event.
    Idle,
    /// A write is in flight; the buffer has already been released either
    /// way by the time this is returned.
    Scheduled,
}

/// Owns the buffer pool and the session's single re-armable timer.
/// `QuicSession` drives the actual drain/send decision (it alone holds the
/// transport and the datagram sink); this type is the shared, independently
/// testable state machine underneath that loop.
pub struct Flusher {
    pool: std::sync::Arc<dyn BufferPool>,
    scheduler: std::sync::Arc<dyn Scheduler>,
}

impl Flusher {
    pub fn new(pool: std::sync::Arc<dyn BufferPool>, scheduler: std::sync::Arc<dyn Scheduler>) -> Self {
        Self { pool, scheduler }
    }

    pub fn acquire(&self, min_capacity: usize) -> Buffer {
        self.pool.acquire(min_capacity)
    }

    pub fn release(&self, buffer: Buffer) {
        self.pool.release(buffer);
    }

    /// Re-arms the timer to `next_timeout_ms`, cancelling it if negative.
    pub fn rearm(&self, next_timeout_ms: i64, on_fire: Box<dyn FnOnce() + Send>) {
        if next_timeout_ms < 0 {
            self.scheduler.cancel();
        } else {
            self.scheduler.arm(next_timeout_ms as u64, on_fire);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn rearm_with_negative_timeout_cancels() {
        let scheduler = Arc::new(ManualScheduler::new());
        let flusher = Flusher::new(Arc::new(HeapBufferPool), scheduler.clone());

        flusher.rearm(100, Box::new(|| {}));
        assert_eq!(scheduler.armed_millis(), Some(100));

        flusher.rearm(-1, Box::new(|| {}));
        assert_eq!(scheduler.armed_millis(), None);
        assert_eq!(scheduler.cancel_count(), 1);
    }

    #[test]
    fn rearm_replaces_previous_timer_leaving_only_one_active() {
        let scheduler = Arc::new(ManualScheduler::new());
        let flusher = Flusher::new(Arc::new(HeapBufferPool), scheduler.clone());

        flusher.rearm(100, Box::new(|| {}));
        flusher.rearm(50, Box::new(|| {}));
        assert_eq!(scheduler.armed_millis(), Some(50));
    }

    #[test]
    fn buffer_acquire_respects_minimum_initial_length() {
        let pool = HeapBufferPool;
        let buf = pool.acquire(10);
        assert!(buf.data.len() >= QUICHE_MIN_CLIENT_INITIAL_LEN);
    }
}
