//! Session Executor (spec component C7): the "eat-what-you-kill" dispatch
//! policy from `QuicSession::on_ingress` behind a trait, so tests get
//! deterministic ordering without a real thread pool.

/// A unit of session work queued by `on_ingress`. Must not block; it may
/// re-enter the session (e.g. via `flush`).
pub type Task = Box<dyn FnOnce() + Send>;

pub trait SessionExecutor: Send + Sync {
    /// Runs `task` synchronously on the calling thread.
    fn run_inline(&self, task: Task);
    /// Hands `task` off for execution, possibly on another thread.
    fn submit(&self, task: Task);
}

/// Runs every task synchronously on the calling thread. Used by tests
/// (ordering assertions don't depend on a real thread pool) and by anyone
/// who wants fully deterministic dispatch.
pub struct InlineExecutor;

impl SessionExecutor for InlineExecutor {
    fn run_inline(&self, task: Task) {
        task();
    }

    fn submit(&self, task: Task) {
        task();
    }
}

/// The first task of an ingress batch runs inline on the caller's thread
/// (matching "the ingress thread itself runs the first task"); subsequent
/// tasks are `tokio::spawn`ed onto the runtime's worker pool, the same
/// reliance on `tokio::spawn` the teacher's `connection.rs`/`lib.rs` use for
/// connection-level concurrency.
pub struct TokioExecutor;

impl SessionExecutor for TokioExecutor {
    fn run_inline(&self, task: Task) {
        task();
    }

    fn submit(&self, task: Task) {
        tokio::spawn(async move { task() });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn inline_executor_runs_everything_synchronously() {
        let counter = Arc::new(AtomicUsize::new(0));
        let executor = InlineExecutor;

        let c = counter.clone();
        executor.run_inline(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        let c = counter.clone();
        executor.submit(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));

        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }
}
