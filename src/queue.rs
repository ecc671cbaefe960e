use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::mpsc::{self, Sender};
use std::thread::ThreadId;
use tracing::error;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A serial execution context: a dedicated thread draining a job channel.
///
/// Handles are cheap to clone and all feed the same thread, so jobs enqueued
/// from any handle run strictly in order. The thread exits once every handle
/// is dropped.
#[derive(Clone)]
pub struct SerialQueue {
    tx: Sender<Job>,
    thread: ThreadId,
    label: Arc<str>,
}

impl SerialQueue {
    pub fn new(label: &str) -> Self {
        let (tx, rx) = mpsc::channel::<Job>();
        let handle = std::thread::Builder::new()
            .name(label.to_string())
            .spawn(move || {
                while let Ok(job) = rx.recv() {
                    if catch_unwind(AssertUnwindSafe(job)).is_err() {
                        error!("serial queue job panicked");
                    }
                }
            })
            .expect("spawn serial queue thread");
        Self {
            tx,
            thread: handle.thread().id(),
            label: label.into(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// True when the caller is already executing on this queue.
    pub fn is_current(&self) -> bool {
        std::thread::current().id() == self.thread
    }

    /// Enqueues a job without waiting for it.
    pub fn dispatch(&self, job: impl FnOnce() + Send + 'static) {
        if self.tx.send(Box::new(job)).is_err() {
            error!(label = %self.label, "serial queue is gone; job dropped");
        }
    }

    /// Runs a job on the queue and blocks for its result. Executes inline
    /// when already on the queue, so reentrant calls cannot deadlock.
    pub fn run<T, F>(&self, job: F) -> T
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        if self.is_current() {
            return job();
        }
        let (tx, rx) = mpsc::channel();
        self.dispatch(move || {
            let _ = tx.send(job());
        });
        rx.recv()
            .expect("serial queue dropped a synchronous job; did it panic?")
    }
}
