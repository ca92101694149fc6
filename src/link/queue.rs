//! Transaction serialization.
//!
//! The board is half-duplex and conversational: if two exchanges were in
//! flight at once their response lines would interleave and no grammar could
//! pull them apart. [`CommandQueue::atomic`] therefore runs submitted jobs one
//! at a time, strictly in submission order, on a dedicated runner task.
//!
//! Submission happens synchronously inside `atomic`, not when the returned
//! future is first polled, so the order of `atomic` calls is the order of
//! execution even if the caller never awaits the result.

use crate::error::{HatError, HatResult};
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{trace, warn};

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

/// FIFO queue of transactions with exactly one in flight.
pub struct CommandQueue {
    tx: mpsc::UnboundedSender<Job>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Job>>>,
    pending: Arc<AtomicUsize>,
}

impl CommandQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of transactions submitted but not yet finished.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Enqueue `job` and return a future resolving to its result.
    ///
    /// `job` does not start until every earlier transaction has finished.
    /// A job that fails or panics still releases the queue. Dropping the
    /// returned future does not cancel the job.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn atomic<F, T>(&self, job: F) -> impl Future<Output = HatResult<T>> + Send + 'static
    where
        F: Future<Output = HatResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        let wrapped: Job = Box::pin(async move {
            let _ = done_tx.send(job.await);
        });

        self.start_runner();
        self.pending.fetch_add(1, Ordering::SeqCst);
        let queued = match self.tx.send(wrapped) {
            Ok(()) => true,
            Err(_) => {
                self.pending.fetch_sub(1, Ordering::SeqCst);
                false
            }
        };

        async move {
            if !queued {
                return Err(HatError::LinkClosed);
            }
            done_rx.await.map_err(|_| HatError::TransactionAborted)?
        }
    }

    fn start_runner(&self) {
        if let Some(rx) = self.rx.lock().take() {
            tokio::spawn(run_queue(rx, Arc::clone(&self.pending)));
        }
    }
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandQueue")
            .field("pending", &self.pending())
            .finish()
    }
}

async fn run_queue(mut rx: mpsc::UnboundedReceiver<Job>, pending: Arc<AtomicUsize>) {
    while let Some(job) = rx.recv().await {
        trace!(pending = pending.load(Ordering::SeqCst), "transaction started");
        // Each job runs as its own task so a panic is contained to it.
        if let Err(e) = tokio::spawn(job).await {
            warn!("Transaction did not complete: {}", e);
        }
        pending.fetch_sub(1, Ordering::SeqCst);
        trace!("transaction finished");
    }
}
