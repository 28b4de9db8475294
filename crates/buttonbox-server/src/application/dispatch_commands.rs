//! DispatchCommandsUseCase: bounded worker pool for command execution.
//!
//! Commands are acknowledged on receipt, then executed asynchronously so a
//! slow handler (a browser launch, a long drag loop) never blocks the packet
//! receive loop.  The pool is a bounded MPSC queue drained by a fixed number
//! of Tokio worker tasks.
//!
//! Queue overflow drops the newest command with a warning rather than
//! blocking the receiver.  The receive path rolls the dropped sequence back
//! out of the session's seen window, so the client's retransmission is
//! classified fresh and goes through once capacity frees up.
//!
//! Execution failures are reported on a channel so the engine can surface
//! them; a failing command never takes a worker down.

use std::sync::Arc;

use async_trait::async_trait;
use buttonbox_core::Command;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, info, warn};

/// Maximum number of commands waiting for a worker.
pub const DISPATCH_QUEUE_CAPACITY: usize = 64;

/// Error type for command execution.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The executor does not implement this command kind on this platform.
    #[error("unsupported command kind: {kind}")]
    Unsupported { kind: &'static str },

    /// The command was attempted and failed.
    #[error("execution failed: {0}")]
    Failed(String),
}

/// Executes decoded commands against the host machine.
///
/// The production implementation drives the OS input layer; tests substitute
/// a recording double.
#[async_trait]
pub trait InputExecutor: Send + Sync {
    async fn execute(&self, command: &Command) -> Result<(), ExecutionError>;
}

/// A command queued for execution, tagged with its origin for logging and
/// failure reporting.
#[derive(Debug, Clone)]
pub struct DispatchedCommand {
    pub client_id: String,
    pub sequence: u64,
    pub command: Command,
}

/// An execution failure reported back to the engine.
#[derive(Debug)]
pub struct DispatchFailure {
    pub client_id: String,
    pub sequence: u64,
    pub kind: &'static str,
    pub error: ExecutionError,
}

/// Fixed-size pool of worker tasks draining the dispatch queue.
pub struct CommandDispatcher {
    tx: mpsc::Sender<DispatchedCommand>,
    workers: Vec<JoinHandle<()>>,
}

impl CommandDispatcher {
    /// Spawns `pool_size` workers sharing one queue.
    ///
    /// Returns the dispatcher plus a receiver of execution failures.
    pub fn new(
        pool_size: usize,
        executor: Arc<dyn InputExecutor>,
    ) -> (Self, mpsc::Receiver<DispatchFailure>) {
        let pool_size = pool_size.max(1);
        let (tx, rx) = mpsc::channel::<DispatchedCommand>(DISPATCH_QUEUE_CAPACITY);
        let (failure_tx, failure_rx) = mpsc::channel::<DispatchFailure>(DISPATCH_QUEUE_CAPACITY);
        let rx = Arc::new(Mutex::new(rx));

        let mut workers = Vec::with_capacity(pool_size);
        for worker_index in 0..pool_size {
            let rx = Arc::clone(&rx);
            let executor = Arc::clone(&executor);
            let failure_tx = failure_tx.clone();
            workers.push(tokio::spawn(async move {
                worker_loop(worker_index, rx, executor, failure_tx).await;
            }));
        }

        info!("command dispatcher started with {pool_size} workers");
        (Self { tx, workers }, failure_rx)
    }

    /// Returns a queue handle usable from synchronous contexts via
    /// `try_send`.
    pub fn handle(&self) -> mpsc::Sender<DispatchedCommand> {
        self.tx.clone()
    }

    /// Queues a command for execution.  Returns `false` when the queue is
    /// full and the command was dropped.
    pub fn submit(&self, command: DispatchedCommand) -> bool {
        match self.tx.try_send(command) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                warn!(
                    client_id = %dropped.client_id,
                    sequence = dropped.sequence,
                    "dispatch queue full, dropping command"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Drains the queue and stops all workers.
    ///
    /// The queue is closed first so workers finish whatever is already
    /// enqueued.  Workers still running after `grace` are aborted.
    pub async fn shutdown(self, grace: Duration) {
        drop(self.tx);
        for mut worker in self.workers {
            if tokio::time::timeout(grace, &mut worker).await.is_err() {
                warn!("dispatch worker did not finish within {grace:?}, aborting");
                worker.abort();
            }
        }
        info!("command dispatcher stopped");
    }
}

async fn worker_loop(
    worker_index: usize,
    rx: Arc<Mutex<mpsc::Receiver<DispatchedCommand>>>,
    executor: Arc<dyn InputExecutor>,
    failure_tx: mpsc::Sender<DispatchFailure>,
) {
    loop {
        // Lock only to receive; execution happens with the lock released so
        // the other workers keep draining the queue.
        let next = {
            let mut rx = rx.lock().await;
            rx.recv().await
        };

        let item = match next {
            Some(item) => item,
            None => break,
        };

        let kind = item.command.kind();
        debug!(
            worker = worker_index,
            client_id = %item.client_id,
            sequence = item.sequence,
            kind,
            "executing command"
        );

        if let Err(error) = executor.execute(&item.command).await {
            warn!(
                client_id = %item.client_id,
                sequence = item.sequence,
                kind,
                %error,
                "command execution failed"
            );
            let _ = failure_tx
                .send(DispatchFailure {
                    client_id: item.client_id,
                    sequence: item.sequence,
                    kind,
                    error,
                })
                .await;
        }
    }

    debug!(worker = worker_index, "dispatch worker exiting");
}
