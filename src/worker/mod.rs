//! The isolated background thread that performs every network request.
//!
//! The worker owns its own single-threaded runtime. Callers talk to it only
//! through [`Request`] and [`WorkerMessage`] values over channels, so a slow
//! or stalled provider never blocks the caller's runtime.

mod cancel;
mod orchestrator;

use std::sync::mpsc::sync_channel;
use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::transport::Transport;
use crate::types::{Request, WorkerMessage};
use orchestrator::Orchestrator;

const WORKER_THREAD_NAME: &str = "completion-worker";

/// The worker thread could not be started.
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("failed to start worker thread: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

pub struct Worker;

impl Worker {
    /// Start a worker with a default [`Transport`].
    pub fn spawn() -> Result<WorkerHandle, SpawnError> {
        Self::spawn_with(Transport::new()?)
    }

    /// Start a worker around `transport`.
    ///
    /// The runtime is built on the worker thread itself; this call waits
    /// until it reports back so a failure surfaces here.
    pub fn spawn_with(transport: Transport) -> Result<WorkerHandle, SpawnError> {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (message_tx, message_rx) = mpsc::unbounded_channel();
        let orchestrator = Orchestrator::new(transport, message_tx);
        let (started_tx, started_rx) = sync_channel(1);

        std::thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = started_tx.send(Err(e));
                        return;
                    }
                };
                let _ = started_tx.send(Ok(()));
                runtime.block_on(orchestrator.run(request_rx));
                tracing::debug!("completion worker stopped");
            })?;

        match started_rx.recv() {
            Ok(started) => started?,
            Err(_) => {
                return Err(SpawnError::Io(std::io::Error::other(
                    "worker thread exited before its runtime started",
                )))
            }
        }

        tracing::debug!("completion worker started");
        Ok(WorkerHandle {
            requests: request_tx,
            messages: message_rx,
        })
    }
}

/// Caller-side ends of the worker's channels.
///
/// Dropping the handle closes the request channel; the worker then cancels
/// everything still in flight and the thread exits.
#[derive(Debug)]
pub struct WorkerHandle {
    requests: UnboundedSender<Request>,
    messages: UnboundedReceiver<WorkerMessage>,
}

impl WorkerHandle {
    /// Queue a request. Gives the request back if the worker has stopped.
    pub fn send(&self, request: Request) -> Result<(), Request> {
        self.requests.send(request).map_err(|e| e.0)
    }

    /// Next message from the worker; `None` once it has stopped.
    pub async fn recv(&mut self) -> Option<WorkerMessage> {
        self.messages.recv().await
    }
}
