use std::collections::HashMap;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::oneshot;

use crate::response::Completion;
use crate::transport::Transport;
use crate::types::{ProviderKind, Request, RequestId, WorkerMessage, WorkerPayload};
use crate::worker::{SpawnError, Worker, WorkerHandle};
use crate::Error;

pub(crate) type ChunkCallback = Box<dyn FnMut(&str) + Send>;
pub(crate) type Settle = Box<dyn FnOnce(Result<Completion, Error>) + Send>;

/// Client-side bookkeeping for one request until its terminal message.
///
/// Dropping an unsettled call rejects it, so no caller is left waiting.
pub(crate) struct PendingCall {
    provider: ProviderKind,
    on_chunk: ChunkCallback,
    settle: Option<Settle>,
}

impl PendingCall {
    pub(crate) fn new(provider: ProviderKind, on_chunk: ChunkCallback, settle: Settle) -> Self {
        Self {
            provider,
            on_chunk,
            settle: Some(settle),
        }
    }

    fn settle(mut self, result: Result<Completion, Error>) {
        if let Some(settle) = self.settle.take() {
            settle(result);
        }
    }

    fn reject_aborted(self) {
        let error = Error::aborted(self.provider);
        self.settle(Err(error));
    }

    fn reject_unavailable(self) {
        let error = Error::unavailable(self.provider);
        self.settle(Err(error));
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        if let Some(settle) = self.settle.take() {
            settle(Err(Error::unavailable(self.provider)));
        }
    }
}

pub(crate) enum Command {
    Call {
        request: Request,
        pending: PendingCall,
    },
    Abort(RequestId),
    AbortAll,
    Restart(oneshot::Sender<Result<(), SpawnError>>),
    InFlight(oneshot::Sender<usize>),
}

/// Routes worker messages to pending calls by request id.
pub(crate) struct Router {
    pending: HashMap<RequestId, PendingCall>,
    worker: Option<WorkerHandle>,
    transport: Option<Transport>,
}

impl Router {
    pub(crate) fn new(worker: Option<WorkerHandle>, transport: Option<Transport>) -> Self {
        Self {
            pending: HashMap::new(),
            worker,
            transport,
        }
    }

    pub(crate) async fn run(mut self, mut commands: UnboundedReceiver<Command>) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.on_command(command),
                    None => break,
                },
                message = next_message(&mut self.worker) => match message {
                    Some(message) => self.on_message(message),
                    None => self.on_worker_lost(),
                },
            }
        }

        // Every client handle is gone.
        self.abort_all();
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Call { request, pending } => self.start(request, pending),
            Command::Abort(id) => self.abort(id),
            Command::AbortAll => self.abort_all(),
            Command::Restart(reply) => {
                let _ = reply.send(self.restart());
            }
            Command::InFlight(reply) => {
                let _ = reply.send(self.pending.len());
            }
        }
    }

    fn start(&mut self, request: Request, pending: PendingCall) {
        let Some(worker) = &self.worker else {
            tracing::debug!(request_id = %request.id, "completion worker is not available");
            pending.reject_unavailable();
            return;
        };

        let id = request.id.clone();
        match worker.send(request) {
            Ok(()) => {
                self.pending.insert(id, pending);
            }
            Err(_) => {
                pending.reject_unavailable();
            }
        }
    }

    /// Settle locally first, then tell the worker.
    fn abort(&mut self, id: RequestId) {
        let Some(pending) = self.pending.remove(&id) else {
            return;
        };
        pending.reject_aborted();

        if let Some(worker) = &self.worker {
            let _ = worker.send(Request::abort(id));
        }
    }

    fn abort_all(&mut self) {
        let ids: Vec<RequestId> = self.pending.keys().cloned().collect();
        if !ids.is_empty() {
            tracing::debug!(count = ids.len(), "aborting all in-flight requests");
        }
        for id in ids {
            self.abort(id);
        }
    }

    fn restart(&mut self) -> Result<(), SpawnError> {
        for (_, pending) in self.pending.drain() {
            pending.reject_aborted();
        }
        // Dropping the old handle stops the old worker.
        self.worker = None;

        let worker = match &self.transport {
            Some(transport) => Worker::spawn_with(transport.clone()),
            None => Worker::spawn(),
        }?;
        self.worker = Some(worker);
        tracing::info!("completion worker restarted");
        Ok(())
    }

    fn on_message(&mut self, message: WorkerMessage) {
        let WorkerMessage { id, payload } = message;

        let result = match payload {
            WorkerPayload::Chunk(chunk) => {
                match self.pending.get_mut(&id) {
                    Some(pending) => (pending.on_chunk)(&chunk.delta),
                    None => tracing::debug!(request_id = %id, "dropping chunk for settled request"),
                }
                return;
            }
            WorkerPayload::Complete(completion) => Ok(completion),
            WorkerPayload::Error(e) | WorkerPayload::Aborted(e) => Err(e),
        };

        match self.pending.remove(&id) {
            Some(pending) => pending.settle(result),
            None => tracing::debug!(request_id = %id, "dropping terminal message for settled request"),
        }
    }

    fn on_worker_lost(&mut self) {
        tracing::error!(pending = self.pending.len(), "completion worker stopped unexpectedly");
        self.worker = None;
        for (_, pending) in self.pending.drain() {
            pending.reject_unavailable();
        }
    }
}

async fn next_message(worker: &mut Option<WorkerHandle>) -> Option<WorkerMessage> {
    match worker {
        Some(worker) => worker.recv().await,
        None => std::future::pending().await,
    }
}
