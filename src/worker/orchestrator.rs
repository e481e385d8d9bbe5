use futures_util::StreamExt;
use std::collections::HashMap;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use super::cancel::{CancelReason, CancellationHandle};
use crate::accumulator::ResponseAccumulator;
use crate::provider::adapter_for;
use crate::response::Completion;
use crate::transport::Transport;
use crate::types::{
    CompletionCall, ProviderConfig, Request, RequestId, RequestKind, WorkerMessage, WorkerPayload,
};
use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Stream,
    Complete,
}

/// Runs on the worker thread. Owns every in-flight request's cancellation
/// handle and multiplexes any number of concurrent requests.
pub(crate) struct Orchestrator {
    transport: Transport,
    outbox: UnboundedSender<WorkerMessage>,
}

impl Orchestrator {
    pub(crate) fn new(transport: Transport, outbox: UnboundedSender<WorkerMessage>) -> Self {
        Self { transport, outbox }
    }

    /// Serve requests until the request channel closes, then cancel whatever
    /// is still running and wait for it to report.
    pub(crate) async fn run(self, mut requests: UnboundedReceiver<Request>) {
        let mut inflight: HashMap<RequestId, CancellationHandle> = HashMap::new();
        let (finished_tx, mut finished_rx) = mpsc::unbounded_channel::<RequestId>();

        loop {
            tokio::select! {
                request = requests.recv() => match request {
                    Some(request) => self.handle(request, &mut inflight, &finished_tx),
                    None => break,
                },
                Some(id) = finished_rx.recv() => {
                    inflight.remove(&id);
                }
            }
        }

        tracing::debug!(inflight = inflight.len(), "request channel closed, cancelling in-flight work");
        for handle in inflight.values() {
            handle.cancel(CancelReason::Caller);
        }
        while !inflight.is_empty() {
            match finished_rx.recv().await {
                Some(id) => {
                    inflight.remove(&id);
                }
                None => break,
            }
        }
    }

    fn handle(
        &self,
        request: Request,
        inflight: &mut HashMap<RequestId, CancellationHandle>,
        finished: &UnboundedSender<RequestId>,
    ) {
        let Request { id, kind } = request;

        let (call, mode) = match kind {
            RequestKind::Abort => {
                match inflight.remove(&id) {
                    Some(handle) => {
                        if handle.cancel(CancelReason::Caller) {
                            tracing::debug!(request_id = %id, "request aborted");
                        }
                    }
                    None => tracing::debug!(request_id = %id, "abort for unknown or finished request"),
                }
                return;
            }
            RequestKind::Stream(call) => (call, Mode::Stream),
            RequestKind::Complete(call) => (call, Mode::Complete),
        };

        if inflight.contains_key(&id) {
            tracing::warn!(request_id = %id, "duplicate request id");
            let error = Error::provider(call.provider(), format!("request id {id} is already in flight"));
            let _ = self
                .outbox
                .send(WorkerMessage::new(id, WorkerPayload::Error(error)));
            return;
        }

        let handle = CancellationHandle::new();
        inflight.insert(id.clone(), handle.clone());

        let job = Job {
            id,
            call,
            mode,
            handle,
            transport: self.transport.clone(),
            outbox: self.outbox.clone(),
        };
        tokio::spawn(job.run(finished.clone()));
    }
}

/// One request from start to its single terminal message.
struct Job {
    id: RequestId,
    call: CompletionCall,
    mode: Mode,
    handle: CancellationHandle,
    transport: Transport,
    outbox: UnboundedSender<WorkerMessage>,
}

impl Job {
    async fn run(self, finished: UnboundedSender<RequestId>) {
        let config = &self.call.config;
        tracing::debug!(
            request_id = %self.id,
            provider = %config.kind,
            model = %config.model,
            mode = ?self.mode,
            "request started"
        );

        let timer = {
            let handle = self.handle.clone();
            let timeout = config.timeout();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                handle.cancel(CancelReason::Timeout);
            })
        };

        let result = self.drive().await;
        // Defuse the timer so it cannot abort a request that already finished.
        timer.abort();

        let payload = match self.handle.complete() {
            Err(reason) => WorkerPayload::Aborted(cancel_error(reason, config)),
            Ok(()) => match result {
                Ok(completion) => WorkerPayload::Complete(completion),
                Err(e) if e.code == crate::ErrorCode::Aborted => WorkerPayload::Aborted(e),
                Err(e) => WorkerPayload::Error(e),
            },
        };

        match &payload {
            WorkerPayload::Complete(completion) => tracing::debug!(
                request_id = %self.id,
                chars = completion.text.len(),
                finish_reason = ?completion.finish_reason,
                "request completed"
            ),
            WorkerPayload::Error(e) => tracing::warn!(
                request_id = %self.id,
                code = %e.code,
                error = %e.message,
                "request failed"
            ),
            WorkerPayload::Aborted(e) => tracing::debug!(
                request_id = %self.id,
                code = %e.code,
                "request cancelled"
            ),
            WorkerPayload::Chunk(_) => {}
        }

        let _ = self
            .outbox
            .send(WorkerMessage::new(self.id.clone(), payload));
        let _ = finished.send(self.id);
    }

    async fn drive(&self) -> Result<Completion, Error> {
        let config = &self.call.config;
        config.validate_configured()?;

        let token = self.handle.token();
        let bytes = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(Error::aborted(config.kind)),
            opened = self.transport.open_stream(config, &self.call.messages) => opened?,
        };

        let mut chunks = adapter_for(config.kind).decode_stream(bytes, token.clone());
        if self.mode == Mode::Complete {
            return ResponseAccumulator::collect(chunks, config.kind, config.model.clone()).await;
        }
        let mut accumulator = ResponseAccumulator::new();

        while let Some(chunk) = chunks.next().await {
            let chunk = chunk?;

            if !chunk.delta.is_empty() {
                // Nothing may follow a cancellation except the terminal message.
                if self.handle.is_cancelled() {
                    return Err(Error::aborted(config.kind));
                }
                let _ = self.outbox.send(WorkerMessage::new(
                    self.id.clone(),
                    WorkerPayload::Chunk(chunk.clone()),
                ));
            }

            accumulator.push(&chunk);
            if chunk.done {
                break;
            }
        }

        Ok(accumulator.finish(config.kind, config.model.clone()))
    }
}

fn cancel_error(reason: CancelReason, config: &ProviderConfig) -> Error {
    match reason {
        CancelReason::Caller => Error::aborted(config.kind),
        CancelReason::Timeout => Error::timeout(config.kind, config.timeout_ms),
    }
}
