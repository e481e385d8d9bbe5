//! Caller-facing proxy over the worker thread.

mod router;
mod sequence;

pub use sequence::TextStream;

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::sync::oneshot;

use crate::mailbox::Mailbox;
use crate::response::Completion;
use crate::transport::Transport;
use crate::types::{CompletionCall, Message, ProviderConfig, ProviderKind, Request, RequestId};
use crate::worker::{SpawnError, Worker, WorkerHandle};
use crate::Error;
use router::{ChunkCallback, Command, PendingCall, Router};

/// Starts completions on the worker thread and routes their results back.
///
/// Cheap to clone; clones share one worker. Must be created inside a Tokio
/// runtime. If the worker cannot be started every call fails immediately with
/// a "not available" error until [`CompletionClient::restart`] succeeds.
///
/// ```no_run
/// # async fn demo() -> Result<(), completion_relay::Error> {
/// use completion_relay::{CompletionClient, Prompt, ProviderConfig, ProviderKind};
///
/// let client = CompletionClient::spawn();
/// let config = ProviderConfig::new(ProviderKind::Ollama);
///
/// let completion = client
///     .stream(config, Prompt::user("Tell me a joke"), |delta| print!("{delta}"))
///     .await?;
/// println!("\n[{:?}]", completion.finish_reason);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct CompletionClient {
    commands: UnboundedSender<Command>,
}

impl CompletionClient {
    /// Start a worker with a default transport.
    pub fn spawn() -> Self {
        let worker = Worker::spawn()
            .map_err(|e| tracing::error!(error = %e, "completion worker failed to start"))
            .ok();
        Self::start(worker, None)
    }

    /// Start a worker that sends requests through `transport`.
    pub fn with_transport(transport: Transport) -> Self {
        let worker = Worker::spawn_with(transport.clone())
            .map_err(|e| tracing::error!(error = %e, "completion worker failed to start"))
            .ok();
        Self::start(worker, Some(transport))
    }

    fn start(worker: Option<WorkerHandle>, transport: Option<Transport>) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        tokio::spawn(Router::new(worker, transport).run(receiver));
        Self { commands }
    }

    /// Stream a completion, calling `on_chunk` with each non-empty delta in
    /// order. Resolves to the full completion, whose text is the concatenation
    /// of every delta delivered.
    pub fn stream<F>(
        &self,
        config: ProviderConfig,
        messages: impl Into<Vec<Message>>,
        on_chunk: F,
    ) -> CallHandle
    where
        F: FnMut(&str) + Send + 'static,
    {
        let provider = config.kind;
        let call = CompletionCall::new(config, messages.into());
        self.call(provider, Request::stream(RequestId::new(), call), Box::new(on_chunk))
    }

    /// Same result as [`CompletionClient::stream`] without per-chunk delivery.
    pub fn complete(&self, config: ProviderConfig, messages: impl Into<Vec<Message>>) -> CallHandle {
        let provider = config.kind;
        let call = CompletionCall::new(config, messages.into());
        self.call(provider, Request::complete(RequestId::new(), call), Box::new(|_: &str| {}))
    }

    /// Stream a completion as a pull-based sequence of deltas.
    pub fn as_sequence(
        &self,
        config: ProviderConfig,
        messages: impl Into<Vec<Message>>,
    ) -> TextStream {
        let provider = config.kind;
        let id = RequestId::new();
        let mailbox = Mailbox::new();

        let on_chunk = {
            let mailbox = mailbox.clone();
            move |delta: &str| mailbox.push(Ok(delta.to_string()))
        };
        let settle = {
            let mailbox = mailbox.clone();
            move |result: Result<Completion, Error>| {
                if let Err(e) = result {
                    mailbox.push(Err(e));
                }
                mailbox.close();
            }
        };

        let call = CompletionCall::new(config, messages.into());
        let pending = PendingCall::new(provider, Box::new(on_chunk), Box::new(settle));
        self.send(Command::Call {
            request: Request::stream(id.clone(), call),
            pending,
        });

        TextStream::new(id, provider, mailbox, self.commands.clone())
    }

    fn call(&self, provider: ProviderKind, request: Request, on_chunk: ChunkCallback) -> CallHandle {
        let id = request.id.clone();
        let (tx, rx) = oneshot::channel();
        let settle = move |result: Result<Completion, Error>| {
            let _ = tx.send(result);
        };

        self.send(Command::Call {
            request,
            pending: PendingCall::new(provider, on_chunk, Box::new(settle)),
        });

        CallHandle {
            id,
            provider,
            receiver: rx,
            commands: self.commands.clone(),
        }
    }

    fn send(&self, command: Command) {
        // A dropped command rejects its own pending call.
        if self.commands.send(command).is_err() {
            tracing::warn!("completion router is not running");
        }
    }

    /// Cancel one request. Its handle settles with `ABORTED` right away and
    /// no further chunks are delivered for it.
    pub fn abort(&self, id: &RequestId) {
        self.send(Command::Abort(id.clone()));
    }

    /// Cancel every request this client is tracking.
    pub fn abort_all(&self) {
        self.send(Command::AbortAll);
    }

    /// Reject all pending calls, stop the worker and start a fresh one.
    pub async fn restart(&self) -> Result<(), SpawnError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Restart(tx));
        rx.await.unwrap_or_else(|_| {
            Err(SpawnError::Io(std::io::Error::other(
                "completion router is not running",
            )))
        })
    }

    /// Number of calls waiting for their terminal message.
    pub async fn in_flight(&self) -> usize {
        let (tx, rx) = oneshot::channel();
        self.send(Command::InFlight(tx));
        rx.await.unwrap_or(0)
    }
}

/// A running call. Await it for the final [`Completion`].
///
/// Dropping the handle does not cancel the request; use
/// [`CallHandle::abort`].
#[derive(Debug)]
pub struct CallHandle {
    id: RequestId,
    provider: ProviderKind,
    receiver: oneshot::Receiver<Result<Completion, Error>>,
    commands: UnboundedSender<Command>,
}

impl CallHandle {
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    pub fn abort(&self) {
        let _ = self.commands.send(Command::Abort(self.id.clone()));
    }
}

impl Future for CallHandle {
    type Output = Result<Completion, Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let provider = self.provider;
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|result| result.unwrap_or_else(|_| Err(Error::unavailable(provider))))
    }
}
