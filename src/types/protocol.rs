//! Messages exchanged between the client and the worker thread.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::response::Completion;
use crate::types::{Message, ProviderConfig, ProviderKind, StreamChunk};
use crate::Error;

/// Correlates a request with every message the worker emits for it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// A fresh, unique id.
    pub fn new() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Provider, configuration and conversation for one completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionCall {
    pub config: ProviderConfig,
    pub messages: Vec<Message>,
}

impl CompletionCall {
    pub fn new(config: ProviderConfig, messages: Vec<Message>) -> Self {
        Self { config, messages }
    }

    pub fn provider(&self) -> ProviderKind {
        self.config.kind
    }
}

/// What the worker is asked to do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RequestKind {
    /// Emit a `chunk` per delta, then `complete`.
    Stream(CompletionCall),
    /// Emit only the final `complete`.
    Complete(CompletionCall),
    /// Cancel the in-flight request with the same id. Nothing is sent back
    /// for the abort itself.
    Abort,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    #[serde(flatten)]
    pub kind: RequestKind,
}

impl Request {
    pub fn stream(id: RequestId, call: CompletionCall) -> Self {
        Self {
            id,
            kind: RequestKind::Stream(call),
        }
    }

    pub fn complete(id: RequestId, call: CompletionCall) -> Self {
        Self {
            id,
            kind: RequestKind::Complete(call),
        }
    }

    pub fn abort(id: RequestId) -> Self {
        Self {
            id,
            kind: RequestKind::Abort,
        }
    }
}

/// What the worker reports back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "lowercase")]
pub enum WorkerPayload {
    Chunk(StreamChunk),
    Complete(Completion),
    Error(Error),
    Aborted(Error),
}

impl WorkerPayload {
    /// `complete`, `error` and `aborted` end a request's lifecycle.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, WorkerPayload::Chunk(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerMessage {
    pub id: RequestId,
    #[serde(flatten)]
    pub payload: WorkerPayload,
}

impl WorkerMessage {
    pub fn new(id: RequestId, payload: WorkerPayload) -> Self {
        Self { id, payload }
    }
}
