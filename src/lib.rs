//! Streaming completions from OpenAI-compatible, Anthropic, Gemini and Ollama
//! services behind one normalized interface.
//!
//! Requests run on a dedicated worker thread with its own runtime. A
//! [`CompletionClient`] hands them over, multiplexes any number of concurrent
//! calls by request id, and delivers text deltas as they arrive. Every call
//! settles exactly once with a [`Completion`] or a classified [`Error`].

pub mod accumulator;
pub mod client;
pub mod config;
pub mod error;
pub mod framing;
mod mailbox;
pub mod provider;
pub mod providers;
pub mod response;
pub mod transport;
pub mod types;
pub mod worker;

// Re-export core types for easy usage
pub use accumulator::ResponseAccumulator;
pub use client::{CallHandle, CompletionClient, TextStream};
pub use config::{ProviderDefaults, ProviderOverrides};
pub use error::{Error, ErrorCode};
pub use provider::{adapter_for, ByteStream, ChunkStream, ProtocolAdapter};
pub use response::Completion;
pub use transport::Transport;
pub use types::*;
pub use worker::{SpawnError, Worker, WorkerHandle};
