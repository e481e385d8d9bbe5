//! Folding stream chunks into a [`Completion`].

use futures_util::StreamExt;

use crate::provider::ChunkStream;
use crate::response::Completion;
use crate::types::{ProviderKind, StreamChunk, Usage};
use crate::Error;

/// Accumulates streaming deltas into a complete response.
#[derive(Debug, Default)]
pub struct ResponseAccumulator {
    text: String,
    finish_reason: Option<String>,
    usage: Option<Usage>,
    done: bool,
}

impl ResponseAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one chunk. Metadata from the terminal chunk wins over earlier values.
    pub fn push(&mut self, chunk: &StreamChunk) {
        self.text.push_str(&chunk.delta);
        if chunk.finish_reason.is_some() {
            self.finish_reason = chunk.finish_reason.clone();
        }
        if chunk.usage.is_some() {
            self.usage = chunk.usage;
        }
        if chunk.done {
            self.done = true;
        }
    }

    /// Whether the terminal chunk has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Text accumulated so far.
    pub fn current_text(&self) -> &str {
        &self.text
    }

    pub fn finish(self, provider: ProviderKind, model: impl Into<String>) -> Completion {
        Completion::new(provider, model, self.text)
            .with_finish_reason(self.finish_reason)
            .with_usage(self.usage)
    }

    /// Drain `stream` until its terminal chunk and return the completion.
    pub async fn collect(
        mut stream: ChunkStream,
        provider: ProviderKind,
        model: impl Into<String>,
    ) -> Result<Completion, Error> {
        let mut accumulator = Self::new();
        while let Some(chunk) = stream.next().await {
            accumulator.push(&chunk?);
            if accumulator.is_done() {
                break;
            }
        }
        Ok(accumulator.finish(provider, model))
    }
}
