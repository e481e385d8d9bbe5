//! Types for streaming responses.

use serde::{Deserialize, Serialize};

use crate::types::Usage;

/// One normalized piece of a streamed completion.
///
/// Concatenating `delta` over every chunk of a stream, in arrival order,
/// yields the full response text. Only the last chunk has `done` set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamChunk {
    pub delta: String,
    pub done: bool,
    /// Provider-native finish reason, only on the terminal chunk.
    pub finish_reason: Option<String>,
    /// Token usage, when the provider reports it on the terminal chunk.
    pub usage: Option<Usage>,
}

impl StreamChunk {
    /// A non-terminal text fragment.
    pub fn delta(text: impl Into<String>) -> Self {
        Self {
            delta: text.into(),
            done: false,
            finish_reason: None,
            usage: None,
        }
    }

    /// The terminal chunk.
    pub fn done(text: impl Into<String>, finish_reason: Option<String>) -> Self {
        Self {
            delta: text.into(),
            done: true,
            finish_reason,
            usage: None,
        }
    }

    pub fn with_usage(mut self, usage: Option<Usage>) -> Self {
        self.usage = usage;
        self
    }
}
