//! The settled result of a completion request.

use serde::{Deserialize, Serialize};

use crate::types::{ProviderKind, Usage};

/// A complete response from a provider.
///
/// For a streamed request `text` is exactly the concatenation of the deltas
/// that were delivered, in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    /// Provider-native finish reason, e.g. `stop`, `end_turn`, `STOP`.
    pub finish_reason: Option<String>,
    pub usage: Option<Usage>,
    pub provider: ProviderKind,
    pub model: String,
}

impl Completion {
    pub fn new(provider: ProviderKind, model: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            finish_reason: None,
            usage: None,
            provider,
            model: model.into(),
        }
    }

    pub fn with_finish_reason(mut self, finish_reason: Option<String>) -> Self {
        self.finish_reason = finish_reason;
        self
    }

    pub fn with_usage(mut self, usage: Option<Usage>) -> Self {
        self.usage = usage;
        self
    }

    /// Whether the provider stopped because it ran out of output tokens.
    pub fn is_truncated(&self) -> bool {
        matches!(
            self.finish_reason.as_deref(),
            Some("length") | Some("max_tokens") | Some("MAX_TOKENS")
        )
    }
}
