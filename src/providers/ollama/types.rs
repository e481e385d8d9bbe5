use serde::{Deserialize, Serialize};

use crate::types::Usage;

/// `/api/chat` request.
#[derive(Debug, Clone, Serialize)]
pub struct OllamaRequest<'a> {
    pub model: &'a str,
    pub messages: Vec<OllamaMessage<'a>>,
    pub stream: bool,
    pub options: OllamaOptions,
}

#[derive(Debug, Clone, Serialize)]
pub struct OllamaMessage<'a> {
    pub role: &'a str,
    pub content: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct OllamaOptions {
    pub temperature: f32,
    pub num_predict: u32,
}

/// One NDJSON line of a streamed response, or the whole unary response.
#[derive(Debug, Clone, Deserialize)]
pub struct OllamaResponse {
    pub message: Option<OllamaResponseMessage>,
    #[serde(default)]
    pub done: bool,
    pub done_reason: Option<String>,
    pub prompt_eval_count: Option<u32>,
    pub eval_count: Option<u32>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OllamaResponseMessage {
    #[serde(default)]
    pub content: String,
}

impl OllamaResponse {
    pub fn content(&self) -> &str {
        self.message.as_ref().map(|m| m.content.as_str()).unwrap_or("")
    }

    /// Counts are only reported on the final line.
    pub fn usage(&self) -> Option<Usage> {
        match (self.prompt_eval_count, self.eval_count) {
            (None, None) => None,
            (input, output) => Some(Usage::new(input.unwrap_or(0), output.unwrap_or(0))),
        }
    }

    pub fn finish_reason(&self) -> String {
        self.done_reason
            .clone()
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| "stop".to_string())
    }
}
