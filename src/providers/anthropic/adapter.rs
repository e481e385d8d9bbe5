use reqwest::header::HeaderMap;
use tokio_util::sync::CancellationToken;

use super::types::{
    AnthropicContentBlock, AnthropicContentDelta, AnthropicMessage, AnthropicRequest,
    AnthropicResponse, AnthropicStreamEvent,
};
use crate::framing::{decode_frames, sse_data, FrameDecoder, FrameError};
use crate::provider::{
    decode_body, encode_body, json_headers, require_credential, ByteStream, ChunkStream,
    ProtocolAdapter,
};
use crate::providers::error_message;
use crate::response::Completion;
use crate::types::{Message, ProviderConfig, ProviderKind, Role, StreamChunk, Usage};
use crate::Error;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// The Messages API rejects a conversation that does not open with a user turn.
const OPENING_USER_TURN: &str = "Please proceed.";

/// Anthropic Messages API (`/messages`, typed event stream).
#[derive(Debug, Clone, Copy, Default)]
pub struct AnthropicAdapter;

impl AnthropicAdapter {
    /// Lift system messages into the top-level `system` field and make sure
    /// the remaining turns start with the user.
    fn split_system(messages: &[Message]) -> (Option<String>, Vec<AnthropicMessage<'_>>) {
        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.is_system())
            .map(|m| m.content.as_str())
            .collect();
        let system = (!system.is_empty()).then(|| system.join("\n\n"));

        let mut turns: Vec<AnthropicMessage<'_>> = messages
            .iter()
            .filter(|m| !m.is_system())
            .map(|m| AnthropicMessage {
                role: m.role.as_str(),
                content: &m.content,
            })
            .collect();

        if turns.first().map(|t| t.role) != Some(Role::User.as_str()) {
            turns.insert(
                0,
                AnthropicMessage {
                    role: Role::User.as_str(),
                    content: OPENING_USER_TURN,
                },
            );
        }

        (system, turns)
    }
}

impl ProtocolAdapter for AnthropicAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    fn endpoint(&self, config: &ProviderConfig, _stream: bool) -> String {
        format!("{}/messages", config.base())
    }

    fn headers(&self, config: &ProviderConfig) -> Result<HeaderMap, Error> {
        let key = require_credential(config)?;
        json_headers(
            self.kind(),
            &[
                ("x-api-key", key.to_string()),
                ("anthropic-version", ANTHROPIC_VERSION.to_string()),
            ],
        )
    }

    fn build_request_body(
        &self,
        messages: &[Message],
        config: &ProviderConfig,
        stream: bool,
    ) -> Result<Vec<u8>, Error> {
        let (system, messages) = Self::split_system(messages);
        let request = AnthropicRequest {
            model: &config.model,
            system,
            messages,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            stream,
        };
        encode_body(self.kind(), &request)
    }

    fn decode_stream(&self, bytes: ByteStream, signal: CancellationToken) -> ChunkStream {
        decode_frames(bytes, signal, self.kind(), StreamState::default())
    }

    fn decode_complete(&self, config: &ProviderConfig, body: &[u8]) -> Result<Completion, Error> {
        let response: AnthropicResponse = decode_body(self.kind(), body)?;
        let text: String = response
            .content
            .iter()
            .filter_map(|block| match block {
                AnthropicContentBlock::Text { text } => Some(text.as_str()),
                AnthropicContentBlock::Other => None,
            })
            .collect();

        Ok(Completion::new(self.kind(), &config.model, text)
            .with_finish_reason(response.stop_reason)
            .with_usage(response.usage.map(Usage::from)))
    }
}

/// Input tokens arrive on `message_start`, the stop reason and output tokens
/// on `message_delta`, and the stream ends at `message_stop`.
#[derive(Debug, Default)]
struct StreamState {
    stop_reason: Option<String>,
    usage: Option<Usage>,
}

impl StreamState {
    fn terminal(&mut self) -> StreamChunk {
        let reason = self
            .stop_reason
            .take()
            .unwrap_or_else(|| "end_turn".to_string());
        StreamChunk::done("", Some(reason)).with_usage(self.usage.take())
    }
}

impl FrameDecoder for StreamState {
    fn decode_line(&mut self, line: &str) -> Result<Option<StreamChunk>, FrameError> {
        let Some(data) = sse_data(line) else {
            return Ok(None);
        };

        match serde_json::from_str::<AnthropicStreamEvent>(data)? {
            AnthropicStreamEvent::MessageStart { message } => {
                if let Some(usage) = message.usage {
                    self.usage = Some(Usage::new(usage.input_tokens, usage.output_tokens));
                }
                Ok(None)
            }
            AnthropicStreamEvent::ContentBlockDelta { delta } => match delta {
                AnthropicContentDelta::TextDelta { text } if !text.is_empty() => {
                    Ok(Some(StreamChunk::delta(text)))
                }
                _ => Ok(None),
            },
            AnthropicStreamEvent::MessageDelta { delta, usage } => {
                if delta.stop_reason.is_some() {
                    self.stop_reason = delta.stop_reason;
                }
                if let Some(output) = usage {
                    let mut total = self.usage.unwrap_or_default();
                    total.output_tokens = output.output_tokens;
                    self.usage = Some(total);
                }
                Ok(None)
            }
            AnthropicStreamEvent::MessageStop => Ok(Some(self.terminal())),
            AnthropicStreamEvent::Error { error } => Err(FrameError::Provider(Error::provider(
                ProviderKind::Anthropic,
                error_message(&error),
            ))),
            AnthropicStreamEvent::Unknown => Ok(None),
        }
    }

    fn finish(&mut self) -> StreamChunk {
        StreamChunk::done("", self.stop_reason.take()).with_usage(self.usage.take())
    }
}
