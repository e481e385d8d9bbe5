use reqwest::header::HeaderMap;
use tokio_util::sync::CancellationToken;

use super::types::{ChatChunk, ChatMessage, ChatRequest, ChatResponse};
use crate::framing::{decode_frames, sse_data, FrameDecoder, FrameError};
use crate::provider::{
    decode_body, encode_body, json_headers, require_credential, ByteStream, ChunkStream,
    ProtocolAdapter,
};
use crate::providers::error_message;
use crate::response::Completion;
use crate::types::{Message, ProviderConfig, ProviderKind, StreamChunk, Usage};
use crate::Error;

/// OpenAI-compatible chat completions (`/chat/completions`, event stream).
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAIAdapter;

impl OpenAIAdapter {
    fn convert_request<'a>(
        messages: &'a [Message],
        config: &'a ProviderConfig,
        stream: bool,
    ) -> ChatRequest<'a> {
        ChatRequest {
            model: &config.model,
            messages: messages
                .iter()
                .map(|m| ChatMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            stream,
        }
    }
}

impl ProtocolAdapter for OpenAIAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAI
    }

    fn endpoint(&self, config: &ProviderConfig, _stream: bool) -> String {
        format!("{}/chat/completions", config.base())
    }

    fn headers(&self, config: &ProviderConfig) -> Result<HeaderMap, Error> {
        let key = require_credential(config)?;
        json_headers(self.kind(), &[("authorization", format!("Bearer {key}"))])
    }

    fn build_request_body(
        &self,
        messages: &[Message],
        config: &ProviderConfig,
        stream: bool,
    ) -> Result<Vec<u8>, Error> {
        encode_body(self.kind(), &Self::convert_request(messages, config, stream))
    }

    fn decode_stream(&self, bytes: ByteStream, signal: CancellationToken) -> ChunkStream {
        decode_frames(bytes, signal, self.kind(), StreamState::default())
    }

    fn decode_complete(&self, config: &ProviderConfig, body: &[u8]) -> Result<Completion, Error> {
        let response: ChatResponse = decode_body(self.kind(), body)?;
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::parse(self.kind(), "response contained no choices"))?;

        Ok(
            Completion::new(self.kind(), &config.model, choice.message.content.unwrap_or_default())
                .with_finish_reason(choice.finish_reason)
                .with_usage(response.usage.map(Usage::from)),
        )
    }
}

/// The finish reason and usage arrive on frames before `[DONE]`.
#[derive(Debug, Default)]
struct StreamState {
    finish_reason: Option<String>,
    usage: Option<Usage>,
}

impl FrameDecoder for StreamState {
    fn decode_line(&mut self, line: &str) -> Result<Option<StreamChunk>, FrameError> {
        let Some(data) = sse_data(line) else {
            // event:, id: and comment lines
            return Ok(None);
        };

        if data == "[DONE]" {
            let reason = self.finish_reason.take().unwrap_or_else(|| "stop".to_string());
            return Ok(Some(
                StreamChunk::done("", Some(reason)).with_usage(self.usage.take()),
            ));
        }

        let chunk: ChatChunk = serde_json::from_str(data)?;
        if let Some(error) = chunk.error {
            return Err(FrameError::Provider(Error::provider(
                ProviderKind::OpenAI,
                error_message(&error),
            )));
        }
        if let Some(usage) = chunk.usage {
            self.usage = Some(usage.into());
        }

        let Some(choice) = chunk.choices.into_iter().next() else {
            return Ok(None);
        };
        if choice.finish_reason.is_some() {
            self.finish_reason = choice.finish_reason;
        }

        match choice.delta.and_then(|d| d.content) {
            Some(text) if !text.is_empty() => Ok(Some(StreamChunk::delta(text))),
            _ => Ok(None),
        }
    }

    fn finish(&mut self) -> StreamChunk {
        StreamChunk::done("", self.finish_reason.take()).with_usage(self.usage.take())
    }
}
