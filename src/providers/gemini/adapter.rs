use reqwest::header::HeaderMap;
use tokio_util::sync::CancellationToken;

use super::types::{
    GeminiContent, GeminiGenerationConfig, GeminiOwnedPart, GeminiPart, GeminiRequest,
    GeminiResponse, GeminiSystemInstruction,
};
use crate::framing::{decode_frames, FrameDecoder, FrameError};
use crate::provider::{
    decode_body, encode_body, json_headers, require_credential, ByteStream, ChunkStream,
    ProtocolAdapter,
};
use crate::providers::error_message;
use crate::response::Completion;
use crate::types::{Message, ProviderConfig, ProviderKind, Role, StreamChunk, Usage};
use crate::Error;

/// Gemini `generateContent` (streamed as one incrementally delivered JSON array).
#[derive(Debug, Clone, Copy, Default)]
pub struct GeminiAdapter;

impl GeminiAdapter {
    fn convert_request<'a>(messages: &'a [Message], config: &ProviderConfig) -> GeminiRequest<'a> {
        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.is_system())
            .map(|m| m.content.as_str())
            .collect();
        let system_instruction = (!system.is_empty()).then(|| GeminiSystemInstruction {
            parts: vec![GeminiOwnedPart {
                text: system.join("\n\n"),
            }],
        });

        let contents = messages
            .iter()
            .filter(|m| !m.is_system())
            .map(|m| GeminiContent {
                role: match m.role {
                    Role::Assistant => "model",
                    _ => "user",
                },
                parts: vec![GeminiPart { text: &m.content }],
            })
            .collect();

        GeminiRequest {
            contents,
            system_instruction,
            generation_config: GeminiGenerationConfig {
                max_output_tokens: config.max_tokens,
                temperature: config.temperature,
            },
        }
    }
}

impl ProtocolAdapter for GeminiAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    fn endpoint(&self, config: &ProviderConfig, stream: bool) -> String {
        let method = if stream {
            "streamGenerateContent"
        } else {
            "generateContent"
        };
        format!("{}/models/{}:{}", config.base(), config.model, method)
    }

    fn headers(&self, config: &ProviderConfig) -> Result<HeaderMap, Error> {
        let key = require_credential(config)?;
        json_headers(self.kind(), &[("x-goog-api-key", key.to_string())])
    }

    fn build_request_body(
        &self,
        messages: &[Message],
        config: &ProviderConfig,
        _stream: bool,
    ) -> Result<Vec<u8>, Error> {
        encode_body(self.kind(), &Self::convert_request(messages, config))
    }

    fn decode_stream(&self, bytes: ByteStream, signal: CancellationToken) -> ChunkStream {
        decode_frames(bytes, signal, self.kind(), StreamState::default())
    }

    fn decode_complete(&self, config: &ProviderConfig, body: &[u8]) -> Result<Completion, Error> {
        let response: GeminiResponse = decode_body(self.kind(), body)?;
        check_frame(&response)?;

        Ok(Completion::new(self.kind(), &config.model, response.text())
            .with_finish_reason(response.finish_reason())
            .with_usage(response.usage_metadata.map(Usage::from)))
    }
}

/// In-band errors and refused prompts.
fn check_frame(frame: &GeminiResponse) -> Result<(), Error> {
    if let Some(error) = &frame.error {
        return Err(Error::provider(ProviderKind::Gemini, error_message(error)));
    }
    if let Some(reason) = frame.block_reason() {
        return Err(Error::provider(
            ProviderKind::Gemini,
            format!("prompt was blocked: {reason}"),
        ));
    }
    Ok(())
}

enum Parsed {
    Frame(GeminiResponse),
    Incomplete,
    Invalid(serde_json::Error),
}

fn is_delimiter(c: char) -> bool {
    c == '[' || c == ']' || c == ',' || c.is_whitespace()
}

/// Start of a new array element: drop leading `[` / `,` (and an event-stream
/// `data:` prefix, which the service sends when asked for `alt=sse`).
fn element_start(line: &str) -> &str {
    let line = line.trim();
    let line = line.strip_prefix("data:").unwrap_or(line);
    line.trim_start_matches(|c: char| c == '[' || c == ',' || c.is_whitespace())
}

fn parse_element(text: &str) -> Parsed {
    let body = text.trim_end_matches(|c: char| c == ']' || c == ',' || c.is_whitespace());
    if body.is_empty() {
        return Parsed::Incomplete;
    }
    match serde_json::from_str(body) {
        Ok(frame) => Parsed::Frame(frame),
        Err(e) if e.is_eof() => Parsed::Incomplete,
        Err(e) => Parsed::Invalid(e),
    }
}

/// A buffered element spanning more lines than this is abandoned.
const MAX_PENDING_LINES: usize = 1_000;

/// Buffers lines until they form one complete array element.
#[derive(Debug, Default)]
struct StreamState {
    pending: String,
    pending_lines: usize,
    usage: Option<Usage>,
}

impl StreamState {
    fn frame_chunk(&mut self, frame: GeminiResponse) -> Result<Option<StreamChunk>, FrameError> {
        check_frame(&frame).map_err(FrameError::Provider)?;
        if let Some(usage) = frame.usage_metadata {
            self.usage = Some(usage.into());
        }

        let text = frame.text();
        match frame.finish_reason() {
            Some(reason) => Ok(Some(
                StreamChunk::done(text, Some(reason)).with_usage(self.usage.take()),
            )),
            None if text.is_empty() => Ok(None),
            None => Ok(Some(StreamChunk::delta(text))),
        }
    }

    fn clear_pending(&mut self) {
        self.pending.clear();
        self.pending_lines = 0;
    }

    fn parse_pending(&mut self) -> Result<Option<StreamChunk>, FrameError> {
        match parse_element(&self.pending) {
            Parsed::Frame(frame) => {
                self.clear_pending();
                self.frame_chunk(frame)
            }
            Parsed::Incomplete => Ok(None),
            Parsed::Invalid(e) => {
                self.clear_pending();
                Err(e.into())
            }
        }
    }

    /// Begin a new element with `line`, unless it is only delimiters.
    fn start_element(&mut self, line: &str) -> Result<Option<StreamChunk>, FrameError> {
        let start = element_start(line);
        if start.chars().all(is_delimiter) {
            return Ok(None);
        }
        self.pending.push_str(start);
        self.pending_lines = 1;
        self.parse_pending()
    }

    /// A line that is a whole element by itself, arriving while an earlier
    /// element is still open.
    fn standalone_frame(line: &str) -> Option<GeminiResponse> {
        match parse_element(element_start(line)) {
            Parsed::Frame(frame) if frame.is_frame() => Some(frame),
            _ => None,
        }
    }

    fn discard_pending(&mut self, reason: &str) {
        tracing::warn!(
            provider = %ProviderKind::Gemini,
            lines = self.pending_lines,
            error = %reason,
            "discarding unparseable buffered frame"
        );
        self.clear_pending();
    }
}

impl FrameDecoder for StreamState {
    fn decode_line(&mut self, line: &str) -> Result<Option<StreamChunk>, FrameError> {
        if self.pending.is_empty() {
            return self.start_element(line);
        }

        // A truncated element must not swallow the complete ones after it.
        if let Some(frame) = Self::standalone_frame(line) {
            self.discard_pending("element was cut short by the next frame");
            return self.frame_chunk(frame);
        }

        if self.pending_lines >= MAX_PENDING_LINES {
            self.discard_pending("element exceeded the line limit");
            return self.start_element(line);
        }

        self.pending.push('\n');
        self.pending.push_str(line);
        self.pending_lines += 1;
        match self.parse_pending() {
            Err(FrameError::Malformed(reason)) => {
                self.discard_pending(&reason);
                // The line that broke the buffer may itself begin a new element.
                self.start_element(line)
            }
            other => other,
        }
    }

    fn finish(&mut self) -> StreamChunk {
        if !self.pending.trim().is_empty() {
            tracing::warn!(
                provider = %ProviderKind::Gemini,
                "response ended inside an unfinished frame"
            );
            self.clear_pending();
        }
        StreamChunk::done("", None).with_usage(self.usage.take())
    }
}
