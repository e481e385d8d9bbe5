use reqwest::header::HeaderMap;
use tokio_util::sync::CancellationToken;

use super::types::{OllamaMessage, OllamaOptions, OllamaRequest, OllamaResponse};
use crate::framing::{decode_frames, FrameDecoder, FrameError};
use crate::provider::{
    decode_body, encode_body, json_headers, ByteStream, ChunkStream, ProtocolAdapter,
};
use crate::response::Completion;
use crate::types::{Message, ProviderConfig, ProviderKind, StreamChunk};
use crate::Error;

/// Local Ollama server (`/api/chat`, newline-delimited JSON). No credential.
#[derive(Debug, Clone, Copy, Default)]
pub struct OllamaAdapter;

impl ProtocolAdapter for OllamaAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Ollama
    }

    fn endpoint(&self, config: &ProviderConfig, _stream: bool) -> String {
        format!("{}/api/chat", config.base())
    }

    fn headers(&self, _config: &ProviderConfig) -> Result<HeaderMap, Error> {
        json_headers(self.kind(), &[])
    }

    fn build_request_body(
        &self,
        messages: &[Message],
        config: &ProviderConfig,
        stream: bool,
    ) -> Result<Vec<u8>, Error> {
        let request = OllamaRequest {
            model: &config.model,
            messages: messages
                .iter()
                .map(|m| OllamaMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            stream,
            options: OllamaOptions {
                temperature: config.temperature,
                num_predict: config.max_tokens,
            },
        };
        encode_body(self.kind(), &request)
    }

    fn decode_stream(&self, bytes: ByteStream, signal: CancellationToken) -> ChunkStream {
        decode_frames(bytes, signal, self.kind(), NdjsonDecoder)
    }

    fn decode_complete(&self, config: &ProviderConfig, body: &[u8]) -> Result<Completion, Error> {
        let response: OllamaResponse = decode_body(self.kind(), body)?;
        if let Some(error) = &response.error {
            return Err(Error::provider(self.kind(), error.as_str()));
        }

        Ok(Completion::new(self.kind(), &config.model, response.content())
            .with_finish_reason(Some(response.finish_reason()))
            .with_usage(response.usage()))
    }
}

struct NdjsonDecoder;

impl FrameDecoder for NdjsonDecoder {
    fn decode_line(&mut self, line: &str) -> Result<Option<StreamChunk>, FrameError> {
        let response: OllamaResponse = serde_json::from_str(line.trim())?;
        if let Some(error) = &response.error {
            return Err(FrameError::Provider(Error::provider(
                ProviderKind::Ollama,
                error.as_str(),
            )));
        }

        if response.done {
            return Ok(Some(
                StreamChunk::done(response.content(), Some(response.finish_reason()))
                    .with_usage(response.usage()),
            ));
        }

        match response.content() {
            "" => Ok(None),
            text => Ok(Some(StreamChunk::delta(text))),
        }
    }
}
