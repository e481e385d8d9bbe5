use bytes::Bytes;
use futures_util::Stream;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use std::pin::Pin;
use tokio_util::sync::CancellationToken;

use crate::providers::{AnthropicAdapter, GeminiAdapter, OllamaAdapter, OpenAIAdapter};
use crate::response::Completion;
use crate::types::{Message, ProviderConfig, ProviderKind, StreamChunk};
use crate::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Raw response body as it arrives from the network.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, BoxError>> + Send>>;

/// Normalized chunks decoded from a [`ByteStream`].
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, Error>> + Send>>;

/// Everything that differs between provider wire protocols.
///
/// An adapter is stateless; per-stream decoder state lives inside the stream
/// returned by [`ProtocolAdapter::decode_stream`].
pub trait ProtocolAdapter: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Full request URL. Streaming and unary calls may use different paths.
    fn endpoint(&self, config: &ProviderConfig, stream: bool) -> String;

    /// Authentication and content-type headers.
    fn headers(&self, config: &ProviderConfig) -> Result<HeaderMap, Error>;

    /// Serialize the provider-native request body.
    fn build_request_body(
        &self,
        messages: &[Message],
        config: &ProviderConfig,
        stream: bool,
    ) -> Result<Vec<u8>, Error>;

    /// Decode a streaming response body into chunks.
    ///
    /// Cancelling `signal` ends the stream with an `ABORTED` error.
    fn decode_stream(&self, bytes: ByteStream, signal: CancellationToken) -> ChunkStream;

    /// Decode a non-streaming response body.
    fn decode_complete(&self, config: &ProviderConfig, body: &[u8]) -> Result<Completion, Error>;
}

/// The adapter for a provider kind.
pub fn adapter_for(kind: ProviderKind) -> &'static dyn ProtocolAdapter {
    match kind {
        ProviderKind::OpenAI => &OpenAIAdapter,
        ProviderKind::Anthropic => &AnthropicAdapter,
        ProviderKind::Gemini => &GeminiAdapter,
        ProviderKind::Ollama => &OllamaAdapter,
    }
}

/// `Content-Type: application/json` plus the given header pairs.
pub(crate) fn json_headers(
    kind: ProviderKind,
    pairs: &[(&'static str, String)],
) -> Result<HeaderMap, Error> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    for (name, value) in pairs {
        let mut value = HeaderValue::from_str(value)
            .map_err(|_| Error::config(kind, format!("invalid characters in {name} header")))?;
        value.set_sensitive(true);
        headers.insert(HeaderName::from_static(name), value);
    }

    Ok(headers)
}

/// The trimmed credential, or `NOT_CONFIGURED`.
pub(crate) fn require_credential(config: &ProviderConfig) -> Result<&str, Error> {
    config
        .credential()
        .ok_or_else(|| Error::not_configured(config.kind))
}

pub(crate) fn encode_body<T: serde::Serialize>(kind: ProviderKind, body: &T) -> Result<Vec<u8>, Error> {
    serde_json::to_vec(body)
        .map_err(|e| Error::parse(kind, format!("failed to encode request: {e}")))
}

pub(crate) fn decode_body<'a, T: serde::Deserialize<'a>>(
    kind: ProviderKind,
    body: &'a [u8],
) -> Result<T, Error> {
    serde_json::from_slice(body)
        .map_err(|e| Error::parse(kind, format!("failed to decode response: {e}")))
}
