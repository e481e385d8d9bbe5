//! HTTP plumbing shared by every adapter.

use futures_util::{StreamExt, TryStreamExt};
use reqwest::{Client, Response};
use std::time::Duration;

use crate::provider::{adapter_for, BoxError, ByteStream, ProtocolAdapter};
use crate::response::Completion;
use crate::types::{Message, ProviderConfig, ProviderKind};
use crate::Error;

/// Error bodies are read up to this size for classification.
const MAX_ERROR_BODY_BYTES: usize = 64 * 1024;

/// Sends provider requests and classifies transport-level failures.
///
/// Cloning is cheap; clones share one connection pool.
#[derive(Debug, Clone)]
pub struct Transport {
    client: Client,
}

impl Transport {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;

        Ok(Self::with_client(client))
    }

    /// Use a preconfigured client (proxies, TLS roots and so on).
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// POST the streaming request and hand back the raw body.
    ///
    /// Connection failures are `NETWORK_ERROR`; a non-2xx status is classified
    /// from its code and body. The overall deadline is enforced by the caller.
    pub async fn open_stream(
        &self,
        config: &ProviderConfig,
        messages: &[Message],
    ) -> Result<ByteStream, Error> {
        let adapter = adapter_for(config.kind);
        let response = self.send(adapter, config, messages, true).await?;

        if response.content_length() == Some(0) {
            return Err(Error::provider(config.kind, "response has no body"));
        }

        Ok(Box::pin(
            response
                .bytes_stream()
                .map_err(|e| Box::new(e) as BoxError),
        ))
    }

    /// One non-streaming round trip, bounded by the config's timeout.
    pub async fn complete_unary(
        &self,
        config: &ProviderConfig,
        messages: &[Message],
    ) -> Result<Completion, Error> {
        config.validate_configured()?;

        let adapter = adapter_for(config.kind);
        let response = self.send(adapter, config, messages, false).await?;
        let body = response
            .bytes()
            .await
            .map_err(|e| transport_error(config, e))?;

        adapter.decode_complete(config, &body)
    }

    async fn send(
        &self,
        adapter: &dyn ProtocolAdapter,
        config: &ProviderConfig,
        messages: &[Message],
        stream: bool,
    ) -> Result<Response, Error> {
        let kind = adapter.kind();
        let headers = adapter.headers(config)?;
        let body = adapter.build_request_body(messages, config, stream)?;
        let url = adapter.endpoint(config, stream);

        tracing::debug!(
            provider = %kind,
            model = %config.model,
            stream,
            messages = messages.len(),
            "sending completion request"
        );

        let mut request = self.client.post(url).headers(headers).body(body);
        if !stream {
            request = request.timeout(config.timeout());
        }

        let response = request
            .send()
            .await
            .map_err(|e| transport_error(config, e))?;

        let status = response.status();
        if !status.is_success() {
            let text = read_error_body(kind, response).await;
            tracing::warn!(provider = %kind, status = status.as_u16(), "provider returned an error status");
            return Err(Error::from_status(kind, status.as_u16(), &text));
        }

        Ok(response)
    }
}

fn transport_error(config: &ProviderConfig, e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::timeout(config.kind, config.timeout_ms)
    } else {
        Error::network(config.kind, e)
    }
}

/// Read at most [`MAX_ERROR_BODY_BYTES`] of an error body, leaving the rest
/// unread.
async fn read_error_body(kind: ProviderKind, response: Response) -> String {
    let mut body = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(next) = stream.next().await {
        match next {
            Ok(bytes) => {
                let room = MAX_ERROR_BODY_BYTES - body.len();
                body.extend_from_slice(&bytes[..bytes.len().min(room)]);
                if body.len() >= MAX_ERROR_BODY_BYTES {
                    break;
                }
            }
            Err(e) => {
                tracing::debug!(provider = %kind, error = %e, "could not read error body");
                break;
            }
        }
    }

    String::from_utf8_lossy(&body).into_owned()
}
