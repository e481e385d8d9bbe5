use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::types::ProviderKind;

/// Longest raw response body used verbatim as an error message.
const MAX_RAW_MESSAGE_LEN: usize = 200;

/// Longest response body kept in `details`.
const MAX_DETAILS_LEN: usize = 1_000;

/// The small, closed set of failure classes callers can branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NotConfigured,
    InvalidCredential,
    RateLimited,
    Timeout,
    NetworkError,
    /// Unrecoverable decode failure. Single bad frames are skipped instead.
    ParseError,
    ProviderError,
    Aborted,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NotConfigured => "NOT_CONFIGURED",
            ErrorCode::InvalidCredential => "INVALID_CREDENTIAL",
            ErrorCode::RateLimited => "RATE_LIMITED",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::NetworkError => "NETWORK_ERROR",
            ErrorCode::ParseError => "PARSE_ERROR",
            ErrorCode::ProviderError => "PROVIDER_ERROR",
            ErrorCode::Aborted => "ABORTED",
        }
    }

    /// Map an HTTP status to a code.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => ErrorCode::InvalidCredential,
            429 => ErrorCode::RateLimited,
            408 | 504 => ErrorCode::Timeout,
            _ => ErrorCode::ProviderError,
        }
    }

    fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::NotConfigured => "Provider is not configured",
            ErrorCode::InvalidCredential => "The API key was rejected",
            ErrorCode::RateLimited => "Rate limit exceeded, try again shortly",
            ErrorCode::Timeout => "The request timed out",
            ErrorCode::NetworkError => "Could not reach the provider",
            ErrorCode::ParseError => "Could not read the provider response",
            ErrorCode::ProviderError => "The provider returned an error",
            ErrorCode::Aborted => "The request was cancelled",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced by completion requests.
///
/// This is plain data so it can travel over the worker channel unchanged.
/// `message` is always non-empty and human readable.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("{provider} error ({code}): {message}")]
pub struct Error {
    pub message: String,
    pub code: ErrorCode,
    pub provider: ProviderKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl Error {
    pub fn new(provider: ProviderKind, code: ErrorCode, message: impl Into<String>) -> Self {
        let message = message.into();
        let message = if message.trim().is_empty() {
            code.default_message().to_string()
        } else {
            message
        };

        Error {
            message,
            code,
            provider,
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn not_configured(provider: ProviderKind) -> Self {
        Self::new(
            provider,
            ErrorCode::NotConfigured,
            format!("{} API key is not configured", provider.display_name()),
        )
    }

    pub fn config(provider: ProviderKind, message: impl Into<String>) -> Self {
        Self::new(provider, ErrorCode::NotConfigured, message)
    }

    pub fn aborted(provider: ProviderKind) -> Self {
        Self::new(provider, ErrorCode::Aborted, "Request was cancelled")
    }

    pub fn timeout(provider: ProviderKind, timeout_ms: u64) -> Self {
        Self::new(
            provider,
            ErrorCode::Timeout,
            format!("Request timed out after {timeout_ms}ms"),
        )
    }

    /// A connection-level failure, with a remediation hint for local servers.
    pub fn network(provider: ProviderKind, cause: impl fmt::Display) -> Self {
        let message = match provider {
            ProviderKind::Ollama => format!(
                "Could not connect to Ollama. Is the service running? Start it with `ollama serve`. ({cause})"
            ),
            _ => format!(
                "Could not reach {}: {cause}",
                provider.display_name()
            ),
        };
        Self::new(provider, ErrorCode::NetworkError, message)
    }

    pub fn parse(provider: ProviderKind, message: impl Into<String>) -> Self {
        Self::new(provider, ErrorCode::ParseError, message)
    }

    pub fn provider(provider: ProviderKind, message: impl Into<String>) -> Self {
        Self::new(provider, ErrorCode::ProviderError, message)
    }

    /// The worker thread could not be started or has stopped.
    pub fn unavailable(provider: ProviderKind) -> Self {
        Self::new(
            provider,
            ErrorCode::NetworkError,
            "completion worker is not available",
        )
    }

    /// Classify a non-2xx response.
    ///
    /// The message comes from the JSON error body when one can be found,
    /// otherwise from the raw body when it is short, otherwise a generic line.
    pub fn from_status(provider: ProviderKind, status: u16, body: &str) -> Self {
        let code = ErrorCode::from_status(status);
        let trimmed = body.trim();

        let message = match extract_json_message(trimmed) {
            Some(message) => message,
            None if !trimmed.is_empty() && trimmed.chars().count() <= MAX_RAW_MESSAGE_LEN => {
                trimmed.to_string()
            }
            None => format!(
                "{} request failed with status {status}",
                provider.display_name()
            ),
        };

        let mut error = Self::new(provider, code, message);
        if !trimmed.is_empty() {
            error.details = Some(truncate(trimmed, MAX_DETAILS_LEN));
        }
        error
    }

    /// True for caller and timer cancellations.
    pub fn is_cancellation(&self) -> bool {
        matches!(self.code, ErrorCode::Aborted | ErrorCode::Timeout)
    }
}

/// Pull a human message out of the error shapes the providers use:
/// `{"error":{"message":..}}`, `{"error":".."}` and `{"message":..}`.
fn extract_json_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;

    let message = match &value["error"] {
        serde_json::Value::Object(obj) => obj.get("message").and_then(|m| m.as_str()),
        serde_json::Value::String(s) => Some(s.as_str()),
        _ => None,
    }
    .or_else(|| value["message"].as_str())?;

    let message = message.trim();
    (!message.is_empty()).then(|| message.to_string())
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
