//! Per-provider defaults, caller overrides and environment loading.

use serde::Deserialize;
use std::env;
use std::str::FromStr;

use crate::types::{ProviderConfig, ProviderKind};
use crate::Error;

/// Default timeout for hosted providers.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Local models may need to load into memory on the first call.
pub const DEFAULT_LOCAL_TIMEOUT_MS: u64 = 60_000;

/// Values used when the caller does not override them.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderDefaults {
    pub model: &'static str,
    pub base_url: &'static str,
    pub timeout_ms: u64,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl ProviderDefaults {
    pub fn for_kind(kind: ProviderKind) -> Self {
        match kind {
            ProviderKind::OpenAI => Self {
                model: "gpt-4o-mini",
                base_url: "https://api.openai.com/v1",
                timeout_ms: DEFAULT_TIMEOUT_MS,
                max_tokens: 2048,
                temperature: 0.3,
            },
            ProviderKind::Anthropic => Self {
                model: "claude-3-5-haiku-latest",
                base_url: "https://api.anthropic.com/v1",
                timeout_ms: DEFAULT_TIMEOUT_MS,
                max_tokens: 2048,
                temperature: 0.3,
            },
            ProviderKind::Gemini => Self {
                model: "gemini-1.5-flash",
                base_url: "https://generativelanguage.googleapis.com/v1beta",
                timeout_ms: DEFAULT_TIMEOUT_MS,
                max_tokens: 2048,
                temperature: 0.3,
            },
            ProviderKind::Ollama => Self {
                model: "llama3.2",
                base_url: "http://localhost:11434",
                timeout_ms: DEFAULT_LOCAL_TIMEOUT_MS,
                max_tokens: 2048,
                temperature: 0.3,
            },
        }
    }

    /// Prefix of the environment variables read by [`ProviderConfig::from_env`].
    pub fn env_prefix(kind: ProviderKind) -> &'static str {
        match kind {
            ProviderKind::OpenAI => "OPENAI",
            ProviderKind::Anthropic => "ANTHROPIC",
            ProviderKind::Gemini => "GEMINI",
            ProviderKind::Ollama => "OLLAMA",
        }
    }
}

/// Caller-supplied settings; anything left `None` falls back to the defaults.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProviderOverrides {
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub timeout_ms: Option<u64>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl ProviderOverrides {
    /// Read `<PREFIX>_API_KEY`, `<PREFIX>_MODEL`, `<PREFIX>_BASE_URL`,
    /// `<PREFIX>_TIMEOUT_MS`, `<PREFIX>_MAX_TOKENS` and `<PREFIX>_TEMPERATURE`.
    pub fn from_env(kind: ProviderKind) -> Result<Self, Error> {
        let prefix = ProviderDefaults::env_prefix(kind);
        let var = |name: &str| {
            env::var(format!("{prefix}_{name}"))
                .ok()
                .filter(|v| !v.trim().is_empty())
        };

        Ok(Self {
            api_key: var("API_KEY"),
            model: var("MODEL"),
            base_url: var("BASE_URL"),
            timeout_ms: parse_var(kind, &format!("{prefix}_TIMEOUT_MS"), var("TIMEOUT_MS"))?,
            max_tokens: parse_var(kind, &format!("{prefix}_MAX_TOKENS"), var("MAX_TOKENS"))?,
            temperature: parse_var(
                kind,
                &format!("{prefix}_TEMPERATURE"),
                var("TEMPERATURE"),
            )?,
        })
    }
}

fn parse_var<T: FromStr>(
    kind: ProviderKind,
    name: &str,
    value: Option<String>,
) -> Result<Option<T>, Error> {
    value
        .map(|v| {
            v.trim()
                .parse()
                .map_err(|_| Error::config(kind, format!("{name} has an invalid value: '{v}'")))
        })
        .transpose()
}

impl ProviderConfig {
    /// Defaults only, no credential.
    pub fn new(kind: ProviderKind) -> Self {
        Self::resolve(kind, ProviderOverrides::default())
    }

    /// Merge caller overrides over the provider's defaults.
    pub fn resolve(kind: ProviderKind, overrides: ProviderOverrides) -> Self {
        let defaults = ProviderDefaults::for_kind(kind);

        Self {
            kind,
            api_key: overrides.api_key,
            model: overrides.model.unwrap_or_else(|| defaults.model.to_string()),
            base_url: overrides
                .base_url
                .unwrap_or_else(|| defaults.base_url.to_string()),
            timeout_ms: overrides.timeout_ms.unwrap_or(defaults.timeout_ms),
            max_tokens: overrides.max_tokens.unwrap_or(defaults.max_tokens),
            temperature: overrides.temperature.unwrap_or(defaults.temperature),
        }
    }

    /// Build a configuration from environment variables.
    ///
    /// A missing key is not an error here; use [`ProviderConfig::is_configured`]
    /// or let the request fail with `NOT_CONFIGURED`.
    pub fn from_env(kind: ProviderKind) -> Result<Self, Error> {
        Ok(Self::resolve(kind, ProviderOverrides::from_env(kind)?))
    }
}
