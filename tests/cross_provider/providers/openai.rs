use super::{load_fixture, ProviderTestSetup};
use completion_relay::{ProviderConfig, ProviderKind};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, ResponseTemplate};

pub struct OpenAITestSetup;

#[async_trait::async_trait]
impl ProviderTestSetup for OpenAITestSetup {
    fn kind() -> ProviderKind {
        ProviderKind::OpenAI
    }

    fn config(base_url: &str) -> ProviderConfig {
        ProviderConfig::new(ProviderKind::OpenAI)
            .with_api_key("test-api-key")
            .with_base_url(base_url)
            .with_model("gpt-4o-mini")
            .with_max_tokens(64)
            .with_temperature(0.5)
    }

    fn stream_path() -> String {
        "/chat/completions".to_string()
    }

    fn expected_finish_reason() -> &'static str {
        "stop"
    }

    fn stream_mock() -> Mock {
        let request_payload = json!({
            "model": "gpt-4o-mini",
            "messages": [
                { "role": "system", "content": "You are terse." },
                { "role": "user", "content": "Say hello to the world." }
            ],
            "max_tokens": 64,
            "temperature": 0.5,
            "stream": true
        });

        Mock::given(method("POST"))
            .and(path(Self::stream_path()))
            .and(header("authorization", "Bearer test-api-key"))
            .and(body_json(&request_payload))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(load_fixture("openai_stream.sse"))
                    .insert_header("content-type", Self::stream_content_type()),
            )
    }
}
