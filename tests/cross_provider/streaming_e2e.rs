use completion_relay::{CompletionClient, ErrorCode, ProviderKind, Transport, Usage};
use futures_util::StreamExt;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::init_tracing;
use super::providers::{
    anthropic::AnthropicTestSetup, gemini::GeminiTestSetup, ollama::OllamaTestSetup,
    openai::OpenAITestSetup, test_prompt, ProviderTestSetup, EXPECTED_TEXT,
};

fn collector() -> (Arc<Mutex<Vec<String>>>, impl FnMut(&str) + Send + 'static) {
    let deltas = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&deltas);
    (deltas, move |delta: &str| {
        sink.lock().unwrap().push(delta.to_string())
    })
}

/// Stream the fixture and check the deltas add up to the final completion.
async fn run_streaming_test<T: ProviderTestSetup>() {
    init_tracing();
    let mock_server = MockServer::start().await;
    T::mount_stream_mocks(&mock_server, 1).await;

    let client = CompletionClient::spawn();
    let config = T::config(&mock_server.uri());
    let (deltas, on_chunk) = collector();

    let completion = client
        .stream(config.clone(), test_prompt(), on_chunk)
        .await
        .unwrap_or_else(|e| panic!("{} stream failed: {e}", T::kind()));

    let deltas = deltas.lock().unwrap().clone();
    assert!(deltas.len() > 1, "expected several deltas, got {deltas:?}");
    assert!(deltas.iter().all(|d| !d.is_empty()));
    assert_eq!(deltas.concat(), EXPECTED_TEXT);

    assert_eq!(completion.text, EXPECTED_TEXT);
    assert_eq!(completion.provider, T::kind());
    assert_eq!(completion.model, config.model);
    assert_eq!(
        completion.finish_reason.as_deref(),
        Some(T::expected_finish_reason())
    );
    assert!(!completion.is_truncated());
    assert_eq!(client.in_flight().await, 0);
}

async fn run_complete_test<T: ProviderTestSetup>() {
    init_tracing();
    let mock_server = MockServer::start().await;
    T::mount_stream_mocks(&mock_server, 2).await;

    let client = CompletionClient::spawn();
    let config = T::config(&mock_server.uri());

    let streamed = client.stream(config.clone(), test_prompt(), |_| {}).await.unwrap();
    let completed = client.complete(config, test_prompt()).await.unwrap();

    assert_eq!(completed, streamed);
}

async fn run_sequence_test<T: ProviderTestSetup>() {
    init_tracing();
    let mock_server = MockServer::start().await;
    T::mount_stream_mocks(&mock_server, 1).await;

    let client = CompletionClient::spawn();
    let sequence = client.as_sequence(T::config(&mock_server.uri()), test_prompt());

    let deltas: Vec<String> = sequence
        .map(|item| item.expect("sequence item"))
        .collect()
        .await;
    assert_eq!(deltas.concat(), EXPECTED_TEXT);
    assert_eq!(client.in_flight().await, 0);
}

/// Non-2xx responses map onto the error taxonomy, with the provider's own
/// message when its error body has one.
async fn run_http_error_test<T: ProviderTestSetup>() {
    init_tracing();
    let cases = [
        (401, "Invalid API key", ErrorCode::InvalidCredential),
        (429, "Slow down", ErrorCode::RateLimited),
        (500, "Internal failure", ErrorCode::ProviderError),
    ];

    let client = CompletionClient::spawn();
    for (status, message, code) in cases {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(T::stream_path()))
            .respond_with(
                ResponseTemplate::new(status)
                    .set_body_json(json!({ "error": { "message": message } })),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let error = client
            .stream(T::config(&mock_server.uri()), test_prompt(), |_| {})
            .await
            .unwrap_err();

        assert_eq!(error.code, code, "status {status}");
        assert_eq!(error.provider, T::kind());
        assert_eq!(error.message, message);
        assert!(error.details.is_some());
    }
}

/// The whole request times out when the provider does not answer in time.
async fn run_timeout_test<T: ProviderTestSetup>() {
    init_tracing();
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(T::stream_path()))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&mock_server)
        .await;

    let client = CompletionClient::spawn();
    let config = T::config(&mock_server.uri()).with_timeout_ms(200);

    let error = client.stream(config, test_prompt(), |_| {}).await.unwrap_err();

    assert_eq!(error.code, ErrorCode::Timeout);
    assert_eq!(error.provider, T::kind());
    assert!(error.message.contains("200ms"), "{}", error.message);
    assert_eq!(client.in_flight().await, 0);
}

#[tokio::test]
async fn test_openai_streaming() {
    run_streaming_test::<OpenAITestSetup>().await;
}

#[tokio::test]
async fn test_anthropic_streaming() {
    run_streaming_test::<AnthropicTestSetup>().await;
}

#[tokio::test]
async fn test_gemini_streaming() {
    run_streaming_test::<GeminiTestSetup>().await;
}

#[tokio::test]
async fn test_ollama_streaming() {
    run_streaming_test::<OllamaTestSetup>().await;
}

#[tokio::test]
async fn test_openai_complete_matches_stream() {
    run_complete_test::<OpenAITestSetup>().await;
}

#[tokio::test]
async fn test_anthropic_complete_matches_stream() {
    run_complete_test::<AnthropicTestSetup>().await;
}

#[tokio::test]
async fn test_gemini_complete_matches_stream() {
    run_complete_test::<GeminiTestSetup>().await;
}

#[tokio::test]
async fn test_ollama_complete_matches_stream() {
    run_complete_test::<OllamaTestSetup>().await;
}

#[tokio::test]
async fn test_openai_sequence() {
    run_sequence_test::<OpenAITestSetup>().await;
}

#[tokio::test]
async fn test_gemini_sequence() {
    run_sequence_test::<GeminiTestSetup>().await;
}

#[tokio::test]
async fn test_openai_http_errors() {
    run_http_error_test::<OpenAITestSetup>().await;
}

#[tokio::test]
async fn test_anthropic_http_errors() {
    run_http_error_test::<AnthropicTestSetup>().await;
}

#[tokio::test]
async fn test_gemini_http_errors() {
    run_http_error_test::<GeminiTestSetup>().await;
}

#[tokio::test]
async fn test_ollama_http_errors() {
    run_http_error_test::<OllamaTestSetup>().await;
}

#[tokio::test]
async fn test_openai_timeout() {
    run_timeout_test::<OpenAITestSetup>().await;
}

#[tokio::test]
async fn test_ollama_timeout() {
    run_timeout_test::<OllamaTestSetup>().await;
}

#[tokio::test]
async fn test_usage_reported_where_the_provider_sends_it() {
    init_tracing();
    let mock_server = MockServer::start().await;
    OpenAITestSetup::mount_stream_mocks(&mock_server, 1).await;
    AnthropicTestSetup::mount_stream_mocks(&mock_server, 1).await;
    GeminiTestSetup::mount_stream_mocks(&mock_server, 1).await;
    OllamaTestSetup::mount_stream_mocks(&mock_server, 1).await;

    let client = CompletionClient::spawn();
    let uri = mock_server.uri();

    let openai = client.complete(OpenAITestSetup::config(&uri), test_prompt());
    let anthropic = client.complete(AnthropicTestSetup::config(&uri), test_prompt());
    let gemini = client.complete(GeminiTestSetup::config(&uri), test_prompt());
    let ollama = client.complete(OllamaTestSetup::config(&uri), test_prompt());

    assert_eq!(openai.await.unwrap().usage, None);
    assert_eq!(anthropic.await.unwrap().usage, Some(Usage::new(12, 4)));
    assert_eq!(gemini.await.unwrap().usage, Some(Usage::new(5, 4)));
    assert_eq!(ollama.await.unwrap().usage, Some(Usage::new(11, 4)));
}

/// Calls to different providers share one worker and never see each other's
/// chunks.
#[tokio::test]
async fn test_concurrent_streams_are_multiplexed() {
    init_tracing();
    let mock_server = MockServer::start().await;
    OpenAITestSetup::mount_stream_mocks(&mock_server, 2).await;
    AnthropicTestSetup::mount_stream_mocks(&mock_server, 2).await;
    GeminiTestSetup::mount_stream_mocks(&mock_server, 2).await;
    OllamaTestSetup::mount_stream_mocks(&mock_server, 2).await;

    let client = CompletionClient::spawn();
    let uri = mock_server.uri();

    let configs = [
        OpenAITestSetup::config(&uri),
        AnthropicTestSetup::config(&uri),
        GeminiTestSetup::config(&uri),
        OllamaTestSetup::config(&uri),
    ];

    let mut calls = Vec::new();
    for config in configs.iter().chain(configs.iter()) {
        let (deltas, on_chunk) = collector();
        let handle = client.stream(config.clone(), test_prompt(), on_chunk);
        calls.push((config.kind, deltas, handle));
    }

    let ids: std::collections::HashSet<_> = calls.iter().map(|(_, _, h)| h.id().clone()).collect();
    assert_eq!(ids.len(), calls.len());

    for (kind, deltas, handle) in calls {
        let completion = handle.await.unwrap();
        assert_eq!(completion.provider, kind);
        assert_eq!(completion.text, EXPECTED_TEXT);
        assert_eq!(deltas.lock().unwrap().concat(), EXPECTED_TEXT);
    }
    assert_eq!(client.in_flight().await, 0);
}

#[tokio::test]
async fn test_missing_credentials_fail_before_any_request() {
    init_tracing();
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let client = CompletionClient::spawn();
    let uri = mock_server.uri();
    let configs = [
        OpenAITestSetup::config(&uri),
        AnthropicTestSetup::config(&uri).with_api_key("   "),
        GeminiTestSetup::config(&uri),
    ];

    for mut config in configs {
        if config.kind != ProviderKind::Anthropic {
            config.api_key = None;
        }
        let kind = config.kind;

        let error = client.stream(config, test_prompt(), |_| {}).await.unwrap_err();
        assert_eq!(error.code, ErrorCode::NotConfigured);
        assert_eq!(error.provider, kind);
        assert!(error.message.contains(kind.display_name()));
    }
}

#[tokio::test]
async fn test_ollama_unreachable_suggests_starting_the_server() {
    init_tracing();
    // Grab a free port, then close it so nothing is listening.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = CompletionClient::spawn();
    let config = OllamaTestSetup::config(&format!("http://{addr}"));

    let error = client.stream(config, test_prompt(), |_| {}).await.unwrap_err();

    assert_eq!(error.code, ErrorCode::NetworkError);
    assert!(error.message.contains("ollama serve"), "{}", error.message);
}

/// A fast completion must not be followed by a late timeout.
#[tokio::test]
async fn test_completion_before_timeout_is_not_aborted_later() {
    init_tracing();
    let mock_server = MockServer::start().await;
    OpenAITestSetup::mount_stream_mocks(&mock_server, 2).await;

    let client = CompletionClient::spawn();
    let config = OpenAITestSetup::config(&mock_server.uri()).with_timeout_ms(300);

    let completion = client.stream(config, test_prompt(), |_| {}).await.unwrap();
    assert_eq!(completion.text, EXPECTED_TEXT);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(client.in_flight().await, 0);

    // The worker is still healthy afterwards.
    let again = client
        .complete(OpenAITestSetup::config(&mock_server.uri()), test_prompt())
        .await
        .unwrap();
    assert_eq!(again.text, EXPECTED_TEXT);
}

/// The unary path posts a non-streaming request and decodes the whole body.
#[tokio::test]
async fn test_unary_completion_without_the_worker() {
    init_tracing();
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({ "stream": false })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": "Hello, world!" },
                "finish_reason": "stop"
            }],
            "usage": { "prompt_tokens": 9, "completion_tokens": 4, "total_tokens": 13 }
        })))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/models/gemini-1.5-flash:generateContent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{
                "content": { "parts": [{ "text": "Hello, " }, { "text": "world!" }], "role": "model" },
                "finishReason": "MAX_TOKENS"
            }]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let transport = Transport::new().unwrap();
    let uri = mock_server.uri();
    let messages = test_prompt().into_messages();

    let openai = transport
        .complete_unary(&OpenAITestSetup::config(&uri), &messages)
        .await
        .unwrap();
    assert_eq!(openai.text, EXPECTED_TEXT);
    assert_eq!(openai.usage, Some(Usage::new(9, 4)));

    let gemini = transport
        .complete_unary(&GeminiTestSetup::config(&uri), &messages)
        .await
        .unwrap();
    assert_eq!(gemini.text, EXPECTED_TEXT);
    assert!(gemini.is_truncated());
}

/// Unary requests are bounded by the configured timeout.
#[tokio::test]
async fn test_unary_completion_times_out() {
    init_tracing();
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&mock_server)
        .await;

    let transport = Transport::new().unwrap();
    let config = OllamaTestSetup::config(&mock_server.uri()).with_timeout_ms(200);
    let error = transport
        .complete_unary(&config, &test_prompt().into_messages())
        .await
        .unwrap_err();

    assert_eq!(error.code, ErrorCode::Timeout);
}

/// A client handed a custom transport routes calls through it.
#[tokio::test]
async fn test_client_with_custom_transport() {
    init_tracing();
    let mock_server = MockServer::start().await;
    OllamaTestSetup::mount_stream_mocks(&mock_server, 1).await;

    let client = CompletionClient::with_transport(Transport::new().unwrap());
    let completion = client
        .complete(OllamaTestSetup::config(&mock_server.uri()), test_prompt())
        .await
        .unwrap();
    assert_eq!(completion.text, EXPECTED_TEXT);
}
