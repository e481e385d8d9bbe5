pub mod openai;

use completion_relay::{Prompt, ProviderConfig, ProviderKind};
use wiremock::{Mock, MockServer};

/// Text every streaming fixture spells out, one delta at a time.
pub const EXPECTED_TEXT: &str = "Hello, world!";

/// The conversation every provider test sends.
pub fn test_prompt() -> Prompt {
    Prompt::system("You are terse.").with_user("Say hello to the world.")
}

/// Load test fixture from file
pub fn load_fixture(filename: &str) -> String {
    let path = format!(
        "{}/tests/cross_provider/fixtures/{filename}",
        env!("CARGO_MANIFEST_DIR")
    );
    std::fs::read_to_string(&path).unwrap_or_else(|_| panic!("Failed to load test fixture: {path}"))
}

/// Trait for provider-specific test setup
#[async_trait::async_trait]
pub trait ProviderTestSetup: Send + Sync {
    fn kind() -> ProviderKind;

    /// A configured provider pointing at the mock server.
    fn config(base_url: &str) -> ProviderConfig;

    /// Path the streaming request is posted to.
    fn stream_path() -> String;

    /// Mock answering the streaming request with the provider's fixture.
    /// Matches the exact request payload built from [`test_prompt`].
    fn stream_mock() -> Mock;

    /// Finish reason the fixture ends with, as the provider spells it.
    fn expected_finish_reason() -> &'static str;

    /// Content type the provider streams with.
    fn stream_content_type() -> &'static str {
        "text/event-stream"
    }

    /// Mount the streaming mock, expecting it to be hit `times` times.
    async fn mount_stream_mocks(mock_server: &MockServer, times: u64) {
        Self::stream_mock().expect(times).mount(mock_server).await;
    }
}
