use completion_relay::{CompletionClient, ErrorCode, ProviderConfig, ProviderKind};
use futures_util::StreamExt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

use super::init_tracing;
use super::providers::{openai::OpenAITestSetup, test_prompt, ProviderTestSetup, EXPECTED_TEXT};
use super::stalling_server::StallingServer;

const WAIT: Duration = Duration::from_secs(5);

fn stalled_config(server: &StallingServer) -> ProviderConfig {
    OpenAITestSetup::config(server.base_url())
}

#[tokio::test]
async fn test_abort_mid_stream_stops_delivery() {
    init_tracing();
    let server = StallingServer::openai().await;
    let client = CompletionClient::spawn();

    let (tx, mut chunks) = mpsc::unbounded_channel();
    let handle = client.stream(stalled_config(&server), test_prompt(), move |delta| {
        let _ = tx.send(delta.to_string());
    });

    let first = timeout(WAIT, chunks.recv()).await.unwrap();
    assert_eq!(first.as_deref(), Some("Hello"));

    handle.abort();
    let error = timeout(WAIT, handle).await.unwrap().unwrap_err();
    assert_eq!(error.code, ErrorCode::Aborted);
    assert_eq!(error.provider, ProviderKind::OpenAI);

    // The rest of the body arrives after the abort and must go nowhere.
    server.release();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(chunks.try_recv().is_err());
    assert_eq!(client.in_flight().await, 0);
}

#[tokio::test]
async fn test_abort_by_id_from_the_client() {
    init_tracing();
    let server = StallingServer::openai().await;
    let client = CompletionClient::spawn();

    let handle = client.complete(stalled_config(&server), test_prompt());
    let id = handle.id().clone();
    client.abort(&id);

    let error = timeout(WAIT, handle).await.unwrap().unwrap_err();
    assert_eq!(error.code, ErrorCode::Aborted);

    // Aborting again, or aborting an id nobody knows, is a no-op.
    client.abort(&id);
    client.abort(&"unknown".into());
    assert_eq!(client.in_flight().await, 0);
}

#[tokio::test]
async fn test_abort_all_rejects_every_pending_call() {
    init_tracing();
    let server = StallingServer::openai().await;
    let client = CompletionClient::spawn();

    let handles: Vec<_> = (0..3)
        .map(|_| client.stream(stalled_config(&server), test_prompt(), |_| {}))
        .collect();
    assert_eq!(client.in_flight().await, 3);

    client.abort_all();
    for handle in handles {
        let error = timeout(WAIT, handle).await.unwrap().unwrap_err();
        assert_eq!(error.code, ErrorCode::Aborted);
    }
    assert_eq!(client.in_flight().await, 0);
}

/// Other calls keep running when one of them is aborted.
#[tokio::test]
async fn test_abort_leaves_other_calls_alone() {
    init_tracing();
    let server = StallingServer::openai().await;
    let client = CompletionClient::spawn();

    let aborted = client.stream(stalled_config(&server), test_prompt(), |_| {});
    let survivor = client.stream(stalled_config(&server), test_prompt(), |_| {});

    aborted.abort();
    assert_eq!(
        timeout(WAIT, aborted).await.unwrap().unwrap_err().code,
        ErrorCode::Aborted
    );

    server.release();
    let completion = timeout(WAIT, survivor).await.unwrap().unwrap();
    assert_eq!(completion.text, EXPECTED_TEXT);
    assert_eq!(completion.finish_reason.as_deref(), Some("stop"));
}

#[tokio::test]
async fn test_timeout_while_streaming() {
    init_tracing();
    let server = StallingServer::openai().await;
    let client = CompletionClient::spawn();

    let (tx, mut chunks) = mpsc::unbounded_channel();
    let config = stalled_config(&server).with_timeout_ms(300);
    let handle = client.stream(config, test_prompt(), move |delta| {
        let _ = tx.send(delta.to_string());
    });

    let error = timeout(WAIT, handle).await.unwrap().unwrap_err();
    assert_eq!(error.code, ErrorCode::Timeout);
    assert_eq!(chunks.recv().await.as_deref(), Some("Hello"));
}

#[tokio::test]
async fn test_dropping_a_sequence_aborts_the_request() {
    init_tracing();
    let server = StallingServer::openai().await;
    let client = CompletionClient::spawn();

    let mut sequence = client.as_sequence(stalled_config(&server), test_prompt());
    let first = timeout(WAIT, sequence.next()).await.unwrap();
    assert_eq!(first.unwrap().unwrap(), "Hello");
    assert_eq!(client.in_flight().await, 1);

    drop(sequence);
    assert_eq!(client.in_flight().await, 0);
}

#[tokio::test]
async fn test_sequence_ends_with_the_error() {
    init_tracing();
    let server = StallingServer::openai().await;
    let client = CompletionClient::spawn();

    let mut sequence = client.as_sequence(stalled_config(&server), test_prompt());
    let first = timeout(WAIT, sequence.next()).await.unwrap();
    assert_eq!(first.unwrap().unwrap(), "Hello");

    client.abort(sequence.id());
    let last = timeout(WAIT, sequence.next()).await.unwrap();
    assert_eq!(last.unwrap().unwrap_err().code, ErrorCode::Aborted);
    assert!(sequence.next().await.is_none());
}

#[tokio::test]
async fn test_restart_rejects_pending_and_keeps_serving() {
    init_tracing();
    let server = StallingServer::openai().await;
    let client = CompletionClient::spawn();

    let stalled = client.stream(stalled_config(&server), test_prompt(), |_| {});
    client.restart().await.unwrap();

    let error = timeout(WAIT, stalled).await.unwrap().unwrap_err();
    assert_eq!(error.code, ErrorCode::Aborted);
    assert_eq!(client.in_flight().await, 0);

    // The fresh worker serves new calls.
    server.release();
    let completion = timeout(WAIT, client.complete(stalled_config(&server), test_prompt()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(completion.text, EXPECTED_TEXT);
}

#[tokio::test]
async fn test_clones_share_one_worker() {
    init_tracing();
    let server = StallingServer::openai().await;
    let client = CompletionClient::spawn();
    let other = client.clone();

    let handle = other.stream(stalled_config(&server), test_prompt(), |_| {});
    assert_eq!(client.in_flight().await, 1);

    client.abort_all();
    let error = timeout(WAIT, handle).await.unwrap().unwrap_err();
    assert_eq!(error.code, ErrorCode::Aborted);
}
