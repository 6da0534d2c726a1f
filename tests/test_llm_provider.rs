//! Integration tests for the chat-completions provider
//!
//! Tests behavioral contracts against a mock HTTP endpoint:
//! - request shape (auth header, two user turns, disabled thinking)
//! - reply extraction from `choices[0].message.content`
//! - error scenarios (non-2xx status, malformed bodies, timeouts)
//! - the worker publishing the extracted reply unmodified

use mqtt_temp_relay::llm::{ChatCompletionsConfig, ChatCompletionsProvider, LlmError, LlmProvider};
use mqtt_temp_relay::relay::{RequestWorker, WorkItem, WorkOutcome};
use mqtt_temp_relay::testing::MockTransport;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ENDPOINT_PATH: &str = "/api/paas/v4/chat/completions";

fn test_config(server_uri: &str) -> ChatCompletionsConfig {
    ChatCompletionsConfig {
        endpoint: format!("{server_uri}{ENDPOINT_PATH}"),
        api_key: "test-api-key".to_string(),
        model: "glm-4.6".to_string(),
        style_prompt: "Reply in one short sentence.".to_string(),
        max_tokens: 128,
        temperature: 1.0,
        timeout: Duration::from_secs(5),
    }
}

fn provider_for(server: &MockServer) -> ChatCompletionsProvider {
    ChatCompletionsProvider::new(test_config(&server.uri())).unwrap()
}

fn work_item(prompt: &str) -> WorkItem {
    WorkItem {
        request_id: Uuid::new_v4(),
        prompt: prompt.to_string(),
    }
}

#[tokio::test]
async fn test_provider_sends_expected_request() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(ENDPOINT_PATH))
        .and(header("Authorization", "Bearer test-api-key"))
        .and(header("Content-Type", "application/json"))
        .and(body_json(json!({
            "model": "glm-4.6",
            "messages": [
                {"role": "user", "content": "Reply in one short sentence."},
                {"role": "user", "content": "tell me a joke"}
            ],
            "thinking": {"type": "disabled"},
            "max_tokens": 128,
            "temperature": 1.0
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": "hello"}}]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let reply = provider_for(&mock_server)
        .complete("tell me a joke")
        .await
        .unwrap();

    assert_eq!(reply, "hello");
}

#[tokio::test]
async fn test_provider_rejects_response_without_choices() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(ENDPOINT_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "abc"})))
        .mount(&mock_server)
        .await;

    let result = provider_for(&mock_server).complete("hi").await;
    assert!(matches!(result, Err(LlmError::InvalidResponse(_))));
}

#[tokio::test]
async fn test_provider_rejects_non_json_body() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(ENDPOINT_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway</html>"))
        .mount(&mock_server)
        .await;

    let result = provider_for(&mock_server).complete("hi").await;
    assert!(matches!(result, Err(LlmError::InvalidResponse(_))));
}

#[tokio::test]
async fn test_provider_reports_error_status() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(ENDPOINT_PATH))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({"error": {"message": "bad key"}})),
        )
        .mount(&mock_server)
        .await;

    match provider_for(&mock_server).complete("hi").await {
        Err(LlmError::ApiError(message)) => assert!(message.contains("401")),
        other => panic!("expected ApiError, got {other:?}"),
    }
}

#[tokio::test]
async fn test_provider_times_out_on_slow_endpoint() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(ENDPOINT_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"choices": [{"message": {"content": "late"}}]}))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&mock_server)
        .await;

    let mut config = test_config(&mock_server.uri());
    config.timeout = Duration::from_millis(200);
    let provider = ChatCompletionsProvider::new(config).unwrap();

    let result = provider.complete("hi").await;
    assert!(matches!(result, Err(LlmError::NetworkError(_))));
}

#[tokio::test]
async fn test_worker_publishes_reply_exactly() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(ENDPOINT_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"content": "hello"}}]
        })))
        .mount(&mock_server)
        .await;

    let transport = Arc::new(MockTransport::new());
    let worker = RequestWorker::new(
        transport.clone(),
        Arc::new(provider_for(&mock_server)),
        "danmaku/test",
    );

    assert_eq!(worker.process(work_item("hi")).await, WorkOutcome::Published);
    assert_eq!(
        transport.get_published_messages().await,
        vec![("danmaku/test".to_string(), b"hello".to_vec())]
    );
}

#[tokio::test]
async fn test_worker_publishes_nothing_on_malformed_reply() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(ENDPOINT_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"object": "error"})))
        .mount(&mock_server)
        .await;

    let transport = Arc::new(MockTransport::new());
    let worker = RequestWorker::new(
        transport.clone(),
        Arc::new(provider_for(&mock_server)),
        "danmaku/test",
    );

    assert_eq!(
        worker.process(work_item("hi")).await,
        WorkOutcome::ProviderFailed
    );
    assert!(transport.get_published_messages().await.is_empty());
}
