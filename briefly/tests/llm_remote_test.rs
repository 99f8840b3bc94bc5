use std::sync::Arc;
use std::time::Duration;

use briefly::llm::remote::RemoteLlmProvider;
use briefly::llm::{LlmProvider, LlmRequest, SpeakerVoice};
use briefly::retry::{ResilientInvoker, RetryPolicy, Sleeper};
use mockito::Matcher;
use serde_json::json;

struct NoSleep;

#[async_trait::async_trait]
impl Sleeper for NoSleep {
    async fn sleep(&self, _duration: Duration) {}
}

#[tokio::test]
async fn test_remote_provider_with_mock() {
    let mut server = mockito::Server::new_async().await;

    // Mock successful OpenAI response
    let mock = server
        .mock("POST", "/")
        .match_header("authorization", "Bearer fake-api-key")
        .match_body(Matcher::PartialJson(json!({"max_tokens": 10000})))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{
                "model": "gpt-4o-mini",
                "choices": [{
                    "message": {
                        "role": "assistant",
                        "content": "Sarah: Good evening.\nJohn: Good evening."
                    },
                    "finish_reason": "stop"
                }],
                "usage": {
                    "prompt_tokens": 10,
                    "completion_tokens": 5,
                    "total_tokens": 15
                }
            }"#,
        )
        .create_async()
        .await;

    let provider = RemoteLlmProvider::new(server.url(), "fake-api-key", "gpt-4o-mini");

    let response = provider
        .generate(LlmRequest::new("Write the script").with_max_tokens(10000))
        .await
        .unwrap();

    assert_eq!(response.content, "Sarah: Good evening.\nJohn: Good evening.");
    assert_eq!(response.usage.total_tokens, 15);
    assert_eq!(response.model, "gpt-4o-mini");

    mock.assert_async().await;
}

#[tokio::test]
async fn test_remote_embeddings_follow_index() {
    let mut server = mockito::Server::new_async().await;

    let mock = server
        .mock("POST", "/embeddings")
        .match_body(Matcher::PartialJson(json!({
            "model": "text-embedding-3-small",
            "input": ["first headline", "second headline"]
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{
                "data": [
                    {"embedding": [0.0, 1.0], "index": 1},
                    {"embedding": [1.0, 0.0], "index": 0}
                ]
            }"#,
        )
        .create_async()
        .await;

    let provider = RemoteLlmProvider::new(server.url(), "fake-api-key", "gpt-4o-mini")
        .with_embedding_model("text-embedding-3-small");

    let vectors = provider
        .embed(&["first headline".to_string(), "second headline".to_string()])
        .await
        .unwrap();

    assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_remote_embedding_count_mismatch_is_an_error() {
    let mut server = mockito::Server::new_async().await;

    let _mock = server
        .mock("POST", "/embeddings")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"data": [{"embedding": [1.0], "index": 0}]}"#)
        .create_async()
        .await;

    let provider = RemoteLlmProvider::new(server.url(), "fake-api-key", "gpt-4o-mini");
    let result = provider.embed(&["a".to_string(), "b".to_string()]).await;

    assert!(result.unwrap_err().to_string().contains("1 vectors for 2 inputs"));
}

#[tokio::test]
async fn test_remote_speech_returns_raw_pcm() {
    let mut server = mockito::Server::new_async().await;

    let mock = server
        .mock("POST", "/audio/speech")
        .match_body(Matcher::PartialJson(json!({
            "voice": "puck",
            "response_format": "pcm"
        })))
        .with_status(200)
        .with_header("content-type", "application/octet-stream")
        .with_body([1u8, 2, 3, 4])
        .create_async()
        .await;

    let provider = RemoteLlmProvider::new(server.url(), "fake-api-key", "gpt-4o-mini");
    let speakers = vec![
        SpeakerVoice { speaker: "Sarah".to_string(), voice: "Puck".to_string() },
        SpeakerVoice { speaker: "John".to_string(), voice: "Kore".to_string() },
    ];

    let pcm = provider
        .synthesize_speech("This is a news broadcast between Sarah and John:\nSarah: Hi.", &speakers)
        .await
        .unwrap();

    assert_eq!(pcm, vec![1, 2, 3, 4]);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_remote_provider_error_is_not_retried() {
    let mut server = mockito::Server::new_async().await;

    // Mock API error
    let mock = server
        .mock("POST", "/")
        .with_status(429)
        .with_header("content-type", "application/json")
        .with_body(r#"{"error": {"message": "Rate limit exceeded"}}"#)
        .expect(1)
        .create_async()
        .await;

    let provider = RemoteLlmProvider::new(server.url(), "fake-api-key", "gpt-4o-mini");
    let invoker = ResilientInvoker::new(RetryPolicy::default()).with_sleeper(Arc::new(NoSleep));

    let result = invoker
        .invoke("rerank", || provider.generate(LlmRequest::new("Test")))
        .await;

    let err = result.unwrap_err();
    assert!(err.to_string().contains("429"));

    mock.assert_async().await;
}

#[tokio::test]
async fn test_remote_unavailable_is_retried_until_budget_spent() {
    let mut server = mockito::Server::new_async().await;

    let mock = server
        .mock("POST", "/")
        .with_status(503)
        .with_body("Service Unavailable")
        .expect(3)
        .create_async()
        .await;

    let provider = RemoteLlmProvider::new(server.url(), "fake-api-key", "gpt-4o-mini");
    let invoker = ResilientInvoker::new(RetryPolicy::new(2, Duration::from_millis(1)))
        .with_sleeper(Arc::new(NoSleep));

    let result = invoker
        .invoke("script generation", || provider.generate(LlmRequest::new("Test")))
        .await;

    assert!(result.unwrap_err().to_string().contains("503"));
    mock.assert_async().await;
}
