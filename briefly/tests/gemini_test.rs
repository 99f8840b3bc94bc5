use base64::Engine as _;
use briefly::llm::gemini::GeminiProvider;
use briefly::llm::{LlmProvider, LlmRequest, SpeakerVoice};
use mockito::Matcher;
use serde_json::json;

#[tokio::test]
async fn test_gemini_generate() {
    let mut server = mockito::Server::new_async().await;

    let mock = server
        .mock("POST", "/models/gemini-2.5-flash:generateContent")
        .match_header("x-goog-api-key", "test-key")
        .match_body(Matcher::PartialJson(json!({
            "contents": [{"parts": [{"text": "Pick the best headlines"}]}],
            "generationConfig": {"maxOutputTokens": 10000}
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{
                "candidates": [{
                    "content": {"parts": [{"text": "3\n"}, {"text": "1\n"}], "role": "model"}
                }],
                "usageMetadata": {"promptTokenCount": 40, "candidatesTokenCount": 4, "totalTokenCount": 44},
                "modelVersion": "gemini-2.5-flash"
            }"#,
        )
        .create_async()
        .await;

    let provider = GeminiProvider::new("test-key").with_base_url(server.url());
    let response = provider
        .generate(LlmRequest::new("Pick the best headlines").with_max_tokens(10000))
        .await
        .unwrap();

    assert_eq!(response.content, "3\n1\n");
    assert_eq!(response.usage.prompt_tokens, 40);
    assert_eq!(response.usage.total_tokens, 44);
    assert_eq!(response.model, "gemini-2.5-flash");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_gemini_batch_embed() {
    let mut server = mockito::Server::new_async().await;

    let mock = server
        .mock("POST", "/models/text-embedding-004:batchEmbedContents")
        .match_body(Matcher::PartialJson(json!({
            "requests": [
                {"model": "models/text-embedding-004", "taskType": "SEMANTIC_SIMILARITY",
                 "content": {"parts": [{"text": "Rocket launch"}]}},
                {"model": "models/text-embedding-004", "taskType": "SEMANTIC_SIMILARITY",
                 "content": {"parts": [{"text": "Chip shortage"}]}}
            ]
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"embeddings": [{"values": [0.1, 0.2]}, {"values": [0.3, 0.4]}]}"#)
        .create_async()
        .await;

    let provider = GeminiProvider::new("test-key").with_base_url(server.url());
    let vectors = provider
        .embed(&["Rocket launch".to_string(), "Chip shortage".to_string()])
        .await
        .unwrap();

    assert_eq!(vectors, vec![vec![0.1, 0.2], vec![0.3, 0.4]]);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_gemini_speech_decodes_inline_audio() {
    let mut server = mockito::Server::new_async().await;
    let pcm = vec![0u8, 1, 2, 3, 250, 251];
    let encoded = base64::engine::general_purpose::STANDARD.encode(&pcm);

    let mock = server
        .mock("POST", "/models/gemini-2.5-flash-preview-tts:generateContent")
        .match_body(Matcher::PartialJson(json!({
            "generationConfig": {
                "responseModalities": ["AUDIO"],
                "speechConfig": {"multiSpeakerVoiceConfig": {"speakerVoiceConfigs": [
                    {"speaker": "Sarah", "voiceConfig": {"prebuiltVoiceConfig": {"voiceName": "Puck"}}},
                    {"speaker": "John", "voiceConfig": {"prebuiltVoiceConfig": {"voiceName": "Kore"}}}
                ]}}
            }
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "candidates": [{"content": {"parts": [
                    {"inlineData": {"mimeType": "audio/L16;codec=pcm;rate=24000", "data": encoded}}
                ]}}]
            })
            .to_string(),
        )
        .create_async()
        .await;

    let provider = GeminiProvider::new("test-key").with_base_url(server.url());
    let speakers = vec![
        SpeakerVoice { speaker: "Sarah".to_string(), voice: "Puck".to_string() },
        SpeakerVoice { speaker: "John".to_string(), voice: "Kore".to_string() },
    ];
    let audio = provider
        .synthesize_speech("This is a news broadcast between Sarah and John:\nSarah: Hi.", &speakers)
        .await
        .unwrap();

    assert_eq!(audio, pcm);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_gemini_error_status_is_reported() {
    let mut server = mockito::Server::new_async().await;

    let _mock = server
        .mock("POST", "/models/gemini-2.5-flash:generateContent")
        .with_status(500)
        .with_body(r#"{"error": {"code": 500, "message": "Internal error encountered."}}"#)
        .create_async()
        .await;

    let provider = GeminiProvider::new("test-key").with_base_url(server.url());
    let err = provider.generate(LlmRequest::new("Test")).await.unwrap_err();

    let message = err.to_string();
    assert!(message.contains("500"));
    assert!(briefly::retry::is_retryable(&err));
}

#[tokio::test]
async fn test_gemini_speech_without_audio_is_an_error() {
    let mut server = mockito::Server::new_async().await;

    let _mock = server
        .mock("POST", "/models/gemini-2.5-flash-preview-tts:generateContent")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"candidates": [{"content": {"parts": [{"text": "no audio"}]}}]}"#)
        .create_async()
        .await;

    let provider = GeminiProvider::new("test-key").with_base_url(server.url());
    let result = provider.synthesize_speech("prompt", &[]).await;

    assert!(result.unwrap_err().to_string().contains("no inline audio"));
}
