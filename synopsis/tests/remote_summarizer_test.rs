use std::io::Write;

use mockito::Matcher;
use serde_json::json;

use synopsis::error::ExternalError;
use synopsis::llm::remote::RemoteSummarizer;
use synopsis::llm::{ExternalEndpoint, ExternalSummarizer};

fn endpoint(base: &str) -> ExternalEndpoint {
    ExternalEndpoint {
        api_key: "secret-key".to_string(),
        api_url: format!("{}/v1beta/models/flash", base),
    }
}

#[tokio::test]
async fn test_sends_instruction_with_key_header() {
    let mut server = mockito::Server::new_async().await;

    let mock = server
        .mock("POST", "/v1beta/models/flash:generateContent")
        .match_header("x-api-key", "secret-key")
        .match_header("content-type", "application/json")
        .match_body(Matcher::Json(json!({
            "contents": [{
                "parts": [{ "text": "Give me a very short summary in 12 words: A long discussion." }]
            }]
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{
                "candidates": [{
                    "content": { "parts": [{ "text": "Hello world" }], "role": "model" },
                    "finishReason": "STOP"
                }]
            }"#,
        )
        .create_async()
        .await;

    let summarizer = RemoteSummarizer::new("X-api-key");
    let result = summarizer
        .summarize("A long discussion.", 12, &endpoint(&server.url()))
        .await;

    assert_eq!(result, Ok("Hello world".to_string()));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_custom_key_header() {
    let mut server = mockito::Server::new_async().await;

    let mock = server
        .mock("POST", "/v1beta/models/flash:generateContent")
        .match_header("x-goog-api-key", "secret-key")
        .with_status(200)
        .with_body(r#"{"candidates":[{"content":{"parts":[{"text":"ok"}]}}]}"#)
        .create_async()
        .await;

    let summarizer = RemoteSummarizer::new("x-goog-api-key");
    let result = summarizer
        .summarize("content", 5, &endpoint(&server.url()))
        .await;

    assert_eq!(result, Ok("ok".to_string()));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_unexpected_shape_is_empty_text() {
    let mut server = mockito::Server::new_async().await;

    let mock = server
        .mock("POST", "/v1beta/models/flash:generateContent")
        .with_status(200)
        .with_body(r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#)
        .create_async()
        .await;

    let summarizer = RemoteSummarizer::new("X-api-key");
    let result = summarizer
        .summarize("content", 5, &endpoint(&server.url()))
        .await;

    assert_eq!(result, Ok(String::new()));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_error_status_is_not_a_transport_failure() {
    let mut server = mockito::Server::new_async().await;

    let mock = server
        .mock("POST", "/v1beta/models/flash:generateContent")
        .with_status(429)
        .with_header("content-type", "application/json")
        .with_body(r#"{"error": {"code": 429, "message": "Resource exhausted"}}"#)
        .create_async()
        .await;

    let summarizer = RemoteSummarizer::new("X-api-key");
    let result = summarizer
        .summarize("content", 5, &endpoint(&server.url()))
        .await;

    assert_eq!(result, Ok(String::new()));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_connection_refused_is_transport_error() {
    // Nothing listens on port 1
    let summarizer = RemoteSummarizer::new("X-api-key").with_timeout(5);
    let result = summarizer
        .summarize("content", 5, &endpoint("http://127.0.0.1:1"))
        .await;

    assert!(matches!(result, Err(ExternalError::Transport(_))));
}

#[tokio::test]
async fn test_timeout_is_transport_error() {
    let mut server = mockito::Server::new_async().await;

    let _mock = server
        .mock("POST", "/v1beta/models/flash:generateContent")
        .with_status(200)
        .with_chunked_body(|w| {
            std::thread::sleep(std::time::Duration::from_secs(3));
            w.write_all(b"too late")
        })
        .create_async()
        .await;

    let summarizer = RemoteSummarizer::new("X-api-key").with_timeout(1);
    let result = summarizer
        .summarize("content", 5, &endpoint(&server.url()))
        .await;

    match result {
        Err(ExternalError::Transport(message)) => assert!(message.contains("timed out")),
        other => panic!("expected timeout, got {:?}", other),
    }
}
