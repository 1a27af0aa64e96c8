use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use coursechat_agents::{MemoryDocumentStore, OpenAiProvider, TOOL_APOLOGY};
use coursechat_common::{ChatError, ContextCategory, ErrorKind, StreamEvent};
use coursechat_config::AppConfig;
use coursechat_gateway::{AppState, build_router};
use serde_json::json;
use tower::ServiceExt;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PRICING_DOC: &str = "# Pricing\n\n## Key Information\n\nTuition for the full-stack bootcamp is $9,800. Payment plans exist.\n";

fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.gateway.rate_limit.enabled = false;
    config.composer.style_hints = false;
    config.llm.model = "gpt-4o-mini".into();
    config
}

fn app(server: &MockServer) -> (Router, Arc<AppState>) {
    let provider = Arc::new(OpenAiProvider::new("test-key".into(), Some(server.uri())).unwrap());
    let store = Arc::new(MemoryDocumentStore::new().with_document(
        ContextCategory::Pricing,
        PRICING_DOC,
        None,
    ));
    let state = Arc::new(AppState::with_store(test_config(), provider, store));
    (build_router(state.clone()), state)
}

fn sse_body(chunks: &[serde_json::Value]) -> String {
    chunks
        .iter()
        .map(|c| format!("data: {c}\n\n"))
        .chain(std::iter::once("data: [DONE]\n\n".to_string()))
        .collect()
}

fn text_chunk(text: &str) -> serde_json::Value {
    json!({"choices": [{"index": 0, "delta": {"content": text}, "finish_reason": null}]})
}

fn finish_chunk(reason: &str) -> serde_json::Value {
    json!({"choices": [{"index": 0, "delta": {}, "finish_reason": reason}]})
}

fn chat_request(body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/chat")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn read_body(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn parse_frames(body: &str) -> Vec<StreamEvent> {
    body.lines()
        .filter_map(|line| StreamEvent::parse_line(line).unwrap())
        .collect()
}

#[tokio::test]
async fn test_chat_streams_frames_in_order() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(ResponseTemplate::new(200).set_body_string(sse_body(&[
            text_chunk("Hi"),
            text_chunk(" there!"),
            finish_chunk("stop"),
        ])))
        .mount(&server)
        .await;

    let (app, state) = app(&server);
    let response = app
        .oneshot(chat_request(json!({"message": "hello"})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "text/event-stream"
    );
    let request_id = response
        .headers()
        .get("x-request-id")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();

    let body = read_body(response).await;
    assert!(body.starts_with("data: {\"content\":\"Hi\"}\n\n"));
    assert!(body.ends_with("data: [DONE]\n\n"));

    let events = parse_frames(&body);
    assert_eq!(events[0], StreamEvent::Content("Hi".into()));
    assert_eq!(events[1], StreamEvent::Content(" there!".into()));
    match &events[2] {
        StreamEvent::Completion(meta) => {
            assert_eq!(meta.request_id, request_id);
            assert_eq!(meta.model, "gpt-4o-mini");
            assert!(!meta.used_tools);
        }
        other => panic!("expected completion, got {other:?}"),
    }
    assert_eq!(events[3], StreamEvent::Done);
    assert_eq!(events.len(), 4);

    assert!(state.turns.is_empty(), "finished turns leave the registry");
}

#[tokio::test]
async fn test_chat_tool_turn_emits_summarized_result() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(ResponseTemplate::new(200).set_body_string(sse_body(&[
            json!({"choices": [{"index": 0, "delta": {"tool_calls": [{
                "index": 0, "id": "call_1", "type": "function",
                "function": {"name": "retrieve_chatbot_context", "arguments": "{\"context"}
            }]}, "finish_reason": null}]}),
            finish_chunk("tool_calls"),
        ])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({"stream": false})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "gpt-4o-mini",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {
                            "name": "retrieve_chatbot_context",
                            "arguments": "{\"context_type\":\"pricing\"}"
                        }
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        })))
        .mount(&server)
        .await;

    let (app, _state) = app(&server);
    let response = app
        .oneshot(chat_request(json!({
            "message": "How much does the program cost?",
            "context": {"type": "course-advising"}
        })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let events = parse_frames(&read_body(response).await);
    assert_eq!(
        events[0],
        StreamEvent::ToolResult {
            tool_name: "retrieve_chatbot_context".into(),
            content: "Tuition for the full-stack bootcamp is $9,800.".into(),
        }
    );
    match &events[1] {
        StreamEvent::Completion(meta) => {
            assert_eq!(meta.tool_result_count, 1);
            assert!(meta.used_tools);
        }
        other => panic!("expected completion, got {other:?}"),
    }
    assert_eq!(events[2], StreamEvent::Done);
}

#[tokio::test]
async fn test_chat_tool_for_missing_document_apologizes() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(sse_body(&[finish_chunk("tool_calls")])),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({"stream": false})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "gpt-4o-mini",
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "function": {
                            "name": "retrieve_chatbot_context",
                            "arguments": "{\"context_type\":\"faq\"}"
                        }
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        })))
        .mount(&server)
        .await;

    let (app, _state) = app(&server);
    let response = app
        .oneshot(chat_request(json!({"message": "Any FAQ?"})))
        .await
        .unwrap();

    let events = parse_frames(&read_body(response).await);
    assert!(matches!(
        &events[0],
        StreamEvent::ToolResult { content, .. } if content == TOOL_APOLOGY
    ));
    assert_eq!(events.last(), Some(&StreamEvent::Done));
}

#[tokio::test]
async fn test_chat_provider_failure_is_in_band() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&server)
        .await;

    let (app, _state) = app(&server);
    let response = app
        .oneshot(chat_request(json!({"message": "hello"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = read_body(response).await;
    let events = parse_frames(&body);
    assert!(matches!(
        events[0],
        StreamEvent::Error { kind: ErrorKind::Api, .. }
    ));
    assert!(body.contains("\"errorType\":\"API\""));
    assert_eq!(events[1], StreamEvent::Done);
    assert_eq!(events.len(), 2);
}

#[tokio::test]
async fn test_chat_validation_fails_before_streaming() {
    let server = MockServer::start().await;
    let (app, _state) = app(&server);

    let response = app
        .oneshot(chat_request(json!({"message": "x".repeat(2001)})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let error: ChatError = serde_json::from_str(&read_body(response).await).unwrap();
    assert_eq!(error.kind, ErrorKind::Validation);
    assert!(!error.retryable);
    assert!(!error.suggested_action.is_empty());

    let received = server.received_requests().await.unwrap_or_default();
    assert!(received.is_empty(), "provider must not be called");
}

#[tokio::test]
async fn test_chat_malformed_body_is_validation_error() {
    let server = MockServer::start().await;
    let (app, _state) = app(&server);

    let response = app
        .oneshot(chat_request(json!({"message": "hi", "context": {"type": "sales"}})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let error: ChatError = serde_json::from_str(&read_body(response).await).unwrap();
    assert_eq!(error.kind, ErrorKind::Validation);
}

#[tokio::test]
async fn test_cancelled_turn_ends_with_cancelled_frame() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_secs(30))
                .set_body_string(sse_body(&[text_chunk("never sent")])),
        )
        .mount(&server)
        .await;

    let (app, state) = app(&server);
    let response = app
        .oneshot(chat_request(json!({"message": "tell me a story"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let request_id = response
        .headers()
        .get("x-request-id")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();

    assert!(state.cancel_turn(&request_id));

    let body = tokio::time::timeout(Duration::from_secs(5), read_body(response))
        .await
        .expect("a cancelled turn must close its stream");
    let events = parse_frames(&body);
    assert_eq!(
        events,
        vec![
            StreamEvent::Error {
                message: "turn cancelled".into(),
                kind: ErrorKind::Cancelled,
            },
            StreamEvent::Done,
        ]
    );
    assert!(body.contains("\"errorType\":\"CANCELLED\""));
}

#[tokio::test]
async fn test_cancel_unknown_turn_is_not_found() {
    let server = MockServer::start().await;
    let (app, _state) = app(&server);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/chat/does-not-exist/cancel")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_cancel_registered_turn() {
    let server = MockServer::start().await;
    let (app, state) = app(&server);

    let token = state.shutdown.child_token();
    state.turns.insert("turn-1".into(), token.clone());

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/chat/turn-1/cancel")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(token.is_cancelled());
    assert!(state.turns.is_empty());
}

#[tokio::test]
async fn test_status_and_health() {
    let server = MockServer::start().await;
    let (app, _state) = app(&server);

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_body(response).await, "ok");

    let response = app
        .oneshot(Request::builder().uri("/api/status").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let status: serde_json::Value = serde_json::from_str(&read_body(response).await).unwrap();
    assert_eq!(status["model"], "gpt-4o-mini");
    assert_eq!(status["provider"], "openai");
    assert_eq!(status["inFlightTurns"], 0);
    assert_eq!(status["cache"]["capacity"], 50);
}

#[tokio::test]
async fn test_status_reports_cache_after_filesystem_tool_turn() {
    let content = tempfile::tempdir().unwrap();
    std::fs::write(content.path().join("pricing.md"), PRICING_DOC).unwrap();

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(sse_body(&[finish_chunk("tool_calls")])),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({"stream": false})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "gpt-4o-mini",
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "function": {
                            "name": "retrieve_chatbot_context",
                            "arguments": "{\"context_type\":\"pricing\"}"
                        }
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        })))
        .mount(&server)
        .await;

    let mut config = test_config();
    config.content.dir = content.path().to_path_buf();
    let provider = Arc::new(OpenAiProvider::new("test-key".into(), Some(server.uri())).unwrap());
    let state = Arc::new(AppState::new(config, provider));
    let app = build_router(state);

    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(chat_request(json!({"message": "What is the tuition?"})))
            .await
            .unwrap();
        let events = parse_frames(&read_body(response).await);
        assert_eq!(
            events[0],
            StreamEvent::ToolResult {
                tool_name: "retrieve_chatbot_context".into(),
                content: "Tuition for the full-stack bootcamp is $9,800.".into(),
            }
        );
    }

    let response = app
        .oneshot(Request::builder().uri("/api/status").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status: serde_json::Value = serde_json::from_str(&read_body(response).await).unwrap();
    assert_eq!(status["cache"]["size"], 1);
    assert_eq!(status["cache"]["hits"], 1);
    assert_eq!(status["cache"]["misses"], 1);
}
