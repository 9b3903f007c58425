use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use bytes::Bytes;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use think_proxy::translate::types::ChatCompletionResponse;
use think_proxy::{build_router, AppState, ProxyConfig, SharedLogger};

const API_KEY: &str = "test-key-123456";

// ────────────────────────────────────────────────────────────────
// Mock upstream
// ────────────────────────────────────────────────────────────────

/// Records every request body it receives. Behavior depends on the model:
/// `broken` → 404 JSON error, `garbage` → 200 with a non-JSON body,
/// `slow` → answers after 3s, `stall` → 500 whose body never finishes,
/// `dropped` → one stream record then a broken connection,
/// anything else → success.
#[derive(Clone, Default)]
struct MockUpstream {
    seen: Arc<Mutex<Vec<Value>>>,
}

impl MockUpstream {
    fn models_seen(&self) -> Vec<String> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .map(|b| b["model"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    fn last_body(&self) -> Value {
        self.seen.lock().unwrap().last().cloned().unwrap()
    }
}

async fn mock_completions(
    State(upstream): State<MockUpstream>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    upstream.seen.lock().unwrap().push(body.clone());

    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if auth != format!("Bearer {API_KEY}") {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": {"message": "bad credential", "type": "auth_error"}})),
        )
            .into_response();
    }

    let model = body["model"].as_str().unwrap_or_default().to_string();
    match model.as_str() {
        "broken" => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": {"message": "model broken not found", "type": "invalid_request_error"}})),
        )
            .into_response(),
        "garbage" => (StatusCode::OK, "<html>definitely not json</html>").into_response(),
        "slow" => {
            tokio::time::sleep(Duration::from_secs(3)).await;
            Json(completion(&model)).into_response()
        }
        "stall" => {
            let body = async_stream::stream! {
                yield Ok::<_, std::io::Error>(Bytes::from_static(b"{\"err"));
                futures::future::pending::<()>().await;
            };
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .header("content-type", "application/json")
                .body(Body::from_stream(body))
                .unwrap()
        }
        "dropped" => {
            let body = async_stream::stream! {
                yield Ok::<_, std::io::Error>(Bytes::from_static(
                    b"data: {\"id\":\"d1\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"partial\"}}]}\n\n",
                ));
                tokio::time::sleep(Duration::from_millis(200)).await;
                yield Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "upstream went away"));
            };
            Response::builder()
                .header("content-type", "text/event-stream")
                .body(Body::from_stream(body))
                .unwrap()
        }
        _ if body["stream"] == json!(true) => {
            // Deliberately no trailing [DONE]
            let sse = format!(
                concat!(
                    "data: {{\"id\":\"s1\",\"model\":\"{m}\",\"choices\":[{{\"index\":0,\"delta\":{{\"role\":\"assistant\",\"content\":\"\"}}}}]}}\n\n",
                    "data: {{\"id\":\"s1\",\"model\":\"{m}\",\"choices\":[{{\"index\":0,\"delta\":{{\"reasoning_content\":\"plan\"}}}}]}}\n\n",
                    "data: {{\"id\":\"s1\",\"model\":\"{m}\",\"choices\":[{{\"index\":0,\"delta\":{{\"content\":\"Hi from {m}\"}}}}]}}\n\n",
                ),
                m = model
            );
            ([("content-type", "text/event-stream")], sse).into_response()
        }
        _ => Json(completion(&model)).into_response(),
    }
}

fn completion(model: &str) -> Value {
    json!({
        "id": "chatcmpl-mock",
        "object": "chat.completion",
        "created": 1_700_000_000,
        "model": model,
        "choices": [{
            "index": 0,
            "message": {
                "role": "assistant",
                "content": format!("Hello from {model}"),
                "reasoning_content": "step1"
            },
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 12, "completion_tokens": 5, "total_tokens": 17}
    })
}

async fn spawn(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn spawn_upstream() -> (MockUpstream, SocketAddr) {
    let upstream = MockUpstream::default();
    let app = Router::new()
        .route("/v1/chat/completions", post(mock_completions))
        .with_state(upstream.clone());
    (upstream, spawn(app).await)
}

fn proxy_config(upstream: SocketAddr, candidates: &[&str]) -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.upstream.base_url = Some(format!("http://{upstream}/v1"));
    config.upstream.timeout_secs = 1;
    config.models.candidates = candidates.iter().map(|m| m.to_string()).collect();
    config.api_key = Some(API_KEY.to_string());
    config
}

async fn spawn_proxy(config: ProxyConfig) -> (SharedLogger, String) {
    let logger = SharedLogger::in_memory();
    let state = Arc::new(AppState {
        config,
        client: reqwest::Client::new(),
        logger: logger.clone(),
    });
    let addr = spawn(build_router(state)).await;
    (logger, format!("http://{addr}"))
}

fn conversation() -> Value {
    json!({
        "model": "gpt-4",
        "messages": [
            {"role": "user", "content": "Hi there"},
            {"role": "assistant", "content": "*nods*"},
            {"role": "user", "content": "Tell me a story"}
        ],
        "temperature": 5.0,
        "max_tokens": 50
    })
}

// ────────────────────────────────────────────────────────────────
// Chat completions
// ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_fallback_stops_at_first_success() {
    let (upstream, addr) = spawn_upstream().await;
    let (_, base) = spawn_proxy(proxy_config(addr, &["broken", "good-a", "good-b"])).await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/v1/chat/completions"))
        .json(&conversation())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: ChatCompletionResponse = resp.json().await.unwrap();
    assert_eq!(
        body.choices[0].message.content,
        "<think>\nstep1\n</think>\n\nHello from good-a"
    );
    assert_eq!(body.model, "gpt-4");
    assert_eq!(body.usage.total_tokens, 17);
    assert_eq!(upstream.models_seen(), vec!["broken", "good-a"]);
}

#[tokio::test]
async fn test_outbound_request_is_enriched() {
    let (upstream, addr) = spawn_upstream().await;
    let (_, base) = spawn_proxy(proxy_config(addr, &["good-a"])).await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/v1/chat/completions"))
        .json(&conversation())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let sent = upstream.last_body();
    assert_eq!(sent["model"], "good-a");
    assert_eq!(sent["temperature"], 2.0);
    assert_eq!(sent["max_tokens"], 100);
    assert_eq!(sent["stream"], false);

    let messages = sent["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[0]["role"], "system");
    assert_eq!(messages[3]["content"], "Tell me a story");
}

#[tokio::test]
async fn test_all_candidates_failing_is_service_unavailable() {
    let (upstream, addr) = spawn_upstream().await;
    let (logger, base) = spawn_proxy(proxy_config(addr, &["broken", "garbage"])).await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/v1/chat/completions"))
        .json(&conversation())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 503);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["type"], "service_unavailable");
    assert_eq!(body["error"]["code"], "all_models_failed");
    assert_eq!(upstream.models_seen(), vec!["broken", "garbage"]);
    assert!(!logger.recent_errors(5).is_empty());
}

#[tokio::test]
async fn test_single_candidate_forwards_upstream_status() {
    let (_, addr) = spawn_upstream().await;
    let (_, base) = spawn_proxy(proxy_config(addr, &["broken"])).await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/v1/chat/completions"))
        .json(&json!({"messages": [{"role": "user", "content": "hi"}]}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["message"], "model broken not found");
}

#[tokio::test]
async fn test_timeout_advances_to_next_candidate() {
    let (upstream, addr) = spawn_upstream().await;
    let (_, base) = spawn_proxy(proxy_config(addr, &["slow", "good-b"])).await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/v1/chat/completions"))
        .json(&json!({"messages": [{"role": "user", "content": "hi"}]}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: ChatCompletionResponse = resp.json().await.unwrap();
    assert!(body.choices[0].message.content.ends_with("Hello from good-b"));
    assert_eq!(upstream.models_seen(), vec!["slow", "good-b"]);
}

#[tokio::test]
async fn test_invalid_body_is_bad_request() {
    let (upstream, addr) = spawn_upstream().await;
    let (_, base) = spawn_proxy(proxy_config(addr, &["good-a"])).await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/v1/chat/completions"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["type"], "invalid_request_error");
    assert!(upstream.models_seen().is_empty());
}

// ────────────────────────────────────────────────────────────────
// Streaming
// ────────────────────────────────────────────────────────────────

fn data_payloads(body: &str) -> Vec<String> {
    body.lines()
        .filter_map(|l| l.strip_prefix("data:"))
        .map(|d| d.trim().to_string())
        .collect()
}

#[tokio::test]
async fn test_streaming_translation_with_fallback() {
    let (upstream, addr) = spawn_upstream().await;
    let (_, base) = spawn_proxy(proxy_config(addr, &["broken", "good-a"])).await;

    let mut req = conversation();
    req["stream"] = json!(true);

    let resp = reqwest::Client::new()
        .post(format!("{base}/v1/chat/completions"))
        .json(&req)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert!(resp
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .starts_with("text/event-stream"));

    let body = resp.text().await.unwrap();
    let payloads = data_payloads(&body);

    // The upstream never sent [DONE]; we add exactly one, last.
    assert_eq!(payloads.iter().filter(|p| *p == "[DONE]").count(), 1);
    assert_eq!(payloads.last().map(String::as_str), Some("[DONE]"));

    let chunks: Vec<Value> = payloads[..payloads.len() - 1]
        .iter()
        .map(|p| serde_json::from_str(p).unwrap())
        .collect();
    assert_eq!(chunks.len(), 2);
    assert_eq!(
        chunks[0]["choices"][0]["delta"]["content"],
        "<think>\nplan\n</think>\n\n"
    );
    assert_eq!(chunks[1]["choices"][0]["delta"]["content"], "Hi from good-a");
    assert!(chunks.iter().all(|c| c["model"] == "gpt-4"));

    assert_eq!(upstream.models_seen(), vec!["broken", "good-a"]);
    assert_eq!(upstream.last_body()["stream"], true);
}

#[tokio::test]
async fn test_streaming_stalled_error_body_advances_to_next_candidate() {
    let (upstream, addr) = spawn_upstream().await;
    let (_, base) = spawn_proxy(proxy_config(addr, &["stall", "good-a"])).await;

    let send = reqwest::Client::new()
        .post(format!("{base}/v1/chat/completions"))
        .json(&json!({"stream": true, "messages": [{"role": "user", "content": "hi"}]}))
        .send();
    let resp = tokio::time::timeout(Duration::from_secs(5), send)
        .await
        .expect("proxy hung on a stalled error body")
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body = resp.text().await.unwrap();
    assert!(body.contains("Hi from good-a"), "{body}");
    assert_eq!(upstream.models_seen(), vec!["stall", "good-a"]);
}

#[tokio::test]
async fn test_stream_broken_mid_body_closes_without_done() {
    let (_, addr) = spawn_upstream().await;
    let (logger, base) = spawn_proxy(proxy_config(addr, &["dropped"])).await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/v1/chat/completions"))
        .json(&json!({"stream": true, "messages": [{"role": "user", "content": "hi"}]}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body = resp.text().await.unwrap();
    let payloads = data_payloads(&body);
    assert_eq!(payloads.len(), 1, "{body}");

    let chunk: Value = serde_json::from_str(&payloads[0]).unwrap();
    assert_eq!(chunk["choices"][0]["delta"]["content"], "partial");
    assert_eq!(chunk["model"], "gpt-4");
    assert!(!body.contains("[DONE]"));
    assert!(!body.contains("error"));
    assert!(logger
        .recent_errors(5)
        .iter()
        .any(|e| e.message.contains("Upstream stream error")));
}

#[tokio::test]
async fn test_streaming_failure_before_first_byte_is_json_error() {
    let (_, addr) = spawn_upstream().await;
    let (_, base) = spawn_proxy(proxy_config(addr, &["broken", "broken"])).await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/v1/chat/completions"))
        .json(&json!({"stream": true, "messages": [{"role": "user", "content": "hi"}]}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 503);
    let body: Value = resp.json().await.unwrap();
    assert!(body["error"]["message"].as_str().unwrap().contains("not found"));
}

// ────────────────────────────────────────────────────────────────
// Auxiliary endpoints
// ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_models_list_is_static() {
    // Upstream address that nothing listens on
    let dead = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let (_, base) = spawn_proxy(proxy_config(dead, &["good-a"])).await;

    let body: Value = reqwest::get(format!("{base}/v1/models"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["object"], "list");
    let ids: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["id"].as_str().unwrap())
        .collect();
    assert!(!ids.is_empty());
    assert!(ids.contains(&"gpt-4"));
    assert!(!ids.contains(&"good-a"));
}

#[tokio::test]
async fn test_health_reports_model_and_features() {
    let (_, addr) = spawn_upstream().await;
    let (_, base) = spawn_proxy(proxy_config(addr, &["good-a", "good-b"])).await;

    let body: Value = reqwest::get(format!("{base}/"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["status"], "ok");
    assert_eq!(body["model"], "gpt-4");
    assert_eq!(body["upstream_models"], json!(["good-a", "good-b"]));
    assert_eq!(body["features"]["reasoning_display"], true);
}

#[tokio::test]
async fn test_smoke_test_returns_raw_fields() {
    let (upstream, addr) = spawn_upstream().await;
    let (_, base) = spawn_proxy(proxy_config(addr, &["good-a"])).await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/test"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["model"], "good-a");
    assert_eq!(body["content"], "Hello from good-a");
    assert_eq!(body["reasoning"], "step1");
    assert_eq!(body["usage"]["total_tokens"], 17);
    assert_eq!(upstream.last_body()["max_tokens"], 100);
}

#[tokio::test]
async fn test_diagnose_probes_every_combination() {
    let (_, addr) = spawn_upstream().await;
    let dead = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };

    let mut config = proxy_config(addr, &["broken", "good-a"]);
    config.diagnostics.extra_base_urls = vec![format!("http://{dead}/v1")];
    let (_, base) = spawn_proxy(config).await;

    let body: Value = reqwest::get(format!("{base}/diagnose"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["api_key_prefix"], "test-key...");
    assert_eq!(body["summary"]["total"], 4);
    assert_eq!(body["summary"]["succeeded"], 1);
    assert_eq!(body["summary"]["failed"], 3);

    let results = body["results"].as_array().unwrap();
    assert_eq!(results[0]["model"], "broken");
    assert_eq!(results[0]["status"], 404);
    assert_eq!(results[1]["model"], "good-a");
    assert_eq!(results[1]["success"], true);
    assert!(results[2]["base_url"].as_str().unwrap().contains(&dead.to_string()));
    assert!(results[2]["status"].is_null());
}
