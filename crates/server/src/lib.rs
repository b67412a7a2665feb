//! Axum HTTP surface: OpenAI-compatible `/v1/responses` and
//! `/v1/chat/completions`, bearer/`x-api-key` auth, per-tenant token-bucket
//! rate limiting, and the exact error body shapes the gateway promises.

use std::collections::HashMap;
use std::sync::Mutex;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::response::sse::{Event, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use rants_config::AppConfig;
use rants_orchestrator::{project_chat_completion, project_response_stream, Orchestrator, OrchestratorError, RunResponseRequest};
use rants_transcript::chunk_text;

pub struct AppState {
    pub config: AppConfig,
    pub orchestrator: Orchestrator,
    pub rate_limiter: RateLimiter,
}

pub fn build_router(state: std::sync::Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/models", get(list_models))
        .route("/v1/responses", post(create_response))
        .route("/v1/chat/completions", post(create_chat_completion))
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok", version: env!("CARGO_PKG_VERSION") })
}

async fn list_models(State(state): State<std::sync::Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "object": "list",
        "data": [
            {"id": state.config.models.generator.model, "object": "model"},
            {"id": state.config.models.tool_compiler.model, "object": "model"},
        ]
    }))
}

// --- auth -------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct AuthContext {
    pub tenant_id: String,
    pub api_key: Option<String>,
    pub name: String,
}

pub fn require_auth(headers: &HeaderMap, config: &rants_config::AuthConfig) -> Result<AuthContext, Response> {
    if !config.enabled {
        return Ok(AuthContext { tenant_id: "default".to_string(), api_key: None, name: "anonymous".to_string() });
    }

    let key = extract_api_key(headers);
    let Some(key) = key else { return Err(unauthorized()) };
    match config.api_keys.iter().find(|k| k.key == key) {
        Some(entry) => Ok(AuthContext {
            tenant_id: entry.tenant_id.clone(),
            api_key: Some(key),
            name: entry.name.clone().unwrap_or_else(|| "anonymous".to_string()),
        }),
        None => Err(unauthorized()),
    }
}

fn extract_api_key(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
        // "bearer " is ASCII, so byte offsets are stable under case-folding.
        if value.to_lowercase().starts_with("bearer ") {
            return Some(value[7..].trim().to_string());
        }
        return Some(value.to_string());
    }
    headers.get("x-api-key").and_then(|v| v.to_str().ok()).map(str::to_string)
}

fn unauthorized() -> Response {
    error_response(StatusCode::UNAUTHORIZED, "invalid or missing API key", "unauthorized")
}

// --- rate limiting ------------------------------------------------------

/// Per-tenant token bucket: `capacity` tokens, refilled at
/// `requests_per_minute / 60` tokens per second.
pub struct RateLimiter {
    enabled: bool,
    rate_per_second: f64,
    capacity: f64,
    buckets: Mutex<HashMap<String, (f64, std::time::Instant)>>,
}

impl RateLimiter {
    pub fn new(config: &rants_config::RateLimitConfig) -> Self {
        Self {
            enabled: config.enabled,
            rate_per_second: (config.requests_per_minute.max(1) as f64) / 60.0,
            capacity: config.burst.max(1) as f64,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn allow(&self, key: &str) -> bool {
        if !self.enabled {
            return true;
        }
        let now = std::time::Instant::now();
        let mut buckets = self.buckets.lock().expect("rate limiter mutex poisoned");
        let (tokens, last_seen) = buckets.entry(key.to_string()).or_insert((self.capacity, now));
        let elapsed = now.duration_since(*last_seen).as_secs_f64();
        *tokens = (*tokens + elapsed * self.rate_per_second).min(self.capacity);
        *last_seen = now;

        if *tokens < 1.0 {
            false
        } else {
            *tokens -= 1.0;
            true
        }
    }
}

fn enforce_rate_limit(limiter: &RateLimiter, tenant_id: &str) -> Result<(), Response> {
    if limiter.allow(tenant_id) {
        Ok(())
    } else {
        Err(error_response(StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded", "rate_limit_exceeded"))
    }
}

fn error_response(status: StatusCode, message: &str, code: &str) -> Response {
    let body = json!({"error": {"message": message, "type": code, "code": code}});
    (status, Json(body)).into_response()
}

fn upstream_error_response(message: &str) -> Response {
    error_response(StatusCode::BAD_GATEWAY, message, "upstream_error")
}

// --- /v1/responses -------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ResponseRequest {
    pub model: String,
    pub input: Value,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub tool_choice: Option<Value>,
    #[serde(default)]
    pub tools: Option<Vec<Value>>,
    #[serde(default)]
    pub previous_response_id: Option<String>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub user: Option<String>,
}

/// Each top-level array element is a message object carrying a nested
/// `content` field (a plain string, or a list of `{"type":"input_text",
/// "text":...}` parts) — not itself a content item, per the original.
fn extract_input_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) if !items.is_empty() => items
            .iter()
            .filter_map(|item| match item.get("content") {
                Some(Value::String(s)) => Some(s.clone()),
                Some(Value::Array(parts)) => Some(
                    parts
                        .iter()
                        .filter(|part| part.get("type").and_then(Value::as_str) == Some("input_text"))
                        .filter_map(|part| part.get("text").and_then(Value::as_str).map(str::to_string))
                        .collect::<Vec<_>>()
                        .join("\n"),
                ),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

async fn create_response(
    State(state): State<std::sync::Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<ResponseRequest>,
) -> Response {
    let auth = match require_auth(&headers, &state.config.auth) {
        Ok(auth) => auth,
        Err(response) => return response,
    };
    let tenant_id = if !state.config.auth.enabled {
        body.user.clone().unwrap_or_else(|| auth.tenant_id.clone())
    } else {
        auth.tenant_id.clone()
    };
    if let Err(response) = enforce_rate_limit(&state.rate_limiter, &tenant_id) {
        return response;
    }

    if body.model != state.config.rlm.rants_one.name {
        return error_response(StatusCode::BAD_REQUEST, "unknown model", "invalid_request_error");
    }

    let request = RunResponseRequest {
        model: body.model.clone(),
        input_text: extract_input_text(&body.input),
        system: body.instructions.clone(),
        tool_choice: body.tool_choice.clone().unwrap_or(Value::Null),
        tools: body.tools.clone().unwrap_or_default(),
        previous_response_id: body.previous_response_id.clone(),
        execute_tools: true,
        tenant_id,
        user: body.user.clone(),
    };

    let outcome = match state.orchestrator.run_response(request).await {
        Ok(outcome) => outcome,
        Err(OrchestratorError::Upstream(message)) => return upstream_error_response(&message),
        Err(OrchestratorError::Other(err)) => {
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string(), "server_error")
        }
    };

    if body.stream {
        let events = project_response_stream(&outcome.response);
        let sse_events = events.into_iter().map(|event| {
            let data = serde_json::to_string(&event).unwrap_or_default();
            Ok::<_, std::convert::Infallible>(Event::default().event(event.kind.clone()).data(data))
        });
        Sse::new(stream::iter(sse_events)).into_response()
    } else {
        Json(outcome.response).into_response()
    }
}

// --- /v1/chat/completions -------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<Value>,
    #[serde(default)]
    pub stream: bool,
}

fn messages_to_input(messages: &[Value]) -> String {
    messages
        .iter()
        .map(|message| {
            let role = message.get("role").and_then(Value::as_str).unwrap_or("user");
            let content = match message.get("content") {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Array(items)) => items
                    .iter()
                    .filter_map(|item| {
                        let kind = item.get("type").and_then(Value::as_str);
                        if matches!(kind, Some("text") | Some("input_text")) {
                            item.get("text").and_then(Value::as_str).map(str::to_string)
                        } else {
                            None
                        }
                    })
                    .collect::<Vec<_>>()
                    .join("\n"),
                _ => String::new(),
            };
            format!("{role}: {content}")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

async fn create_chat_completion(
    State(state): State<std::sync::Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<ChatCompletionRequest>,
) -> Response {
    let auth = match require_auth(&headers, &state.config.auth) {
        Ok(auth) => auth,
        Err(response) => return response,
    };
    if let Err(response) = enforce_rate_limit(&state.rate_limiter, &auth.tenant_id) {
        return response;
    }

    let request = RunResponseRequest {
        model: body.model.clone(),
        input_text: messages_to_input(&body.messages),
        system: None,
        tool_choice: Value::Null,
        tools: Vec::new(),
        previous_response_id: None,
        execute_tools: false,
        tenant_id: auth.tenant_id.clone(),
        user: None,
    };

    let outcome = match state.orchestrator.run_response(request).await {
        Ok(outcome) => outcome,
        Err(OrchestratorError::Upstream(message)) => return upstream_error_response(&message),
        Err(OrchestratorError::Other(err)) => {
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string(), "server_error")
        }
    };

    let projection = project_chat_completion(&outcome.response, &outcome.transcript);
    let message = if projection.tool_calls.is_empty() {
        json!({"role": "assistant", "content": projection.content})
    } else {
        json!({"role": "assistant", "content": null, "tool_calls": projection.tool_calls})
    };

    if body.stream {
        let mut events: Vec<Result<Event, std::convert::Infallible>> = chunk_text(&outcome.response.text(), 64)
            .into_iter()
            .map(|chunk| {
                let data = json!({
                    "id": outcome.response.id,
                    "object": "chat.completion.chunk",
                    "model": body.model,
                    "choices": [{"index": 0, "delta": {"content": chunk}, "finish_reason": Value::Null}],
                });
                Ok(Event::default().data(serde_json::to_string(&data).unwrap_or_default()))
            })
            .collect();

        let done_chunk = json!({
            "id": outcome.response.id,
            "object": "chat.completion.chunk",
            "model": body.model,
            "choices": [{"index": 0, "delta": {}, "finish_reason": "stop"}],
        });
        events.push(Ok(Event::default().data(serde_json::to_string(&done_chunk).unwrap_or_default())));
        events.push(Ok(Event::default().data("[DONE]")));

        Sse::new(stream::iter(events)).into_response()
    } else {
        let body = json!({
            "id": outcome.response.id,
            "object": "chat.completion",
            "model": outcome.response.model,
            "choices": [{"index": 0, "message": message, "finish_reason": projection.finish_reason}],
        });
        (StatusCode::OK, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn extracts_bearer_token_case_insensitively() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer abc123"));
        assert_eq!(extract_api_key(&headers).as_deref(), Some("abc123"));
    }

    #[test]
    fn falls_back_to_x_api_key_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_static("xyz789"));
        assert_eq!(extract_api_key(&headers).as_deref(), Some("xyz789"));
    }

    #[test]
    fn rate_limiter_rejects_after_burst_is_exhausted() {
        let config = rants_config::RateLimitConfig { enabled: true, requests_per_minute: 60, burst: 2 };
        let limiter = RateLimiter::new(&config);
        assert!(limiter.allow("tenant-a"));
        assert!(limiter.allow("tenant-a"));
        assert!(!limiter.allow("tenant-a"));
    }

    #[test]
    fn rate_limiter_disabled_always_allows() {
        let config = rants_config::RateLimitConfig { enabled: false, requests_per_minute: 1, burst: 1 };
        let limiter = RateLimiter::new(&config);
        assert!(limiter.allow("tenant-a"));
        assert!(limiter.allow("tenant-a"));
    }

    #[test]
    fn extract_input_text_joins_content_parts() {
        let value = json!([
            {"role": "user", "content": [{"type": "input_text", "text": "hello"}]}
        ]);
        assert_eq!(extract_input_text(&value), "hello");
    }

    #[test]
    fn extract_input_text_accepts_plain_string_content() {
        let value = json!([{"role": "user", "content": "hi there"}]);
        assert_eq!(extract_input_text(&value), "hi there");
    }

    #[test]
    fn messages_to_input_formats_role_content_lines() {
        let messages = vec![json!({"role": "user", "content": "hi"}), json!({"role": "assistant", "content": "hello"})];
        assert_eq!(messages_to_input(&messages), "user: hi\nassistant: hello");
    }
}
