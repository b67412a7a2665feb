//! Upstream inference client.
//!
//! Defined as a trait so the orchestrator can be tested against a stub
//! instead of a real HTTP endpoint. [`ReqwestUpstreamClient`] is the
//! production implementation: JSON POST with exponential backoff retry, and
//! an SSE `stream_json` that parses `data:` lines and terminates on `[DONE]`.

use std::collections::{HashMap, VecDeque};
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde_json::Value;
use thiserror::Error;

pub type JsonStream = Pin<Box<dyn Stream<Item = anyhow::Result<Value>> + Send>>;

#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: u16,
    pub body: Value,
    pub headers: HashMap<String, String>,
}

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("Upstream error (status {status}): {detail}")]
    Status { status: u16, detail: String },
    #[error("Upstream error (status {status})")]
    StatusNoDetail { status: u16 },
    #[error("Upstream error: {0}")]
    Transport(String),
}

impl UpstreamError {
    pub fn message(&self) -> String {
        self.to_string()
    }
}

/// Prefer `body.error.message`, then `body.message`, then the raw response
/// text, mirroring the original gateway's defensive error-message extractor.
pub fn extract_error_message(body: &Value, raw_text: &str) -> String {
    if let Some(message) = body.pointer("/error/message").and_then(Value::as_str) {
        return message.to_string();
    }
    if let Some(message) = body.get("message").and_then(Value::as_str) {
        return message.to_string();
    }
    raw_text.to_string()
}

#[async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn post_json(&self, path: &str, payload: &Value) -> Result<UpstreamResponse, UpstreamError>;
    async fn stream_json(&self, path: &str, payload: &Value) -> Result<JsonStream, UpstreamError>;
}

pub struct ReqwestUpstreamClient {
    base_url: String,
    api_key: Option<String>,
    http: reqwest::Client,
    max_retries: u32,
    backoff_seconds: f64,
}

impl ReqwestUpstreamClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        request_timeout_seconds: f64,
        max_retries: u32,
        backoff_seconds: f64,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs_f64(request_timeout_seconds))
            .build()?;
        Ok(Self { base_url: base_url.into(), api_key, http, max_retries, backoff_seconds })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    fn request(&self, path: &str, payload: &Value) -> reqwest::RequestBuilder {
        let mut builder = self.http.post(self.url(path)).json(payload);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        builder
    }

    async fn backoff(&self, attempt: u32) {
        let seconds = self.backoff_seconds * 2f64.powi(attempt as i32);
        tokio::time::sleep(Duration::from_secs_f64(seconds)).await;
    }
}

#[async_trait]
impl UpstreamClient for ReqwestUpstreamClient {
    async fn post_json(&self, path: &str, payload: &Value) -> Result<UpstreamResponse, UpstreamError> {
        let mut last_err = None;
        for attempt in 0..=self.max_retries {
            match self.request(path, payload).send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    let headers = response
                        .headers()
                        .iter()
                        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
                        .collect();
                    let text = response.text().await.unwrap_or_default();
                    let body: Value = serde_json::from_str(&text).unwrap_or(Value::String(text.clone()));

                    if (200..300).contains(&status) {
                        return Ok(UpstreamResponse { status, body, headers });
                    }

                    let detail = extract_error_message(&body, &text);
                    last_err = Some(if detail.is_empty() {
                        UpstreamError::StatusNoDetail { status }
                    } else {
                        UpstreamError::Status { status, detail }
                    });
                }
                Err(err) => {
                    last_err = Some(UpstreamError::Transport(err.to_string()));
                }
            }

            if attempt < self.max_retries {
                self.backoff(attempt).await;
            }
        }
        Err(last_err.unwrap_or(UpstreamError::Transport("request failed with no attempts".to_string())))
    }

    async fn stream_json(&self, path: &str, payload: &Value) -> Result<JsonStream, UpstreamError> {
        let response =
            self.request(path, payload).send().await.map_err(|err| UpstreamError::Transport(err.to_string()))?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let text = response.text().await.unwrap_or_default();
            let body: Value = serde_json::from_str(&text).unwrap_or(Value::String(text.clone()));
            let detail = extract_error_message(&body, &text);
            return Err(if detail.is_empty() {
                UpstreamError::StatusNoDetail { status }
            } else {
                UpstreamError::Status { status, detail }
            });
        }

        Ok(Box::pin(sse_json_stream(response.bytes_stream())))
    }
}

/// Turn a raw SSE byte stream into a stream of decoded `data:` payloads,
/// buffering partial lines across chunk boundaries and terminating the
/// moment a `[DONE]` line is seen — without polling the underlying byte
/// stream again, since some upstreams keep the connection open past `[DONE]`.
fn sse_json_stream<S>(byte_stream: S) -> impl Stream<Item = anyhow::Result<Value>>
where
    S: Stream<Item = reqwest::Result<bytes::Bytes>> + Send + 'static,
{
    let state = (Box::pin(byte_stream) as Pin<Box<dyn Stream<Item = reqwest::Result<bytes::Bytes>> + Send>>, Vec::<u8>::new(), VecDeque::<anyhow::Result<Value>>::new(), false);

    futures::stream::unfold(state, |(mut inner, mut buffer, mut queue, mut done)| async move {
        loop {
            if let Some(item) = queue.pop_front() {
                return Some((item, (inner, buffer, queue, done)));
            }
            if done {
                return None;
            }
            match inner.next().await {
                Some(Ok(chunk)) => {
                    buffer.extend_from_slice(&chunk);
                    while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                        let line: Vec<u8> = buffer.drain(..=pos).collect();
                        let line = String::from_utf8_lossy(&line);
                        let line = line.trim();
                        let Some(data) = line.strip_prefix("data:") else { continue };
                        let data = data.trim();
                        if data == "[DONE]" {
                            done = true;
                            break;
                        }
                        if data.is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<Value>(data) {
                            Ok(value) => queue.push_back(Ok(value)),
                            Err(err) => queue.push_back(Err(anyhow::anyhow!(err))),
                        }
                    }
                }
                Some(Err(err)) => queue.push_back(Err(anyhow::anyhow!(err))),
                None => done = true,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_nested_error_message() {
        let body = serde_json::json!({"error": {"message": "Upstream exploded"}});
        assert_eq!(extract_error_message(&body, ""), "Upstream exploded");
    }

    #[test]
    fn falls_back_to_top_level_message() {
        let body = serde_json::json!({"message": "boom"});
        assert_eq!(extract_error_message(&body, ""), "boom");
    }

    #[test]
    fn falls_back_to_raw_text() {
        let body = serde_json::json!("plain text body");
        assert_eq!(extract_error_message(&body, "plain text body"), "plain text body");
    }

    #[tokio::test]
    async fn sse_stream_terminates_on_done_and_ignores_trailer() {
        // Simulate an upstream that keeps emitting chunks after `[DONE]`, as
        // some SSE servers do when they don't close the connection promptly.
        let chunks: Vec<reqwest::Result<bytes::Bytes>> = vec![
            Ok(bytes::Bytes::from_static(b"data: {\"hello\":true}\n\ndata: [DONE]\n\n")),
            Ok(bytes::Bytes::from_static(b"data: {\"after\":true}\n\n")),
        ];
        let events: Vec<Value> = sse_json_stream(futures::stream::iter(chunks))
            .map(|r| r.expect("parseable event"))
            .collect()
            .await;

        assert_eq!(events, vec![serde_json::json!({"hello": true})]);
    }
}
