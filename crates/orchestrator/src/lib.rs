//! Ties the engine, tool registry, and store together into the per-request
//! iterative tool-use loop, plus the streaming and chat-completions
//! projections of a completed turn.

use std::time::Instant;

use serde_json::{json, Map, Value};
use thiserror::Error;

use rants_audit::AuditLogger;
use rants_config::AppConfig;
use rants_engine::RlmEngine;
use rants_store::{Store, StoredResponse};
use rants_tools::{ToolContext, ToolRegistry};
use rants_transcript::{
    chunk_text, CanonicalStep, CanonicalTranscript, OutputMessage, ResponseEvent, ResponseObject, ResponseStatus,
    ToolCall, ToolExecutionResult,
};

#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Covers both upstream transport/status failures and tool-compiler
    /// failures — the gateway reports both as the same `upstream_error` body.
    #[error("{0}")]
    Upstream(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub struct RunResponseRequest {
    pub model: String,
    pub input_text: String,
    pub system: Option<String>,
    pub tool_choice: Value,
    pub tools: Vec<Value>,
    pub previous_response_id: Option<String>,
    pub execute_tools: bool,
    pub tenant_id: String,
    pub user: Option<String>,
}

pub struct RunResponseOutcome {
    pub response: ResponseObject,
    pub transcript: CanonicalTranscript,
}

pub struct Orchestrator {
    config: AppConfig,
    engine: RlmEngine,
    tools: ToolRegistry,
    tool_ctx: ToolContext,
    store: Store,
}

impl Orchestrator {
    pub fn new(config: AppConfig, engine: RlmEngine, tools: ToolRegistry, tool_ctx: ToolContext, store: Store) -> Self {
        Self { config, engine, tools, tool_ctx, store }
    }

    pub async fn run_response(&self, request: RunResponseRequest) -> Result<RunResponseOutcome, OrchestratorError> {
        let schemas = self.tools.schemas();
        let mut transcript = self.build_transcript(&request, &schemas)?;

        let response_id = Store::new_response_id();
        let created_at = now_seconds();
        let deadline = Instant::now();
        let max_wallclock = std::time::Duration::from_secs(self.config.limits.max_wallclock_seconds);

        let mut iterations = 0u32;
        loop {
            let generated = self.engine.generate(&transcript).await.map_err(|e| OrchestratorError::Upstream(e.to_string()))?;

            let mut step = CanonicalStep {
                generator_output: generated.text.clone(),
                tool_intent: generated.tool_intent.clone(),
                tool_calls: Vec::new(),
                tool_results: Vec::new(),
            };

            let has_intent = generated.tool_intent.is_some();
            if let Some(intent) = &generated.tool_intent {
                // Compilation always runs once a tool intent is stated, even
                // for callers (the chat-completions surface) that never want
                // the calls actually executed — they still need to see them.
                let calls = self
                    .engine
                    .compile_tools(&transcript, &schemas, intent)
                    .await
                    .map_err(|e| OrchestratorError::Upstream(e.to_string()))?;
                step.tool_calls = calls.clone();

                if request.execute_tools {
                    let mut results = Vec::with_capacity(calls.len());
                    for call in &calls {
                        results.push(self.execute_tool_call(call, &transcript).await);
                    }
                    step.tool_results = results;

                    AuditLogger::new(&self.store)
                        .log_tool_activity(&request.tenant_id, &response_id, &step.tool_calls, &step.tool_results)?;
                }
            }

            self.engine.append_step(&mut transcript, step);
            iterations += 1;

            if !has_intent || !request.execute_tools {
                break;
            }
            if iterations >= self.config.limits.max_tool_iterations {
                break;
            }
            if deadline.elapsed() >= max_wallclock {
                break;
            }
        }

        let text = transcript.steps.iter().map(|s| s.generator_output.as_str()).collect::<Vec<_>>().join("");
        let mut message = OutputMessage::in_progress(format!("msg_{response_id}"));
        message.push_text(&text);
        message.status = "completed".to_string();

        let mut response = ResponseObject::new_in_progress(
            response_id.clone(),
            created_at,
            request.model.clone(),
            request.tool_choice.clone(),
            request.tools.clone(),
            request.previous_response_id.clone(),
            request.user.clone(),
        );
        response.status = ResponseStatus::Completed;
        response.completed_at = Some(now_seconds());
        response.output = vec![message];

        self.store.store_response(&StoredResponse {
            response_id: response_id.clone(),
            session_id: response_id.clone(),
            parent_response_id: request.previous_response_id.clone(),
            tenant_id: request.tenant_id.clone(),
            created_at,
            transcript: transcript.clone(),
        })?;

        Ok(RunResponseOutcome { response, transcript })
    }

    fn build_transcript(
        &self,
        request: &RunResponseRequest,
        schemas: &[rants_transcript::ToolSchema],
    ) -> Result<CanonicalTranscript, OrchestratorError> {
        let previous = self
            .store
            .load_previous_transcript(request.previous_response_id.as_deref(), &request.tenant_id)?;

        let mut transcript =
            self.engine.initialize_transcript(request.system.clone(), request.input_text.clone(), schemas);
        if let Some(previous) = previous {
            transcript.steps = previous.steps;
        }
        Ok(transcript)
    }

    async fn execute_tool_call(&self, call: &ToolCall, transcript: &CanonicalTranscript) -> ToolExecutionResult {
        if call.tool == "task" {
            return self.execute_task(call, transcript).await;
        }
        match self.tools.get(&call.tool) {
            Some(tool) => match tool.execute(&self.tool_ctx, &call.parameters).await {
                Ok(output) => ToolExecutionResult::ok(call.tool.clone(), output),
                Err(err) => ToolExecutionResult::error(call.tool.clone(), err.to_string()),
            },
            None => ToolExecutionResult::error(call.tool.clone(), "unknown tool"),
        }
    }

    /// One bounded recursive child turn: derive a prompt from the call's own
    /// parameters (or the last step's intent/output), run exactly one
    /// generate + append_step against a fresh transcript, and summarize.
    async fn execute_task(&self, call: &ToolCall, transcript: &CanonicalTranscript) -> ToolExecutionResult {
        let depth = call.parameters.get("depth").and_then(Value::as_u64).unwrap_or(1);
        let max_depth = self.config.limits.max_depth as u64;
        if depth >= max_depth {
            return ToolExecutionResult::error("task", "max depth exceeded");
        }

        let prompt = call
            .parameters
            .get("prompt")
            .and_then(Value::as_str)
            .or_else(|| call.parameters.get("description").and_then(Value::as_str))
            .map(str::to_string)
            .unwrap_or_else(|| last_step_summary_input(transcript));

        let mut child = self.engine.initialize_transcript(None, prompt, &[]);
        let generated = match self.engine.generate(&child).await {
            Ok(g) => g,
            Err(err) => return ToolExecutionResult::error("task", err.to_string()),
        };
        self.engine.append_step(
            &mut child,
            CanonicalStep {
                generator_output: generated.text.clone(),
                tool_intent: generated.tool_intent.clone(),
                tool_calls: Vec::new(),
                tool_results: Vec::new(),
            },
        );

        let mut output = Map::new();
        output.insert("summary".to_string(), Value::String(generated.text));
        ToolExecutionResult::ok("task", output)
    }
}

fn last_step_summary_input(transcript: &CanonicalTranscript) -> String {
    transcript
        .steps
        .last()
        .map(|s| s.tool_intent.clone().unwrap_or_else(|| s.generator_output.clone()))
        .unwrap_or_default()
}

fn now_seconds() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

/// Project a completed response into its `response.*` SSE event sequence.
/// The whole turn already ran to completion (the original gateway's
/// streaming behavior is a post-hoc replay, not a token-by-token relay), so
/// this is pure and synchronous.
pub fn project_response_stream(response: &ResponseObject) -> Vec<ResponseEvent> {
    let mut events = Vec::new();
    let mut sequence_number = 0u64;
    let item_id = response.output.first().map(|m| m.id.clone());

    events.push(ResponseEvent {
        kind: "response.created".to_string(),
        sequence_number,
        response: Some(response.clone()),
        item_id: None,
        output_index: None,
        content_index: None,
        delta: None,
        text: None,
    });
    sequence_number += 1;

    let text = response.text();
    for chunk in chunk_text(&text, 64) {
        events.push(ResponseEvent {
            kind: "response.output_text.delta".to_string(),
            sequence_number,
            response: None,
            item_id: item_id.clone(),
            output_index: Some(0),
            content_index: Some(0),
            delta: Some(chunk),
            text: None,
        });
        sequence_number += 1;
    }

    events.push(ResponseEvent {
        kind: "response.output_text.done".to_string(),
        sequence_number,
        response: None,
        item_id: item_id.clone(),
        output_index: Some(0),
        content_index: Some(0),
        delta: None,
        text: Some(text),
    });
    sequence_number += 1;

    events.push(ResponseEvent {
        kind: "response.completed".to_string(),
        sequence_number,
        response: Some(response.clone()),
        item_id: None,
        output_index: None,
        content_index: None,
        delta: None,
        text: None,
    });

    events
}

pub struct ChatCompletionProjection {
    pub tool_calls: Vec<Value>,
    pub finish_reason: String,
    pub content: Option<String>,
}

/// Map the last step's compiled tool calls onto OpenAI-style
/// `choices[0].message.tool_calls`, or fall back to plain text content.
pub fn project_chat_completion(response: &ResponseObject, transcript: &CanonicalTranscript) -> ChatCompletionProjection {
    let last_calls = transcript.steps.last().map(|s| s.tool_calls.clone()).unwrap_or_default();
    if last_calls.is_empty() {
        return ChatCompletionProjection { tool_calls: Vec::new(), finish_reason: "stop".to_string(), content: Some(response.text()) };
    }

    let tool_calls = last_calls
        .iter()
        .enumerate()
        .map(|(index, call)| {
            json!({
                "id": format!("call_{}_{}", response.id, index),
                "type": "function",
                "function": {
                    "name": call.tool,
                    "arguments": serde_json::to_string(&call.parameters).unwrap_or_default(),
                }
            })
        })
        .collect();

    ChatCompletionProjection { tool_calls, finish_reason: "tool_calls".to_string(), content: None }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rants_transcript::OutputTextContent;

    fn sample_response(text: &str) -> ResponseObject {
        let mut response = ResponseObject::new_in_progress(
            "resp_test".to_string(),
            0.0,
            "rants_one",
            Value::Null,
            Vec::new(),
            None,
            None,
        );
        response.output = vec![OutputMessage {
            kind: "message".to_string(),
            id: "msg_test".to_string(),
            status: "completed".to_string(),
            role: "assistant".to_string(),
            content: vec![OutputTextContent::new(text)],
        }];
        response
    }

    #[test]
    fn stream_projection_has_no_sequence_gaps() {
        let response = sample_response("a".repeat(130).as_str());
        let events = project_response_stream(&response);
        for (i, event) in events.iter().enumerate() {
            assert_eq!(event.sequence_number, i as u64);
        }
        assert_eq!(events.first().unwrap().kind, "response.created");
        assert_eq!(events.last().unwrap().kind, "response.completed");
    }

    #[test]
    fn chat_projection_reports_tool_calls_when_present() {
        let response = sample_response("");
        let mut transcript = CanonicalTranscript { user: "hi".to_string(), ..Default::default() };
        transcript.steps.push(CanonicalStep {
            generator_output: "using a tool".to_string(),
            tool_intent: Some("run bash".to_string()),
            tool_calls: vec![ToolCall { tool: "bash".to_string(), parameters: Map::new() }],
            tool_results: Vec::new(),
        });

        let projection = project_chat_completion(&response, &transcript);
        assert_eq!(projection.finish_reason, "tool_calls");
        assert_eq!(projection.tool_calls.len(), 1);
        assert_eq!(projection.tool_calls[0]["function"]["name"], json!("bash"));
    }

    #[test]
    fn chat_projection_falls_back_to_stop_with_content() {
        let response = sample_response("hello");
        let transcript = CanonicalTranscript { user: "hi".to_string(), ..Default::default() };
        let projection = project_chat_completion(&response, &transcript);
        assert_eq!(projection.finish_reason, "stop");
        assert_eq!(projection.content.as_deref(), Some("hello"));
    }

    #[test]
    fn last_step_summary_input_prefers_tool_intent() {
        let mut transcript = CanonicalTranscript { user: "hi".to_string(), ..Default::default() };
        transcript.steps.push(CanonicalStep {
            generator_output: "output text".to_string(),
            tool_intent: Some("intent text".to_string()),
            ..Default::default()
        });
        assert_eq!(last_step_summary_input(&transcript), "intent text");
    }

    // --- full-loop tests against a stub upstream -----------------------

    struct StubClient {
        text: String,
    }

    #[async_trait::async_trait]
    impl rants_client::UpstreamClient for StubClient {
        async fn post_json(
            &self,
            _path: &str,
            _payload: &Value,
        ) -> Result<rants_client::UpstreamResponse, rants_client::UpstreamError> {
            Ok(rants_client::UpstreamResponse {
                status: 200,
                body: json!({
                    "output": [{"type": "message", "content": [{"type": "output_text", "text": self.text}]}]
                }),
                headers: Default::default(),
            })
        }

        async fn stream_json(&self, _path: &str, _payload: &Value) -> Result<rants_client::JsonStream, rants_client::UpstreamError> {
            unimplemented!("not exercised by these tests")
        }
    }

    fn endpoint(capabilities: &[&str]) -> rants_config::ModelEndpointConfig {
        rants_config::ModelEndpointConfig {
            provider: "ollama".to_string(),
            base_url: "http://stub".to_string(),
            model: "stub-model".to_string(),
            api_key: None,
            capabilities: capabilities.iter().map(|s| s.to_string()).collect(),
            parameters: Map::new(),
        }
    }

    fn test_orchestrator(max_depth: u32, generator_text: &str) -> (Orchestrator, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config();
        config.limits.max_depth = max_depth;

        let clients = rants_engine::ModelClientSet {
            generator: std::sync::Arc::new(StubClient { text: generator_text.to_string() }),
            tool_compiler: std::sync::Arc::new(StubClient { text: "{\"tool_calls\":[]}".to_string() }),
            code_interpreter: None,
            vision: None,
        };
        let engine = rants_engine::RlmEngine::new(config.models.clone(), config.rlm.rants_one.clone(), clients);
        let tools = rants_tools::builtins::default_registry();
        let tool_ctx = rants_tools::ToolContext::new(dir.path().to_path_buf(), 16384, 1024 * 1024);
        let store = rants_store::Store::open(dir.path().join("state.redb")).unwrap();

        (Orchestrator::new(config, engine, tools, tool_ctx, store), dir)
    }

    fn test_config() -> AppConfig {
        AppConfig {
            server: Default::default(),
            limits: rants_config::LimitsConfig {
                max_tool_iterations: 6,
                max_wallclock_seconds: 120,
                max_depth: 2,
                workspace_root: "/tmp".to_string(),
                tool_output_max_bytes: 16384,
                webfetch_max_bytes: 1024 * 1024,
            },
            auth: Default::default(),
            rate_limits: rants_config::RateLimitConfig { enabled: false, requests_per_minute: 120, burst: 60 },
            resilience: rants_config::ResilienceConfig { request_timeout_seconds: 30.0, max_retries: 0, backoff_seconds: 0.1 },
            rlm: rants_config::RlmConfig {
                rants_one: rants_config::RlmRuntimeConfig {
                    name: "rants_one_name".to_string(),
                    environment: "docker".to_string(),
                    max_iterations: 10,
                    max_depth: 2,
                },
            },
            models: rants_config::ModelCatalog {
                generator: endpoint(&[]),
                tool_compiler: endpoint(&["tool_compilation"]),
                code_interpreter: None,
                vision: None,
            },
            state: Default::default(),
        }
    }

    #[tokio::test]
    async fn task_at_depth_cap_fails_with_max_depth_exceeded() {
        let (orchestrator, _dir) = test_orchestrator(2, "child reply");
        let transcript = CanonicalTranscript { user: "hi".to_string(), ..Default::default() };
        let mut parameters = Map::new();
        parameters.insert("depth".to_string(), json!(2));
        let call = ToolCall { tool: "task".to_string(), parameters };

        let result = orchestrator.execute_tool_call(&call, &transcript).await;
        assert!(!result.ok);
        assert_eq!(result.output["error"], json!("max depth exceeded"));
    }

    #[tokio::test]
    async fn task_below_depth_cap_runs_one_child_turn() {
        let (orchestrator, _dir) = test_orchestrator(2, "child reply");
        let transcript = CanonicalTranscript { user: "hi".to_string(), ..Default::default() };
        let mut parameters = Map::new();
        parameters.insert("depth".to_string(), json!(1));
        parameters.insert("prompt".to_string(), json!("do the sub-task"));
        let call = ToolCall { tool: "task".to_string(), parameters };

        let result = orchestrator.execute_tool_call(&call, &transcript).await;
        assert!(result.ok);
        assert_eq!(result.output["summary"], json!("child reply"));
    }

    #[tokio::test]
    async fn happy_path_response_has_no_tool_intent_and_one_step() {
        let (orchestrator, _dir) = test_orchestrator(2, "Hello!");
        let request = RunResponseRequest {
            model: "rants_one_name".to_string(),
            input_text: "Hello".to_string(),
            system: None,
            tool_choice: Value::Null,
            tools: Vec::new(),
            previous_response_id: None,
            execute_tools: true,
            tenant_id: "default".to_string(),
            user: None,
        };

        let outcome = orchestrator.run_response(request).await.unwrap();
        assert_eq!(outcome.response.status, ResponseStatus::Completed);
        assert_eq!(outcome.response.text(), "Hello!");
        assert_eq!(outcome.transcript.steps.len(), 1);
        assert!(outcome.transcript.steps[0].tool_intent.is_none());
    }

    #[tokio::test]
    async fn tool_use_turn_compiles_calls_without_executing_when_disabled() {
        let (orchestrator, _dir) = test_orchestrator(2, "I will use a tool.\nTOOL_INTENT: run bash tool_intent");
        let request = RunResponseRequest {
            model: "rants_one_name".to_string(),
            input_text: "please run a command".to_string(),
            system: None,
            tool_choice: Value::Null,
            tools: Vec::new(),
            previous_response_id: None,
            execute_tools: false,
            tenant_id: "default".to_string(),
            user: None,
        };

        let outcome = orchestrator.run_response(request).await.unwrap();
        let projection = project_chat_completion(&outcome.response, &outcome.transcript);
        assert_eq!(projection.finish_reason, "stop");
        assert!(outcome.transcript.steps[0].tool_calls.is_empty());
    }
}
