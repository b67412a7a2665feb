//! Canonical conversation transcript and response-object data model shared by
//! the engine, orchestrator, and HTTP surface.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// One compiled tool invocation: `{tool, parameters}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub tool: String,
    pub parameters: Map<String, Value>,
}

/// The outcome of executing a single [`ToolCall`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolExecutionResult {
    pub tool: String,
    pub ok: bool,
    pub output: Map<String, Value>,
}

impl ToolExecutionResult {
    pub fn error(tool: impl Into<String>, message: impl Into<String>) -> Self {
        let mut output = Map::new();
        output.insert("error".to_string(), Value::String(message.into()));
        Self { tool: tool.into(), ok: false, output }
    }

    pub fn ok(tool: impl Into<String>, output: Map<String, Value>) -> Self {
        Self { tool: tool.into(), ok: true, output }
    }
}

/// One iteration of the orchestrator loop.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct CanonicalStep {
    pub generator_output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_intent: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub tool_results: Vec<ToolExecutionResult>,
}

/// The canonical, append-only record of a single request's conversation.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CanonicalTranscript {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub user: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_schema_digest: Option<String>,
    #[serde(default)]
    pub steps: Vec<CanonicalStep>,
}

impl CanonicalTranscript {
    /// Is the final step in the loop — a step whose generator produced no
    /// tool intent terminates the orchestrator's iteration.
    pub fn last_step_terminal(&self) -> bool {
        matches!(self.steps.last(), Some(step) if step.tool_intent.is_none())
    }
}

/// Hex SHA-256 digest of the lexicographically-sorted (by `name`) tool
/// schemas, used to detect a tool catalog change across a resumed transcript.
pub fn tool_schema_digest(schemas: &[ToolSchema]) -> String {
    let mut sorted: Vec<&ToolSchema> = schemas.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));
    // Mirrors Python's `str(sorted(list_of_dicts))` textual digest: render each
    // schema as an ordered, comma-joined tuple string rather than JSON, so the
    // digest is keyed only on (name, schema) content, not field ordering noise.
    let rendered: Vec<String> = sorted
        .iter()
        .map(|s| format!("{{'name': '{}', 'description': '{}', 'schema': {}}}", s.name, s.description, s.schema))
        .collect();
    let joined = format!("[{}]", rendered.join(", "));
    let mut hasher = Sha256::new();
    hasher.update(joined.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// `{name, description, schema}` — a tool's externally visible contract.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub schema: Value,
}

/// Externally visible turn status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Queued,
    InProgress,
    Completed,
    Failed,
    Cancelled,
    Incomplete,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutputTextContent {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
    #[serde(default)]
    pub annotations: Vec<Value>,
}

impl OutputTextContent {
    pub fn new(text: impl Into<String>) -> Self {
        Self { kind: "output_text".to_string(), text: text.into(), annotations: Vec::new() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutputMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    pub status: String,
    pub role: String,
    pub content: Vec<OutputTextContent>,
}

impl OutputMessage {
    pub fn in_progress(id: impl Into<String>) -> Self {
        Self {
            kind: "message".to_string(),
            id: id.into(),
            status: "in_progress".to_string(),
            role: "assistant".to_string(),
            content: vec![OutputTextContent::new("")],
        }
    }

    pub fn text(&self) -> &str {
        self.content.first().map(|c| c.text.as_str()).unwrap_or("")
    }

    pub fn push_text(&mut self, text: &str) {
        if let Some(content) = self.content.first_mut() {
            content.text.push_str(text);
        }
    }
}

/// `{code, message, type}` — present only when `status == failed`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseError {
    pub code: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl ResponseError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self { code: code.into(), message: message.into(), kind: "server_error".to_string() }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResponseUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    #[serde(default)]
    pub input_tokens_details: Map<String, Value>,
    #[serde(default)]
    pub output_tokens_details: Map<String, Value>,
}

/// The externally visible result of one `/v1/responses` turn.
///
/// Carries the full OpenAI Responses wire shape, not just the fields the
/// orchestrator actively populates, so clients written against the real API
/// round-trip cleanly against this gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseObject {
    pub id: String,
    #[serde(rename = "object")]
    pub kind: String,
    pub created_at: f64,
    pub status: ResponseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub incomplete_details: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u64>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub model: String,
    pub output: Vec<OutputMessage>,
    pub parallel_tool_calls: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_response_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<Value>,
    pub store: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    pub text: Value,
    pub tool_choice: Value,
    pub tools: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    pub truncation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<ResponseUsage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

impl ResponseObject {
    pub fn text(&self) -> String {
        self.output.first().map(|m| m.text().to_string()).unwrap_or_default()
    }

    /// Build a fresh in-progress response object with the fixed defaults the
    /// original gateway always sends: `parallel_tool_calls=true`,
    /// `store=true`, `text={"format":{"type":"text"}}`, `truncation="disabled"`.
    pub fn new_in_progress(
        id: impl Into<String>,
        created_at: f64,
        model: impl Into<String>,
        tool_choice: Value,
        tools: Vec<Value>,
        previous_response_id: Option<String>,
        user: Option<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: "response".to_string(),
            created_at,
            status: ResponseStatus::InProgress,
            completed_at: None,
            error: None,
            incomplete_details: None,
            instructions: None,
            max_output_tokens: None,
            metadata: Map::new(),
            model: model.into(),
            output: Vec::new(),
            parallel_tool_calls: true,
            previous_response_id,
            reasoning: None,
            store: true,
            temperature: None,
            text: serde_json::json!({"format": {"type": "text"}}),
            tool_choice,
            tools,
            top_p: None,
            truncation: "disabled".to_string(),
            usage: None,
            user,
        }
    }
}

/// One SSE event in the streaming projection of a completed turn.
#[derive(Debug, Clone, Serialize)]
pub struct ResponseEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub sequence_number: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponseObject>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_index: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_index: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// Split `text` into fixed-size chunks of `chunk_size` characters, in order.
pub fn chunk_text(text: &str, chunk_size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(chunk_size)
        .map(|c| c.iter().collect())
        .collect()
}
