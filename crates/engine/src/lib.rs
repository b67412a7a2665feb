//! RLM generator engine and tool compiler.
//!
//! [`RlmEngine`] owns transcript construction, endpoint selection, and the
//! two literal-marker-based defensive parsers (`TOOL_INTENT:` for the
//! generator, `<start_function_call>`/`<end_function_call>` sentinels for the
//! tool compiler) that couple this gateway to its upstream models.

use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use serde_json::{json, Map, Value};

use rants_client::UpstreamClient;
use rants_config::{ModelCatalog, ModelEndpointConfig, RlmRuntimeConfig};
use rants_transcript::{CanonicalStep, CanonicalTranscript, ToolCall, ToolSchema};

const TOOL_INTENT_MARKER: &str = "TOOL_INTENT:";
const FUNCTION_CALL_START: &str = "<start_function_call>";
const FUNCTION_CALL_END: &str = "<end_function_call>";

/// One generator turn: the user-facing text plus an optional tool intent.
#[derive(Debug, Clone, PartialEq)]
pub struct RlmOutput {
    pub text: String,
    pub tool_intent: Option<String>,
}

/// Upstream clients for each configured model role. Each role is an
/// independently injectable [`UpstreamClient`], so tests can stub generator
/// and tool-compiler responses without a network.
pub struct ModelClientSet {
    pub generator: Arc<dyn UpstreamClient>,
    pub tool_compiler: Arc<dyn UpstreamClient>,
    pub code_interpreter: Option<Arc<dyn UpstreamClient>>,
    pub vision: Option<Arc<dyn UpstreamClient>>,
}

pub struct RlmEngine {
    catalog: ModelCatalog,
    runtime: RlmRuntimeConfig,
    clients: ModelClientSet,
}

impl RlmEngine {
    pub fn new(catalog: ModelCatalog, runtime: RlmRuntimeConfig, clients: ModelClientSet) -> Self {
        Self { catalog, runtime, clients }
    }

    pub fn runtime(&self) -> &RlmRuntimeConfig {
        &self.runtime
    }

    /// Start a fresh transcript. The digest is computed once here, over the
    /// tool catalog as it stands at request time, and never recomputed.
    pub fn initialize_transcript(
        &self,
        system: Option<String>,
        user: String,
        tool_schemas: &[ToolSchema],
    ) -> CanonicalTranscript {
        CanonicalTranscript {
            system,
            user,
            tool_schema_digest: Some(rants_transcript::tool_schema_digest(tool_schemas)),
            steps: Vec::new(),
        }
    }

    pub fn append_step(&self, transcript: &mut CanonicalTranscript, step: CanonicalStep) {
        transcript.steps.push(step);
    }

    fn build_system_prompt() -> String {
        "You are a generator model for the RANTS gateway. Respond with user-facing text only. \
         If a tool should be used, append a line: TOOL_INTENT: <plain English>. \
         Never output JSON or code for tools."
            .to_string()
    }

    /// Vision endpoint if the user text or any prior step's output mentions
    /// an image; else the code interpreter if configured and capable; else
    /// the plain generator.
    fn select_generator(&self, transcript: &CanonicalTranscript) -> (&ModelEndpointConfig, &Arc<dyn UpstreamClient>) {
        let mentions_image = |text: &str| {
            let lower = text.to_lowercase();
            lower.contains("image") || lower.contains("img")
        };
        let has_vision_signal = mentions_image(&transcript.user)
            || transcript.steps.iter().any(|s| mentions_image(&s.generator_output));

        if has_vision_signal {
            if let (Some(endpoint), Some(client)) = (&self.catalog.vision, &self.clients.vision) {
                return (endpoint, client);
            }
        }
        if let (Some(endpoint), Some(client)) = (&self.catalog.code_interpreter, &self.clients.code_interpreter) {
            if endpoint.capabilities.iter().any(|c| c == "code") {
                return (endpoint, client);
            }
        }
        (&self.catalog.generator, &self.clients.generator)
    }

    pub async fn generate(&self, transcript: &CanonicalTranscript) -> Result<RlmOutput> {
        let (endpoint, client) = self.select_generator(transcript);

        let input = serde_json::to_string(&json!({
            "system": Self::build_system_prompt(),
            "transcript": transcript,
        }))?;
        let mut payload = Map::new();
        payload.insert("model".to_string(), json!(endpoint.model));
        payload.insert("input".to_string(), json!(input));
        for (key, value) in &endpoint.parameters {
            payload.insert(key.clone(), value.clone());
        }

        let response = client.post_json("/responses", &Value::Object(payload)).await.map_err(|e| anyhow!(e))?;
        let text = extract_output_text(&response.body);
        Ok(parse_generator_output(&text))
    }

    /// Run the tool compiler over a generator's `tool_intent`, turning plain
    /// English into structured tool calls. Errors if the configured
    /// tool_compiler endpoint lacks the `tool_compilation` capability, or if
    /// its output can't be parsed by either strategy.
    pub async fn compile_tools(
        &self,
        transcript: &CanonicalTranscript,
        tool_schemas: &[ToolSchema],
        tool_intent: &str,
    ) -> Result<Vec<ToolCall>> {
        let endpoint = &self.catalog.tool_compiler;
        if !endpoint.capabilities.iter().any(|c| c == "tool_compilation") {
            bail!("tool_compiler endpoint is missing the tool_compilation capability");
        }

        let input = serde_json::to_string(&json!({
            "tool_schemas": tool_schemas,
            "transcript": transcript,
            "tool_intent": tool_intent,
        }))?;
        let mut payload = Map::new();
        payload.insert("model".to_string(), json!(endpoint.model));
        payload.insert("input".to_string(), json!(input));
        for (key, value) in &endpoint.parameters {
            payload.insert(key.clone(), value.clone());
        }

        let response =
            self.clients.tool_compiler.post_json("/responses", &Value::Object(payload)).await.map_err(|e| anyhow!(e))?;
        let text = extract_output_text(&response.body);
        if text.trim().is_empty() {
            bail!("compiler_error: tool compiler returned no output");
        }
        parse_tool_compiler_output(&text).ok_or_else(|| anyhow!("compiler_error: unparseable tool compiler output"))
    }
}

/// Find the first `message`-type output item's first `output_text`-type
/// content and return its text, defensively, since upstream response shapes
/// vary across providers.
fn extract_output_text(response_body: &Value) -> String {
    let Some(output) = response_body.get("output").and_then(Value::as_array) else { return String::new() };
    for item in output {
        if item.get("type").and_then(Value::as_str) != Some("message") {
            continue;
        }
        let Some(content) = item.get("content").and_then(Value::as_array) else { continue };
        for part in content {
            if part.get("type").and_then(Value::as_str) == Some("output_text") {
                if let Some(text) = part.get("text").and_then(Value::as_str) {
                    return text.to_string();
                }
            }
        }
    }
    String::new()
}

/// Split on the literal `TOOL_INTENT:` marker. Text before the FIRST marker
/// is the user-facing output; text after the LAST marker is the intent, so a
/// generator that echoes the marker string mid-intent still yields the
/// final, intended fragment (mirrors the original's `parts[0]`/`parts[-1]`).
/// The marker's presence, not merely a non-empty trailing fragment, decides
/// whether a tool intent was actually stated — absence always terminates the
/// loop.
fn parse_generator_output(text: &str) -> RlmOutput {
    match (text.find(TOOL_INTENT_MARKER), text.rfind(TOOL_INTENT_MARKER)) {
        (Some(first), Some(last)) => {
            let before = &text[..first];
            let after = &text[last + TOOL_INTENT_MARKER.len()..];
            let intent = after.trim();
            RlmOutput {
                text: before.trim_end().to_string(),
                tool_intent: if intent.is_empty() { None } else { Some(intent.to_string()) },
            }
        }
        _ => RlmOutput { text: text.trim_end().to_string(), tool_intent: None },
    }
}

/// JSON-decode first: look for a top-level `tool_calls` array of objects.
/// Any valid parse is accepted as-is, including an empty array — a
/// legitimately-empty `tool_calls` list is not a parse failure. Falling back
/// to a line scan for `<start_function_call>` / `<end_function_call>`
/// sentinel pairs, each carrying one inline JSON tool call payload, only
/// when no top-level `tool_calls` array was found at all.
fn parse_tool_compiler_output(text: &str) -> Option<Vec<ToolCall>> {
    if let Ok(value) = serde_json::from_str::<Value>(text) {
        if let Some(calls) = value.get("tool_calls").and_then(Value::as_array) {
            let parsed: Vec<ToolCall> = calls.iter().filter_map(|c| tool_call_from_value(c)).collect();
            return Some(parsed);
        }
    }

    let mut calls = Vec::new();
    for line in text.lines() {
        let Some(start) = line.find(FUNCTION_CALL_START) else { continue };
        let Some(end) = line.find(FUNCTION_CALL_END) else { continue };
        if end <= start {
            continue;
        }
        let inner = &line[start + FUNCTION_CALL_START.len()..end];
        let inner = inner.strip_prefix("call:").unwrap_or(inner).trim();
        let Some(brace) = inner.find('{') else { continue };
        let Ok(value) = serde_json::from_str::<Value>(&inner[brace..]) else { continue };
        if let Some(call) = tool_call_from_value(&value) {
            calls.push(call);
        }
    }

    if calls.is_empty() {
        None
    } else {
        Some(calls)
    }
}

fn tool_call_from_value(value: &Value) -> Option<ToolCall> {
    let object = value.as_object()?;
    let tool = object.get("tool").and_then(Value::as_str)?.to_string();
    let parameters = object.get("parameters").and_then(Value::as_object).cloned().unwrap_or_default();
    Some(ToolCall { tool, parameters })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_generator_output_with_tool_intent() {
        let out = parse_generator_output("I will use a tool.\nTOOL_INTENT: run bash tool_intent");
        assert_eq!(out.text, "I will use a tool.");
        assert_eq!(out.tool_intent.as_deref(), Some("run bash tool_intent"));
    }

    #[test]
    fn no_marker_means_no_tool_intent() {
        let out = parse_generator_output("just a plain answer");
        assert_eq!(out.text, "just a plain answer");
        assert_eq!(out.tool_intent, None);
    }

    #[test]
    fn empty_intent_after_marker_is_none() {
        let out = parse_generator_output("done.\nTOOL_INTENT:   ");
        assert_eq!(out.tool_intent, None);
    }

    #[test]
    fn repeated_marker_splits_on_first_and_last() {
        let out = parse_generator_output("abc\nTOOL_INTENT: first\nTOOL_INTENT: second");
        assert_eq!(out.text, "abc");
        assert_eq!(out.tool_intent.as_deref(), Some("second"));
    }

    #[test]
    fn parses_tool_calls_json_array() {
        let text = r#"{"tool_calls":[{"tool":"bash","parameters":{"command":"echo hi"}}]}"#;
        let calls = parse_tool_compiler_output(text).unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].tool, "bash");
    }

    #[test]
    fn empty_tool_calls_array_is_accepted_not_unparseable() {
        let text = r#"{"tool_calls":[]}"#;
        let calls = parse_tool_compiler_output(text).unwrap();
        assert!(calls.is_empty());
    }

    #[test]
    fn parses_sentinel_line_scan_fallback() {
        let text = "preamble\n<start_function_call>call:{\"tool\":\"read\",\"parameters\":{\"filePath\":\"a.txt\"}}<end_function_call>";
        let calls = parse_tool_compiler_output(text).unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].tool, "read");
    }

    #[test]
    fn unparseable_output_returns_none() {
        assert!(parse_tool_compiler_output("not json and no sentinels").is_none());
    }

    #[test]
    fn extracts_first_message_output_text() {
        let body = json!({
            "output": [
                {"type": "message", "content": [{"type": "output_text", "text": "hello"}]}
            ]
        });
        assert_eq!(extract_output_text(&body), "hello");
    }
}
