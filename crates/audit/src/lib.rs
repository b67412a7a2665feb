//! Per-request audit trail of compiled tool calls and their results.

use anyhow::Result;
use serde::Serialize;
use serde_json::json;

use rants_store::Store;
use rants_transcript::{ToolCall, ToolExecutionResult};

#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub tenant_id: String,
    pub response_id: String,
    pub tool_calls: Vec<ToolCall>,
    pub tool_results: Vec<ToolExecutionResult>,
    pub timestamp: f64,
}

pub struct AuditLogger<'a> {
    store: &'a Store,
}

impl<'a> AuditLogger<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// No-op when a step made no tool calls at all, so steps that never
    /// touched a tool don't clutter the log.
    pub fn log_tool_activity(
        &self,
        tenant_id: &str,
        response_id: &str,
        tool_calls: &[ToolCall],
        tool_results: &[ToolExecutionResult],
    ) -> Result<()> {
        if tool_calls.is_empty() && tool_results.is_empty() {
            return Ok(());
        }

        let entry = AuditEntry {
            tenant_id: tenant_id.to_string(),
            response_id: response_id.to_string(),
            tool_calls: tool_calls.to_vec(),
            tool_results: tool_results.to_vec(),
            timestamp: chrono::Utc::now().timestamp_millis() as f64 / 1000.0,
        };
        self.store.store_audit_entry(json!(entry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    #[test]
    fn skips_logging_when_nothing_happened() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("state.redb")).unwrap();
        let logger = AuditLogger::new(&store);
        logger.log_tool_activity("tenant-a", "resp_1", &[], &[]).unwrap();
    }

    #[test]
    fn logs_when_tool_calls_are_present() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("state.redb")).unwrap();
        let logger = AuditLogger::new(&store);
        let call = ToolCall { tool: "bash".to_string(), parameters: Map::new() };
        let result = ToolExecutionResult::ok("bash", Map::new());
        logger.log_tool_activity("tenant-a", "resp_1", &[call], &[result]).unwrap();
    }
}
