use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::{ensure_within_workspace, ensure_within_workspace_for_write, Tool, ToolContext};

pub struct ReadTool;

#[async_trait]
impl Tool for ReadTool {
    fn name(&self) -> &str {
        "read"
    }

    fn description(&self) -> &str {
        "Read a file from disk"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "filePath": {"type": "string"},
                "offset": {"type": "integer"},
                "limit": {"type": "integer"}
            },
            "required": ["filePath"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, params: &Map<String, Value>) -> Result<Map<String, Value>> {
        let file_path = params.get("filePath").and_then(Value::as_str).ok_or_else(|| anyhow!("missing filePath"))?;
        let offset = params.get("offset").and_then(Value::as_u64).unwrap_or(0) as usize;
        let limit = params.get("limit").and_then(Value::as_u64).unwrap_or(2000) as usize;

        let path = ensure_within_workspace(&ctx.workspace_root, file_path)?;
        let content = std::fs::read_to_string(&path)?;
        let lines: Vec<&str> = content.lines().collect();
        let end = (offset + limit).min(lines.len());
        let chunk = if offset < lines.len() { &lines[offset..end] } else { &[] };

        let rendered = chunk
            .iter()
            .enumerate()
            .map(|(i, line)| format!("{:05}| {}", i + 1 + offset, line))
            .collect::<Vec<_>>()
            .join("\n");

        let mut out = Map::new();
        out.insert("file".to_string(), Value::String(rendered));
        Ok(out)
    }
}

pub struct WriteTool;

#[async_trait]
impl Tool for WriteTool {
    fn name(&self) -> &str {
        "write"
    }

    fn description(&self) -> &str {
        "Write a file to disk"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"filePath": {"type": "string"}, "content": {"type": "string"}},
            "required": ["filePath", "content"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, params: &Map<String, Value>) -> Result<Map<String, Value>> {
        let file_path = params.get("filePath").and_then(Value::as_str).ok_or_else(|| anyhow!("missing filePath"))?;
        let content = params.get("content").and_then(Value::as_str).unwrap_or("");

        let path = ensure_within_workspace_for_write(&ctx.workspace_root, file_path)?;
        std::fs::write(&path, content)?;

        let mut out = Map::new();
        out.insert("ok".to_string(), Value::Bool(true));
        Ok(out)
    }
}

pub struct EditTool;

#[async_trait]
impl Tool for EditTool {
    fn name(&self) -> &str {
        "edit"
    }

    fn description(&self) -> &str {
        "Edit a file with string replacement"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "filePath": {"type": "string"},
                "oldString": {"type": "string"},
                "newString": {"type": "string"},
                "replaceAll": {"type": "boolean"}
            },
            "required": ["filePath", "oldString", "newString"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, params: &Map<String, Value>) -> Result<Map<String, Value>> {
        let file_path = params.get("filePath").and_then(Value::as_str).ok_or_else(|| anyhow!("missing filePath"))?;
        let old = params.get("oldString").and_then(Value::as_str).ok_or_else(|| anyhow!("missing oldString"))?;
        let new = params.get("newString").and_then(Value::as_str).ok_or_else(|| anyhow!("missing newString"))?;
        let replace_all = params.get("replaceAll").and_then(Value::as_bool).unwrap_or(false);

        let path = ensure_within_workspace(&ctx.workspace_root, file_path)?;
        let content = std::fs::read_to_string(&path)?;
        let updated = apply_single_edit(&content, old, new, replace_all)?;
        std::fs::write(&path, updated)?;

        let mut out = Map::new();
        out.insert("ok".to_string(), Value::Bool(true));
        Ok(out)
    }
}

/// Apply one `oldString → newString` replacement, enforcing the
/// single-occurrence rule unless `replace_all` is set.
fn apply_single_edit(content: &str, old: &str, new: &str, replace_all: bool) -> Result<String> {
    if replace_all {
        if !content.contains(old) {
            bail!("oldString not found in content");
        }
        Ok(content.replace(old, new))
    } else {
        let occurrences = content.matches(old).count();
        if occurrences != 1 {
            bail!("oldString must match exactly once");
        }
        Ok(content.replacen(old, new, 1))
    }
}

pub struct MultiEditTool;

#[async_trait]
impl Tool for MultiEditTool {
    fn name(&self) -> &str {
        "multiedit"
    }

    fn description(&self) -> &str {
        "Apply multiple edits to a file"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "filePath": {"type": "string"},
                "edits": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "oldString": {"type": "string"},
                            "newString": {"type": "string"},
                            "replaceAll": {"type": "boolean"}
                        },
                        "required": ["oldString", "newString"]
                    }
                }
            },
            "required": ["filePath", "edits"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, params: &Map<String, Value>) -> Result<Map<String, Value>> {
        let file_path = params.get("filePath").and_then(Value::as_str).ok_or_else(|| anyhow!("missing filePath"))?;
        let edits = params.get("edits").and_then(Value::as_array).ok_or_else(|| anyhow!("missing edits"))?;

        let path = ensure_within_workspace(&ctx.workspace_root, file_path)?;
        let mut content = std::fs::read_to_string(&path)?;

        // Apply every edit against the in-memory buffer first; only write once
        // all have succeeded, so a mid-list failure never persists a partial edit.
        for edit in edits {
            let old = edit.get("oldString").and_then(Value::as_str).ok_or_else(|| anyhow!("invalid edit"))?;
            let new = edit.get("newString").and_then(Value::as_str).ok_or_else(|| anyhow!("invalid edit"))?;
            let replace_all = edit.get("replaceAll").and_then(Value::as_bool).unwrap_or(false);
            content = apply_single_edit(&content, old, new, replace_all)?;
        }

        std::fs::write(&path, content)?;

        let mut out = Map::new();
        out.insert("ok".to_string(), Value::Bool(true));
        Ok(out)
    }
}
