use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::{Tool, ToolContext};

pub struct PatchTool;

#[async_trait]
impl Tool for PatchTool {
    fn name(&self) -> &str {
        "patch"
    }

    fn description(&self) -> &str {
        "Apply a restricted unified-diff patch document"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"patch": {"type": "string"}},
            "required": ["patch"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, params: &Map<String, Value>) -> Result<Map<String, Value>> {
        let patch_text = params.get("patch").and_then(Value::as_str).ok_or_else(|| anyhow!("missing patch"))?;

        let result = rants_patch::apply_patch(patch_text, &ctx.workspace_root)?;
        let results: Vec<Value> = result
            .results
            .into_iter()
            .map(|r| json!({"file": r.file, "ok": r.ok}))
            .collect();

        let mut out = Map::new();
        out.insert("results".to_string(), Value::Array(results));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[tokio::test]
    async fn applies_patch_through_the_tool_interface() -> Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("a.txt"), "old\n")?;
        let ctx = ToolContext::new(dir.path().to_path_buf(), 16384, 1024 * 1024);

        let mut params = Map::new();
        params.insert(
            "patch".into(),
            json!("*** Begin Patch\n*** Update File: a.txt\n@@\n-old\n+new\n*** End Patch"),
        );
        let out = PatchTool.execute(&ctx, &params).await?;
        assert_eq!(out["results"], json!([{"file": "a.txt", "ok": true}]));
        Ok(())
    }
}
