use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::process::Command;

use crate::{truncate_utf8_lossy, Tool, ToolContext};

pub struct BashTool;

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Run a shell command"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {"type": "string"},
                "timeout": {"type": "integer", "description": "milliseconds"},
                "workdir": {"type": "string"}
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, params: &Map<String, Value>) -> Result<Map<String, Value>> {
        let command = params.get("command").and_then(Value::as_str).ok_or_else(|| anyhow!("missing command"))?;
        let timeout_ms = params.get("timeout").and_then(Value::as_u64).unwrap_or(120_000);

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        if let Some(workdir) = params.get("workdir").and_then(Value::as_str) {
            let resolved = crate::ensure_within_workspace(&ctx.workspace_root, workdir)?;
            cmd.current_dir(resolved);
        } else {
            cmd.current_dir(&ctx.workspace_root);
        }

        let output = tokio::time::timeout(std::time::Duration::from_millis(timeout_ms), cmd.output())
            .await
            .map_err(|_| anyhow!("command timed out after {timeout_ms}ms"))??;

        let exit_code = output.status.code().unwrap_or(-1);
        let stdout = truncate_utf8_lossy(&output.stdout, ctx.tool_output_max_bytes);
        let stderr = truncate_utf8_lossy(&output.stderr, ctx.tool_output_max_bytes);

        let mut out = Map::new();
        out.insert("exit_code".to_string(), json!(exit_code));
        out.insert("stdout".to_string(), Value::String(stdout));
        out.insert("stderr".to_string(), Value::String(stderr));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(root: std::path::PathBuf) -> ToolContext {
        ToolContext::new(root, 16384, 1024 * 1024)
    }

    #[tokio::test]
    async fn runs_command_and_captures_stdout() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let ctx = ctx(dir.path().to_path_buf());

        let mut params = Map::new();
        params.insert("command".into(), json!("echo hi"));
        let out = BashTool.execute(&ctx, &params).await?;
        assert_eq!(out["exit_code"], json!(0));
        assert_eq!(out["stdout"], json!("hi\n"));
        Ok(())
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported_not_errored() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let ctx = ctx(dir.path().to_path_buf());

        let mut params = Map::new();
        params.insert("command".into(), json!("exit 7"));
        let out = BashTool.execute(&ctx, &params).await?;
        assert_eq!(out["exit_code"], json!(7));
        Ok(())
    }

    #[tokio::test]
    async fn timeout_is_enforced() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let ctx = ctx(dir.path().to_path_buf());

        let mut params = Map::new();
        params.insert("command".into(), json!("sleep 5"));
        params.insert("timeout".into(), json!(50));
        let result = BashTool.execute(&ctx, &params).await;
        assert!(result.is_err());
        Ok(())
    }
}
