use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::{Tool, ToolContext};

macro_rules! placeholder_tool {
    ($struct_name:ident, $name:literal, $description:literal, $output:expr) => {
        pub struct $struct_name;

        #[async_trait]
        impl Tool for $struct_name {
            fn name(&self) -> &str {
                $name
            }

            fn description(&self) -> &str {
                $description
            }

            fn schema(&self) -> Value {
                json!({"type": "object"})
            }

            async fn execute(&self, _ctx: &ToolContext, _params: &Map<String, Value>) -> Result<Map<String, Value>> {
                let value: Value = $output;
                Ok(value.as_object().expect("placeholder output must be an object").clone())
            }
        }
    };
}

placeholder_tool!(WebSearchTool, "websearch", "Web search (not configured)", json!({"error": "websearch not configured"}));
placeholder_tool!(CodeSearchTool, "codesearch", "Code search (not configured)", json!({"error": "codesearch not configured"}));
placeholder_tool!(TodoReadTool, "todo_read", "Read the todo list", json!({"todos": []}));
placeholder_tool!(TodoWriteTool, "todo_write", "Write the todo list", json!({"ok": true}));
placeholder_tool!(SkillTool, "skill", "Invoke a named skill (not configured)", json!({"error": "skill not configured"}));
placeholder_tool!(BatchTool, "batch", "Invoke multiple tools in one call (not configured)", json!({"error": "batch not configured"}));
placeholder_tool!(InvalidTool, "invalid", "Placeholder for an unrecognized tool call", json!({"error": "invalid tool"}));

/// Recursive sub-task delegation. The registry entry is a placeholder: real
/// execution is intercepted by the orchestrator, which derives a child prompt,
/// runs one generate/append_step turn against the depth cap, and returns its
/// summary. This executor only runs if something calls `task` outside that
/// interception path.
pub struct TaskTool;

#[async_trait]
impl Tool for TaskTool {
    fn name(&self) -> &str {
        "task"
    }

    fn description(&self) -> &str {
        "Delegate a sub-task to a recursive child turn"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "description": {"type": "string"},
                "prompt": {"type": "string"},
                "subagent_type": {"type": "string"},
                "session_id": {"type": "string"},
                "depth": {"type": "integer"}
            }
        })
    }

    async fn execute(&self, _ctx: &ToolContext, _params: &Map<String, Value>) -> Result<Map<String, Value>> {
        let mut out = Map::new();
        out.insert("error".to_string(), Value::String("task tool must be executed by orchestrator".to_string()));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ToolContext {
        ToolContext::new(std::env::temp_dir(), 16384, 1024 * 1024)
    }

    #[tokio::test]
    async fn todo_read_returns_empty_list() -> Result<()> {
        let out = TodoReadTool.execute(&ctx(), &Map::new()).await?;
        assert_eq!(out["todos"], json!([]));
        Ok(())
    }

    #[tokio::test]
    async fn task_placeholder_reports_orchestrator_interception() -> Result<()> {
        let out = TaskTool.execute(&ctx(), &Map::new()).await?;
        assert_eq!(out["error"], json!("task tool must be executed by orchestrator"));
        Ok(())
    }
}
