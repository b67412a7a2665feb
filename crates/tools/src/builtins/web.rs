use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::{truncate_utf8_lossy, Tool, ToolContext};

pub struct WebFetchTool;

#[async_trait]
impl Tool for WebFetchTool {
    fn name(&self) -> &str {
        "webfetch"
    }

    fn description(&self) -> &str {
        "Fetch a URL and return its body as text"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"url": {"type": "string"}},
            "required": ["url"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, params: &Map<String, Value>) -> Result<Map<String, Value>> {
        let url = params.get("url").and_then(Value::as_str).ok_or_else(|| anyhow!("missing url"))?;

        let response = ctx.http.get(url).send().await?;
        let bytes = response.bytes().await?;
        let content = truncate_utf8_lossy(&bytes, ctx.webfetch_max_bytes);

        let mut out = Map::new();
        out.insert("url".to_string(), Value::String(url.to_string()));
        out.insert("content".to_string(), Value::String(content));
        Ok(out)
    }
}
