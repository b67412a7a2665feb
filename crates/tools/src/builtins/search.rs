use anyhow::{anyhow, Result};
use async_trait::async_trait;
use globset::{Glob, GlobSetBuilder};
use regex::Regex;
use serde_json::{json, Map, Value};
use walkdir::WalkDir;

use crate::{ensure_within_workspace, Tool, ToolContext};

pub struct LsTool;

#[async_trait]
impl Tool for LsTool {
    fn name(&self) -> &str {
        "ls"
    }

    fn description(&self) -> &str {
        "List directory entries"
    }

    fn schema(&self) -> Value {
        json!({"type": "object", "properties": {"path": {"type": "string"}}})
    }

    async fn execute(&self, ctx: &ToolContext, params: &Map<String, Value>) -> Result<Map<String, Value>> {
        let path = params.get("path").and_then(Value::as_str).unwrap_or(".");
        let resolved = ensure_within_workspace(&ctx.workspace_root, path)?;

        let mut entries: Vec<String> = std::fs::read_dir(&resolved)?
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        entries.sort();

        let mut out = Map::new();
        out.insert("entries".to_string(), json!(entries));
        Ok(out)
    }
}

pub struct GlobTool;

#[async_trait]
impl Tool for GlobTool {
    fn name(&self) -> &str {
        "glob"
    }

    fn description(&self) -> &str {
        "Find files matching a glob pattern"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"pattern": {"type": "string"}, "path": {"type": "string"}},
            "required": ["pattern"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, params: &Map<String, Value>) -> Result<Map<String, Value>> {
        let pattern = params.get("pattern").and_then(Value::as_str).ok_or_else(|| anyhow!("missing pattern"))?;
        let base = params.get("path").and_then(Value::as_str).unwrap_or(".");
        let base_path = ensure_within_workspace(&ctx.workspace_root, base)?;

        let mut builder = GlobSetBuilder::new();
        builder.add(Glob::new(pattern)?);
        let set = builder.build()?;

        let mut matches = Vec::new();
        for entry in WalkDir::new(&base_path).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry.path().strip_prefix(&ctx.workspace_root).unwrap_or(entry.path());
            if set.is_match(relative) {
                matches.push(relative.to_string_lossy().into_owned());
            }
        }
        matches.sort();

        let mut out = Map::new();
        out.insert("matches".to_string(), json!(matches));
        Ok(out)
    }
}

pub struct GrepTool;

#[async_trait]
impl Tool for GrepTool {
    fn name(&self) -> &str {
        "grep"
    }

    fn description(&self) -> &str {
        "Search file contents with a regular expression"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {"type": "string"},
                "include": {"type": "string"},
                "path": {"type": "string"}
            },
            "required": ["pattern"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, params: &Map<String, Value>) -> Result<Map<String, Value>> {
        let pattern = params.get("pattern").and_then(Value::as_str).ok_or_else(|| anyhow!("missing pattern"))?;
        let path = params.get("path").and_then(Value::as_str).unwrap_or(".");
        let base_path = ensure_within_workspace(&ctx.workspace_root, path)?;

        let re = Regex::new(pattern)?;
        let include_set = match params.get("include").and_then(Value::as_str) {
            Some(include) => {
                let mut builder = GlobSetBuilder::new();
                builder.add(Glob::new(include)?);
                Some(builder.build()?)
            }
            None => None,
        };

        let mut matches = Vec::new();
        for entry in WalkDir::new(&base_path).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry.path().strip_prefix(&ctx.workspace_root).unwrap_or(entry.path());
            if let Some(set) = &include_set {
                if !set.is_match(relative) {
                    continue;
                }
            }
            let Ok(content) = std::fs::read_to_string(entry.path()) else { continue };
            for (i, line) in content.lines().enumerate() {
                if re.is_match(line) {
                    matches.push(json!({
                        "file": relative.to_string_lossy(),
                        "line": i + 1,
                        "text": line,
                    }));
                }
            }
        }

        let mut out = Map::new();
        out.insert("results".to_string(), Value::Array(matches));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn ctx(root: std::path::PathBuf) -> ToolContext {
        ToolContext::new(root, 16384, 1024 * 1024)
    }

    #[tokio::test]
    async fn glob_matches_recursively() -> Result<()> {
        let dir = tempfile::tempdir()?;
        fs::create_dir_all(dir.path().join("a/b"))?;
        fs::write(dir.path().join("a/b/file.rs"), "")?;
        fs::write(dir.path().join("other.txt"), "")?;
        let ctx = ctx(dir.path().to_path_buf());

        let mut params = Map::new();
        params.insert("pattern".into(), json!("**/*.rs"));
        let out = GlobTool.execute(&ctx, &params).await?;
        let matches = out["matches"].as_array().unwrap();
        assert_eq!(matches.len(), 1);
        assert!(matches[0].as_str().unwrap().ends_with("file.rs"));
        Ok(())
    }

    #[tokio::test]
    async fn grep_finds_matching_lines() -> Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("a.txt"), "hello\nworld\nhello again")?;
        let ctx = ctx(dir.path().to_path_buf());

        let mut params = Map::new();
        params.insert("pattern".into(), json!("hello"));
        let out = GrepTool.execute(&ctx, &params).await?;
        let matches = out["results"].as_array().unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0]["line"], json!(1));
        Ok(())
    }

    #[tokio::test]
    async fn ls_lists_entries_sorted() -> Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("b.txt"), "")?;
        fs::write(dir.path().join("a.txt"), "")?;
        let ctx = ctx(dir.path().to_path_buf());

        let out = LsTool.execute(&ctx, &Map::new()).await?;
        assert_eq!(out["entries"], json!(["a.txt", "b.txt"]));
        Ok(())
    }
}
