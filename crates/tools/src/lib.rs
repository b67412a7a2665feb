//! Tool registry and sandboxed executors.
//!
//! Tools are data, not closures: each [`Tool`] implementation reads whatever
//! it needs from the [`ToolContext`] passed to `execute`, rather than
//! capturing configuration at registration time.

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};

pub use rants_transcript::ToolSchema;

pub mod builtins;

/// Shared, read-only context every tool executes against.
#[derive(Clone)]
pub struct ToolContext {
    pub workspace_root: PathBuf,
    pub tool_output_max_bytes: usize,
    pub webfetch_max_bytes: usize,
    pub http: reqwest::Client,
}

impl ToolContext {
    pub fn new(workspace_root: PathBuf, tool_output_max_bytes: usize, webfetch_max_bytes: usize) -> Self {
        Self {
            workspace_root,
            tool_output_max_bytes,
            webfetch_max_bytes,
            http: reqwest::Client::new(),
        }
    }
}

/// Trait implemented by every registered tool.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn schema(&self) -> Value;
    async fn execute(&self, ctx: &ToolContext, params: &Map<String, Value>) -> Result<Map<String, Value>>;
}

/// Central, read-only-after-startup registry of tools.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    /// First-registered-wins lookup by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.iter().find(|t| t.name() == name).map(|t| t.as_ref())
    }

    /// Schemas in registration order.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.tools
            .iter()
            .map(|t| ToolSchema { name: t.name().to_string(), description: t.description().to_string(), schema: t.schema() })
            .collect()
    }
}

/// Resolve `requested` against `workspace_root`, canonicalizing both sides
/// and rejecting any path that escapes the root (symlink or `..` traversal).
pub fn ensure_within_workspace(workspace_root: &Path, requested: &str) -> Result<PathBuf> {
    let root = workspace_root.canonicalize()?;
    let candidate = Path::new(requested);
    let joined = if candidate.is_absolute() { candidate.to_path_buf() } else { root.join(candidate) };
    let canonical = joined.canonicalize()?;
    if !canonical.starts_with(&root) {
        bail!("path escapes workspace root: {}", canonical.display());
    }
    Ok(canonical)
}

/// Like [`ensure_within_workspace`] but tolerates a target that does not yet
/// exist (e.g. a file about to be created by `write`), by canonicalizing the
/// parent directory instead and re-joining the file name.
pub fn ensure_within_workspace_for_write(workspace_root: &Path, requested: &str) -> Result<PathBuf> {
    let root = workspace_root.canonicalize()?;
    let candidate = Path::new(requested);
    let joined = if candidate.is_absolute() { candidate.to_path_buf() } else { root.join(candidate) };
    if joined.exists() {
        return ensure_within_workspace(workspace_root, requested);
    }
    let Some(parent) = joined.parent() else { bail!("path has no parent directory") };
    std::fs::create_dir_all(parent)?;
    let canonical_parent = parent.canonicalize()?;
    if !canonical_parent.starts_with(&root) {
        bail!("path escapes workspace root: {}", joined.display());
    }
    let file_name = joined.file_name().ok_or_else(|| anyhow::anyhow!("path has no file name"))?;
    Ok(canonical_parent.join(file_name))
}

/// Truncate `bytes` to at most `max` bytes without splitting a UTF-8
/// character, lossily decoding any trailing partial sequence away.
pub fn truncate_utf8_lossy(bytes: &[u8], max: usize) -> String {
    if bytes.len() <= max {
        return String::from_utf8_lossy(bytes).into_owned();
    }
    let mut end = max;
    while end > 0 && (bytes[end] & 0xC0) == 0x80 {
        end -= 1;
    }
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    struct DummyTool;

    #[async_trait]
    impl Tool for DummyTool {
        fn name(&self) -> &str {
            "dummy"
        }
        fn description(&self) -> &str {
            "a dummy tool"
        }
        fn schema(&self) -> Value {
            serde_json::json!({"type": "object"})
        }
        async fn execute(&self, _ctx: &ToolContext, _params: &Map<String, Value>) -> Result<Map<String, Value>> {
            Ok(Map::new())
        }
    }

    #[test]
    fn duplicate_registration_get_returns_first() {
        struct Other;
        #[async_trait]
        impl Tool for Other {
            fn name(&self) -> &str {
                "dummy"
            }
            fn description(&self) -> &str {
                "other"
            }
            fn schema(&self) -> Value {
                Value::Null
            }
            async fn execute(&self, _ctx: &ToolContext, _params: &Map<String, Value>) -> Result<Map<String, Value>> {
                Ok(Map::new())
            }
        }

        let mut registry = ToolRegistry::default();
        registry.register(Box::new(DummyTool));
        registry.register(Box::new(Other));
        let found = registry.get("dummy").unwrap();
        assert_eq!(found.description(), "a dummy tool");
    }

    #[test]
    fn workspace_guard_rejects_escape() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("nested");
        fs::create_dir_all(&nested).unwrap();
        let err = ensure_within_workspace(&nested, "../../etc/passwd");
        assert!(err.is_err());
    }

    #[test]
    fn workspace_guard_accepts_child() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("hello.txt"), "hi").unwrap();
        let resolved = ensure_within_workspace(dir.path(), "hello.txt").unwrap();
        assert!(resolved.ends_with("hello.txt"));
    }

    #[test]
    fn truncate_utf8_lossy_respects_char_boundary() {
        let s = "héllo"; // 'é' is 2 bytes
        let truncated = truncate_utf8_lossy(s.as_bytes(), 2);
        assert!(truncated.is_char_boundary(truncated.len()));
    }
}
