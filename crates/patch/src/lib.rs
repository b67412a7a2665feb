//! Restricted unified-diff patch applier.
//!
//! Accepts text of the form:
//!
//! ```text
//! *** Begin Patch
//! *** Update File: path/to/file
//! @@
//! -old line
//! +new line
//! *** End Patch
//! ```

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Serialize;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FilePatchResult {
    pub file: String,
    pub ok: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PatchResult {
    pub results: Vec<FilePatchResult>,
}

/// Resolve `requested` (relative or absolute) against `workspace_root`,
/// rejecting any path that escapes it once symlinks/`..` are resolved.
pub fn resolve_in_workspace(workspace_root: &Path, requested: &str) -> Result<PathBuf> {
    let root = workspace_root
        .canonicalize()
        .with_context(|| format!("canonicalizing workspace root {}", workspace_root.display()))?;
    let candidate = Path::new(requested);
    let joined = if candidate.is_absolute() { candidate.to_path_buf() } else { root.join(candidate) };
    let canonical = joined
        .canonicalize()
        .with_context(|| format!("resolving {}", joined.display()))?;
    if !canonical.starts_with(&root) {
        bail!("path escapes workspace root: {}", canonical.display());
    }
    Ok(canonical)
}

/// Apply a `*** Begin Patch` ... `*** End Patch` document to files under
/// `workspace_root`.
pub fn apply_patch(patch_text: &str, workspace_root: &Path) -> Result<PatchResult> {
    let mut lines = patch_text.lines();
    match lines.next() {
        Some(first) if first.starts_with("*** Begin Patch") => {}
        _ => bail!("invalid patch header"),
    }

    let mut current_path: Option<String> = None;
    let mut buffer: Vec<&str> = Vec::new();
    let mut results = Vec::new();

    let mut flush = |path: &mut Option<String>, buf: &mut Vec<&str>, results: &mut Vec<FilePatchResult>| -> Result<()> {
        let Some(file) = path.take() else { return Ok(()) };
        apply_to_file(workspace_root, &file, &buf.join("\n"))?;
        results.push(FilePatchResult { file, ok: true });
        buf.clear();
        Ok(())
    };

    for line in lines {
        if let Some(rest) = line.strip_prefix("*** Update File:") {
            flush(&mut current_path, &mut buffer, &mut results)?;
            current_path = Some(rest.trim().to_string());
        } else if line.starts_with("*** End Patch") {
            flush(&mut current_path, &mut buffer, &mut results)?;
            break;
        } else {
            buffer.push(line);
        }
    }
    // A document with no terminator still applies whatever was buffered.
    flush(&mut current_path, &mut buffer, &mut results)?;

    Ok(PatchResult { results })
}

fn apply_to_file(workspace_root: &Path, path: &str, patch_body: &str) -> Result<()> {
    let target = resolve_in_workspace(workspace_root, path)?;
    let content = std::fs::read_to_string(&target)
        .with_context(|| format!("reading {}", target.display()))?;
    let source_lines: Vec<&str> = content.lines().collect();
    let mut new_lines: Vec<&str> = Vec::new();
    let mut index = 0usize;

    for patch_line in patch_body.lines() {
        if patch_line.starts_with("@@") {
            continue;
        }
        if let Some(inserted) = patch_line.strip_prefix('+') {
            new_lines.push(inserted);
        } else if patch_line.starts_with('-') {
            index += 1;
        } else {
            if index < source_lines.len() {
                new_lines.push(source_lines[index]);
            }
            index += 1;
        }
    }
    new_lines.extend_from_slice(&source_lines[index.min(source_lines.len())..]);

    let mut rendered = new_lines.join("\n");
    rendered.push('\n');
    std::fs::write(&target, rendered).with_context(|| format!("writing {}", target.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn applies_single_file_hunk() -> Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("a.txt"), "old\n")?;

        let patch = "*** Begin Patch\n*** Update File: a.txt\n@@\n-old\n+new\n*** End Patch";
        let result = apply_patch(patch, dir.path())?;

        assert_eq!(result.results, vec![FilePatchResult { file: "a.txt".to_string(), ok: true }]);
        assert_eq!(fs::read_to_string(dir.path().join("a.txt"))?, "new\n");
        Ok(())
    }

    #[test]
    fn missing_header_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = apply_patch("not a patch", dir.path()).unwrap_err();
        assert!(err.to_string().contains("invalid patch header"));
    }

    #[test]
    fn rejects_escaping_path() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let nested = dir.path().join("nested");
        fs::create_dir_all(&nested)?;
        let err = resolve_in_workspace(&nested, "../../etc/passwd");
        assert!(err.is_err());
        Ok(())
    }

    #[test]
    fn preserves_context_and_trailing_lines() -> Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("b.txt"), "one\ntwo\nthree\n")?;
        let patch = "*** Begin Patch\n*** Update File: b.txt\n@@\n one\n-two\n+TWO\n*** End Patch";
        apply_patch(patch, dir.path())?;
        assert_eq!(fs::read_to_string(dir.path().join("b.txt"))?, "one\nTWO\nthree\n");
        Ok(())
    }
}
