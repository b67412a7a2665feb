mod fs;
mod misc;
mod patch;
mod search;
mod shell;
mod web;

pub use fs::{EditTool, MultiEditTool, ReadTool, WriteTool};
pub use misc::{
    BatchTool, CodeSearchTool, InvalidTool, SkillTool, TaskTool, TodoReadTool, TodoWriteTool, WebSearchTool,
};
pub use patch::PatchTool;
pub use search::{GlobTool, GrepTool, LsTool};
pub use shell::BashTool;
pub use web::WebFetchTool;

use crate::ToolRegistry;

/// The standard registry: `bash, read, write, edit, multiedit, patch, ls,
/// glob, grep, webfetch, websearch, codesearch, todo_read, todo_write, task,
/// skill, batch, invalid`.
pub fn default_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::default();
    registry.register(Box::new(BashTool));
    registry.register(Box::new(ReadTool));
    registry.register(Box::new(WriteTool));
    registry.register(Box::new(EditTool));
    registry.register(Box::new(MultiEditTool));
    registry.register(Box::new(PatchTool));
    registry.register(Box::new(LsTool));
    registry.register(Box::new(GlobTool));
    registry.register(Box::new(GrepTool));
    registry.register(Box::new(WebFetchTool));
    registry.register(Box::new(WebSearchTool));
    registry.register(Box::new(CodeSearchTool));
    registry.register(Box::new(TodoReadTool));
    registry.register(Box::new(TodoWriteTool));
    registry.register(Box::new(TaskTool));
    registry.register(Box::new(SkillTool));
    registry.register(Box::new(BatchTool));
    registry.register(Box::new(InvalidTool));
    registry
}
