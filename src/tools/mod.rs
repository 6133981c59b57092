//! 研究工具：注册表、适配器与基于本地文件系统的四个工具

pub mod adapter;
pub mod directory_map;
pub mod read_file;
pub mod registry;
pub mod resolve_symbol;
pub mod schema;
pub mod search_code;
pub mod workspace;

use std::path::Path;

pub use adapter::{is_error_text, ToolAdapter};
pub use directory_map::DirectoryMapTool;
pub use read_file::ReadFileTool;
pub use registry::{names, Tool, ToolRegistry};
pub use resolve_symbol::ResolveSymbolTool;
pub use schema::{tool_call_schema_json, tool_calls_schema_json};
pub use search_code::SearchCodeTool;
pub use workspace::Workspace;

/// 注册指向 `repo_root` 的四个研究工具
pub fn local_research_tools(repo_root: impl AsRef<Path>) -> ToolRegistry {
    let workspace = Workspace::new(repo_root);
    let mut registry = ToolRegistry::new();
    registry.register(DirectoryMapTool::new(workspace.clone()));
    registry.register(ResolveSymbolTool::new(workspace.clone()));
    registry.register(ReadFileTool::new(workspace.clone()));
    registry.register(SearchCodeTool::new(workspace));
    registry
}
