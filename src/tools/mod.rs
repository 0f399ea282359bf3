//! 工具箱：注册表、参数校验、安全策略、执行器，以及各 Agent 使用的内置工具

pub mod browser;
pub mod calculate;
#[cfg(feature = "browser")]
pub mod chrome;
pub mod executor;
pub mod filesystem;
pub mod registry;
pub mod safety;
pub mod schema;
pub mod shell;
pub mod system;
pub mod web;

use std::sync::Arc;

pub use browser::{
    default_launcher, BrowserAction, BrowserLauncher, BrowserPage, BrowserSession, BrowserTool, PageLease,
    UnavailableLauncher,
};
pub use calculate::CalculateTool;
pub use executor::ToolExecutor;
pub use filesystem::{
    CreateDirectoryTool, DeleteFileTool, GetFileInfoTool, ListDirectoryTool, ReadFileTool,
    SearchFilesTool, Workspace, WriteFileTool,
};
pub use registry::{RegisteredTool, Tool, ToolRegistry, ToolResult};
pub use safety::{SafetyPolicy, Verdict};
pub use schema::decision_schema_json;
pub use shell::{CommandRunner, ProcessRunner, ShellTool};
pub use system::{AskUserTool, EnvInfoTool, ThinkTool};
pub use web::{DateTimeTool, FetchWebpageTool, WebSearchTool};

use crate::config::ToolsSection;
use crate::core::RegistryError;

/// 注册全部内置工具
///
/// 命令执行与浏览器由调用方注入，测试中可替换为记录调用的实现。
pub fn builtin_registry(
    ws: &Workspace,
    cfg: &ToolsSection,
    runner: Arc<dyn CommandRunner>,
    browser: Arc<BrowserSession>,
) -> Result<ToolRegistry, RegistryError> {
    let mut registry = ToolRegistry::new();

    // Coder
    registry.register(ReadFileTool::new(ws.clone()))?;
    registry.register(WriteFileTool::new(ws.clone()))?;
    registry.register(ListDirectoryTool::new(ws.clone()))?;
    registry.register(SearchFilesTool::new(ws.clone()))?;
    registry.register(DeleteFileTool::new(ws.clone()))?;
    registry.register(CreateDirectoryTool::new(ws.clone()))?;
    registry.register(GetFileInfoTool::new(ws.clone()))?;

    // Researcher
    registry.register(WebSearchTool::new(cfg.web.timeout_secs))?;
    registry.register(FetchWebpageTool::new(
        cfg.web.allowed_domains.clone(),
        cfg.web.timeout_secs,
        cfg.web.max_result_chars,
    ))?;
    registry.register(DateTimeTool)?;
    registry.register(CalculateTool)?;

    // System
    registry.register(ShellTool::new(runner, ws.clone(), cfg.shell.timeout_secs))?;
    registry.register(EnvInfoTool::new(ws.clone()))?;
    registry.register(ThinkTool)?;
    registry.register(AskUserTool)?;

    // Browser
    for tool in BrowserTool::all(browser, ws.clone()) {
        registry.register(tool)?;
    }

    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::browser::UnavailableLauncher;
    use tempfile::TempDir;

    #[test]
    fn builtin_registry_has_every_agent_tool() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::new(dir.path());
        let registry = builtin_registry(
            &ws,
            &ToolsSection::default(),
            Arc::new(ProcessRunner::default()),
            Arc::new(BrowserSession::new(Arc::new(UnavailableLauncher))),
        )
        .unwrap();
        for name in [
            "read_file",
            "list_directory",
            "web_search",
            "calculate",
            "run_command",
            "ask_user",
            "browser_navigate",
            "browser_close",
        ] {
            assert!(registry.contains(name), "missing {name}");
        }
        assert!(registry.resolve("run_command").unwrap().is_destructive());
        assert!(registry.resolve("delete_file").unwrap().is_destructive());
    }
}
