//! Agent 目录
//!
//! 启动时构建一次，之后只读。构建时校验：名称唯一、工具均已注册、交接目标均存在。
//! 默认提供 Orchestrator + 四个专家；也可从 agents.toml 加载（整体替换内置定义）。

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::agents::AgentDefinition;
use crate::core::CatalogError;
use crate::tools::browser::BrowserAction;
use crate::tools::ToolRegistry;

pub const ORCHESTRATOR: &str = "Orchestrator";

const FILE_TOOLS: [&str; 7] = [
    "read_file",
    "write_file",
    "list_directory",
    "search_files",
    "delete_file",
    "create_directory",
    "get_file_info",
];

/// 内置 Agent 定义
pub fn default_definitions() -> Vec<AgentDefinition> {
    let mut coder_tools: Vec<&str> = FILE_TOOLS.to_vec();
    coder_tools.push("think");

    let mut browser_tools: Vec<&str> = BrowserAction::ALL.iter().map(|a| a.tool_name()).collect();
    browser_tools.push("think");

    vec![
        AgentDefinition::new(
            ORCHESTRATOR,
            "a capable assistant that helps with a wide variety of tasks by delegating to specialist agents.",
        )
        .with_guidelines(&[
            "Analyze the request and decide which specialist can best handle it",
            "Hand off to the matching specialist instead of guessing",
            "For tasks spanning several domains, coordinate specialists one after another",
            "Answer simple conversational questions directly",
            "Synthesize results into a helpful, accurate reply",
        ])
        .with_tools(&["think"])
        .with_handoffs(&["Coder", "Browser", "Researcher", "System"]),
        AgentDefinition::new("Coder", "an expert software developer and code assistant.")
            .with_handoff_description("Expert at coding, file operations, and software development tasks")
            .with_guidelines(&[
                "Read existing code before modifying it",
                "Make minimal, focused changes and preserve the existing style",
                "Consider edge cases and error handling",
                "Explain what you changed and why",
            ])
            .with_tools(&coder_tools)
            .with_handoffs(&[ORCHESTRATOR]),
        AgentDefinition::new("Browser", "an expert web browser automation agent.")
            .with_handoff_description("Expert at browser automation, web scraping, and navigating websites")
            .with_guidelines(&[
                "Wait for pages to load before interacting",
                "Use clear, specific CSS selectors",
                "Scroll if needed to find elements",
                "Describe what you observe on each page",
                "Close the browser when the task is finished",
            ])
            .with_tools(&browser_tools)
            .with_handoffs(&[ORCHESTRATOR]),
        AgentDefinition::new("Researcher", "an expert research assistant.")
            .with_handoff_description("Expert at web research, information gathering, and fact-finding")
            .with_guidelines(&[
                "Break the question into specific, targeted search queries",
                "Verify important facts across multiple sources",
                "Distinguish facts from opinions",
                "Cite your sources",
            ])
            .with_tools(&["web_search", "fetch_webpage", "get_datetime", "calculate", "think"])
            .with_handoffs(&[ORCHESTRATOR]),
        AgentDefinition::new("System", "a system administration and environment expert.")
            .with_handoff_description("Expert at system administration, shell commands, and DevOps tasks")
            .with_guidelines(&[
                "Never run destructive commands without the user's confirmation",
                "Prefer read-only commands when possible",
                "Explain what a command will do before running it",
                "Report results clearly, including errors",
            ])
            .with_tools(&["run_command", "get_env_info", "think", "ask_user"])
            .with_handoffs(&[ORCHESTRATOR]),
    ]
}

#[derive(Debug, Deserialize)]
struct AgentsToml {
    #[serde(rename = "agent", default)]
    agents: Vec<AgentDefinition>,
}

/// 解析 agents.toml（`[[agent]]` 数组）
pub fn parse_definitions(text: &str) -> Result<Vec<AgentDefinition>, CatalogError> {
    let parsed: AgentsToml = toml::from_str(text).map_err(|e| CatalogError::Load(e.to_string()))?;
    Ok(parsed.agents)
}

pub fn load_definitions(path: &Path) -> Result<Vec<AgentDefinition>, CatalogError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| CatalogError::Load(format!("{}: {e}", path.display())))?;
    parse_definitions(&text)
}

/// 已校验的 Agent 集合；instructions 在构建时生成一次
#[derive(Debug, Clone)]
pub struct AgentCatalog {
    agents: Vec<AgentDefinition>,
    index: HashMap<String, usize>,
    instructions: Vec<String>,
}

impl AgentCatalog {
    pub fn new(definitions: Vec<AgentDefinition>, registry: &ToolRegistry) -> Result<Self, CatalogError> {
        if definitions.is_empty() {
            return Err(CatalogError::Empty);
        }
        let mut index = HashMap::new();
        for (i, def) in definitions.iter().enumerate() {
            if index.insert(def.name.clone(), i).is_some() {
                return Err(CatalogError::DuplicateAgent(def.name.clone()));
            }
        }
        for def in &definitions {
            if let Some(tool) = def.tools.iter().find(|t| !registry.contains(t)) {
                return Err(CatalogError::UnknownTool {
                    agent: def.name.clone(),
                    tool: tool.clone(),
                });
            }
            if let Some(target) = def.handoffs.iter().find(|h| !index.contains_key(*h)) {
                return Err(CatalogError::UnknownHandoffTarget {
                    agent: def.name.clone(),
                    target: target.clone(),
                });
            }
        }

        let instructions = definitions
            .iter()
            .map(|def| {
                let targets: Vec<(&str, &str)> = def
                    .handoffs
                    .iter()
                    .filter_map(|h| index.get(h).map(|&i| &definitions[i]))
                    .map(|t| (t.name.as_str(), t.handoff_description.as_str()))
                    .collect();
                def.render_instructions(registry, &targets)
            })
            .collect();

        Ok(Self {
            agents: definitions,
            index,
            instructions,
        })
    }

    /// 内置定义
    pub fn builtin(registry: &ToolRegistry) -> Result<Self, CatalogError> {
        Self::new(default_definitions(), registry)
    }

    pub fn get(&self, name: &str) -> Option<&AgentDefinition> {
        self.index.get(name).map(|&i| &self.agents[i])
    }

    /// 生成好的 instructions
    pub fn instructions(&self, name: &str) -> Option<&str> {
        self.index.get(name).map(|&i| self.instructions[i].as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.agents.iter().map(|a| a.name.as_str()).collect()
    }

    pub fn agents(&self) -> &[AgentDefinition] {
        &self.agents
    }

    /// 第一个定义，作为缺省入口
    pub fn first(&self) -> &AgentDefinition {
        &self.agents[0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ToolsSection;
    use crate::tools::browser::UnavailableLauncher;
    use crate::tools::{builtin_registry, BrowserSession, ProcessRunner, Workspace};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn registry(dir: &TempDir) -> ToolRegistry {
        builtin_registry(
            &Workspace::new(dir.path()),
            &ToolsSection::default(),
            Arc::new(ProcessRunner::default()),
            Arc::new(BrowserSession::new(Arc::new(UnavailableLauncher))),
        )
        .unwrap()
    }

    #[test]
    fn builtin_catalog_validates() {
        let dir = TempDir::new().unwrap();
        let catalog = AgentCatalog::builtin(&registry(&dir)).unwrap();
        assert_eq!(catalog.names(), vec!["Orchestrator", "Coder", "Browser", "Researcher", "System"]);

        let orchestrator = catalog.get(ORCHESTRATOR).unwrap();
        assert_eq!(orchestrator.handoffs.len(), 4);
        for specialist in &orchestrator.handoffs {
            assert!(catalog.get(specialist).unwrap().can_hand_off_to(ORCHESTRATOR));
        }

        let text = catalog.instructions(ORCHESTRATOR).unwrap();
        assert!(text.contains("- Coder: Expert at coding, file operations, and software development tasks"));
        assert!(catalog.instructions("System").unwrap().contains("run_command"));
    }

    #[test]
    fn rejects_unknown_tool_and_target() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);

        let bad_tool = vec![AgentDefinition::new("A", "x").with_tools(&["teleport"])];
        assert_eq!(
            AgentCatalog::new(bad_tool, &registry).unwrap_err(),
            CatalogError::UnknownTool { agent: "A".into(), tool: "teleport".into() }
        );

        let bad_target = vec![AgentDefinition::new("A", "x").with_handoffs(&["Ghost"])];
        assert!(matches!(
            AgentCatalog::new(bad_target, &registry),
            Err(CatalogError::UnknownHandoffTarget { .. })
        ));

        let dup = vec![AgentDefinition::new("A", "x"), AgentDefinition::new("A", "y")];
        assert_eq!(
            AgentCatalog::new(dup, &registry).unwrap_err(),
            CatalogError::DuplicateAgent("A".into())
        );
        assert_eq!(AgentCatalog::new(vec![], &registry).unwrap_err(), CatalogError::Empty);
    }

    #[test]
    fn cycles_are_allowed() {
        let dir = TempDir::new().unwrap();
        let defs = vec![
            AgentDefinition::new("A", "x").with_handoffs(&["B"]),
            AgentDefinition::new("B", "y").with_handoffs(&["A"]),
        ];
        assert!(AgentCatalog::new(defs, &registry(&dir)).is_ok());
    }

    #[test]
    fn parses_agents_toml() {
        let defs = parse_definitions(
            r#"
            [[agent]]
            name = "Lead"
            goal = "a team lead."
            handoffs = ["Dev"]

            [[agent]]
            name = "Dev"
            goal = "a developer."
            handoff_description = "Writes code"
            tools = ["read_file", "write_file"]
            handoffs = ["Lead"]
            "#,
        )
        .unwrap();
        assert_eq!(defs.len(), 2);
        assert_eq!(defs[1].tools, vec!["read_file", "write_file"]);

        assert!(matches!(parse_definitions("[[agent]]\nname = 1"), Err(CatalogError::Load(_))));
    }
}
