//! Agent 定义
//!
//! 一个 Agent = 名称 + 目标 + 行为准则 + 工具子集 + 可交接目标。
//! 发给后端的 instructions 由结构化字段生成，定义本身是唯一的数据源。

use serde::{Deserialize, Serialize};

use crate::tools::ToolRegistry;

/// 结构化的 Agent 定义（可由 agents.toml 覆盖）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentDefinition {
    pub name: String,
    /// 一句话目标，出现在 instructions 开头
    pub goal: String,
    /// 其它 Agent 决定是否交接时看到的描述
    #[serde(default)]
    pub handoff_description: String,
    #[serde(default)]
    pub guidelines: Vec<String>,
    /// 可用工具（有序，须在注册表中存在）
    #[serde(default)]
    pub tools: Vec<String>,
    /// 可交接的 Agent 名称
    #[serde(default)]
    pub handoffs: Vec<String>,
}

impl AgentDefinition {
    pub fn new(name: impl Into<String>, goal: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            goal: goal.into(),
            handoff_description: String::new(),
            guidelines: Vec::new(),
            tools: Vec::new(),
            handoffs: Vec::new(),
        }
    }

    pub fn with_handoff_description(mut self, description: impl Into<String>) -> Self {
        self.handoff_description = description.into();
        self
    }

    pub fn with_guidelines(mut self, guidelines: &[&str]) -> Self {
        self.guidelines = guidelines.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_tools(mut self, tools: &[&str]) -> Self {
        self.tools = tools.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_handoffs(mut self, handoffs: &[&str]) -> Self {
        self.handoffs = handoffs.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t == name)
    }

    pub fn can_hand_off_to(&self, name: &str) -> bool {
        self.handoffs.iter().any(|h| h == name)
    }

    /// 生成 instructions 文本
    ///
    /// `targets` 为 (名称, 交接描述)，由 catalog 按 handoffs 顺序提供。
    pub fn render_instructions(&self, registry: &ToolRegistry, targets: &[(&str, &str)]) -> String {
        let mut out = format!("You are {}, {}\n", self.name, self.goal.trim_end());

        if !self.guidelines.is_empty() {
            out.push_str("\nGuidelines:\n");
            for g in &self.guidelines {
                out.push_str(&format!("- {g}\n"));
            }
        }

        if self.tools.is_empty() {
            out.push_str("\nYou have no tools of your own.\n");
        } else {
            out.push_str("\nYour tools:\n");
            for name in &self.tools {
                let description = registry
                    .resolve(name)
                    .map(|t| t.description().to_string())
                    .unwrap_or_default();
                out.push_str(&format!("- {name}: {description}\n"));
            }
        }

        if !targets.is_empty() {
            out.push_str("\nAgents you can hand off to:\n");
            for (name, description) in targets {
                if description.is_empty() {
                    out.push_str(&format!("- {name}\n"));
                } else {
                    out.push_str(&format!("- {name}: {description}\n"));
                }
            }
        }
        out
    }
}
