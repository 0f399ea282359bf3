//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / parameters_schema / execute），
//! 由 ToolRegistry 按名注册与查找；注册时编译参数校验器，名称重复即拒绝。
//! 注册在启动期完成，之后只读共享。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::core::{RegistryError, ToolError};
use crate::tools::schema::{empty_object_schema, ParamValidator};

/// 工具调用结果：成功为 JSON 负载，失败为 ToolError（作为数据回填对话）
pub type ToolResult = Result<Value, ToolError>;

/// 工具 trait：名称、描述（供 LLM 理解）、参数 schema、异步执行（args 为 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（用于决策 JSON 中的 "tool" 字段）
    fn name(&self) -> &str;

    /// 工具描述（供 LLM 理解功能）
    fn description(&self) -> &str;

    /// 参数 JSON Schema；默认无参数
    fn parameters_schema(&self) -> Value {
        empty_object_schema()
    }

    /// 会改变环境（删除、执行命令等）的工具：执行前需经安全策略分类
    fn is_destructive(&self) -> bool {
        false
    }

    /// 覆盖执行器的默认超时
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// 执行工具；args 已通过 schema 校验
    async fn execute(&self, args: Value) -> ToolResult;
}

/// 注册表条目：工具本体 + 编译好的参数校验器
pub struct RegisteredTool {
    tool: Arc<dyn Tool>,
    schema: Value,
    validator: ParamValidator,
}

impl RegisteredTool {
    pub fn name(&self) -> &str {
        self.tool.name()
    }

    pub fn description(&self) -> &str {
        self.tool.description()
    }

    pub fn parameters_schema(&self) -> &Value {
        &self.schema
    }

    pub fn is_destructive(&self) -> bool {
        self.tool.is_destructive()
    }

    pub fn validate(&self, args: &Value) -> Result<(), ToolError> {
        self.validator.validate(args)
    }

    pub fn tool(&self) -> Arc<dyn Tool> {
        self.tool.clone()
    }

    fn schema_entry(&self) -> Value {
        serde_json::json!({
            "name": self.name(),
            "description": self.description(),
            "parameters": self.schema,
        })
    }
}

/// 工具注册表：按名称存储，保留注册顺序（prompt 中的工具列表稳定）
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<RegisteredTool>>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) -> Result<(), RegistryError> {
        self.register_arc(Arc::new(tool))
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) -> Result<(), RegistryError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(RegistryError::DuplicateTool(name));
        }
        let schema = tool.parameters_schema();
        let validator = ParamValidator::compile(&schema).map_err(|reason| {
            RegistryError::InvalidSchema {
                tool: name.clone(),
                reason,
            }
        })?;
        self.tools.insert(
            name.clone(),
            Arc::new(RegisteredTool {
                tool,
                schema,
                validator,
            }),
        );
        self.order.push(name);
        Ok(())
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<RegisteredTool>, RegistryError> {
        self.tools
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// 指定工具子集的 schema JSON（某个 Agent 的可用工具），未注册的名字跳过
    pub fn to_schema_json(&self, names: &[String]) -> String {
        let tools: Vec<Value> = names
            .iter()
            .filter_map(|n| self.tools.get(n))
            .map(|t| t.schema_entry())
            .collect();
        serde_json::to_string_pretty(&tools).unwrap_or_else(|_| "[]".to_string())
    }
}
