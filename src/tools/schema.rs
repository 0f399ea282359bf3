//! 工具参数 Schema：schemars 生成、jsonschema 校验
//!
//! 每个工具的参数类型派生 `JsonSchema`，注册时编译为校验器；执行前按 schema 校验 args，
//! 校验失败返回 ToolError::Validation（字段路径 + 原因），工具本体不会被调用。
//! 同时生成「合法决策」的 JSON Schema，拼入 system prompt，减少后端输出格式错误。

use std::collections::HashMap;

use jsonschema::error::ValidationErrorKind;
use jsonschema::JSONSchema;
use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::core::ToolError;

/// 由参数类型生成 JSON Schema（去掉 $schema / title，减少 prompt token）
pub fn schema_of<T: JsonSchema>() -> Value {
    let schema = schema_for!(T);
    let mut value = serde_json::to_value(schema).unwrap_or_else(|_| empty_object_schema());
    if let Some(obj) = value.as_object_mut() {
        obj.remove("$schema");
        obj.remove("title");
    }
    value
}

/// 无参数工具使用的 schema
pub fn empty_object_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {}
    })
}

/// 已校验的 args 反序列化为参数结构体
pub fn parse_args<T: DeserializeOwned>(args: Value) -> Result<T, ToolError> {
    serde_json::from_value(args).map_err(|e| ToolError::validation("$", e.to_string()))
}

/// 编译后的参数校验器
pub struct ParamValidator {
    compiled: JSONSchema,
}

impl ParamValidator {
    pub fn compile(schema: &Value) -> Result<Self, String> {
        JSONSchema::compile(schema)
            .map(|compiled| Self { compiled })
            .map_err(|e| e.to_string())
    }

    /// 校验 args；只报告第一处错误
    pub fn validate(&self, args: &Value) -> Result<(), ToolError> {
        let result = self.compiled.validate(args);
        let Err(mut errors) = result else {
            return Ok(());
        };
        let Some(err) = errors.next() else {
            return Ok(());
        };
        let mut path = pointer_to_path(&err.instance_path.to_string());
        if let ValidationErrorKind::Required { property } = &err.kind {
            let field = property.as_str().map(str::to_string).unwrap_or_else(|| property.to_string());
            path = if path == "$" { field } else { format!("{path}.{field}") };
        }
        Err(ToolError::Validation {
            path,
            reason: err.to_string(),
        })
    }
}

/// "/items/0/name" -> "items.0.name"；根路径记为 "$"
fn pointer_to_path(pointer: &str) -> String {
    let trimmed = pointer.trim_start_matches('/');
    if trimmed.is_empty() {
        "$".to_string()
    } else {
        trimmed.replace('/', ".")
    }
}

/// 单个工具调用：`{"tool": "...", "args": {...}}`
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ToolCallFormat {
    /// Tool name; must be one of the current agent's tools
    tool: String,
    /// Arguments matching the tool's parameters schema
    args: HashMap<String, Value>,
}

/// 后端每一步输出的决策：纯文本即最终回复；调用工具或交接时输出此 JSON
#[allow(dead_code)]
#[derive(JsonSchema)]
struct DecisionFormat {
    /// Single tool to call (with args)
    tool: Option<String>,
    /// Arguments for the single tool
    args: Option<HashMap<String, Value>>,
    /// Several tool calls in one step; results come back in order
    tool_calls: Option<Vec<ToolCallFormat>>,
    /// Agent to hand the conversation to (after any tool calls finish)
    handoff: Option<String>,
    /// Why the handoff is needed
    reason: Option<String>,
}

/// 返回决策格式的 JSON Schema 字符串，可拼入 system prompt
pub fn decision_schema_json() -> String {
    serde_json::to_string_pretty(&schema_of::<DecisionFormat>()).unwrap_or_default()
}
