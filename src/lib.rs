//! Relay - 终端多智能体助手
//!
//! 模块划分：
//! - **agents**: Agent 定义、内置目录与交接路由
//! - **cli**: 命令行参数
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误与恢复、运行时构建、编排、状态投影、会话监管、任务调度
//! - **llm**: LLM 客户端抽象与实现（OpenRouter / OpenAI 兼容 / Mock / Scripted）与模型目录
//! - **observability**: tracing 初始化
//! - **react**: 决策解码、流式聚合、回合循环
//! - **session**: 消息、对话记录、会话状态与斜杠命令
//! - **tools**: 工具注册表、校验、安全策略、执行器与内置工具
//! - **ui**: Ratatui TUI 界面

pub mod agents;
pub mod cli;
pub mod config;
pub mod core;
pub mod llm;
pub mod observability;
pub mod react;
pub mod session;
pub mod tools;
pub mod ui;
