//! 系统辅助工具（System Agent）：get_env_info / think / ask_user

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::tools::filesystem::Workspace;
use crate::tools::registry::ToolResult;
use crate::tools::schema::{parse_args, schema_of};
use crate::tools::Tool;

/// get_env_info：操作系统、架构、工作目录、Shell
pub struct EnvInfoTool {
    ws: Workspace,
}

impl EnvInfoTool {
    pub fn new(ws: Workspace) -> Self {
        Self { ws }
    }
}

#[async_trait]
impl Tool for EnvInfoTool {
    fn name(&self) -> &str {
        "get_env_info"
    }

    fn description(&self) -> &str {
        "Get information about the host environment: OS, architecture, working directory, home directory and shell."
    }

    async fn execute(&self, _args: Value) -> ToolResult {
        let env = |key: &str| std::env::var(key).ok();
        Ok(json!({
            "os": std::env::consts::OS,
            "family": std::env::consts::FAMILY,
            "arch": std::env::consts::ARCH,
            "workspace": self.ws.root().display().to_string(),
            "home": env("HOME").or_else(|| env("USERPROFILE")),
            "shell": env("SHELL").or_else(|| env("COMSPEC")),
            "user": env("USER").or_else(|| env("USERNAME")),
        }))
    }
}

#[derive(Deserialize, JsonSchema)]
struct ThinkArgs {
    /// Reasoning to record before acting
    thought: String,
}

/// think：记录推理过程，不产生副作用
pub struct ThinkTool;

#[async_trait]
impl Tool for ThinkTool {
    fn name(&self) -> &str {
        "think"
    }

    fn description(&self) -> &str {
        "Write down step-by-step reasoning before acting. Has no side effects."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<ThinkArgs>()
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let args: ThinkArgs = parse_args(args)?;
        tracing::debug!(thought = %args.thought, "think");
        Ok(json!({ "recorded": true }))
    }
}

#[derive(Deserialize, JsonSchema)]
struct AskUserArgs {
    /// Question for the user
    question: String,
}

/// ask_user：提出澄清问题；回复在用户的下一条消息中到达
pub struct AskUserTool;

#[async_trait]
impl Tool for AskUserTool {
    fn name(&self) -> &str {
        "ask_user"
    }

    fn description(&self) -> &str {
        "Ask the user a clarifying question. After calling it, end your turn with the question as your reply; the answer arrives in the user's next message."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<AskUserArgs>()
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let args: AskUserArgs = parse_args(args)?;
        Ok(json!({
            "question": args.question,
            "status": "Reply to the user with this question and wait for their next message.",
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn env_info_reports_os_and_workspace() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::new(dir.path());
        let out = EnvInfoTool::new(ws.clone()).execute(json!({})).await.unwrap();
        assert_eq!(out["os"], std::env::consts::OS);
        assert_eq!(out["workspace"], ws.root().display().to_string());
    }

    #[tokio::test]
    async fn ask_user_echoes_question() {
        let out = AskUserTool
            .execute(json!({ "question": "Which branch?" }))
            .await
            .unwrap();
        assert_eq!(out["question"], "Which branch?");
    }
}
