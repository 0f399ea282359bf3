//! Shell 执行：run_command（System Agent）
//!
//! 命令通过 sh -c / cmd /C 执行，带超时；stdout / stderr 各自按字节上限读取，超出部分丢弃并标记截断。
//! 工具标记为 destructive：执行器在调用前用安全策略分类，命中拒绝规则的命令不会启动进程。
//! 进程启动经 CommandRunner 抽象，测试中可替换为记录调用的实现。

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

use crate::core::ToolError;
use crate::tools::filesystem::Workspace;
use crate::tools::registry::ToolResult;
use crate::tools::schema::{parse_args, schema_of};
use crate::tools::Tool;

/// 默认每路输出上限：1 MiB
pub const DEFAULT_OUTPUT_CAP: usize = 1024 * 1024;

/// 命令执行结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub truncated: bool,
}

/// 进程启动抽象
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &str, cwd: &Path, timeout: Duration) -> Result<CommandOutput, String>;
}

/// 真实进程执行
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    output_cap: usize,
}

impl ProcessRunner {
    pub fn new(output_cap: usize) -> Self {
        Self { output_cap }
    }
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new(DEFAULT_OUTPUT_CAP)
    }
}

/// 读取至多 cap 字节，其余读出丢弃（避免子进程写满管道阻塞）
async fn read_capped<R: AsyncRead + Unpin>(mut reader: R, cap: usize) -> std::io::Result<(Vec<u8>, bool)> {
    let mut buf = Vec::new();
    (&mut reader).take(cap as u64).read_to_end(&mut buf).await?;
    let rest = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await?;
    Ok((buf, rest > 0))
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, command: &str, cwd: &Path, timeout: Duration) -> Result<CommandOutput, String> {
        let mut cmd = if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.args(["/C", command]);
            c
        } else {
            let mut c = Command::new("sh");
            c.args(["-c", command]);
            c
        };
        let mut child = cmd
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("Failed to start command: {e}"))?;

        let stdout = child.stdout.take().ok_or("stdout not captured")?;
        let stderr = child.stderr.take().ok_or("stderr not captured")?;
        let cap = self.output_cap;

        let run = async {
            let (out, err, status) = tokio::join!(
                read_capped(stdout, cap),
                read_capped(stderr, cap),
                child.wait()
            );
            let (out, out_trunc) = out.map_err(|e| format!("Read stdout: {e}"))?;
            let (err, err_trunc) = err.map_err(|e| format!("Read stderr: {e}"))?;
            let status = status.map_err(|e| format!("Wait failed: {e}"))?;
            Ok::<_, String>(CommandOutput {
                exit_code: status.code(),
                stdout: String::from_utf8_lossy(&out).into_owned(),
                stderr: String::from_utf8_lossy(&err).into_owned(),
                truncated: out_trunc || err_trunc,
            })
        };

        match tokio::time::timeout(timeout, run).await {
            Ok(result) => result,
            // child 在此处 drop，kill_on_drop 结束进程
            Err(_) => Err(format!("Command timed out after {}s", timeout.as_secs())),
        }
    }
}

#[derive(Deserialize, JsonSchema)]
struct RunCommandArgs {
    /// Shell command line to execute
    command: String,
    /// Working directory; defaults to the workspace
    #[serde(default)]
    cwd: Option<String>,
}

/// run_command 工具
pub struct ShellTool {
    runner: std::sync::Arc<dyn CommandRunner>,
    ws: Workspace,
    timeout_secs: u64,
}

impl ShellTool {
    pub fn new(runner: std::sync::Arc<dyn CommandRunner>, ws: Workspace, timeout_secs: u64) -> Self {
        Self {
            runner,
            ws,
            timeout_secs,
        }
    }

    fn working_dir(&self, cwd: Option<&str>) -> PathBuf {
        match cwd {
            Some(dir) if !dir.trim().is_empty() => self.ws.resolve(dir),
            _ => self.ws.root().to_path_buf(),
        }
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "run_command"
    }

    fn description(&self) -> &str {
        "Run a shell command and return its exit code, stdout and stderr. Dangerous commands (sudo, recursive deletes of system paths, disk formatting) are refused."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<RunCommandArgs>()
    }

    fn is_destructive(&self) -> bool {
        true
    }

    fn timeout(&self) -> Option<Duration> {
        // 留出余量，让 runner 自己的超时信息先返回
        Some(Duration::from_secs(self.timeout_secs + 2))
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let args: RunCommandArgs = parse_args(args)?;
        let command = args.command.trim();
        if command.is_empty() {
            return Err(ToolError::validation("command", "must not be empty"));
        }
        let cwd = self.working_dir(args.cwd.as_deref());
        tracing::info!(command = %command, cwd = %cwd.display(), "run_command");

        let output = self
            .runner
            .run(command, &cwd, Duration::from_secs(self.timeout_secs))
            .await
            .map_err(ToolError::execution)?;

        if output.exit_code != Some(0) {
            let code = output
                .exit_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            return Err(ToolError::execution(format!(
                "Exit code {code}\nstdout: {}\nstderr: {}",
                output.stdout.trim(),
                output.stderr.trim()
            )));
        }
        Ok(json!({
            "command": command,
            "cwd": cwd.display().to_string(),
            "exitCode": output.exit_code,
            "stdout": output.stdout,
            "stderr": output.stderr,
            "truncated": output.truncated,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[cfg(unix)]
    #[tokio::test]
    async fn process_runner_captures_output_and_exit_code() {
        let dir = TempDir::new().unwrap();
        let runner = ProcessRunner::default();
        let out = runner
            .run("echo hello; echo oops 1>&2; exit 3", dir.path(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out.exit_code, Some(3));
        assert_eq!(out.stdout.trim(), "hello");
        assert_eq!(out.stderr.trim(), "oops");
        assert!(!out.truncated);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn process_runner_caps_output() {
        let dir = TempDir::new().unwrap();
        let runner = ProcessRunner::new(16);
        let out = runner
            .run("printf 'aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa'", dir.path(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out.stdout.len(), 16);
        assert!(out.truncated);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn process_runner_times_out() {
        let dir = TempDir::new().unwrap();
        let err = ProcessRunner::default()
            .run("sleep 5", dir.path(), Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(err.contains("timed out"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_command_uses_workspace_as_default_cwd() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "").unwrap();
        let tool = ShellTool::new(Arc::new(ProcessRunner::default()), Workspace::new(dir.path()), 5);
        let out = tool.execute(json!({ "command": "ls" })).await.unwrap();
        assert!(out["stdout"].as_str().unwrap().contains("marker.txt"));
        assert_eq!(out["exitCode"], 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_execution_failure() {
        let dir = TempDir::new().unwrap();
        let tool = ShellTool::new(Arc::new(ProcessRunner::default()), Workspace::new(dir.path()), 5);
        let err = tool.execute(json!({ "command": "false" })).await.unwrap_err();
        assert!(matches!(err, ToolError::ExecutionFailure { ref message } if message.contains("Exit code 1")));
    }
}
