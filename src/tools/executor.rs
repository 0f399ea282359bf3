//! 工具执行器
//!
//! 持有 ToolRegistry、安全策略与全局超时。一次调用依次经过：
//! schema 校验 → 安全分类（仅 destructive 工具）→ 在独立任务中带超时执行 → 超大负载截断。
//! 任一环节失败都返回 ToolError（作为数据回填对话，不会让回合崩溃）；
//! 每次调用输出结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::core::ToolError;
use crate::tools::registry::{RegisteredTool, ToolResult};
use crate::tools::safety::{SafetyPolicy, Verdict};
use crate::tools::ToolRegistry;

/// 默认单次结果上限：64 KiB
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 64 * 1024;

/// 工具执行器：校验、安全过滤、超时与结果截断
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    safety: SafetyPolicy,
    timeout: Duration,
    max_output_bytes: usize,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self {
            registry: Arc::new(registry),
            safety: SafetyPolicy::builtin(),
            timeout: Duration::from_secs(timeout_secs),
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }

    pub fn with_safety(mut self, safety: SafetyPolicy) -> Self {
        self.safety = safety;
        self
    }

    pub fn with_max_output_bytes(mut self, max_output_bytes: usize) -> Self {
        self.max_output_bytes = max_output_bytes.max(256);
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// 按名称执行；未注册返回 NotFound
    pub async fn execute_by_name(&self, tool_name: &str, args: Value) -> ToolResult {
        match self.registry.resolve(tool_name) {
            Ok(tool) => self.execute(&tool, args).await,
            Err(_) => Err(ToolError::NotFound {
                name: tool_name.to_string(),
            }),
        }
    }

    /// 执行已解析的工具；输出 JSON 审计日志
    pub async fn execute(&self, tool: &RegisteredTool, args: Value) -> ToolResult {
        let start = Instant::now();
        let args_preview = args_preview(&args);
        let result = self.run(tool, args).await;

        let (ok, outcome) = match &result {
            Ok(_) => (true, "ok"),
            Err(e) => (false, e.kind()),
        };
        let duration_ms = start.elapsed().as_millis() as u64;
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool.name(),
            "ok": ok,
            "outcome": outcome,
            "duration_ms": duration_ms,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        result
    }

    async fn run(&self, tool: &RegisteredTool, args: Value) -> ToolResult {
        tool.validate(&args)?;

        if tool.is_destructive() {
            if let Verdict::Block(reason) = self.safety.classify(tool.name(), &args) {
                tracing::warn!(tool = %tool.name(), reason = %reason, "tool call blocked");
                return Err(ToolError::Blocked { reason });
            }
        }

        let inner = tool.tool();
        let limit = inner.timeout().unwrap_or(self.timeout);
        // 独立任务执行：工具 panic 只会变成 JoinError；超时或调用方被取消（future 被 drop）时 abort
        let mut task = AbortOnDrop(tokio::spawn(async move { inner.execute(args).await }));
        match timeout(limit, &mut task.0).await {
            Ok(Ok(result)) => result.map(|v| truncate_payload(v, self.max_output_bytes)),
            Ok(Err(join_err)) => {
                let message = if join_err.is_panic() {
                    "tool panicked".to_string()
                } else {
                    join_err.to_string()
                };
                Err(ToolError::ExecutionFailure { message })
            }
            Err(_) => {
                task.0.abort();
                Err(ToolError::Timeout {
                    secs: limit.as_secs(),
                })
            }
        }
    }
}

/// drop 时中止任务；任务内持有的子进程等资源随之释放
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.len() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

/// 在不超过 max_bytes 的最近字符边界处截断
pub fn truncate_str(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// 序列化后超过上限的负载：字符串直接截断，其它结构替换为带标记的预览
pub fn truncate_payload(value: Value, max_bytes: usize) -> Value {
    let serialized = value.to_string();
    if serialized.len() <= max_bytes {
        return value;
    }
    let dropped = serialized.len() - max_bytes;
    match value {
        Value::String(s) => {
            let kept = truncate_str(&s, max_bytes);
            Value::String(format!("{kept}\n...[truncated {dropped} bytes]"))
        }
        _ => serde_json::json!({
            "truncated": true,
            "original_bytes": serialized.len(),
            "preview": format!("{}...[truncated]", truncate_str(&serialized, max_bytes)),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::schema::schema_of;
    use crate::tools::Tool;
    use async_trait::async_trait;
    use schemars::JsonSchema;
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[allow(dead_code)]
    #[derive(Deserialize, JsonSchema)]
    struct PathArgs {
        path: String,
    }

    struct Counting {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Tool for Counting {
        fn name(&self) -> &str {
            "counting"
        }
        fn description(&self) -> &str {
            "counts calls"
        }
        fn parameters_schema(&self) -> Value {
            schema_of::<PathArgs>()
        }
        async fn execute(&self, args: Value) -> ToolResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!({ "path": args["path"] }))
        }
    }

    struct Slow;

    #[async_trait]
    impl Tool for Slow {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "sleeps"
        }
        fn timeout(&self) -> Option<Duration> {
            Some(Duration::from_millis(50))
        }
        async fn execute(&self, _args: Value) -> ToolResult {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(json!("late"))
        }
    }

    struct Panicky;

    #[async_trait]
    impl Tool for Panicky {
        fn name(&self) -> &str {
            "panicky"
        }
        fn description(&self) -> &str {
            "panics"
        }
        async fn execute(&self, _args: Value) -> ToolResult {
            panic!("boom");
        }
    }

    struct Big;

    #[async_trait]
    impl Tool for Big {
        fn name(&self) -> &str {
            "big"
        }
        fn description(&self) -> &str {
            "large output"
        }
        async fn execute(&self, _args: Value) -> ToolResult {
            Ok(Value::String("x".repeat(10_000)))
        }
    }

    struct Destroyer {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Tool for Destroyer {
        fn name(&self) -> &str {
            "run_command"
        }
        fn description(&self) -> &str {
            "destructive"
        }
        fn is_destructive(&self) -> bool {
            true
        }
        async fn execute(&self, _args: Value) -> ToolResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!("ran"))
        }
    }

    fn executor_with(tool: impl Tool + 'static) -> ToolExecutor {
        let mut reg = ToolRegistry::new();
        reg.register(tool).unwrap();
        ToolExecutor::new(reg, 5)
    }

    #[tokio::test]
    async fn invalid_args_never_reach_tool_body() {
        let calls = Arc::new(AtomicUsize::new(0));
        let exec = executor_with(Counting { calls: calls.clone() });
        let err = exec.execute_by_name("counting", json!({ "wrong": 1 })).await.unwrap_err();
        assert!(matches!(err, ToolError::Validation { ref path, .. } if path == "path"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let ok = exec.execute_by_name("counting", json!({ "path": "/tmp" })).await.unwrap();
        assert_eq!(ok["path"], "/tmp");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_tool_is_not_found() {
        let exec = executor_with(Big);
        let err = exec.execute_by_name("missing", json!({})).await.unwrap_err();
        assert_eq!(err, ToolError::NotFound { name: "missing".into() });
    }

    #[tokio::test]
    async fn timeout_is_reported() {
        let exec = executor_with(Slow);
        let err = exec.execute_by_name("slow", json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::Timeout { .. }));
    }

    #[tokio::test]
    async fn panic_becomes_execution_failure() {
        let exec = executor_with(Panicky);
        let err = exec.execute_by_name("panicky", json!({})).await.unwrap_err();
        assert_eq!(err, ToolError::execution("tool panicked"));
    }

    #[tokio::test]
    async fn oversized_output_is_truncated_with_marker() {
        let exec = executor_with(Big).with_max_output_bytes(1024);
        let out = exec.execute_by_name("big", json!({})).await.unwrap();
        let s = out.as_str().unwrap();
        assert!(s.len() < 1200);
        assert!(s.contains("[truncated"));
    }

    #[tokio::test]
    async fn blocked_destructive_call_does_not_run() {
        let calls = Arc::new(AtomicUsize::new(0));
        let exec = executor_with(Destroyer { calls: calls.clone() });
        let err = exec
            .execute_by_name("run_command", json!({ "command": "sudo rm -rf /" }))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Blocked { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    struct Flagging {
        done: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Tool for Flagging {
        fn name(&self) -> &str {
            "flagging"
        }
        fn description(&self) -> &str {
            "sleeps then sets a flag"
        }
        async fn execute(&self, _args: Value) -> ToolResult {
            tokio::time::sleep(Duration::from_millis(200)).await;
            self.done.fetch_add(1, Ordering::SeqCst);
            Ok(json!("done"))
        }
    }

    #[tokio::test]
    async fn dropped_call_aborts_the_tool_task() {
        let done = Arc::new(AtomicUsize::new(0));
        let exec = executor_with(Flagging { done: done.clone() });
        let call = exec.execute_by_name("flagging", json!({}));
        assert!(tokio::time::timeout(Duration::from_millis(30), call).await.is_err());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(done.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn truncate_str_respects_char_boundaries() {
        let s = "héllo";
        assert_eq!(truncate_str(s, 2), "h");
        assert_eq!(truncate_str(s, 3), "hé");
        assert_eq!(truncate_str(s, 100), s);
    }

    #[test]
    fn structured_payload_becomes_preview() {
        let v = json!({ "entries": vec!["abcdefgh"; 200] });
        let t = truncate_payload(v, 300);
        assert_eq!(t["truncated"], true);
        assert!(t["preview"].as_str().unwrap().ends_with("...[truncated]"));
    }
}
