//! 回合循环
//!
//! AwaitingBackend → {Responding | ToolRequested | HandoffRequested} → AwaitingBackend … → Done。
//! 输入是对话快照，输出是本回合新增的消息；循环本身不持有会话状态。
//! 工具失败、非法交接、决策格式错误都作为消息回填，回合继续；
//! 只有后端通信失败、预算耗尽与取消会结束回合，并以 system 消息说明原因。

use futures_util::future::join_all;
use serde_json::json;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::agents::{AgentDefinition, HandoffRouter, HopCounter};
use crate::config::RuntimeSection;
use crate::core::{AgentError, RecoveryAction, RecoveryEngine, TaskScheduler, ToolError};
use crate::llm::LlmError;
use crate::react::aggregator::{stream_step, Aggregated};
use crate::react::planner::{build_system_prompt, decode, looks_structured, Decision, HandoffRequest, ToolCall};
use crate::react::{Planner, TurnEvent};
use crate::session::Message;
use crate::tools::{ToolExecutor, ToolResult};

/// 单回合预算
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnLimits {
    pub max_handoffs: usize,
    pub max_tool_calls: usize,
    pub max_steps: usize,
}

impl Default for TurnLimits {
    fn default() -> Self {
        Self::from(&RuntimeSection::default())
    }
}

impl From<&RuntimeSection> for TurnLimits {
    fn from(cfg: &RuntimeSection) -> Self {
        Self {
            max_handoffs: cfg.max_handoffs,
            max_tool_calls: cfg.max_tool_calls,
            max_steps: cfg.max_steps.max(1),
        }
    }
}

/// 回合依赖（均为借用，由运行时持有）
pub struct TurnContext<'a> {
    pub planner: &'a Planner,
    pub executor: &'a ToolExecutor,
    pub router: &'a HandoffRouter,
    pub recovery: &'a RecoveryEngine,
    pub scheduler: &'a TaskScheduler,
    pub cancel: CancellationToken,
    pub limits: TurnLimits,
    /// 是否流式请求后端
    pub streaming: bool,
    /// 可选：过程事件推送
    pub events: Option<&'a UnboundedSender<TurnEvent>>,
}

impl<'a> TurnContext<'a> {
    pub fn new(
        planner: &'a Planner,
        executor: &'a ToolExecutor,
        router: &'a HandoffRouter,
        recovery: &'a RecoveryEngine,
        scheduler: &'a TaskScheduler,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            planner,
            executor,
            router,
            recovery,
            scheduler,
            cancel,
            limits: TurnLimits::default(),
            streaming: true,
            events: None,
        }
    }

    pub fn with_limits(mut self, limits: TurnLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    pub fn with_events(mut self, tx: &'a UnboundedSender<TurnEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    fn emit(&self, ev: TurnEvent) {
        if let Some(tx) = self.events {
            let _ = tx.send(ev);
        }
    }
}

/// 回合结果
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// 本回合追加的消息（含用户消息），按追加顺序
    pub messages: Vec<Message>,
    /// 回合结束时的 Agent
    pub active_agent: String,
    /// 最终回复
    pub response: Option<String>,
    /// 非正常结束的原因
    pub error: Option<AgentError>,
}

/// 回合内部状态
struct Turn {
    transcript: Vec<Message>,
    start: usize,
    active: String,
}

impl Turn {
    fn finish(self, response: Option<String>, error: Option<AgentError>) -> TurnOutcome {
        let Turn {
            mut transcript,
            start,
            active,
        } = self;
        TurnOutcome {
            messages: transcript.split_off(start),
            active_agent: active,
            response,
            error,
        }
    }
}

/// 以 history 为上下文处理一条用户输入
pub async fn run_turn(ctx: &TurnContext<'_>, history: &[Message], agent: &str, input: &str) -> TurnOutcome {
    let mut turn = Turn {
        transcript: history.to_vec(),
        start: history.len(),
        active: agent.to_string(),
    };
    turn.transcript.push(Message::user(input));

    let mut hops = HopCounter::new(ctx.limits.max_handoffs);
    let mut tool_calls_used = 0usize;

    for step in 1..=ctx.limits.max_steps {
        if ctx.cancel.is_cancelled() {
            return end_turn(ctx, turn, AgentError::Cancelled);
        }
        let Some(def) = ctx.router.catalog().get(&turn.active).cloned() else {
            let err = AgentError::ConfigError(format!("Unknown agent '{}'", turn.active));
            return end_turn(ctx, turn, err);
        };
        let system = system_prompt_for(ctx, &def);

        ctx.emit(TurnEvent::Thinking {
            step,
            agent: def.name.clone(),
        });
        tracing::debug!(step, agent = %def.name, "requesting backend");

        let reply = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return end_turn(ctx, turn, AgentError::Cancelled),
            r = request(ctx, &turn.transcript, &system) => r,
        };
        let reply = match reply {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, agent = %def.name, "backend request failed");
                return end_turn(ctx, turn, AgentError::Backend(e));
            }
        };
        if reply.recovered {
            ctx.emit(TurnEvent::Notice {
                text: "Stream interrupted; used the complete response instead.".to_string(),
            });
        }

        let decision = match decode(&reply.content) {
            Ok(d) => d,
            Err(decode_err) => {
                tracing::warn!(error = %decode_err, agent = %def.name, "backend output rejected");
                turn.transcript
                    .push(Message::assistant(reply.content).with_agent(&def.name));
                if let RecoveryAction::RetryWithPrompt(prompt) | RecoveryAction::EndTurn(prompt) =
                    ctx.recovery.handle_decode(&decode_err)
                {
                    turn.transcript.push(Message::system(prompt));
                }
                continue;
            }
        };

        match decision {
            Decision::Respond(text) => {
                let mut msg = Message::assistant(text.clone()).with_agent(&def.name);
                if reply.truncated {
                    msg = msg.mark_truncated();
                }
                turn.transcript.push(msg);
                return turn.finish(Some(text), None);
            }
            Decision::Act { calls, handoff } => {
                turn.transcript
                    .push(Message::assistant(reply.content).with_agent(&def.name));

                if !calls.is_empty() {
                    if tool_calls_used + calls.len() > ctx.limits.max_tool_calls {
                        let err = AgentError::MaxToolCallsExceeded(ctx.limits.max_tool_calls);
                        return end_turn(ctx, turn, err);
                    }
                    tool_calls_used += calls.len();

                    // 取消后在途结果全部丢弃，不写入对话
                    let results = tokio::select! {
                        biased;
                        _ = ctx.cancel.cancelled() => return end_turn(ctx, turn, AgentError::Cancelled),
                        r = run_tools(ctx, &def, calls) => r,
                    };
                    turn.transcript.extend(results);
                }

                if let Some(request) = handoff {
                    if let Err(err) = hops.record() {
                        tracing::warn!(agent = %def.name, target = %request.target, "handoff limit reached");
                        return end_turn(ctx, turn, err);
                    }
                    apply_handoff(ctx, &mut turn, &def, request);
                }
            }
        }
    }

    let err = AgentError::MaxStepsExceeded(ctx.limits.max_steps);
    end_turn(ctx, turn, err)
}

fn system_prompt_for(ctx: &TurnContext<'_>, def: &AgentDefinition) -> String {
    let instructions = ctx.router.catalog().instructions(&def.name).unwrap_or_default();
    let tools = ctx.executor.registry().to_schema_json(&def.tools);
    build_system_prompt(instructions, &tools)
}

/// 请求一步：流式时只转发看起来不是决策 JSON 的文本
async fn request(ctx: &TurnContext<'_>, transcript: &[Message], system: &str) -> Result<Aggregated, LlmError> {
    if !ctx.streaming {
        let content = ctx.planner.plan(transcript, system).await?;
        return Ok(Aggregated {
            content,
            truncated: false,
            recovered: false,
        });
    }
    let events = ctx.events;
    let mut on_delta = |delta: &str, buffer: &str| {
        if looks_structured(buffer) {
            return;
        }
        if let Some(tx) = events {
            let _ = tx.send(TurnEvent::Delta {
                text: delta.to_string(),
            });
        }
    };
    stream_step(ctx.planner, transcript, system, &mut on_delta).await
}

/// 并发执行同一响应中的工具调用；结果按请求顺序返回
async fn run_tools(ctx: &TurnContext<'_>, def: &AgentDefinition, calls: Vec<ToolCall>) -> Vec<Message> {
    join_all(calls.into_iter().map(|call| run_tool(ctx, def, call))).await
}

async fn run_tool(ctx: &TurnContext<'_>, def: &AgentDefinition, call: ToolCall) -> Message {
    ctx.emit(TurnEvent::ToolStarted {
        tool: call.tool.clone(),
        args: call.args.clone(),
    });

    let result: ToolResult = if !ctx.executor.registry().contains(&call.tool) {
        Err(ToolError::NotFound {
            name: call.tool.clone(),
        })
    } else if !def.has_tool(&call.tool) {
        Err(ToolError::NotAvailable {
            name: call.tool.clone(),
            agent: def.name.clone(),
        })
    } else {
        let _permit = ctx.scheduler.acquire_tool().await;
        ctx.executor.execute_by_name(&call.tool, call.args).await
    };

    if let Err(e) = &result {
        tracing::info!(tool = %call.tool, agent = %def.name, error = %e, "tool call failed");
    }
    ctx.emit(TurnEvent::ToolFinished {
        tool: call.tool.clone(),
        ok: result.is_ok(),
    });
    Message::tool(render_tool_result(&call.tool, &result)).with_agent(&def.name)
}

/// Tool 消息内容：{"tool", "ok", "result"} 或 {"tool", "ok": false, "error": {"kind", ...}}
pub fn render_tool_result(tool: &str, result: &ToolResult) -> String {
    let value = match result {
        Ok(v) => json!({ "tool": tool, "ok": true, "result": v }),
        Err(e) => json!({
            "tool": tool,
            "ok": false,
            "error": serde_json::to_value(e).unwrap_or_else(|_| json!({ "kind": e.kind() })),
            "message": e.to_string(),
        }),
    };
    value.to_string()
}

fn apply_handoff(ctx: &TurnContext<'_>, turn: &mut Turn, from: &AgentDefinition, request: HandoffRequest) {
    match ctx.router.route(&from.name, &request.target) {
        Ok(next) => {
            let reason = request
                .reason
                .as_deref()
                .map(|r| format!(" Reason: {r}"))
                .unwrap_or_default();
            tracing::info!(from = %from.name, to = %next.name, "handoff");
            turn.transcript.push(
                Message::system(format!(
                    "Handoff: {} transferred the conversation to {}.{reason}",
                    from.name, next.name
                ))
                .with_agent(&from.name),
            );
            ctx.emit(TurnEvent::HandedOff {
                from: from.name.clone(),
                to: next.name.clone(),
            });
            turn.active = next.name.clone();
        }
        Err(e) => {
            tracing::warn!(from = %from.name, target = %request.target, error = %e, "handoff rejected");
            turn.transcript.push(
                Message::system(format!(
                    "Handoff rejected: {e}. Continue the task yourself or hand off to an allowed agent."
                ))
                .with_agent(&from.name),
            );
        }
    }
}

/// 以错误结束回合：追加说明性 system 消息
fn end_turn(ctx: &TurnContext<'_>, mut turn: Turn, err: AgentError) -> TurnOutcome {
    tracing::info!(agent = %turn.active, error = %err, "turn ended early");
    let text = match ctx.recovery.handle(&err) {
        RecoveryAction::EndTurn(t) | RecoveryAction::RetryWithPrompt(t) => t,
    };
    turn.transcript.push(Message::system(text));
    turn.finish(None, Some(err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::AgentCatalog;
    use crate::llm::{LlmClient, ScriptedLlmClient, ScriptedReply};
    use crate::session::Role;
    use crate::tools::{CalculateTool, ThinkTool, Tool, ToolRegistry};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    struct Fixture {
        planner: Planner,
        executor: ToolExecutor,
        router: HandoffRouter,
        recovery: RecoveryEngine,
        scheduler: TaskScheduler,
        llm: Arc<ScriptedLlmClient>,
    }

    fn fixture(llm: ScriptedLlmClient) -> Fixture {
        let mut registry = ToolRegistry::new();
        registry.register(CalculateTool).unwrap();
        registry.register(ThinkTool).unwrap();
        let defs = vec![
            crate::agents::AgentDefinition::new("Lead", "a lead.")
                .with_tools(&["think"])
                .with_handoffs(&["Math"]),
            crate::agents::AgentDefinition::new("Math", "a calculator.")
                .with_tools(&["calculate"])
                .with_handoffs(&["Lead"]),
        ];
        let catalog = AgentCatalog::new(defs, &registry).unwrap();
        let llm = Arc::new(llm);
        Fixture {
            planner: Planner::new(llm.clone() as Arc<dyn LlmClient>),
            executor: ToolExecutor::new(registry, 5),
            router: HandoffRouter::new(Arc::new(catalog)),
            recovery: RecoveryEngine::new(),
            scheduler: TaskScheduler::default(),
            llm,
        }
    }

    fn ctx(f: &Fixture) -> TurnContext<'_> {
        TurnContext::new(
            &f.planner,
            &f.executor,
            &f.router,
            &f.recovery,
            &f.scheduler,
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn plain_reply_finishes_turn() {
        let f = fixture(ScriptedLlmClient::from_texts(["Hi there"]));
        let out = run_turn(&ctx(&f), &[], "Lead", "hello").await;
        assert!(out.error.is_none());
        assert_eq!(out.response.as_deref(), Some("Hi there"));
        assert_eq!(out.messages.len(), 2);
        assert_eq!(out.messages[1].agent.as_deref(), Some("Lead"));
    }

    #[tokio::test]
    async fn tool_outside_agent_set_is_reported_not_fatal() {
        let f = fixture(ScriptedLlmClient::from_texts([
            r#"{"tool": "calculate", "args": {"expression": "1+1"}}"#,
            "Cannot calculate here.",
        ]));
        let out = run_turn(&ctx(&f), &[], "Lead", "1+1?").await;
        assert!(out.error.is_none());
        let tool_msg = out.messages.iter().find(|m| m.role == Role::Tool).unwrap();
        assert!(tool_msg.content.contains("ToolNotAvailableError"));
    }

    #[tokio::test]
    async fn handoff_then_tool_then_answer() {
        let f = fixture(ScriptedLlmClient::from_texts([
            r#"{"handoff": "Math", "reason": "arithmetic"}"#,
            r#"{"tool": "calculate", "args": {"expression": "6*7"}}"#,
            "42",
        ]));
        let out = run_turn(&ctx(&f), &[], "Lead", "6*7?").await;
        assert_eq!(out.active_agent, "Math");
        assert_eq!(out.response.as_deref(), Some("42"));
        let tool_msg = out.messages.iter().find(|m| m.role == Role::Tool).unwrap();
        assert!(tool_msg.content.contains("\"result\":42"));
    }

    #[tokio::test]
    async fn invalid_handoff_is_recoverable() {
        let f = fixture(ScriptedLlmClient::from_texts([r#"{"handoff": "Ghost"}"#, "I'll handle it."]));
        let out = run_turn(&ctx(&f), &[], "Lead", "x").await;
        assert!(out.error.is_none());
        assert_eq!(out.active_agent, "Lead");
        assert!(out.messages.iter().any(|m| m.content.starts_with("Handoff rejected")));
    }

    #[tokio::test]
    async fn malformed_output_is_fed_back() {
        let f = fixture(ScriptedLlmClient::from_texts(["{\"tool\": ", "Sorry, here is the answer."]));
        let out = run_turn(&ctx(&f), &[], "Lead", "x").await;
        assert!(out.error.is_none());
        assert_eq!(f.llm.request_count(), 2);
        let second = &f.llm.requests()[1];
        assert!(second.last().unwrap().content.contains("could not be processed"));
    }

    #[tokio::test]
    async fn backend_failure_ends_turn_with_guidance() {
        let f = fixture(ScriptedLlmClient::new(vec![ScriptedReply::Error(LlmError::Unauthorized(
            "401".into(),
        ))]));
        let out = run_turn(&ctx(&f).with_streaming(false), &[], "Lead", "x").await;
        assert!(matches!(out.error, Some(AgentError::Backend(LlmError::Unauthorized(_)))));
        let last = out.messages.last().unwrap();
        assert_eq!(last.role, Role::System);
        assert!(last.content.contains("Invalid API key"));
    }

    #[tokio::test]
    async fn tool_call_budget_is_enforced() {
        let f = fixture(ScriptedLlmClient::repeating(r#"{"tool": "think", "args": {"thought": "hmm"}}"#));
        let limits = TurnLimits {
            max_handoffs: 5,
            max_tool_calls: 3,
            max_steps: 50,
        };
        let out = run_turn(&ctx(&f).with_limits(limits), &[], "Lead", "x").await;
        assert_eq!(out.error, Some(AgentError::MaxToolCallsExceeded(3)));
        assert_eq!(out.messages.iter().filter(|m| m.role == Role::Tool).count(), 3);
    }

    #[tokio::test]
    async fn step_budget_is_enforced() {
        let f = fixture(ScriptedLlmClient::repeating("{\"nothing\": true}"));
        let limits = TurnLimits {
            max_handoffs: 5,
            max_tool_calls: 5,
            max_steps: 4,
        };
        let out = run_turn(&ctx(&f).with_limits(limits), &[], "Lead", "x").await;
        assert_eq!(out.error, Some(AgentError::MaxStepsExceeded(4)));
        assert_eq!(f.llm.request_count(), 4);
    }

    /// 睡一会儿再留下副作用的工具
    struct SlowWrite {
        written: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Tool for SlowWrite {
        fn name(&self) -> &str {
            "slow_write"
        }
        fn description(&self) -> &str {
            "writes after a delay"
        }
        async fn execute(&self, _args: serde_json::Value) -> ToolResult {
            tokio::time::sleep(Duration::from_millis(300)).await;
            self.written.store(true, Ordering::SeqCst);
            Ok(json!("written"))
        }
    }

    #[tokio::test]
    async fn cancel_during_tool_stops_it_and_drops_its_result() {
        let written = Arc::new(AtomicBool::new(false));
        let mut registry = ToolRegistry::new();
        registry.register(SlowWrite { written: written.clone() }).unwrap();
        let defs = vec![crate::agents::AgentDefinition::new("Worker", "a worker.").with_tools(&["slow_write"])];
        let catalog = AgentCatalog::new(defs, &registry).unwrap();
        let llm: Arc<dyn LlmClient> = Arc::new(ScriptedLlmClient::from_texts([
            r#"{"tool": "slow_write", "args": {}}"#,
            "done",
        ]));
        let planner = Planner::new(llm);
        let executor = ToolExecutor::new(registry, 5);
        let router = HandoffRouter::new(Arc::new(catalog));
        let recovery = RecoveryEngine::new();
        let scheduler = TaskScheduler::default();
        let cancel = CancellationToken::new();
        let ctx = TurnContext::new(&planner, &executor, &router, &recovery, &scheduler, cancel.clone())
            .with_streaming(false);

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });
        let out = run_turn(&ctx, &[], "Worker", "go").await;
        assert_eq!(out.error, Some(AgentError::Cancelled));
        assert!(out.messages.iter().all(|m| m.role != Role::Tool));

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(!written.load(Ordering::SeqCst));
    }

    #[test]
    fn tool_result_rendering() {
        let ok: serde_json::Value = serde_json::from_str(&render_tool_result("calculate", &Ok(json!(4)))).unwrap();
        assert_eq!(ok, json!({ "tool": "calculate", "ok": true, "result": 4 }));
        let err = render_tool_result(
            "run_command",
            &Err(ToolError::Blocked {
                reason: "privilege escalation".into(),
            }),
        );
        let v: serde_json::Value = serde_json::from_str(&err).unwrap();
        assert_eq!(v["ok"], false);
        assert_eq!(v["error"]["kind"], "Blocked");
    }
}
