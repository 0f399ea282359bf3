//! 运行时构建器：统一的初始化逻辑
//!
//! TUI 与 headless（relay run）共用同一套工具、Agent 目录与回合循环。
//! 命令执行器、浏览器启动器、LLM provider 与 Agent 定义均可注入，测试中替换为替身。

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::agents::{default_definitions, load_definitions, AgentCatalog, AgentDefinition, HandoffRouter};
use crate::config::AppConfig;
use crate::core::{RecoveryEngine, SessionSupervisor, TaskScheduler};
use crate::llm::{create_provider_from_config, LlmProvider};
use crate::react::{run_turn, Planner, TurnContext, TurnEvent, TurnLimits, TurnOutcome};
use crate::session::{Session, TurnTicket};
use crate::tools::{
    builtin_registry, default_launcher, BrowserLauncher, BrowserSession, CommandRunner, ProcessRunner,
    SafetyPolicy, ToolExecutor, Workspace,
};

/// 运行时构建器
pub struct RuntimeBuilder {
    config: AppConfig,
    runner: Option<Arc<dyn CommandRunner>>,
    launcher: Option<Arc<dyn BrowserLauncher>>,
    provider: Option<Arc<dyn LlmProvider>>,
    agents: Option<Vec<AgentDefinition>>,
}

impl RuntimeBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            runner: None,
            launcher: None,
            provider: None,
            agents: None,
        }
    }

    /// 替换命令执行器（默认 ProcessRunner）
    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    pub fn with_browser_launcher(mut self, launcher: Arc<dyn BrowserLauncher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    pub fn with_provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// 直接给定 Agent 定义（优先于 agents_file 与内置定义）
    pub fn with_agents(mut self, agents: Vec<AgentDefinition>) -> Self {
        self.agents = Some(agents);
        self
    }

    pub fn build(self) -> anyhow::Result<AgentRuntime> {
        let cfg = self.config;

        let root = cfg.workspace_root();
        std::fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create workspace {}", root.display()))?;
        let root = root.canonicalize().unwrap_or(root);
        let workspace = Workspace::new(&root);

        let safety = SafetyPolicy::builtin()
            .with_extra_patterns(&cfg.tools.shell.deny_patterns)
            .context("Invalid pattern in tools.shell.deny_patterns")?;
        let runner = self
            .runner
            .unwrap_or_else(|| Arc::new(ProcessRunner::new(cfg.tools.max_output_bytes)));
        let browser = Arc::new(BrowserSession::new(self.launcher.unwrap_or_else(default_launcher)));

        let registry = builtin_registry(&workspace, &cfg.tools, runner, browser.clone())
            .context("Failed to register built-in tools")?;
        let executor = ToolExecutor::new(registry, cfg.tools.tool_timeout_secs)
            .with_safety(safety)
            .with_max_output_bytes(cfg.tools.max_output_bytes);

        let definitions = match (self.agents, &cfg.runtime.agents_file) {
            (Some(defs), _) => defs,
            (None, Some(path)) => load_definitions(path)
                .with_context(|| format!("Failed to load agents from {}", path.display()))?,
            (None, None) => default_definitions(),
        };
        let catalog = AgentCatalog::new(definitions, executor.registry()).context("Invalid agent catalog")?;

        let default_agent = if catalog.contains(&cfg.runtime.default_agent) {
            cfg.runtime.default_agent.clone()
        } else {
            let first = catalog.first().name.clone();
            tracing::warn!(
                configured = %cfg.runtime.default_agent,
                using = %first,
                "default agent not found in catalog"
            );
            first
        };

        let provider = self
            .provider
            .unwrap_or_else(|| create_provider_from_config(&cfg.llm));

        tracing::info!(
            workspace = %root.display(),
            tools = executor.registry().len(),
            agents = catalog.agents().len(),
            "runtime ready"
        );

        Ok(AgentRuntime {
            limits: TurnLimits::from(&cfg.runtime),
            scheduler: TaskScheduler::new(cfg.runtime.max_concurrent_tools),
            router: HandoffRouter::new(Arc::new(catalog)),
            recovery: RecoveryEngine::new(),
            supervisor: SessionSupervisor::new(),
            config: cfg,
            workspace,
            executor,
            browser,
            provider,
            default_agent,
        })
    }
}

/// 预构建的运行时组件，进程内只创建一次
pub struct AgentRuntime {
    config: AppConfig,
    workspace: Workspace,
    executor: ToolExecutor,
    router: HandoffRouter,
    recovery: RecoveryEngine,
    scheduler: TaskScheduler,
    supervisor: SessionSupervisor,
    browser: Arc<BrowserSession>,
    provider: Arc<dyn LlmProvider>,
    limits: TurnLimits,
    default_agent: String,
}

impl AgentRuntime {
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn catalog(&self) -> &AgentCatalog {
        self.router.catalog()
    }

    pub fn executor(&self) -> &ToolExecutor {
        &self.executor
    }

    pub fn supervisor(&self) -> &SessionSupervisor {
        &self.supervisor
    }

    /// 新会话的入口 Agent
    pub fn default_agent(&self) -> &str {
        &self.default_agent
    }

    pub fn limits(&self) -> TurnLimits {
        self.limits
    }

    pub fn is_live(&self) -> bool {
        self.provider.is_live()
    }

    /// 新会话：默认 Agent + 指定模型（None 用配置中的模型）
    pub fn new_session(&self, model: Option<&str>) -> Session {
        let model = model.unwrap_or(&self.config.llm.model);
        Session::new(self.default_agent.clone(), model)
    }

    /// 以会话快照跑一个回合
    pub async fn run_turn(
        &self,
        ticket: &TurnTicket,
        input: &str,
        cancel: CancellationToken,
        events: Option<&UnboundedSender<TurnEvent>>,
    ) -> TurnOutcome {
        let planner = Planner::new(self.provider.client_for(&ticket.model));
        let mut ctx = TurnContext::new(
            &planner,
            &self.executor,
            &self.router,
            &self.recovery,
            &self.scheduler,
            cancel,
        )
        .with_limits(self.limits)
        .with_streaming(self.config.llm.streaming);
        if let Some(tx) = events {
            ctx = ctx.with_events(tx);
        }

        let outcome = run_turn(&ctx, &ticket.history, &ticket.agent, input).await;
        let (prompt, completion, total) = planner.token_usage();
        tracing::info!(
            agent = %outcome.active_agent,
            messages = outcome.messages.len(),
            prompt_tokens = prompt,
            completion_tokens = completion,
            total_tokens = total,
            ok = outcome.error.is_none(),
            "turn finished"
        );
        outcome
    }

    /// 释放共享资源（浏览器会话）
    pub async fn shutdown(&self) {
        if self.browser.close().await {
            tracing::info!("browser session closed on shutdown");
        }
    }
}
