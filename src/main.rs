//! Relay - 终端多智能体助手
//!
//! 入口：解析命令行、加载配置、初始化日志、构建运行时，然后进入 TUI 或执行一次性任务。

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc;

use relay::cli::{Cli, CliCommand, ConfigAction};
use relay::config::{config_sources, load_config_or_default, render_summary};
use relay::core::{spawn_orchestrator, AgentRuntime, RuntimeBuilder};
use relay::react::TurnEvent;
use relay::session::commands::{list_agents, list_models};
use relay::ui::run_app;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = load_config_or_default(cli.config.as_deref());

    match cli.command() {
        CliCommand::Models => {
            let active = cli.model.as_deref().unwrap_or(&cfg.llm.model);
            println!("{}", list_models(active));
            Ok(())
        }
        CliCommand::Config { action } => match action.unwrap_or_default() {
            ConfigAction::Show => {
                let model = cli.model.as_deref().unwrap_or(&cfg.llm.model);
                let sources = config_sources(cli.config.as_deref());
                let key = relay::llm::resolve_api_key().is_some();
                println!("{}", render_summary(&cfg, model, key, &sources));
                Ok(())
            }
        },
        CliCommand::Agents => {
            relay::observability::init(None)?;
            let runtime = RuntimeBuilder::new(cfg).build()?;
            print_agents(&runtime);
            Ok(())
        }
        CliCommand::Run { task, agent } => {
            relay::observability::init(None)?;
            let runtime = RuntimeBuilder::new(cfg).build().context("Failed to build runtime")?;
            run_once(runtime, cli.model.as_deref(), agent.as_deref(), &task.join(" ")).await
        }
        CliCommand::Chat => {
            relay::observability::init(Some(&cfg.log_file()))?;
            let runtime = Arc::new(RuntimeBuilder::new(cfg).build().context("Failed to build runtime")?);
            let session = runtime.new_session(cli.model.as_deref());
            let handle = spawn_orchestrator(runtime, session);
            run_app(handle).await.context("App run failed")
        }
    }
}

fn print_agents(runtime: &AgentRuntime) {
    let catalog = runtime.catalog();
    println!("{}", list_agents(catalog, runtime.default_agent()));
    for agent in catalog.agents() {
        println!("\n{}", agent.name);
        println!("  tools:    {}", agent.tools.join(", "));
        println!("  handoffs: {}", agent.handoffs.join(", "));
    }
}

/// 一次性任务：与 TUI 走同一回合循环；Ctrl+C 取消
async fn run_once(runtime: AgentRuntime, model: Option<&str>, agent: Option<&str>, task: &str) -> anyhow::Result<()> {
    let mut session = runtime.new_session(model);
    if let Some(name) = agent {
        anyhow::ensure!(runtime.catalog().contains(name), "Unknown agent: {name}");
        session.set_agent(name);
    }
    if !runtime.is_live() {
        eprintln!("No API key configured; using the offline mock backend. Set OPENROUTER_API_KEY.");
    }

    let ticket = session.begin_turn()?;
    let cancel = runtime.supervisor().begin_turn();
    let (ev_tx, mut ev_rx) = mpsc::unbounded_channel::<TurnEvent>();

    let printer = tokio::spawn(async move {
        while let Some(ev) = ev_rx.recv().await {
            match ev {
                TurnEvent::ToolStarted { tool, .. } => eprintln!("  -> {tool}"),
                TurnEvent::ToolFinished { tool, ok: false } => eprintln!("  !! {tool} failed"),
                TurnEvent::HandedOff { from, to } => eprintln!("  {from} -> {to}"),
                TurnEvent::Notice { text } => eprintln!("  {text}"),
                _ => {}
            }
        }
    });

    let outcome = tokio::select! {
        outcome = runtime.run_turn(&ticket, task, cancel.clone(), Some(&ev_tx)) => outcome,
        _ = tokio::signal::ctrl_c() => {
            cancel.cancel();
            eprintln!("Cancelled.");
            runtime.shutdown().await;
            return Ok(());
        }
    };
    drop(ev_tx);
    let _ = printer.await;
    session.finish_turn(&outcome);
    runtime.shutdown().await;

    match (&outcome.response, &outcome.error) {
        (Some(text), _) => {
            println!("{text}");
            Ok(())
        }
        (None, Some(err)) => {
            let guidance = outcome
                .messages
                .last()
                .map(|m| m.content.clone())
                .unwrap_or_else(|| err.to_string());
            anyhow::bail!("{guidance}")
        }
        (None, None) => Ok(()),
    }
}
