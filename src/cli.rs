use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Relay - terminal assistant that hands your request to the right specialist agent
#[derive(Parser, Debug, Clone)]
#[command(name = "relay", version, about, long_about = None)]
pub struct Cli {
    /// Path to an extra configuration file (overrides config/default.toml)
    #[arg(short, long, global = true, env = "RELAY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Model id to use for this run (see `relay models`)
    #[arg(short, long, global = true, env = "RELAY_MODEL")]
    pub model: Option<String>,

    #[command(subcommand)]
    pub command: Option<CliCommand>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum CliCommand {
    /// Start the interactive chat (default)
    Chat,
    /// Run a single task headlessly and print the final answer
    Run {
        /// The task to perform
        #[arg(required = true, num_args = 1..)]
        task: Vec<String>,
        /// Agent to start with
        #[arg(short, long)]
        agent: Option<String>,
    },
    /// List available models
    Models,
    /// List agents with their tools and handoff targets
    Agents,
    /// Inspect configuration (read-only)
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConfigAction {
    /// Show the effective model, API key status and configuration sources
    #[default]
    Show,
}

impl Cli {
    pub fn command(&self) -> CliCommand {
        self.command.clone().unwrap_or(CliCommand::Chat)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_chat() {
        let cli = Cli::parse_from(["relay"]);
        assert_eq!(cli.command(), CliCommand::Chat);
        assert!(cli.config.is_none());
    }

    #[test]
    fn run_joins_task_words() {
        let cli = Cli::parse_from(["relay", "--model", "x/y", "run", "-a", "Coder", "list", "files"]);
        assert_eq!(cli.model.as_deref(), Some("x/y"));
        match cli.command() {
            CliCommand::Run { task, agent } => {
                assert_eq!(task.join(" "), "list files");
                assert_eq!(agent.as_deref(), Some("Coder"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn config_defaults_to_show() {
        let cli = Cli::parse_from(["relay", "config"]);
        assert_eq!(cli.command(), CliCommand::Config { action: None });
        let cli = Cli::parse_from(["relay", "-c", "relay.toml", "config", "show"]);
        assert_eq!(cli.command(), CliCommand::Config { action: Some(ConfigAction::Show) });
        assert_eq!(cli.config.as_deref(), Some(std::path::Path::new("relay.toml")));
    }
}
