//! 应用配置：从 config/default.toml、--config 文件与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `RELAY__*` 覆盖（双下划线表示嵌套，如 `RELAY__LLM__MODEL=openai/gpt-4o`）。
//! API Key 不在配置文件中，只从 `OPENROUTER_API_KEY` / `OPENAI_API_KEY` 读取。

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::llm::models::{ModelCatalog, DEFAULT_MODEL};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub runtime: RuntimeSection,
    pub tools: ToolsSection,
}

/// [app] 段：工作目录与日志文件
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppSection {
    /// 工具可见的根目录，未设置时用当前目录
    pub workspace_root: Option<PathBuf>,
    /// 交互模式的日志文件，未设置时为 <workspace>/relay.log
    pub log_file: Option<PathBuf>,
}

/// [llm] 段：后端、模型、流式开关与请求超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// openrouter / openai / mock
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub streaming: bool,
    pub request_timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openrouter".to_string(),
            model: DEFAULT_MODEL.to_string(),
            base_url: None,
            streaming: true,
            request_timeout_secs: 60,
        }
    }
}

/// [runtime] 段：回合预算与入口 Agent
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeSection {
    pub max_handoffs: usize,
    pub max_tool_calls: usize,
    /// 单回合最多请求后端的次数
    pub max_steps: usize,
    /// 同一响应中批量工具调用的并发上限
    pub max_concurrent_tools: usize,
    pub default_agent: String,
    /// 可选 agents.toml，覆盖内置 Agent 定义
    pub agents_file: Option<PathBuf>,
}

impl Default for RuntimeSection {
    fn default() -> Self {
        Self {
            max_handoffs: 5,
            max_tool_calls: 20,
            max_steps: 24,
            max_concurrent_tools: 3,
            default_agent: "Orchestrator".to_string(),
            agents_file: None,
        }
    }
}

/// [tools] 段：默认超时、结果大小上限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    pub tool_timeout_secs: u64,
    /// 单次工具结果上限（字节）
    pub max_output_bytes: usize,
    pub shell: ShellSection,
    pub web: WebSection,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 30,
            max_output_bytes: 64 * 1024,
            shell: ShellSection::default(),
            web: WebSection::default(),
        }
    }
}

/// [tools.shell] 段：命令超时与额外拒绝规则（正则，大小写不敏感）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShellSection {
    pub timeout_secs: u64,
    pub deny_patterns: Vec<String>,
}

impl Default for ShellSection {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            deny_patterns: Vec::new(),
        }
    }
}

/// [tools.web] 段：抓取超时、最大字符数、域名白名单（为空表示不限制）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebSection {
    pub timeout_secs: u64,
    pub max_result_chars: usize,
    pub allowed_domains: Vec<String>,
}

impl Default for WebSection {
    fn default() -> Self {
        Self {
            timeout_secs: 15,
            max_result_chars: 10_000,
            allowed_domains: Vec::new(),
        }
    }
}

impl AppConfig {
    /// 工作目录：配置 > 当前目录
    pub fn workspace_root(&self) -> PathBuf {
        self.app
            .workspace_root
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// 交互模式日志文件
    pub fn log_file(&self) -> PathBuf {
        self.app
            .log_file
            .clone()
            .unwrap_or_else(|| self.workspace_root().join("relay.log"))
    }
}

/// 按顺序查找的默认配置文件（不含扩展名）
fn default_file() -> Option<&'static str> {
    ["config/default", "../config/default"]
        .into_iter()
        .find(|name| Path::new(&format!("{name}.toml")).exists())
}

/// 参与本次加载的配置来源，按覆盖顺序排列
pub fn config_sources(config_path: Option<&Path>) -> Vec<String> {
    let mut sources = Vec::new();
    if let Some(name) = default_file() {
        sources.push(format!("{name}.toml"));
    }
    if let Some(path) = config_path {
        sources.push(path.display().to_string());
    }
    let mut vars: Vec<String> = std::env::vars()
        .map(|(k, _)| k)
        .filter(|k| k.starts_with("RELAY__"))
        .collect();
    vars.sort();
    sources.extend(vars.into_iter().map(|k| format!("env {k}")));
    if sources.is_empty() {
        sources.push("built-in defaults".to_string());
    }
    sources
}

/// `relay config show` 的输出；只读，不含密钥内容
pub fn render_summary(cfg: &AppConfig, model: &str, api_key_configured: bool, sources: &[String]) -> String {
    let key = if api_key_configured {
        "configured"
    } else {
        "not set (OPENROUTER_API_KEY / OPENAI_API_KEY); the offline mock backend is used"
    };
    let mut out = vec![
        "Relay configuration".to_string(),
        format!("  API key:        {key}"),
        format!("  Model:          {} ({model})", ModelCatalog::display_name(model)),
        format!("  Provider:       {}", cfg.llm.provider),
        format!("  Streaming:      {}", if cfg.llm.streaming { "on" } else { "off" }),
        format!("  Default agent:  {}", cfg.runtime.default_agent),
        format!(
            "  Turn budgets:   {} handoffs, {} tool calls, {} steps",
            cfg.runtime.max_handoffs, cfg.runtime.max_tool_calls, cfg.runtime.max_steps
        ),
        format!("  Workspace:      {}", cfg.workspace_root().display()),
        format!("  Log file:       {}", cfg.log_file().display()),
        "  Sources:".to_string(),
    ];
    out.extend(sources.iter().map(|s| format!("    - {s}")));
    out.join("\n")
}

/// 加载配置，环境变量 RELAY__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml，找到则作为第一源
/// 2. 若传入 config_path，则追加该文件（必须存在，可覆盖前面的键）
/// 3. 最后叠加环境变量 RELAY__*（双下划线表示嵌套键；列表用逗号分隔）
pub fn load_config(config_path: Option<&Path>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    if let Some(name) = default_file() {
        builder = builder.add_source(config::File::with_name(name).required(false));
    }

    if let Some(path) = config_path {
        builder = builder.add_source(config::File::from(path.to_path_buf()).required(true));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("RELAY")
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("tools.shell.deny_patterns")
            .with_list_parse_key("tools.web.allowed_domains"),
    );

    builder.build()?.try_deserialize()
}

/// 加载失败时告警并回退到默认值
pub fn load_config_or_default(config_path: Option<&Path>) -> AppConfig {
    load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_are_usable() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.runtime.max_handoffs, 5);
        assert_eq!(cfg.runtime.max_tool_calls, 20);
        assert_eq!(cfg.runtime.default_agent, "Orchestrator");
        assert_eq!(cfg.tools.shell.timeout_secs, 30);
        assert_eq!(cfg.tools.max_output_bytes, 65536);
        assert!(cfg.tools.web.allowed_domains.is_empty());
        assert_eq!(cfg.llm.model, DEFAULT_MODEL);
        assert!(cfg.llm.streaming);
    }

    #[test]
    fn file_overrides_only_given_keys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("relay.toml");
        std::fs::write(
            &path,
            r#"
[llm]
model = "openai/gpt-4o"
streaming = false

[runtime]
max_handoffs = 2

[tools.shell]
deny_patterns = ["\\bshutdown\\b"]
"#,
        )
        .unwrap();

        let cfg = load_config(Some(&path)).unwrap();
        assert_eq!(cfg.llm.model, "openai/gpt-4o");
        assert!(!cfg.llm.streaming);
        assert_eq!(cfg.llm.request_timeout_secs, 60);
        assert_eq!(cfg.runtime.max_handoffs, 2);
        assert_eq!(cfg.runtime.max_steps, 24);
        assert_eq!(cfg.tools.shell.deny_patterns, vec!["\\bshutdown\\b".to_string()]);
        assert_eq!(cfg.tools.shell.timeout_secs, 30);
    }

    #[test]
    fn summary_reports_model_key_and_sources() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("relay.toml");
        std::fs::write(&path, "[runtime]\nmax_handoffs = 3\n").unwrap();
        let cfg = load_config(Some(&path)).unwrap();
        let sources = config_sources(Some(&path));
        assert!(sources.contains(&path.display().to_string()));

        let text = render_summary(&cfg, "openai/gpt-4o", false, &sources);
        assert!(text.contains("(openai/gpt-4o)"));
        assert!(text.contains("not set"));
        assert!(text.contains("3 handoffs"));
        assert!(text.contains(&path.display().to_string()));

        let text = render_summary(&cfg, DEFAULT_MODEL, true, &["built-in defaults".to_string()]);
        assert!(text.contains("API key:        configured"));
        assert!(text.contains("built-in defaults"));
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(load_config(Some(&dir.path().join("nope.toml"))).is_err());
    }
}
