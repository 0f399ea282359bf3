//! 浏览器工具集（Browser Agent）
//!
//! 所有 browser_* 工具共享一个 BrowserSession：首次使用时通过 BrowserLauncher 懒启动浏览器，
//! 之后复用同一页面；browser_close 或会话结束（AgentRuntime::shutdown）时释放。
//! 页面操作经 BrowserPage trait 抽象：启用 feature "browser" 时由 Headless Chrome 实现（见 chrome.rs），
//! 否则启动会返回明确的错误。

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::core::ToolError;
use crate::tools::filesystem::Workspace;
use crate::tools::registry::ToolResult;
use crate::tools::schema::{empty_object_schema, parse_args, schema_of};
use crate::tools::Tool;

/// 页面信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageInfo {
    pub url: String,
    pub title: String,
}

/// 页面上的链接
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub text: String,
    pub href: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ScrollDirection {
    Up,
    Down,
}

/// 一个已打开的浏览器页面
#[async_trait]
pub trait BrowserPage: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<PageInfo, String>;
    async fn content(&self, selector: Option<&str>) -> Result<String, String>;
    async fn links(&self) -> Result<Vec<Link>, String>;
    async fn click(&self, selector: &str) -> Result<(), String>;
    async fn type_text(&self, selector: &str, text: &str, clear: bool) -> Result<(), String>;
    async fn scroll(&self, direction: ScrollDirection, amount: i64) -> Result<(), String>;
    async fn go_back(&self) -> Result<PageInfo, String>;
    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<(), String>;
    async fn screenshot(&self, path: &Path, full_page: bool) -> Result<(), String>;
    async fn close(&self) -> Result<(), String>;
}

/// 浏览器启动器
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn BrowserPage>, String>;
}

/// 未编译浏览器支持时使用
pub struct UnavailableLauncher;

#[async_trait]
impl BrowserLauncher for UnavailableLauncher {
    async fn launch(&self) -> Result<Box<dyn BrowserPage>, String> {
        Err("Browser support is not available in this build (rebuild with --features browser)".to_string())
    }
}

/// 当前构建的默认启动器
pub fn default_launcher() -> Arc<dyn BrowserLauncher> {
    #[cfg(feature = "browser")]
    {
        Arc::new(crate::tools::chrome::ChromeLauncher::default())
    }
    #[cfg(not(feature = "browser"))]
    {
        Arc::new(UnavailableLauncher)
    }
}

/// 共享浏览器会话：懒启动，显式关闭
pub struct BrowserSession {
    launcher: Arc<dyn BrowserLauncher>,
    page: Mutex<Option<Arc<dyn BrowserPage>>>,
    ops: Arc<Mutex<()>>,
    launches: AtomicUsize,
}

/// 一次页面操作的租约：持有期间其它浏览器调用排队等待
pub struct PageLease {
    page: Arc<dyn BrowserPage>,
    _turn: OwnedMutexGuard<()>,
}

impl std::ops::Deref for PageLease {
    type Target = dyn BrowserPage;

    fn deref(&self) -> &Self::Target {
        self.page.as_ref()
    }
}

impl BrowserSession {
    pub fn new(launcher: Arc<dyn BrowserLauncher>) -> Self {
        Self {
            launcher,
            page: Mutex::new(None),
            ops: Arc::new(Mutex::new(())),
            launches: AtomicUsize::new(0),
        }
    }

    /// 取得页面；尚未启动则先启动
    pub async fn acquire(&self) -> Result<PageLease, String> {
        let turn = self.ops.clone().lock_owned().await;
        let mut slot = self.page.lock().await;
        let page = match slot.as_ref() {
            Some(page) => page.clone(),
            None => {
                let page: Arc<dyn BrowserPage> = Arc::from(self.launcher.launch().await?);
                self.launches.fetch_add(1, Ordering::SeqCst);
                tracing::info!("browser session started");
                *slot = Some(page.clone());
                page
            }
        };
        Ok(PageLease { page, _turn: turn })
    }

    pub async fn is_open(&self) -> bool {
        self.page.lock().await.is_some()
    }

    /// 启动次数（每次关闭后再用会重新启动）
    pub fn launch_count(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    /// 关闭浏览器；等进行中的页面操作结束后释放。返回是否确有会话被关闭
    pub async fn close(&self) -> bool {
        let _turn = self.ops.lock().await;
        let page = self.page.lock().await.take();
        match page {
            Some(page) => {
                if let Err(e) = page.close().await {
                    tracing::warn!(error = %e, "browser close failed");
                }
                tracing::info!("browser session closed");
                true
            }
            None => false,
        }
    }
}

/// browser_* 工具的动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowserAction {
    Navigate,
    Screenshot,
    Click,
    Type,
    GetContent,
    GetLinks,
    Scroll,
    GoBack,
    WaitFor,
    Close,
}

impl BrowserAction {
    pub const ALL: [BrowserAction; 10] = [
        BrowserAction::Navigate,
        BrowserAction::Screenshot,
        BrowserAction::Click,
        BrowserAction::Type,
        BrowserAction::GetContent,
        BrowserAction::GetLinks,
        BrowserAction::Scroll,
        BrowserAction::GoBack,
        BrowserAction::WaitFor,
        BrowserAction::Close,
    ];

    pub fn tool_name(self) -> &'static str {
        match self {
            Self::Navigate => "browser_navigate",
            Self::Screenshot => "browser_screenshot",
            Self::Click => "browser_click",
            Self::Type => "browser_type",
            Self::GetContent => "browser_get_content",
            Self::GetLinks => "browser_get_links",
            Self::Scroll => "browser_scroll",
            Self::GoBack => "browser_go_back",
            Self::WaitFor => "browser_wait_for",
            Self::Close => "browser_close",
        }
    }

    fn description(self) -> &'static str {
        match self {
            Self::Navigate => "Open a URL in the browser and return the page title and final URL.",
            Self::Screenshot => "Save a PNG screenshot of the current page into the workspace.",
            Self::Click => "Click the first element matching a CSS selector.",
            Self::Type => "Type text into the input matching a CSS selector.",
            Self::GetContent => "Get the visible text of the page, or of the element matching a CSS selector.",
            Self::GetLinks => "List links on the current page, optionally filtered by text.",
            Self::Scroll => "Scroll the page up or down.",
            Self::GoBack => "Go back to the previous page.",
            Self::WaitFor => "Wait until an element matching a CSS selector appears.",
            Self::Close => "Close the browser and release its resources.",
        }
    }

    fn schema(self) -> Value {
        match self {
            Self::Navigate => schema_of::<NavigateArgs>(),
            Self::Screenshot => schema_of::<ScreenshotArgs>(),
            Self::Click => schema_of::<SelectorArgs>(),
            Self::Type => schema_of::<TypeArgs>(),
            Self::GetContent => schema_of::<ContentArgs>(),
            Self::GetLinks => schema_of::<LinksArgs>(),
            Self::Scroll => schema_of::<ScrollArgs>(),
            Self::WaitFor => schema_of::<WaitForArgs>(),
            Self::GoBack | Self::Close => empty_object_schema(),
        }
    }
}

#[derive(Deserialize, JsonSchema)]
struct NavigateArgs {
    /// http(s) URL to open
    url: String,
}

#[derive(Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
struct ScreenshotArgs {
    /// File name for the PNG (relative to the workspace)
    #[serde(default)]
    filename: Option<String>,
    /// Capture the full scrollable page
    #[serde(default)]
    full_page: bool,
}

#[derive(Deserialize, JsonSchema)]
struct SelectorArgs {
    /// CSS selector
    selector: String,
}

#[derive(Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
struct TypeArgs {
    /// CSS selector of the input field
    selector: String,
    /// Text to type
    text: String,
    /// Clear the field first
    #[serde(default)]
    clear_first: bool,
}

#[derive(Deserialize, JsonSchema)]
struct ContentArgs {
    /// CSS selector (defaults to the whole page)
    #[serde(default)]
    selector: Option<String>,
}

#[derive(Deserialize, JsonSchema)]
struct LinksArgs {
    /// Only return links whose text or URL contains this
    #[serde(default)]
    filter: Option<String>,
}

fn default_scroll_amount() -> i64 {
    500
}

#[derive(Deserialize, JsonSchema)]
struct ScrollArgs {
    direction: ScrollDirection,
    /// Pixels to scroll (default 500)
    #[serde(default = "default_scroll_amount")]
    amount: i64,
}

fn default_wait_ms() -> u64 {
    5000
}

#[derive(Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
struct WaitForArgs {
    /// CSS selector to wait for
    selector: String,
    /// Timeout in milliseconds (default 5000)
    #[serde(default = "default_wait_ms")]
    timeout_ms: u64,
}

/// 页面文本上限（字符）
const MAX_CONTENT_CHARS: usize = 10_000;

/// 单个 browser_* 工具
pub struct BrowserTool {
    action: BrowserAction,
    session: Arc<BrowserSession>,
    ws: Workspace,
}

impl BrowserTool {
    pub fn new(action: BrowserAction, session: Arc<BrowserSession>, ws: Workspace) -> Self {
        Self { action, session, ws }
    }

    /// 全部 browser_* 工具，共享同一会话
    pub fn all(session: Arc<BrowserSession>, ws: Workspace) -> Vec<BrowserTool> {
        BrowserAction::ALL
            .iter()
            .map(|a| BrowserTool::new(*a, session.clone(), ws.clone()))
            .collect()
    }

    fn screenshot_path(&self, filename: Option<String>) -> PathBuf {
        let name = filename
            .filter(|f| !f.trim().is_empty())
            .unwrap_or_else(|| format!("screenshot-{}.png", chrono::Utc::now().format("%Y%m%d-%H%M%S")));
        self.ws.resolve(&name)
    }

    async fn run(&self, args: Value) -> Result<Value, String> {
        if self.action == BrowserAction::Close {
            let closed = self.session.close().await;
            return Ok(json!({ "closed": closed }));
        }
        let page = self.session.acquire().await?;
        match self.action {
            BrowserAction::Navigate => {
                let a: NavigateArgs = parse_args(args).map_err(|e| e.to_string())?;
                let info = page.navigate(&a.url).await?;
                Ok(json!({ "url": info.url, "title": info.title }))
            }
            BrowserAction::Screenshot => {
                let a: ScreenshotArgs = parse_args(args).map_err(|e| e.to_string())?;
                let path = self.screenshot_path(a.filename);
                page.screenshot(&path, a.full_page).await?;
                Ok(json!({ "path": path.display().to_string(), "fullPage": a.full_page }))
            }
            BrowserAction::Click => {
                let a: SelectorArgs = parse_args(args).map_err(|e| e.to_string())?;
                page.click(&a.selector).await?;
                Ok(json!({ "clicked": a.selector }))
            }
            BrowserAction::Type => {
                let a: TypeArgs = parse_args(args).map_err(|e| e.to_string())?;
                page.type_text(&a.selector, &a.text, a.clear_first).await?;
                Ok(json!({ "selector": a.selector, "typed": a.text.chars().count() }))
            }
            BrowserAction::GetContent => {
                let a: ContentArgs = parse_args(args).map_err(|e| e.to_string())?;
                let text = page.content(a.selector.as_deref()).await?;
                let length = text.chars().count();
                let truncated = length > MAX_CONTENT_CHARS;
                let content = if truncated {
                    text.chars().take(MAX_CONTENT_CHARS).collect::<String>() + "\n...[truncated]"
                } else {
                    text
                };
                Ok(json!({ "content": content, "length": length, "truncated": truncated }))
            }
            BrowserAction::GetLinks => {
                let a: LinksArgs = parse_args(args).map_err(|e| e.to_string())?;
                let filter = a.filter.map(|f| f.to_lowercase());
                let links: Vec<Link> = page
                    .links()
                    .await?
                    .into_iter()
                    .filter(|l| match &filter {
                        Some(f) => l.text.to_lowercase().contains(f) || l.href.to_lowercase().contains(f),
                        None => true,
                    })
                    .take(50)
                    .collect();
                Ok(json!({ "count": links.len(), "links": links }))
            }
            BrowserAction::Scroll => {
                let a: ScrollArgs = parse_args(args).map_err(|e| e.to_string())?;
                page.scroll(a.direction, a.amount).await?;
                Ok(json!({ "scrolled": a.direction == ScrollDirection::Down, "amount": a.amount }))
            }
            BrowserAction::GoBack => {
                let info = page.go_back().await?;
                Ok(json!({ "url": info.url, "title": info.title }))
            }
            BrowserAction::WaitFor => {
                let a: WaitForArgs = parse_args(args).map_err(|e| e.to_string())?;
                page.wait_for(&a.selector, Duration::from_millis(a.timeout_ms)).await?;
                Ok(json!({ "found": a.selector }))
            }
            BrowserAction::Close => Ok(json!({ "closed": false })),
        }
    }
}

#[async_trait]
impl Tool for BrowserTool {
    fn name(&self) -> &str {
        self.action.tool_name()
    }

    fn description(&self) -> &str {
        self.action.description()
    }

    fn parameters_schema(&self) -> Value {
        self.action.schema()
    }

    fn timeout(&self) -> Option<Duration> {
        // 首次调用包含浏览器启动
        Some(Duration::from_secs(60))
    }

    async fn execute(&self, args: Value) -> ToolResult {
        tracing::info!(tool = %self.action.tool_name(), "browser tool");
        self.run(args).await.map_err(ToolError::execution)
    }
}
