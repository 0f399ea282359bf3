//! 研究工具集（Researcher Agent）：web_search / fetch_webpage / get_datetime
//!
//! web_search 走 DuckDuckGo HTML 端点（无需 API Key），用正则从结果页抽取标题、链接、摘要；
//! fetch_webpage 抓取 URL，HTML 经 html2text 转为可读文本，超过 max_result_chars 截断并追加 ...[truncated]。
//! 域名白名单可选：为空时允许任意 http(s) 地址。

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{FixedOffset, Local, Utc};
use html2text::from_read;
use regex::Regex;
use reqwest::Client;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::core::ToolError;
use crate::tools::registry::ToolResult;
use crate::tools::schema::{parse_args, schema_of};
use crate::tools::Tool;

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

const SEARCH_ENDPOINT: &str = "https://html.duckduckgo.com/html/";

fn build_client(timeout_secs: u64) -> Client {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .user_agent(USER_AGENT)
        .build()
        .unwrap_or_default()
}

/// 简易去除 HTML 标签（html2text 失败时的回退）
fn strip_html_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                out.push(' ');
            }
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn decode_entities(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&quot;", "\"")
        .replace("&#x27;", "'")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// 判断内容是否像 HTML（需提取可读文本）
fn looks_like_html(s: &str) -> bool {
    let s = s.trim_start();
    s.starts_with("<!") || s.starts_with("<html") || s.starts_with("<HTML")
        || (s.len() > 20 && s.contains('<') && (s.contains("</") || s.contains("<head")))
}

/// 从 URL 中提取 host（小写，不含端口）
fn extract_domain(url: &str) -> Option<String> {
    let url = url.trim();
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))?;
    let host = rest.split(['/', '?', '#']).next()?;
    let host = host.rsplit('@').next()?;
    let host = host.split(':').next()?;
    if host.is_empty() {
        None
    } else {
        Some(host.to_lowercase())
    }
}

/// DuckDuckGo 结果链接是跳转地址 `//duckduckgo.com/l/?uddg=<encoded>`，还原真实 URL
fn unwrap_redirect(href: &str) -> String {
    let href = decode_entities(href);
    if let Some(idx) = href.find("uddg=") {
        let encoded = href[idx + 5..].split('&').next().unwrap_or("");
        if let Ok(parsed) = reqwest::Url::parse(&format!("http://x/?u={encoded}")) {
            if let Some((_, v)) = parsed.query_pairs().next() {
                return v.into_owned();
            }
        }
    }
    if href.starts_with("//") {
        format!("https:{href}")
    } else {
        href
    }
}

/// 搜索结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// 从 DuckDuckGo HTML 结果页抽取结果
pub fn parse_search_results(html: &str, max_results: usize) -> Vec<SearchHit> {
    let full = Regex::new(
        r#"(?is)<a[^>]*class="result__a"[^>]*href="([^"]*)"[^>]*>(.*?)</a>.*?<a[^>]*class="result__snippet"[^>]*>(.*?)</a>"#,
    );
    let mut hits = Vec::new();
    if let Ok(re) = &full {
        for cap in re.captures_iter(html).take(max_results) {
            hits.push(SearchHit {
                url: unwrap_redirect(&cap[1]),
                title: decode_entities(&strip_html_tags(&cap[2])),
                snippet: decode_entities(&strip_html_tags(&cap[3])),
            });
        }
    }
    if hits.is_empty() {
        // 回退：只有标题链接
        if let Ok(re) = Regex::new(r#"(?is)<a[^>]*class="result__a"[^>]*href="([^"]*)"[^>]*>(.*?)</a>"#) {
            for cap in re.captures_iter(html).take(max_results) {
                hits.push(SearchHit {
                    url: unwrap_redirect(&cap[1]),
                    title: decode_entities(&strip_html_tags(&cap[2])),
                    snippet: String::new(),
                });
            }
        }
    }
    hits
}

fn default_max_results() -> usize {
    5
}

#[derive(Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
struct WebSearchArgs {
    /// Search query
    query: String,
    /// Maximum number of results (default 5)
    #[serde(default = "default_max_results")]
    #[schemars(range(min = 1, max = 20))]
    max_results: usize,
}

/// web_search 工具
pub struct WebSearchTool {
    client: Client,
}

impl WebSearchTool {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            client: build_client(timeout_secs),
        }
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web with DuckDuckGo. Returns titles, URLs and snippets."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<WebSearchArgs>()
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let args: WebSearchArgs = parse_args(args)?;
        tracing::info!(query = %args.query, "web_search");
        let resp = self
            .client
            .get(SEARCH_ENDPOINT)
            .query(&[("q", args.query.as_str())])
            .send()
            .await
            .map_err(|e| ToolError::execution(format!("Search request failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(ToolError::execution(format!("Search failed: HTTP {}", resp.status())));
        }
        let html = resp
            .text()
            .await
            .map_err(|e| ToolError::execution(format!("Read body: {e}")))?;
        let hits = parse_search_results(&html, args.max_results);
        let results: Vec<Value> = hits
            .iter()
            .map(|h| json!({ "title": h.title, "url": h.url, "snippet": h.snippet }))
            .collect();
        Ok(json!({
            "query": args.query,
            "count": results.len(),
            "results": results,
        }))
    }
}

#[derive(Deserialize, JsonSchema)]
struct FetchArgs {
    /// http(s) URL to fetch
    url: String,
}

/// fetch_webpage 工具：抓取 URL 内容，可选域名白名单；超时与最大字符数由配置决定
pub struct FetchWebpageTool {
    client: Client,
    allowed_domains: HashSet<String>,
    max_result_chars: usize,
}

impl FetchWebpageTool {
    pub fn new(allowed_domains: Vec<String>, timeout_secs: u64, max_result_chars: usize) -> Self {
        let allowed_domains = allowed_domains
            .into_iter()
            .map(|s| s.to_lowercase())
            .collect();
        Self {
            client: build_client(timeout_secs),
            allowed_domains,
            max_result_chars,
        }
    }

    fn check_url(&self, url: &str) -> Result<(), ToolError> {
        let domain = extract_domain(url)
            .ok_or_else(|| ToolError::validation("url", "must be an absolute http(s) URL"))?;
        if self.allowed_domains.is_empty() || self.allowed_domains.contains(&domain) {
            return Ok(());
        }
        Err(ToolError::execution(format!("Domain not in allowlist: {domain}")))
    }

    /// 将 HTML 转为可读文本（去除 script/style 等）
    fn html_to_text(&self, html: &str) -> String {
        match from_read(html.as_bytes(), 120) {
            Ok(text) if !text.trim().is_empty() => text,
            _ => strip_html_tags(html),
        }
    }
}

#[async_trait]
impl Tool for FetchWebpageTool {
    fn name(&self) -> &str {
        "fetch_webpage"
    }

    fn description(&self) -> &str {
        "Fetch a web page and return its readable text content (long pages are truncated)."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<FetchArgs>()
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let args: FetchArgs = parse_args(args)?;
        let url = args.url.trim();
        self.check_url(url)?;
        tracing::info!(url = %url, "fetch_webpage");

        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ToolError::execution(format!("Request failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(ToolError::execution(format!("HTTP {}", resp.status())));
        }
        let body = resp
            .text()
            .await
            .map_err(|e| ToolError::execution(format!("Read body: {e}")))?;
        let body = body.trim_start_matches('\u{FEFF}');
        let text = if looks_like_html(body) {
            self.html_to_text(body)
        } else {
            body.to_string()
        };

        let length = text.chars().count();
        let truncated = length > self.max_result_chars;
        let content = if truncated {
            text.chars().take(self.max_result_chars).collect::<String>() + "\n...[truncated]"
        } else {
            text
        };
        Ok(json!({
            "url": url,
            "content": content,
            "length": length,
            "truncated": truncated,
        }))
    }
}

fn default_timezone() -> String {
    "UTC".to_string()
}

#[derive(Deserialize, JsonSchema)]
struct DateTimeArgs {
    /// "UTC" (default), "local", or a fixed offset such as "+08:00"
    #[serde(default = "default_timezone")]
    timezone: String,
}

/// 当前时间：(iso, 可读格式)
pub fn now_in(timezone: &str) -> Result<(String, String), String> {
    const HUMAN: &str = "%A, %B %-d, %Y %H:%M:%S %Z";
    let tz = timezone.trim();
    if tz.is_empty() || tz.eq_ignore_ascii_case("utc") || tz.eq_ignore_ascii_case("z") {
        let now = Utc::now();
        return Ok((now.to_rfc3339(), now.format(HUMAN).to_string()));
    }
    if tz.eq_ignore_ascii_case("local") {
        let now = Local::now();
        return Ok((now.to_rfc3339(), now.format(HUMAN).to_string()));
    }
    let offset = parse_offset(tz)
        .ok_or_else(|| format!("Unsupported timezone '{tz}'; use UTC, local or an offset like +05:30"))?;
    let now = Utc::now().with_timezone(&offset);
    Ok((now.to_rfc3339(), now.format(HUMAN).to_string()))
}

fn parse_offset(s: &str) -> Option<FixedOffset> {
    let s = s.strip_prefix("UTC").or_else(|| s.strip_prefix("GMT")).unwrap_or(s);
    let (sign, rest) = match s.chars().next()? {
        '+' => (1, &s[1..]),
        '-' => (-1, &s[1..]),
        _ => return None,
    };
    let (h, m) = match rest.split_once(':') {
        Some((h, m)) => (h.parse::<i32>().ok()?, m.parse::<i32>().ok()?),
        None => (rest.parse::<i32>().ok()?, 0),
    };
    if h > 14 || m >= 60 {
        return None;
    }
    FixedOffset::east_opt(sign * (h * 3600 + m * 60))
}

/// get_datetime 工具
pub struct DateTimeTool;

#[async_trait]
impl Tool for DateTimeTool {
    fn name(&self) -> &str {
        "get_datetime"
    }

    fn description(&self) -> &str {
        "Get the current date and time in UTC, local time, or a fixed UTC offset."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<DateTimeArgs>()
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let args: DateTimeArgs = parse_args(args)?;
        let (iso, formatted) = now_in(&args.timezone).map_err(ToolError::execution)?;
        Ok(json!({
            "iso": iso,
            "formatted": formatted,
            "timezone": args.timezone,
            "timestamp": Utc::now().timestamp_millis(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
<div class="result">
  <a rel="nofollow" class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fwww.rust-lang.org%2F&amp;rut=abc">The <b>Rust</b> Programming Language</a>
  <a class="result__snippet" href="x">A language empowering everyone &amp; fast.</a>
</div>
<div class="result">
  <a rel="nofollow" class="result__a" href="https://doc.rust-lang.org/book/">The Book</a>
  <a class="result__snippet" href="y">Learn Rust.</a>
</div>"#;

    #[test]
    fn parses_duckduckgo_results() {
        let hits = parse_search_results(SAMPLE, 5);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].url, "https://www.rust-lang.org/");
        assert_eq!(hits[0].title, "The Rust Programming Language");
        assert_eq!(hits[0].snippet, "A language empowering everyone & fast.");
        assert_eq!(hits[1].url, "https://doc.rust-lang.org/book/");
    }

    #[test]
    fn respects_max_results() {
        assert_eq!(parse_search_results(SAMPLE, 1).len(), 1);
    }

    #[test]
    fn domain_extraction() {
        assert_eq!(extract_domain("https://Docs.rs:443/foo"), Some("docs.rs".into()));
        assert_eq!(extract_domain("http://example.com?q=1"), Some("example.com".into()));
        assert_eq!(extract_domain("ftp://example.com"), None);
    }

    #[test]
    fn allowlist_applies_only_when_configured() {
        let open = FetchWebpageTool::new(vec![], 5, 100);
        assert!(open.check_url("https://anything.example/").is_ok());
        let closed = FetchWebpageTool::new(vec!["docs.rs".into()], 5, 100);
        assert!(closed.check_url("https://docs.rs/tokio").is_ok());
        assert!(closed.check_url("https://evil.example/").is_err());
        assert!(matches!(
            closed.check_url("not a url"),
            Err(ToolError::Validation { .. })
        ));
    }

    #[test]
    fn timezone_offsets() {
        assert!(now_in("UTC").unwrap().0.ends_with("+00:00"));
        assert!(now_in("+08:00").unwrap().0.ends_with("+08:00"));
        assert!(now_in("UTC-05:30").unwrap().0.ends_with("-05:30"));
        assert!(now_in("Mars/Olympus").is_err());
    }

    #[test]
    fn strips_tags() {
        assert_eq!(strip_html_tags("<p>a<b>b</b></p>  c"), "a b c");
    }
}
