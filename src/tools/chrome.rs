//! Headless Chrome 实现的 BrowserPage（feature = "browser"）
//!
//! headless_chrome 为同步 API，所有页面操作经 spawn_blocking 执行。
//! ChromePage 被 drop 时 Browser 随之释放，Chrome 进程退出。

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use headless_chrome::protocol::cdp::Page::{CaptureScreenshotFormatOption, Viewport};
use headless_chrome::{Browser, Tab};

use crate::tools::browser::{BrowserLauncher, BrowserPage, Link, PageInfo, ScrollDirection};

#[derive(Debug, Default, Clone)]
pub struct ChromeLauncher;

#[async_trait]
impl BrowserLauncher for ChromeLauncher {
    async fn launch(&self) -> Result<Box<dyn BrowserPage>, String> {
        let (browser, tab) = tokio::task::spawn_blocking(|| {
            let browser = Browser::default()
                .map_err(|e| format!("Chrome launch failed: {e}. Install Chrome/Chromium."))?;
            let tab = browser
                .new_tab()
                .map_err(|e| format!("Browser tab failed: {e}"))?;
            Ok::<_, String>((browser, tab))
        })
        .await
        .map_err(|e| format!("Task join: {e}"))??;
        Ok(Box::new(ChromePage { _browser: browser, tab }))
    }
}

pub struct ChromePage {
    _browser: Browser,
    tab: Arc<Tab>,
}

impl ChromePage {
    async fn blocking<T, F>(&self, f: F) -> Result<T, String>
    where
        T: Send + 'static,
        F: FnOnce(Arc<Tab>) -> Result<T, String> + Send + 'static,
    {
        let tab = self.tab.clone();
        tokio::task::spawn_blocking(move || f(tab))
            .await
            .map_err(|e| format!("Task join: {e}"))?
    }
}

fn page_info(tab: &Tab) -> Result<PageInfo, String> {
    let title = tab.get_title().map_err(|e| format!("Get title failed: {e}"))?;
    Ok(PageInfo { url: tab.get_url(), title })
}

/// 在页面中执行脚本并取回 JSON 值
fn eval_json(tab: &Tab, js: &str) -> Result<serde_json::Value, String> {
    let obj = tab
        .evaluate(js, false)
        .map_err(|e| format!("Script failed: {e}"))?;
    Ok(obj.value.unwrap_or(serde_json::Value::Null))
}

#[async_trait]
impl BrowserPage for ChromePage {
    async fn navigate(&self, url: &str) -> Result<PageInfo, String> {
        let url = url.to_string();
        self.blocking(move |tab| {
            tab.navigate_to(&url)
                .map_err(|e| format!("Navigate failed: {e}"))?;
            tab.wait_until_navigated()
                .map_err(|e| format!("Page load failed: {e}"))?;
            page_info(&tab)
        })
        .await
    }

    async fn content(&self, selector: Option<&str>) -> Result<String, String> {
        let selector = selector.map(str::to_string);
        self.blocking(move |tab| match selector {
            Some(sel) => tab
                .wait_for_element(&sel)
                .map_err(|e| format!("Element not found: {sel} ({e})"))?
                .get_inner_text()
                .map_err(|e| format!("Get text failed: {e}")),
            None => {
                let html = tab
                    .get_content()
                    .map_err(|e| format!("Get content failed: {e}"))?;
                Ok(html2text::from_read(html.as_bytes(), 120).unwrap_or(html))
            }
        })
        .await
    }

    async fn links(&self) -> Result<Vec<Link>, String> {
        self.blocking(|tab| {
            let value = eval_json(
                &tab,
                "JSON.stringify(Array.from(document.querySelectorAll('a[href]')).map(a => ({ text: (a.innerText || '').trim(), href: a.href })))",
            )?;
            let raw = value.as_str().unwrap_or("[]");
            serde_json::from_str::<Vec<Link>>(raw).map_err(|e| format!("Parse links failed: {e}"))
        })
        .await
    }

    async fn click(&self, selector: &str) -> Result<(), String> {
        let selector = selector.to_string();
        self.blocking(move |tab| {
            tab.wait_for_element(&selector)
                .map_err(|e| format!("Element not found: {selector} ({e})"))?
                .click()
                .map_err(|e| format!("Click failed: {e}"))?;
            Ok(())
        })
        .await
    }

    async fn type_text(&self, selector: &str, text: &str, clear: bool) -> Result<(), String> {
        let selector = selector.to_string();
        let text = text.to_string();
        self.blocking(move |tab| {
            let el = tab
                .wait_for_element(&selector)
                .map_err(|e| format!("Element not found: {selector} ({e})"))?;
            if clear {
                el.call_js_fn("function() { this.value = ''; }", vec![], false)
                    .map_err(|e| format!("Clear failed: {e}"))?;
            }
            el.click().map_err(|e| format!("Focus failed: {e}"))?;
            el.type_into(&text).map_err(|e| format!("Type failed: {e}"))?;
            Ok(())
        })
        .await
    }

    async fn scroll(&self, direction: ScrollDirection, amount: i64) -> Result<(), String> {
        let dy = match direction {
            ScrollDirection::Down => amount,
            ScrollDirection::Up => -amount,
        };
        self.blocking(move |tab| {
            eval_json(&tab, &format!("window.scrollBy(0, {dy})"))?;
            Ok(())
        })
        .await
    }

    async fn go_back(&self) -> Result<PageInfo, String> {
        self.blocking(|tab| {
            eval_json(&tab, "history.back()")?;
            std::thread::sleep(Duration::from_millis(300));
            tab.wait_until_navigated()
                .map_err(|e| format!("Page load failed: {e}"))?;
            page_info(&tab)
        })
        .await
    }

    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<(), String> {
        let selector = selector.to_string();
        self.blocking(move |tab| {
            tab.wait_for_element_with_custom_timeout(&selector, timeout)
                .map_err(|_| format!("Timed out after {}ms waiting for {selector}", timeout.as_millis()))?;
            Ok(())
        })
        .await
    }

    async fn screenshot(&self, path: &Path, full_page: bool) -> Result<(), String> {
        let path: PathBuf = path.to_path_buf();
        self.blocking(move |tab| {
            let clip = if full_page {
                let size = eval_json(
                    &tab,
                    "JSON.stringify([document.documentElement.scrollWidth, document.documentElement.scrollHeight])",
                )?;
                let dims: Vec<f64> = serde_json::from_str(size.as_str().unwrap_or("[]"))
                    .map_err(|e| format!("Page size: {e}"))?;
                match dims.as_slice() {
                    [w, h] => Some(Viewport { x: 0.0, y: 0.0, width: *w, height: *h, scale: 1.0 }),
                    _ => None,
                }
            } else {
                None
            };
            let png = tab
                .capture_screenshot(CaptureScreenshotFormatOption::Png, None, clip, true)
                .map_err(|e| format!("Screenshot failed: {e}"))?;
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| format!("Create dir: {e}"))?;
            }
            std::fs::write(&path, png).map_err(|e| format!("Write screenshot: {e}"))
        })
        .await
    }

    async fn close(&self) -> Result<(), String> {
        self.blocking(|tab| {
            tab.close(true).map_err(|e| format!("Close failed: {e}"))?;
            Ok(())
        })
        .await
    }
}
