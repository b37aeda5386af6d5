use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use headless_chrome::protocol::cdp::Page;
use headless_chrome::util::Wait;
use headless_chrome::{Browser, LaunchOptions, Tab};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::errors::{BrowserError, BrowserResult};
use crate::types::{READY_POLL, READY_WAIT};

/// Attribute the locator stamps on resolved elements so later calls can
/// address them without holding a driver handle.
pub const REF_ATTR: &str = "data-agent-ref";

/// Which document inside the active tab scripts run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameContext {
    #[default]
    Main,
    /// Index into the main document's `iframe` list.
    Frame(usize),
}

impl FrameContext {
    /// JS expression for the document of this context. For frames it is
    /// `null` when the frame is cross-origin or not loaded.
    pub fn document_expr(&self) -> String {
        match self {
            FrameContext::Main => "document".to_string(),
            FrameContext::Frame(i) => format!(
                "(function(){{ try {{ var f = document.querySelectorAll('iframe')[{i}]; \
                 return f ? f.contentDocument : null; }} catch (e) {{ return null; }} }})()"
            ),
        }
    }

    /// JS expression for the `{left, top}` offset of this context in the
    /// top-level viewport.
    pub fn offset_expr(&self) -> String {
        match self {
            FrameContext::Main => "({left: 0, top: 0})".to_string(),
            FrameContext::Frame(i) => format!(
                "(function(){{ var f = document.querySelectorAll('iframe')[{i}]; \
                 if (!f) return {{left: 0, top: 0}}; var r = f.getBoundingClientRect(); \
                 return {{left: r.left + f.clientLeft, top: r.top + f.clientTop}}; }})()"
            ),
        }
    }
}

/// Encode `s` as a JS string literal.
pub fn js_literal(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

/// Poll `check` until it yields a value or `timeout` passes. Timeouts are
/// "condition not met", never errors.
pub fn poll<T>(timeout: Duration, interval: Duration, check: impl FnMut() -> Option<T>) -> Option<T> {
    Wait::new(timeout, interval).until(check).ok()
}

/// How the browser gets started.
#[derive(Debug, Clone, Default)]
pub struct LaunchSettings {
    pub headless: bool,
    pub chrome_path: Option<PathBuf>,
    /// Resolved `ws://` debugger URL of an already running Chrome.
    pub debugger_ws_url: Option<String>,
    pub profile_dir: Option<PathBuf>,
}

/// The one browser the process drives. Holds the active tab and the frame
/// context every locator and engine call runs against.
pub struct BrowserSession {
    browser: Browser,
    tab: Arc<Tab>,
    frame: FrameContext,
    ref_seq: u64,
}

impl BrowserSession {
    pub fn launch(settings: &LaunchSettings) -> Result<Self> {
        // 1. Attach to a running Chrome when one was discovered
        if let Some(ws_url) = &settings.debugger_ws_url {
            info!("Attaching to existing Chrome at {ws_url}");
            match Browser::connect(ws_url.clone()) {
                Ok(browser) => {
                    let existing = {
                        let tabs = browser
                            .get_tabs()
                            .lock()
                            .map_err(|_| anyhow!("tab list lock poisoned"))?;
                        tabs.first().cloned()
                    };
                    let tab = match existing {
                        Some(tab) => {
                            debug!("Using existing tab");
                            tab
                        }
                        None => browser.new_tab()?,
                    };
                    return Ok(Self::from_parts(browser, tab));
                }
                Err(e) => warn!("Could not attach ({e:#}), launching a new Chrome"),
            }
        }

        // 2. Launch with a persistent agent profile so logins survive restarts
        let profile = match &settings.profile_dir {
            Some(dir) => Some(dir.clone()),
            None => dirs::cache_dir().map(|d| d.join("web-agent").join("profile")),
        };
        if let Some(dir) = &profile {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create profile dir {}", dir.display()))?;
        }

        let options = LaunchOptions {
            headless: settings.headless,
            path: settings.chrome_path.clone(),
            user_data_dir: profile,
            args: vec![
                OsStr::new("--no-first-run"),
                OsStr::new("--no-default-browser-check"),
                OsStr::new("--start-maximized"),
                OsStr::new("--disable-blink-features=AutomationControlled"),
                OsStr::new("--disable-infobars"),
                OsStr::new("--password-store=basic"),
            ],
            idle_browser_timeout: Duration::from_secs(600),
            ..Default::default()
        };

        info!(headless = settings.headless, "Starting Chrome");
        let browser = Browser::new(options).context("Browser launch failed")?;
        let tab = browser.new_tab()?;
        tab.navigate_to("about:blank")?;

        info!("Chrome ready");
        Ok(Self::from_parts(browser, tab))
    }

    fn from_parts(browser: Browser, tab: Arc<Tab>) -> Self {
        Self {
            browser,
            tab,
            frame: FrameContext::Main,
            ref_seq: 0,
        }
    }

    pub fn tab(&self) -> &Arc<Tab> {
        &self.tab
    }

    pub fn frame(&self) -> FrameContext {
        self.frame
    }

    /// Switch script evaluation into the `index`th iframe of the main document.
    pub fn enter_frame(&mut self, index: usize) {
        self.frame = FrameContext::Frame(index);
    }

    /// Return to the main document of the active tab.
    pub fn reset_frame(&mut self) {
        self.frame = FrameContext::Main;
    }

    /// Fresh token for [`REF_ATTR`].
    pub fn next_ref(&mut self) -> String {
        self.ref_seq += 1;
        format!("wa{}", self.ref_seq)
    }

    pub fn navigate(&self, url: &str) -> Result<()> {
        self.tab.navigate_to(url)?;
        self.tab.wait_until_navigated()?;
        Ok(())
    }

    pub fn title(&self) -> String {
        self.tab.get_title().unwrap_or_default()
    }

    /// Evaluate `script` in the top-level page and return its primitive value.
    pub fn eval(&self, script: &str) -> BrowserResult<Value> {
        let object = self.tab.evaluate(script, false)?;
        Ok(object.value.unwrap_or(Value::Null))
    }

    /// Evaluate a script that returns `JSON.stringify(...)` and decode it.
    pub fn eval_json<T: DeserializeOwned>(&self, script: &str) -> BrowserResult<T> {
        match self.eval(script)? {
            Value::String(text) => Ok(serde_json::from_str(&text)?),
            other => Err(BrowserError::Driver(anyhow!(
                "expected a JSON string from page script, got {other}"
            ))),
        }
    }

    /// Best-effort wait for `document.readyState == "complete"`.
    pub fn wait_ready(&self, timeout: Duration) -> bool {
        let ready = poll(timeout, READY_POLL, || {
            match self.eval("document.readyState") {
                Ok(Value::String(state)) if state == "complete" => Some(()),
                _ => None,
            }
        })
        .is_some();
        if !ready {
            debug!("Ready state not reached within {timeout:?}");
        }
        ready
    }

    /// Accept an open alert/confirm/prompt. Returns whether one was open.
    pub fn accept_alert(&self) -> bool {
        let accepted = self
            .tab
            .call_method(Page::HandleJavaScriptDialog {
                accept: true,
                prompt_text: None,
            })
            .is_ok();
        if accepted {
            info!("Alert accepted");
        }
        accepted
    }

    pub fn tabs(&self) -> BrowserResult<Vec<Arc<Tab>>> {
        let tabs = self
            .browser
            .get_tabs()
            .lock()
            .map_err(|_| anyhow!("tab list lock poisoned"))?;
        Ok(tabs.clone())
    }

    pub fn tab_ids(&self) -> BrowserResult<Vec<String>> {
        Ok(self
            .tabs()?
            .iter()
            .map(|t| t.get_target_id().to_string())
            .collect())
    }

    /// Make `tab` the active context. The frame context resets to its main document.
    pub fn switch_to(&mut self, tab: Arc<Tab>) {
        if let Err(e) = tab.activate() {
            debug!("Activating tab failed: {e:#}");
        }
        self.tab = tab;
        self.frame = FrameContext::Main;
    }

    /// Close the active tab and fall back to the most recently listed
    /// remaining one, or a fresh blank tab when none remain.
    pub fn close_active(&mut self) -> BrowserResult<()> {
        let closed_id = self.tab.get_target_id().to_string();
        self.tab.close(true)?;

        let remaining: Vec<Arc<Tab>> = self
            .tabs()?
            .into_iter()
            .filter(|t| *t.get_target_id() != closed_id)
            .collect();

        match remaining.last() {
            Some(tab) => {
                debug!("Switching to remaining tab {}", tab.get_target_id());
                self.switch_to(Arc::clone(tab));
            }
            None => {
                warn!("Closed the last tab, opening a blank one");
                let tab = self.browser.new_tab()?;
                self.switch_to(tab);
            }
        }
        Ok(())
    }

    /// Default ready wait used after navigation and context switches.
    pub fn settle(&self) -> bool {
        self.wait_ready(READY_WAIT)
    }
}

/// Ask a Chrome started with `--remote-debugging-port` for its browser
/// websocket URL. `None` when nothing answers.
pub async fn discover_debugger_url(client: &reqwest::Client, http_url: &str) -> Option<String> {
    let url = format!("{}/json/version", http_url.trim_end_matches('/'));
    let response = client
        .get(&url)
        .timeout(Duration::from_secs(2))
        .send()
        .await
        .ok()?;
    let body: Value = response.json().await.ok()?;
    body["webSocketDebuggerUrl"].as_str().map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn js_literal_escapes_quotes_and_newlines() {
        assert_eq!(js_literal("a'b\"c\nd"), r#""a'b\"c\nd""#);
        assert_eq!(js_literal("로그인"), "\"로그인\"");
    }

    #[test]
    fn frame_expressions() {
        assert_eq!(FrameContext::Main.document_expr(), "document");
        let frame = FrameContext::Frame(2).document_expr();
        assert!(frame.contains("querySelectorAll('iframe')[2]"));
        assert!(frame.contains("contentDocument"));
        assert!(FrameContext::Frame(0).offset_expr().contains("clientLeft"));
    }

    #[test]
    fn poll_reports_timeout_as_none() {
        let hit = poll(Duration::from_millis(50), Duration::from_millis(10), || None::<()>);
        assert!(hit.is_none());

        let mut n = 0;
        let hit = poll(Duration::from_secs(1), Duration::from_millis(1), || {
            n += 1;
            (n >= 3).then_some(n)
        });
        assert_eq!(hit, Some(3));
    }
}
