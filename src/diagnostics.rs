use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use headless_chrome::protocol::cdp::Page::{CaptureScreenshotFormatOption, Viewport};
use serde::Deserialize;
use tracing::{info, warn};

use crate::hands::BrowserSession;
use crate::locator::ResolvedElement;

/// Files written when every input strategy failed. Purely for post-hoc
/// debugging; nothing reads them back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailureArtifacts {
    pub screenshot: Option<PathBuf>,
    pub markup: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct Diagnostics {
    dir: PathBuf,
}

#[derive(Deserialize)]
struct PageSize {
    width: f64,
    height: f64,
}

impl Diagnostics {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Full-page screenshot plus the element's outerHTML. Every failure here
    /// is logged and swallowed.
    pub fn capture_input_failure(
        &self,
        session: &BrowserSession,
        element: &ResolvedElement,
    ) -> FailureArtifacts {
        let mut artifacts = FailureArtifacts::default();
        if let Err(e) = std::fs::create_dir_all(&self.dir) {
            warn!("Diagnostic dir {} unavailable: {e}", self.dir.display());
            return artifacts;
        }

        let stem = artifact_stem("input_fail", Utc::now(), rand::random::<u32>());

        let png_path = self.dir.join(format!("{stem}.png"));
        match screenshot(session) {
            Ok(png) => match std::fs::write(&png_path, png) {
                Ok(()) => {
                    info!("Saved screenshot: {}", png_path.display());
                    artifacts.screenshot = Some(png_path);
                }
                Err(e) => warn!("Writing screenshot failed: {e}"),
            },
            Err(e) => warn!("Screenshot failed: {e:#}"),
        }

        let html_path = self.dir.join(format!("{stem}.html"));
        let script = format!(
            "(function(){{ var el = {}; return el ? el.outerHTML : ''; }})()",
            element.expr()
        );
        match session.eval(&script) {
            Ok(value) => {
                let html = value.as_str().unwrap_or_default();
                match std::fs::write(&html_path, html) {
                    Ok(()) => {
                        info!("Saved element HTML: {}", html_path.display());
                        artifacts.markup = Some(html_path);
                    }
                    Err(e) => warn!("Writing element HTML failed: {e}"),
                }
            }
            Err(e) => warn!("Dumping element HTML failed: {e}"),
        }

        artifacts
    }
}

fn screenshot(session: &BrowserSession) -> anyhow::Result<Vec<u8>> {
    let size: Option<PageSize> = session
        .eval_json(
            "JSON.stringify({ width: document.documentElement.scrollWidth, \
             height: document.documentElement.scrollHeight })",
        )
        .ok();
    let clip = size.map(|s| Viewport {
        x: 0.0,
        y: 0.0,
        width: s.width.max(1.0),
        height: s.height.max(1.0),
        scale: 1.0,
    });
    session
        .tab()
        .capture_screenshot(CaptureScreenshotFormatOption::Png, None, clip, true)
}

/// `<prefix>_<yyyyMMdd_HHmmss>_<8 hex>`.
pub fn artifact_stem(prefix: &str, now: DateTime<Utc>, suffix: u32) -> String {
    format!("{prefix}_{}_{suffix:08x}", now.format("%Y%m%d_%H%M%S"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn stem_uses_utc_timestamp_and_hex_suffix() {
        let now = Utc.with_ymd_and_hms(2026, 3, 7, 9, 5, 1).unwrap();
        assert_eq!(
            artifact_stem("input_fail", now, 0xbeef),
            "input_fail_20260307_090501_0000beef"
        );
    }

    #[test]
    fn diagnostics_keeps_its_dir() {
        let diag = Diagnostics::new("ToolOutput");
        assert_eq!(diag.dir(), Path::new("ToolOutput"));
    }
}
