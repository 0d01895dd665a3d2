//! Browser session management.
//!
//! [`BrowserSession`] owns the one Chrome-family process a crawl drives. It
//! launches non-headless with a desktop user agent and the automation flags
//! stripped, since headless sessions get challenged far more often. Crawlers
//! only see the [`PageDriver`] trait, which keeps them runnable against a
//! scripted page in tests.

use crate::config::{BrowserOptions, DelayRange};
use crate::error::{BrowserResultExt, CrawlError, Result};
use headless_chrome::protocol::cdp::Page;
use headless_chrome::{Browser, LaunchOptions, Tab};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Hides the most common automation fingerprints from page scripts
const STEALTH_SCRIPT: &str = r#"
    Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
    window.chrome = window.chrome || { runtime: {} };
    Object.defineProperty(navigator, 'languages', { get: () => ['en-US', 'en'] });
"#;

/// Browser engines a session can be started with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Chrome,
    Chromium,
    Edge,
    /// Explicit path to a Chrome-compatible executable
    Custom(PathBuf),
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Chrome => write!(f, "chrome"),
            Self::Chromium => write!(f, "chromium"),
            Self::Edge => write!(f, "edge"),
            Self::Custom(path) => write!(f, "custom ({})", path.display()),
        }
    }
}

impl std::str::FromStr for EngineKind {
    type Err = CrawlError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "chrome" => Ok(Self::Chrome),
            "chromium" => Ok(Self::Chromium),
            "edge" => Ok(Self::Edge),
            other if other.contains(std::path::MAIN_SEPARATOR) => Ok(Self::Custom(PathBuf::from(s))),
            other => Err(CrawlError::Config(format!("unknown browser engine '{}'", other))),
        }
    }
}

impl EngineKind {
    fn binary_names(&self) -> &'static [&'static str] {
        match self {
            Self::Chrome => &["google-chrome", "google-chrome-stable", "chrome"],
            Self::Chromium => &["chromium", "chromium-browser"],
            Self::Edge => &["microsoft-edge", "microsoft-edge-stable", "msedge"],
            Self::Custom(_) => &[],
        }
    }

    fn install_paths(&self) -> &'static [&'static str] {
        match self {
            Self::Chrome => &[
                "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
                r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            ],
            Self::Chromium => &["/Applications/Chromium.app/Contents/MacOS/Chromium"],
            Self::Edge => &[
                "/Applications/Microsoft Edge.app/Contents/MacOS/Microsoft Edge",
                r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe",
            ],
            Self::Custom(_) => &[],
        }
    }

    /// Locate the engine's executable on this machine.
    pub fn executable(&self) -> Result<PathBuf> {
        if let Self::Custom(path) = self {
            return if path.exists() {
                Ok(path.clone())
            } else {
                Err(CrawlError::Browser(format!("{} does not exist", path.display())))
            };
        }

        self.binary_names()
            .iter()
            .find_map(|name| which::which(name).ok())
            .or_else(|| {
                self.install_paths()
                    .iter()
                    .map(PathBuf::from)
                    .find(|p| p.exists())
            })
            .ok_or_else(|| CrawlError::Browser(format!("{} executable not found", self)))
    }
}

/// Sleep for a random duration within `range`, returning how long was slept.
pub fn pause(range: DelayRange) -> Duration {
    let (min, max) = (range.min(), range.max());
    let delay = if max > min {
        rand::thread_rng().gen_range(min..=max)
    } else {
        min
    };
    if !delay.is_zero() {
        debug!(secs = delay.as_secs_f64(), "Pausing");
        std::thread::sleep(delay);
    }
    delay
}

/// Poll `condition` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, poll: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(poll.min(deadline.saturating_duration_since(Instant::now())));
    }
}

/// The operations a crawl performs on the live page.
///
/// Elements are addressed by CSS selector; actions apply to the first match.
pub trait PageDriver {
    /// Load a URL and wait for navigation to finish.
    fn goto(&mut self, url: &str) -> Result<()>;

    /// URL of the current document
    fn current_url(&self) -> String;

    /// Serialized DOM of the current document
    fn content(&mut self) -> Result<String>;

    /// Wait up to `timeout` for an element matching `css`.
    fn wait_for(&mut self, css: &str, timeout: Duration) -> bool;

    fn scroll_into_view(&mut self, css: &str) -> Result<()>;

    /// Native click; fails if another element intercepts it.
    fn click(&mut self, css: &str) -> Result<()>;

    /// `element.click()` dispatched from page script.
    fn script_click(&mut self, css: &str) -> Result<()>;

    /// Load a URL, then pause within `settle` so dynamic content can render.
    fn navigate(&mut self, url: &str, settle: DelayRange) -> Result<()> {
        self.goto(url)?;
        pause(settle);
        Ok(())
    }
}

/// One controllable browser instance, released on every exit path.
pub struct BrowserSession {
    engine: EngineKind,
    browser: Option<Browser>,
    tab: Option<Arc<Tab>>,
}

impl BrowserSession {
    /// Start the first engine in `engines` that launches.
    pub fn open(engines: &[EngineKind], options: &BrowserOptions) -> Result<Self> {
        let mut failures = Vec::new();

        for engine in engines {
            info!(engine = %engine, "Trying browser engine");
            match Self::launch(engine, options) {
                Ok(session) => {
                    info!(engine = %engine, headless = options.headless, "Browser started");
                    return Ok(session);
                }
                Err(e) => {
                    warn!(engine = %engine, error = %e, "Browser engine failed to start");
                    failures.push(format!("{} ({})", engine, e));
                }
            }
        }

        Err(CrawlError::NoBrowserAvailable(failures.join(", ")))
    }

    fn launch(engine: &EngineKind, options: &BrowserOptions) -> Result<Self> {
        let path = engine.executable()?;
        let ua_arg = format!("--user-agent={}", options.user_agent);

        let browser = Browser::new(LaunchOptions {
            headless: options.headless,
            window_size: Some(options.window_size),
            path: Some(path),
            idle_browser_timeout: Duration::from_secs(options.idle_timeout_secs),
            args: vec![
                OsStr::new("--disable-blink-features=AutomationControlled"),
                OsStr::new("--disable-extensions"),
                OsStr::new("--disable-infobars"),
                OsStr::new("--no-sandbox"),
                OsStr::new("--disable-dev-shm-usage"),
                OsStr::new(&ua_arg),
            ],
            ignore_default_args: vec![OsStr::new("--enable-automation")],
            ..Default::default()
        })
        .browser_ctx("launch")?;

        let tab = browser.new_tab().browser_ctx("open tab")?;
        tab.set_user_agent(&options.user_agent, Some("en-US,en"), None)
            .browser_ctx("set user agent")?;
        tab.call_method(Page::AddScriptToEvaluateOnNewDocument {
            source: STEALTH_SCRIPT.to_string(),
            world_name: None,
            include_command_line_api: None,
            run_immediately: None,
        })
        .browser_ctx("install stealth script")?;

        Ok(Self {
            engine: engine.clone(),
            browser: Some(browser),
            tab: Some(tab),
        })
    }

    /// Engine that ended up running
    pub fn engine(&self) -> &EngineKind {
        &self.engine
    }

    fn tab(&self) -> Result<&Arc<Tab>> {
        self.tab
            .as_ref()
            .ok_or_else(|| CrawlError::Browser("session is closed".to_string()))
    }

    /// Shut the browser down. Safe to call more than once.
    pub fn close(&mut self) {
        self.tab.take();
        if self.browser.take().is_some() {
            info!(engine = %self.engine, "Browser closed");
        }
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        self.close();
    }
}

impl PageDriver for BrowserSession {
    fn goto(&mut self, url: &str) -> Result<()> {
        debug!(url, "Navigating");
        let tab = self.tab()?;
        tab.navigate_to(url).browser_ctx("navigate")?;
        tab.wait_until_navigated().browser_ctx("wait for navigation")?;
        Ok(())
    }

    fn current_url(&self) -> String {
        self.tab().map(|tab| tab.get_url()).unwrap_or_default()
    }

    fn content(&mut self) -> Result<String> {
        self.tab()?.get_content().browser_ctx("read page content")
    }

    fn wait_for(&mut self, css: &str, timeout: Duration) -> bool {
        match self.tab() {
            Ok(tab) => tab.wait_for_element_with_custom_timeout(css, timeout).is_ok(),
            Err(_) => false,
        }
    }

    fn scroll_into_view(&mut self, css: &str) -> Result<()> {
        let tab = self.tab()?;
        let element = tab.find_element(css).browser_ctx(css)?;
        element.scroll_into_view().browser_ctx("scroll into view")?;
        Ok(())
    }

    fn click(&mut self, css: &str) -> Result<()> {
        let tab = self.tab()?;
        let element = tab.find_element(css).browser_ctx(css)?;
        element.click().browser_ctx("click")?;
        Ok(())
    }

    fn script_click(&mut self, css: &str) -> Result<()> {
        let selector = serde_json::to_string(css)?;
        let script = format!(
            "(() => {{ const el = document.querySelector({}); if (!el) return false; el.click(); return true; }})()",
            selector
        );
        let result = self.tab()?.evaluate(&script, false).browser_ctx("script click")?;
        match result.value {
            Some(serde_json::Value::Bool(true)) => Ok(()),
            _ => Err(CrawlError::Browser(format!("no element matches {}", css))),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_parse() -> Result<()> {
        assert_eq!("Chrome".parse::<EngineKind>()?, EngineKind::Chrome);
        assert_eq!("edge".parse::<EngineKind>()?, EngineKind::Edge);
        assert!("netscape".parse::<EngineKind>().is_err());
        Ok(())
    }

    #[test]
    fn test_missing_custom_engine_is_reported() {
        let engine = EngineKind::Custom(PathBuf::from("/nonexistent/browser/bin"));
        assert!(engine.executable().is_err());
    }

    #[test]
    fn test_open_with_no_launchable_engine() {
        let engines = [
            EngineKind::Custom(PathBuf::from("/nonexistent/a")),
            EngineKind::Custom(PathBuf::from("/nonexistent/b")),
        ];
        match BrowserSession::open(&engines, &BrowserOptions::default()) {
            Err(CrawlError::NoBrowserAvailable(tried)) => {
                assert!(tried.contains("/nonexistent/a"));
                assert!(tried.contains("/nonexistent/b"));
            }
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("no engine should have started"),
        }
    }

    #[test]
    fn test_pause_stays_in_range() {
        assert_eq!(pause(DelayRange::ZERO), Duration::ZERO);
        let slept = pause(DelayRange::new(0.001, 0.003));
        assert!(slept >= Duration::from_millis(1) && slept <= Duration::from_millis(3));
    }

    #[test]
    fn test_wait_until_is_bounded() {
        let start = Instant::now();
        assert!(!wait_until(Duration::from_millis(30), Duration::from_millis(5), || false));
        assert!(start.elapsed() < Duration::from_secs(1));

        let mut polls = 0;
        assert!(wait_until(Duration::from_secs(1), Duration::ZERO, || {
            polls += 1;
            polls == 3
        }));
    }
}
