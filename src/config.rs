//! Crawl configuration.
//!
//! Every pause and bounded wait the crawlers perform is a named value here,
//! so callers can tune pacing or zero it out for deterministic runs.
//! Configuration is read from `~/.config/scholarcrawl/config.json` when
//! present; every field has a default.

use crate::browser::EngineKind;
use crate::error::{CrawlError, Result};
use scraper::Selector;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// User agent presented by the browser (a regular desktop Chrome)
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Default config file path: `<config dir>/scholarcrawl/config.json`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("scholarcrawl").join("config.json"))
}

fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or_default()
}

/// A randomized pause of `[min_secs, max_secs]` seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DelayRange {
    pub min_secs: f64,
    pub max_secs: f64,
}

impl DelayRange {
    /// No pause at all
    pub const ZERO: Self = Self::fixed(0.0);

    pub const fn new(min_secs: f64, max_secs: f64) -> Self {
        Self { min_secs, max_secs }
    }

    pub const fn fixed(secs: f64) -> Self {
        Self::new(secs, secs)
    }

    pub fn min(&self) -> Duration {
        secs(self.min_secs.min(self.max_secs))
    }

    pub fn max(&self) -> Duration {
        secs(self.min_secs.max(self.max_secs))
    }

    pub fn is_zero(&self) -> bool {
        self.max().is_zero()
    }
}

/// Human-like pacing between browser actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Pacing {
    /// After loading the profile page
    pub profile_settle: DelayRange,
    /// After loading a publication page
    pub paper_settle: DelayRange,
    /// Before following the "cited by" link
    pub before_results: DelayRange,
    /// After the first cited-by results page loads
    pub results_settle: DelayRange,
    /// Between result pages
    pub page_turn: DelayRange,
    /// After scrolling a "next" control into view
    pub scroll_settle: DelayRange,
    /// After scrolling the "load more" button into view
    pub expand_scroll: DelayRange,
    /// After a human signals that a block was cleared
    pub after_resume: DelayRange,
    /// Between retries of the same page
    pub retry_backoff: DelayRange,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            profile_settle: DelayRange::fixed(3.0),
            paper_settle: DelayRange::new(3.0, 5.0),
            before_results: DelayRange::new(2.0, 4.0),
            results_settle: DelayRange::new(4.0, 6.0),
            page_turn: DelayRange::new(2.0, 4.0),
            scroll_settle: DelayRange::new(1.0, 2.0),
            expand_scroll: DelayRange::fixed(0.5),
            after_resume: DelayRange::fixed(2.0),
            retry_backoff: DelayRange::fixed(2.0),
        }
    }
}

impl Pacing {
    /// Pacing with every pause set to zero
    pub fn instant() -> Self {
        Self {
            profile_settle: DelayRange::ZERO,
            paper_settle: DelayRange::ZERO,
            before_results: DelayRange::ZERO,
            results_settle: DelayRange::ZERO,
            page_turn: DelayRange::ZERO,
            scroll_settle: DelayRange::ZERO,
            expand_scroll: DelayRange::ZERO,
            after_resume: DelayRange::ZERO,
            retry_backoff: DelayRange::ZERO,
        }
    }
}

/// Upper bounds on "wait for element" checks, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub table_wait_secs: f64,
    pub results_wait_secs: f64,
    pub load_more_wait_secs: f64,
    pub rows_wait_secs: f64,
    /// How long a clicked "next" control may take to change the page
    pub page_change_wait_secs: f64,
    pub poll_interval_secs: f64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            table_wait_secs: 10.0,
            results_wait_secs: 10.0,
            load_more_wait_secs: 5.0,
            rows_wait_secs: 5.0,
            page_change_wait_secs: 5.0,
            poll_interval_secs: 0.25,
        }
    }
}

impl Timeouts {
    pub fn table_wait(&self) -> Duration {
        secs(self.table_wait_secs)
    }

    pub fn results_wait(&self) -> Duration {
        secs(self.results_wait_secs)
    }

    pub fn load_more_wait(&self) -> Duration {
        secs(self.load_more_wait_secs)
    }

    pub fn rows_wait(&self) -> Duration {
        secs(self.rows_wait_secs)
    }

    pub fn page_change_wait(&self) -> Duration {
        secs(self.page_change_wait_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        secs(self.poll_interval_secs)
    }
}

/// Browser launch options shared by every engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserOptions {
    pub user_agent: String,
    pub window_size: (u32, u32),
    /// Headless rendering is detected far more often; keep this off.
    pub headless: bool,
    /// How long the browser may sit idle (e.g. while a human solves a CAPTCHA)
    pub idle_timeout_secs: u64,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            window_size: (1920, 1080),
            headless: false,
            idle_timeout_secs: 3600,
        }
    }
}

/// What identifies a block page.
///
/// Phrases are matched case-insensitively against the visible page text,
/// outside of result rows. `challenge` selectors mark an interactive
/// challenge wherever they appear.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateMarkers {
    pub challenge: Vec<String>,
    pub hard: Vec<String>,
    pub soft: Vec<String>,
}

impl Default for GateMarkers {
    fn default() -> Self {
        Self {
            challenge: vec![
                "#gs_captcha_f".to_string(),
                "#captcha-form".to_string(),
                ".g-recaptcha".to_string(),
            ],
            hard: vec!["solving the above captcha".to_string()],
            soft: vec![
                "unusual traffic".to_string(),
                "not a robot".to_string(),
                "automated queries".to_string(),
            ],
        }
    }
}

/// Top-level crawl configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    /// Engines tried in order when opening a session
    pub engines: Vec<EngineKind>,
    pub browser: BrowserOptions,
    pub pacing: Pacing,
    pub timeouts: Timeouts,
    pub gate: GateMarkers,
    /// Retries of the current cited-by page before the crawl is abandoned
    pub max_page_retries: u32,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            engines: vec![EngineKind::Chrome, EngineKind::Chromium, EngineKind::Edge],
            browser: BrowserOptions::default(),
            pacing: Pacing::default(),
            timeouts: Timeouts::default(),
            gate: GateMarkers::default(),
            max_page_retries: 3,
        }
    }
}

impl CrawlConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| CrawlError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        info!(path = %path.display(), "Loaded crawl config");
        Ok(config)
    }

    /// Load from `path` if given, else from the default location if it exists,
    /// else fall back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::from_file(path);
        }

        match default_config_path() {
            Some(path) if path.exists() => Self::from_file(&path),
            _ => {
                debug!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.engines.is_empty() {
            return Err(CrawlError::Config("at least one browser engine is required".to_string()));
        }

        let p = &self.pacing;
        let ranges = [
            ("profile_settle", p.profile_settle),
            ("paper_settle", p.paper_settle),
            ("before_results", p.before_results),
            ("results_settle", p.results_settle),
            ("page_turn", p.page_turn),
            ("scroll_settle", p.scroll_settle),
            ("expand_scroll", p.expand_scroll),
            ("after_resume", p.after_resume),
            ("retry_backoff", p.retry_backoff),
        ];
        for (name, range) in ranges {
            if !(range.min_secs >= 0.0 && range.max_secs >= range.min_secs) {
                return Err(CrawlError::Config(format!(
                    "pacing.{} must satisfy 0 <= min_secs <= max_secs",
                    name
                )));
            }
        }

        let t = &self.timeouts;
        for (name, value) in [
            ("table_wait_secs", t.table_wait_secs),
            ("results_wait_secs", t.results_wait_secs),
            ("load_more_wait_secs", t.load_more_wait_secs),
            ("rows_wait_secs", t.rows_wait_secs),
            ("page_change_wait_secs", t.page_change_wait_secs),
            ("poll_interval_secs", t.poll_interval_secs),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(CrawlError::Config(format!("timeouts.{} must be >= 0", name)));
            }
        }

        for css in &self.gate.challenge {
            Selector::parse(css)
                .map_err(|e| CrawlError::Config(format!("gate.challenge '{}': {}", css, e)))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_are_valid() {
        assert!(CrawlConfig::default().validate().is_ok());
        assert!(!CrawlConfig::default().browser.headless);
    }

    #[test]
    fn test_partial_file_keeps_defaults() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        write!(
            file,
            r#"{{ "max_page_retries": 5, "pacing": {{ "page_turn": {{ "min_secs": 1.0, "max_secs": 1.5 }} }} }}"#
        )?;

        let config = CrawlConfig::from_file(file.path())?;
        assert_eq!(config.max_page_retries, 5);
        assert_eq!(config.pacing.page_turn, DelayRange::new(1.0, 1.5));
        assert_eq!(config.pacing.paper_settle, Pacing::default().paper_settle);
        assert_eq!(config.engines, CrawlConfig::default().engines);
        Ok(())
    }

    #[test]
    fn test_inverted_range_rejected() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        write!(file, r#"{{ "pacing": {{ "retry_backoff": {{ "min_secs": 3.0, "max_secs": 1.0 }} }} }}"#)?;
        let err = CrawlConfig::from_file(file.path()).expect_err("inverted range");
        assert_eq!(err.code(), "config_error");
        Ok(())
    }

    #[test]
    fn test_bad_challenge_selector_rejected() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        write!(file, r#"{{ "gate": {{ "challenge": ["form[[["] }} }}"#)?;
        let err = CrawlConfig::from_file(file.path()).expect_err("unparsable selector");
        assert_eq!(err.code(), "config_error");
        Ok(())
    }

    #[test]
    fn test_custom_engine_round_trips() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        write!(file, r#"{{ "engines": ["chromium", {{ "custom": "/opt/chrome/chrome" }}] }}"#)?;
        let config = CrawlConfig::from_file(file.path())?;
        assert_eq!(
            config.engines,
            vec![EngineKind::Chromium, EngineKind::Custom(PathBuf::from("/opt/chrome/chrome"))]
        );
        Ok(())
    }

    #[test]
    fn test_delay_range_ordering() {
        let range = DelayRange::new(4.0, 2.0);
        assert_eq!(range.min(), Duration::from_secs(2));
        assert_eq!(range.max(), Duration::from_secs(4));
        assert!(DelayRange::ZERO.is_zero());
    }
}
