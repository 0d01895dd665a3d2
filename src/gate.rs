//! Block and CAPTCHA detection.
//!
//! Scholar answers automated-looking traffic either with an "unusual traffic"
//! interstitial or with a CAPTCHA. Neither can be handled unattended, so the
//! gate classifies the page and the crawl hands control to a human.
//!
//! Only what a reader would see counts: script and style text is ignored, and
//! so is the text of result rows, since a citing work may well be *about*
//! CAPTCHAs or unusual traffic.

use crate::browser::PageDriver;
use crate::config::GateMarkers;
use crate::error::{CrawlError, Result};
use scraper::{ElementRef, Html, Selector};
use std::fmt;
use tracing::warn;

/// Result rows of profile and cited-by pages
const RESULT_ROWS: &str = ".gs_ri, .gs_r, .gsc_a_tr";

/// Classification of the current page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    /// Normal content
    Clear,
    /// "Unusual traffic" style interstitial
    SoftBlock,
    /// Interactive challenge (CAPTCHA)
    HardBlock,
}

impl GateState {
    pub fn is_blocked(self) -> bool {
        !matches!(self, Self::Clear)
    }
}

impl fmt::Display for GateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Clear => write!(f, "clear"),
            Self::SoftBlock => write!(f, "unusual traffic check"),
            Self::HardBlock => write!(f, "CAPTCHA"),
        }
    }
}

/// Looks for challenge forms and block phrases in a page.
#[derive(Debug, Clone)]
pub struct AntiBotGate {
    challenge: Vec<Selector>,
    hard: Vec<String>,
    soft: Vec<String>,
    result_rows: Selector,
}

impl AntiBotGate {
    pub fn new(markers: &GateMarkers) -> Result<Self> {
        let lower = |v: &[String]| {
            v.iter()
                .map(|m| m.to_lowercase())
                .filter(|m| !m.is_empty())
                .collect()
        };
        let challenge = markers
            .challenge
            .iter()
            .map(|css| {
                Selector::parse(css)
                    .map_err(|e| CrawlError::Config(format!("gate.challenge '{}': {}", css, e)))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            challenge,
            hard: lower(&markers.hard),
            soft: lower(&markers.soft),
            result_rows: Selector::parse(RESULT_ROWS).map_err(|e| CrawlError::Parse(e.to_string()))?,
        })
    }

    /// Classify raw page content. Challenge forms win, then hard phrases.
    pub fn classify(&self, content: &str) -> GateState {
        let document = Html::parse_document(content);
        if self.challenge.iter().any(|sel| document.select(sel).next().is_some()) {
            return GateState::HardBlock;
        }

        let text = self.visible_text(&document);
        if self.hard.iter().any(|m| text.contains(m.as_str())) {
            GateState::HardBlock
        } else if self.soft.iter().any(|m| text.contains(m.as_str())) {
            GateState::SoftBlock
        } else {
            GateState::Clear
        }
    }

    /// Lowercased text outside scripts, styles and result rows
    fn visible_text(&self, document: &Html) -> String {
        let mut text = String::new();
        for node in document.root_element().descendants() {
            let Some(fragment) = node.value().as_text() else {
                continue;
            };
            if node
                .ancestors()
                .filter_map(ElementRef::wrap)
                .any(|el| self.is_skipped(el))
            {
                continue;
            }
            text.push_str(fragment);
            text.push(' ');
        }
        text.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
    }

    fn is_skipped(&self, element: ElementRef<'_>) -> bool {
        matches!(element.value().name(), "script" | "style" | "noscript" | "template")
            || self.result_rows.matches(&element)
    }

    /// Classify the page currently loaded in `page`.
    pub fn check(&self, page: &mut dyn PageDriver) -> Result<GateState> {
        let state = self.classify(&page.content()?);
        if state.is_blocked() {
            warn!(state = %state, url = %page.current_url(), "Block page detected");
        }
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::fake::FakePage;

    fn gate() -> AntiBotGate {
        AntiBotGate::new(&GateMarkers::default()).expect("default markers")
    }

    #[test]
    fn test_classify() {
        let gate = gate();
        assert_eq!(gate.classify("<div class='gs_ri'>A paper</div>"), GateState::Clear);
        assert_eq!(
            gate.classify("<p>Our systems have detected UNUSUAL TRAFFIC from your computer network.</p>"),
            GateState::SoftBlock
        );
        assert_eq!(
            gate.classify("<form id='gs_captcha_f'>Please show you're not a robot</form>"),
            GateState::HardBlock
        );
        assert_eq!(
            gate.classify("<p>To continue, please type the characters below after solving the above CAPTCHA.</p>"),
            GateState::HardBlock
        );
    }

    #[test]
    fn test_result_rows_and_scripts_are_not_markers() {
        let gate = gate();
        let page = r##"<html><head>
              <script>var gs_captcha_cb = "solving the above captcha";</script>
              <style>.unusual-traffic { display: none }</style></head>
            <body><div class="gs_r"><div class="gs_ri">
              <h3 class="gs_rt"><a href="#">CAPTCHA: Using Hard AI Problems for Security</a></h3>
              <div class="gs_a">L von Ahn - Eurocrypt - 2003</div></div></div>
            <div class="gs_r"><div class="gs_ri">
              <h3 class="gs_rt">Detecting unusual traffic and automated queries in campus networks</h3></div></div>
            </body></html>"##;
        assert_eq!(gate.classify(page), GateState::Clear);
    }

    #[test]
    fn test_custom_markers() -> Result<()> {
        let gate = AntiBotGate::new(&GateMarkers {
            challenge: vec![],
            hard: vec![],
            soft: vec!["Slow Down".to_string(), String::new()],
        })?;
        assert_eq!(gate.classify("<p>please slow down</p>"), GateState::SoftBlock);
        assert_eq!(gate.classify("<form id='gs_captcha_f'>captcha</form>"), GateState::Clear);

        let bad = AntiBotGate::new(&GateMarkers {
            challenge: vec!["form[[[".to_string()],
            ..GateMarkers::default()
        });
        assert!(bad.is_err());
        Ok(())
    }

    #[test]
    fn test_check_reads_current_page() -> Result<()> {
        let url = "https://scholar.google.com/scholar?cites=1";
        let mut page = FakePage::new().with_page(url, "<p>unusual traffic</p>");
        page.goto(url)?;

        let gate = gate();
        assert_eq!(gate.check(&mut page)?, GateState::SoftBlock);

        page.set_page(url, "<div class='gs_ri'></div>");
        assert_eq!(gate.check(&mut page)?, GateState::Clear);
        Ok(())
    }
}
