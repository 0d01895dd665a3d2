//! Pagination controllers.
//!
//! Profile pages grow in place behind a "Show more" button; cited-by results
//! are split across pages linked by a "Next" control. Both sit behind
//! [`Paginator`] so the crawlers share one extract-then-advance loop.

use crate::browser::{pause, wait_until, PageDriver};
use crate::config::{Pacing, Timeouts};
use crate::error::{CrawlError, Result};
use crate::extract::{absolutize, selector};
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info};
use url::Url;

/// Profile page "Show more" button
pub const LOAD_MORE_BUTTON: &str = "#gsc_bpf_more";

/// Profile publication rows
pub const PROFILE_ROWS: &str = "tr.gsc_a_tr";

/// "Next" affordance on result pages
pub const NEXT_BUTTON: &str = "button[aria-label='Next']";

/// Offset links inside the result page navigator (stable id)
pub const NAVIGATOR_LINKS: &str = "#gs_nma a[href*='start=']";

/// Any link carrying a result offset
pub const OFFSET_LINKS: &str = "a[href*='start=']";

/// Advance through a paginated or incrementally loaded listing.
pub trait Paginator {
    /// Whether another page or batch is available.
    fn has_more(&mut self, page: &mut dyn PageDriver) -> Result<bool>;

    /// Move to the next page or batch.
    fn advance(&mut self, page: &mut dyn PageDriver) -> Result<()>;
}

/// Disabled either by attribute or by a class mentioning it
pub fn is_disabled(element: ElementRef<'_>) -> bool {
    let el = element.value();
    el.attr("disabled").is_some()
        || el.attr("aria-disabled") == Some("true")
        || el.classes().any(|c| c.contains("disabled"))
}

fn count_matches(page: &mut dyn PageDriver, sel: &Selector) -> Result<usize> {
    let html = page.content()?;
    Ok(Html::parse_document(&html).select(sel).count())
}

fn click_with_fallback(page: &mut dyn PageDriver, css: &str) -> Result<()> {
    if let Err(e) = page.click(css) {
        debug!(css, error = %e, "Direct click failed, dispatching script click");
        page.script_click(css)
            .map_err(|e| CrawlError::Pagination(format!("could not click {}: {}", css, e)))?;
    }
    Ok(())
}

/// Expands a profile's publication list by pressing "Show more" until it is
/// disabled or gone.
pub struct ButtonExpand {
    button_css: String,
    button: Selector,
    rows: Selector,
    pacing: Pacing,
    timeouts: Timeouts,
    exhausted: bool,
}

impl ButtonExpand {
    pub fn new(pacing: &Pacing, timeouts: &Timeouts) -> Result<Self> {
        Ok(Self {
            button_css: LOAD_MORE_BUTTON.to_string(),
            button: selector(LOAD_MORE_BUTTON)?,
            rows: selector(PROFILE_ROWS)?,
            pacing: pacing.clone(),
            timeouts: timeouts.clone(),
            exhausted: false,
        })
    }
}

impl Paginator for ButtonExpand {
    fn has_more(&mut self, page: &mut dyn PageDriver) -> Result<bool> {
        if self.exhausted {
            return Ok(false);
        }
        if !page.wait_for(&self.button_css, self.timeouts.load_more_wait()) {
            info!("Show more button not found, all papers loaded");
            return Ok(false);
        }

        let html = page.content()?;
        let doc = Html::parse_document(&html);
        let enabled = doc
            .select(&self.button)
            .next()
            .map(|button| !is_disabled(button))
            .unwrap_or(false);
        if !enabled {
            info!("Show more button disabled, all papers loaded");
        }
        Ok(enabled)
    }

    fn advance(&mut self, page: &mut dyn PageDriver) -> Result<()> {
        let before = count_matches(page, &self.rows)?;

        page.scroll_into_view(&self.button_css)
            .map_err(|e| CrawlError::Pagination(e.to_string()))?;
        pause(self.pacing.expand_scroll);
        click_with_fallback(page, &self.button_css)?;

        let rows = &self.rows;
        let grew = wait_until(self.timeouts.rows_wait(), self.timeouts.poll_interval(), || {
            count_matches(page, rows).map(|n| n > before).unwrap_or(false)
        });

        if grew {
            debug!(before, "New rows loaded");
        } else {
            // Enabled button that adds nothing: treat the list as complete.
            info!(rows = before, "No new rows after Show more, stopping expansion");
            self.exhausted = true;
        }
        Ok(())
    }
}

/// Where the next results page is reached from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextControl {
    /// An element to click
    Element(String),
    /// A link to follow directly
    Href(String),
}

/// Result offset (`start=`) encoded in a URL, 0 when absent.
pub fn start_offset(url: &str) -> u32 {
    Url::parse(url)
        .ok()
        .and_then(|u| {
            u.query_pairs()
                .find(|(k, _)| k == "start")
                .and_then(|(_, v)| v.parse().ok())
        })
        .unwrap_or(0)
}

/// Walks cited-by result pages through their "Next" control.
pub struct LinkNavigate {
    next_button: Selector,
    /// Offset link locators tried in order; the first with a forward link decides
    offset_links: Vec<Selector>,
    pacing: Pacing,
    timeouts: Timeouts,
    pending: Option<NextControl>,
    exhausted: bool,
}

impl LinkNavigate {
    pub fn new(pacing: &Pacing, timeouts: &Timeouts) -> Result<Self> {
        Ok(Self {
            next_button: selector(NEXT_BUTTON)?,
            offset_links: vec![selector(NAVIGATOR_LINKS)?, selector(OFFSET_LINKS)?],
            pacing: pacing.clone(),
            timeouts: timeouts.clone(),
            pending: None,
            exhausted: false,
        })
    }

    /// Find the next control in a page snapshot.
    pub fn locate(&self, html: &str, current_url: &str) -> Option<NextControl> {
        let doc = Html::parse_document(html);

        if let Some(button) = doc.select(&self.next_button).next() {
            if is_disabled(button) {
                debug!("Next button disabled");
                return None;
            }
            return Some(NextControl::Element(NEXT_BUTTON.to_string()));
        }

        // Offset links only move forward, never back to an earlier page.
        let base = Url::parse(current_url).ok();
        let current = start_offset(current_url);
        self.offset_links.iter().find_map(|sel| {
            let next = doc
                .select(sel)
                .filter(|a| !is_disabled(*a))
                .filter_map(|a| a.value().attr("href"))
                .map(|href| absolutize(href, base.as_ref()))
                .filter(|href| start_offset(href) > current)
                .min_by_key(|href| start_offset(href))
                .map(NextControl::Href);
            next
        })
    }
}

impl Paginator for LinkNavigate {
    fn has_more(&mut self, page: &mut dyn PageDriver) -> Result<bool> {
        if self.exhausted {
            return Ok(false);
        }
        let html = page.content()?;
        self.pending = self.locate(&html, &page.current_url());
        if self.pending.is_none() {
            info!("No next page, reached last page");
        }
        Ok(self.pending.is_some())
    }

    fn advance(&mut self, page: &mut dyn PageDriver) -> Result<()> {
        let before_html = page.content()?;
        let before_url = page.current_url();
        let control = match self.pending.take() {
            Some(control) => control,
            None => self
                .locate(&before_html, &before_url)
                .ok_or_else(|| CrawlError::Pagination("next control disappeared".to_string()))?,
        };

        match &control {
            NextControl::Element(css) => {
                page.scroll_into_view(css)
                    .map_err(|e| CrawlError::Pagination(e.to_string()))?;
                pause(self.pacing.scroll_settle);
                click_with_fallback(page, css)?;
            }
            NextControl::Href(url) => {
                page.goto(url)
                    .map_err(|e| CrawlError::Pagination(e.to_string()))?;
            }
        }

        let changed = wait_until(self.timeouts.page_change_wait(), self.timeouts.poll_interval(), || {
            page.current_url() != before_url
                || page.content().map(|html| html != before_html).unwrap_or(false)
        });
        if !changed {
            // A control that leaves the page as it was cannot lead anywhere new.
            info!(url = %before_url, "Next control did not change the page, treating it as the last");
            self.exhausted = true;
            return Ok(());
        }

        let delay = pause(self.pacing.page_turn);
        debug!(control = ?control, delay_secs = delay.as_secs_f64(), "Advanced to next page");
        Ok(())
    }
}
