//! Cited-by crawler.
//!
//! Opens a publication's page, follows its "Cited by" link and walks every
//! results page, collecting one [`CiterRecord`] per distinct title. Block
//! pages suspend the crawl until a human clears them; a page that keeps
//! failing is retried a bounded number of times before the crawl gives up.

use crate::browser::{pause, PageDriver};
use crate::config::CrawlConfig;
use crate::engine::CrawlContext;
use crate::error::{CrawlError, Result};
use crate::extract::{absolutize, rendered_text, selector, RowSchema};
use crate::gate::{AntiBotGate, GateState};
use crate::models::{CiterRecord, CrawlFailure};
use crate::pagination::{LinkNavigate, Paginator};
use scraper::{Html, Selector};
use std::collections::HashSet;
use tracing::{debug, info, warn};
use url::Url;

/// Any element that marks a loaded results page
pub const RESULTS_CONTAINER: &str = ".gs_ri, .gs_r";

/// Link text of the citation count on a publication page
const CITED_BY_TEXT: &str = "Cited by";

/// Query marker of a citation-results link
const CITES_MARKER: &str = "cites=";

/// Titles already emitted during one crawl; exact string match.
#[derive(Debug, Default)]
pub struct SeenSet {
    titles: HashSet<String>,
}

impl SeenSet {
    /// Record `title`; false if it was already seen.
    pub fn insert(&mut self, title: &str) -> bool {
        if self.titles.contains(title) {
            return false;
        }
        self.titles.insert(title.to_string())
    }

    pub fn len(&self) -> usize {
        self.titles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.titles.is_empty()
    }
}

/// Append the records whose titles have not been seen yet, keeping order.
pub fn dedup_into(seen: &mut SeenSet, batch: Vec<CiterRecord>, out: &mut Vec<CiterRecord>) -> usize {
    let before = out.len();
    out.extend(batch.into_iter().filter(|r| seen.insert(&r.title)));
    out.len() - before
}

enum PageStep {
    Advanced,
    Last,
}

/// Crawls the works citing one publication.
pub struct CitationCrawler {
    config: CrawlConfig,
    schema: RowSchema,
    gate: AntiBotGate,
    anchors: Selector,
}

impl CitationCrawler {
    pub fn new(config: CrawlConfig) -> Result<Self> {
        Ok(Self {
            schema: RowSchema::citers()?,
            gate: AntiBotGate::new(&config.gate)?,
            anchors: selector("a[href]")?,
            config,
        })
    }

    /// Crawl the citers of the publication at `paper_url`.
    ///
    /// `paper_title` is only used in progress messages.
    pub fn run(
        &self,
        page: &mut dyn PageDriver,
        paper_url: &str,
        paper_title: &str,
        ctx: &CrawlContext<CiterRecord>,
    ) -> std::result::Result<Vec<CiterRecord>, CrawlFailure> {
        let mut records = Vec::new();
        match self.crawl(page, paper_url, paper_title, ctx, &mut records) {
            Ok(()) => Ok(records),
            Err(error) => Err(CrawlFailure {
                error,
                collected: records.len(),
            }),
        }
    }

    fn crawl(
        &self,
        page: &mut dyn PageDriver,
        paper_url: &str,
        paper_title: &str,
        ctx: &CrawlContext<CiterRecord>,
        records: &mut Vec<CiterRecord>,
    ) -> Result<()> {
        let pacing = &self.config.pacing;

        ctx.check_cancelled()?;
        ctx.progress(format!("Loading citers for: {}...", truncate(paper_title, 50)));
        page.navigate(paper_url, pacing.paper_settle)?;

        let html = page.content()?;
        let Some(results_url) = self.locate_cited_by(&html, &page.current_url()) else {
            ctx.progress("No 'Cited by' link found - paper may have no citations");
            return Ok(());
        };
        debug!(url = %results_url, "Found citation results link");

        pause(pacing.before_results);
        ctx.check_cancelled()?;
        ctx.progress("Navigating to citations page...");
        page.navigate(&results_url, pacing.results_settle)?;

        let mut paginator = LinkNavigate::new(pacing, &self.config.timeouts)?;
        self.crawl_results(page, &mut paginator, ctx, records)
    }

    /// Results page URL from a publication page: the "Cited by" link, else
    /// any link carrying a citation query.
    pub fn locate_cited_by(&self, html: &str, current_url: &str) -> Option<String> {
        let document = Html::parse_document(html);
        let base = Url::parse(current_url).ok();

        let by_text = document
            .select(&self.anchors)
            .find(|a| rendered_text(*a).contains(CITED_BY_TEXT))
            .and_then(|a| a.value().attr("href"));
        let by_marker = || {
            document
                .select(&self.anchors)
                .filter_map(|a| a.value().attr("href"))
                .find(|href| href.contains(CITES_MARKER))
        };

        let href = by_text.or_else(by_marker)?;
        Some(absolutize(href, base.as_ref()))
    }

    /// Extract the current and every following results page.
    pub fn crawl_results(
        &self,
        page: &mut dyn PageDriver,
        paginator: &mut dyn Paginator,
        ctx: &CrawlContext<CiterRecord>,
        records: &mut Vec<CiterRecord>,
    ) -> Result<()> {
        let max_retries = self.config.max_page_retries;
        let mut seen = SeenSet::default();
        let mut page_num = 1;
        let mut retries = 0;

        loop {
            ctx.check_cancelled()?;

            match self.process_page(page, paginator, ctx, &mut seen, records, page_num) {
                Ok(PageStep::Advanced) => {
                    page_num += 1;
                    retries = 0;
                }
                Ok(PageStep::Last) => break,
                Err(e) if e.is_transient() => {
                    if retries >= max_retries {
                        warn!(page = page_num, error = %e, "Max retries reached, stopping");
                        return Err(CrawlError::MaxRetriesExceeded { retries });
                    }
                    retries += 1;
                    warn!(page = page_num, attempt = retries, error = %e, "Error on page, retrying");
                    pause(self.config.pacing.retry_backoff);
                }
                Err(e) => return Err(e),
            }
        }

        ctx.progress(format!("Extracted {} total citers", records.len()));
        Ok(())
    }

    fn process_page(
        &self,
        page: &mut dyn PageDriver,
        paginator: &mut dyn Paginator,
        ctx: &CrawlContext<CiterRecord>,
        seen: &mut SeenSet,
        records: &mut Vec<CiterRecord>,
        page_num: usize,
    ) -> Result<PageStep> {
        self.pass_gate(page, ctx)?;

        if !page.wait_for(RESULTS_CONTAINER, self.config.timeouts.results_wait()) {
            if page_num == 1 {
                warn!(url = %page.current_url(), "Could not find citation results");
                return Err(CrawlError::ResultsNotFound);
            }
            info!(page = page_num, "No results on this page, stopping");
            return Ok(PageStep::Last);
        }

        ctx.progress(format!("Scraping page {}...", page_num));
        let html = page.content()?;
        let batch = {
            let document = Html::parse_document(&html);
            let base = Url::parse(&page.current_url()).ok();
            self.schema.citers_in(&document, base.as_ref())
        };
        let found = batch.len();
        let added = dedup_into(seen, batch, records);
        debug!(page = page_num, found, added, "Extracted results page");
        ctx.progress(format!("Added {} new citers (total: {})", added, records.len()));

        if !paginator.has_more(page)? {
            return Ok(PageStep::Last);
        }
        paginator.advance(page)?;
        Ok(PageStep::Advanced)
    }

    /// Hold the crawl until the gate reports a clear page.
    fn pass_gate(&self, page: &mut dyn PageDriver, ctx: &CrawlContext<CiterRecord>) -> Result<()> {
        loop {
            match self.gate.check(page)? {
                GateState::Clear => return Ok(()),
                blocked => {
                    ctx.await_manual_resolution(blocked)?;
                    pause(self.config.pacing.after_resume);
                }
            }
        }
    }
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
