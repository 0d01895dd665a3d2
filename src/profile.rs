//! Profile crawler.
//!
//! Loads a researcher's public profile, presses "Show more" until the whole
//! publication list is on the page, then extracts every row in one pass.

use crate::browser::PageDriver;
use crate::config::CrawlConfig;
use crate::engine::CrawlContext;
use crate::error::{CrawlError, Result};
use crate::extract::RowSchema;
use crate::models::{CrawlFailure, PublicationRecord};
use crate::pagination::{ButtonExpand, Paginator};
use scraper::Html;
use tracing::{debug, warn};
use url::Url;

/// Container holding the publication rows
pub const PUBLICATIONS_TABLE: &str = "#gsc_a_b";

/// Crawls one profile page into publication records.
pub struct ProfileCrawler {
    config: CrawlConfig,
    schema: RowSchema,
}

impl ProfileCrawler {
    pub fn new(config: CrawlConfig) -> Result<Self> {
        Ok(Self {
            config,
            schema: RowSchema::publications()?,
        })
    }

    /// Crawl `profile_url`, expanding the list with its "Show more" button.
    pub fn run(
        &self,
        page: &mut dyn PageDriver,
        profile_url: &str,
        ctx: &CrawlContext<PublicationRecord>,
    ) -> std::result::Result<Vec<PublicationRecord>, CrawlFailure> {
        let mut expand = ButtonExpand::new(&self.config.pacing, &self.config.timeouts)
            .map_err(|error| CrawlFailure { error, collected: 0 })?;
        self.run_with(page, profile_url, &mut expand, ctx)
    }

    /// Crawl `profile_url` using the given paginator to expand the list.
    pub fn run_with(
        &self,
        page: &mut dyn PageDriver,
        profile_url: &str,
        paginator: &mut dyn Paginator,
        ctx: &CrawlContext<PublicationRecord>,
    ) -> std::result::Result<Vec<PublicationRecord>, CrawlFailure> {
        // The list only materializes at the end, so a failure has nothing to report.
        self.crawl(page, profile_url, paginator, ctx)
            .map_err(|error| CrawlFailure { error, collected: 0 })
    }

    fn crawl(
        &self,
        page: &mut dyn PageDriver,
        profile_url: &str,
        paginator: &mut dyn Paginator,
        ctx: &CrawlContext<PublicationRecord>,
    ) -> Result<Vec<PublicationRecord>> {
        ctx.check_cancelled()?;
        ctx.progress("Loading profile page...");
        page.navigate(profile_url, self.config.pacing.profile_settle)?;

        if !page.wait_for(PUBLICATIONS_TABLE, self.config.timeouts.table_wait()) {
            return Err(CrawlError::PublicationsTableNotFound);
        }

        self.expand_all(page, paginator, ctx)?;

        ctx.check_cancelled()?;
        ctx.progress("Extracting paper information...");
        let html = page.content()?;
        let document = Html::parse_document(&html);
        let base = Url::parse(&page.current_url()).ok();
        let records = self.schema.publications_in(&document, base.as_ref());

        let total = records.len();
        for done in (10..=total).step_by(10) {
            ctx.progress(format!("Processed {}/{} papers", done, total));
        }
        ctx.progress(format!("Successfully scraped {} papers", records.len()));
        Ok(records)
    }

    /// Advance until the paginator reports nothing more to load.
    fn expand_all(
        &self,
        page: &mut dyn PageDriver,
        paginator: &mut dyn Paginator,
        ctx: &CrawlContext<PublicationRecord>,
    ) -> Result<usize> {
        let mut batches = 0;
        loop {
            ctx.check_cancelled()?;

            match paginator.has_more(page) {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    warn!(error = %e, "Could not inspect Show more button, keeping what is loaded");
                    break;
                }
            }

            if let Err(e) = paginator.advance(page) {
                warn!(error = %e, "Finished loading papers");
                break;
            }
            batches += 1;
            ctx.progress("Loading more papers...");
        }

        debug!(batches, "Profile fully expanded");
        Ok(batches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::fake::FakePage;
    use crate::config::{Pacing, Timeouts};
    use crate::engine::{CrawlControl, CrawlEvent};
    use crate::pagination::LOAD_MORE_BUTTON;
    use std::sync::Arc;

    const PROFILE: &str = "https://scholar.google.com/citations?user=X&hl=en";

    fn rows(range: std::ops::Range<usize>) -> String {
        range
            .map(|i| {
                format!(
                    r#"<tr class="gsc_a_tr"><td class="gsc_a_t">
                         <a href="/citations?view_op=view_citation&amp;citation_for_view=X:{i}" class="gsc_a_at">Paper {i}</a>
                         <div class="gs_gray">Author {i}</div><div class="gs_gray">Venue {i}</div></td>
                       <td class="gsc_a_c"><a class="gsc_a_ac">{i}</a></td>
                       <td class="gsc_a_y"><span class="gsc_a_h">2020</span></td></tr>"#
                )
            })
            .collect()
    }

    fn profile(range: std::ops::Range<usize>, button: &str) -> String {
        format!(
            r#"<html><body><table><tbody id="gsc_a_b">{}</tbody></table>{}</body></html>"#,
            rows(range),
            button
        )
    }

    fn crawler() -> ProfileCrawler {
        let config = CrawlConfig {
            pacing: Pacing::instant(),
            ..CrawlConfig::default()
        };
        ProfileCrawler::new(config).expect("profile schema")
    }

    fn detached() -> CrawlContext<PublicationRecord> {
        CrawlContext::detached(Arc::new(CrawlControl::new()))
    }

    /// Reports more pages a fixed number of times without touching the page.
    struct Seeded {
        remaining: usize,
        has_more_calls: usize,
        advances: usize,
    }

    impl Paginator for Seeded {
        fn has_more(&mut self, _page: &mut dyn PageDriver) -> Result<bool> {
            self.has_more_calls += 1;
            Ok(self.remaining > 0)
        }

        fn advance(&mut self, _page: &mut dyn PageDriver) -> Result<()> {
            self.remaining -= 1;
            self.advances += 1;
            Ok(())
        }
    }

    #[test]
    fn test_expands_then_extracts_with_dense_ids() -> std::result::Result<(), CrawlFailure> {
        let more = "https://scholar.google.com/citations?user=X&hl=en&cstart=20";
        let all = "https://scholar.google.com/citations?user=X&hl=en&cstart=40";
        let mut page = FakePage::new()
            .with_page(PROFILE, &profile(1..21, r#"<button id="gsc_bpf_more">Show more</button>"#))
            .with_page(more, &profile(1..41, r#"<button id="gsc_bpf_more">Show more</button>"#))
            .with_page(all, &profile(1..46, r#"<button id="gsc_bpf_more" disabled>Show more</button>"#))
            .on_click(LOAD_MORE_BUTTON, more)
            .on_click(LOAD_MORE_BUTTON, all);

        let records = crawler().run(&mut page, PROFILE, &detached())?;

        assert_eq!(records.len(), 45);
        let ids: Vec<usize> = records.iter().map(|r| r.id).collect();
        assert_eq!(ids, (1..=45).collect::<Vec<_>>());
        assert_eq!(records[0].title, "Paper 1");
        assert_eq!(records[44].citation_count, 45);
        assert_eq!(
            records[2].link.as_deref(),
            Some("https://scholar.google.com/citations?view_op=view_citation&citation_for_view=X:3")
        );
        assert_eq!(page.clicked().len(), 2);
        Ok(())
    }

    #[test]
    fn test_reports_every_tenth_row() -> std::result::Result<(), CrawlFailure> {
        let mut page = FakePage::new().with_page(PROFILE, &profile(1..26, ""));
        let (ctx, mut events) = CrawlContext::channel(Arc::new(CrawlControl::new()));

        crawler().run(&mut page, PROFILE, &ctx)?;
        drop(ctx);

        let mut processed = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let CrawlEvent::Progress(message) = event {
                if message.starts_with("Processed") {
                    processed.push(message);
                }
            }
        }
        assert_eq!(processed, vec!["Processed 10/25 papers", "Processed 20/25 papers"]);
        Ok(())
    }

    #[test]
    fn test_seeded_paginator_advances_exactly_three_times() -> std::result::Result<(), CrawlFailure> {
        let mut page = FakePage::new().with_page(PROFILE, &profile(1..6, ""));
        let mut seeded = Seeded {
            remaining: 3,
            has_more_calls: 0,
            advances: 0,
        };

        let records = crawler().run_with(&mut page, PROFILE, &mut seeded, &detached())?;

        assert_eq!(seeded.advances, 3);
        assert_eq!(seeded.has_more_calls, 4);
        assert_eq!(records.len(), 5);
        Ok(())
    }

    #[test]
    fn test_missing_table_fails_within_bounded_wait() {
        let mut page = FakePage::new().with_page(PROFILE, "<html><body>Profile not found</body></html>");
        let config = CrawlConfig {
            pacing: Pacing::instant(),
            timeouts: Timeouts {
                table_wait_secs: 0.05,
                ..Timeouts::default()
            },
            ..CrawlConfig::default()
        };
        let crawler = ProfileCrawler::new(config).expect("profile schema");

        let started = std::time::Instant::now();
        let failure = crawler
            .run(&mut page, PROFILE, &detached())
            .expect_err("table should be missing");
        assert!(matches!(failure.error, CrawlError::PublicationsTableNotFound));
        assert!(started.elapsed() < std::time::Duration::from_secs(5));
    }

    #[test]
    fn test_cancel_before_expansion() {
        let mut page = FakePage::new().with_page(PROFILE, &profile(1..3, ""));
        let control = Arc::new(CrawlControl::new());
        let (ctx, mut events) = CrawlContext::channel(Arc::clone(&control));
        control.cancel();

        let failure = crawler().run(&mut page, PROFILE, &ctx).expect_err("cancelled");
        assert!(matches!(failure.error, CrawlError::Cancelled));
        assert!(page.visits().is_empty());
        drop(ctx);
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_progress_is_reported() -> std::result::Result<(), CrawlFailure> {
        let mut page = FakePage::new().with_page(PROFILE, &profile(1..3, ""));
        let (ctx, mut events) = CrawlContext::channel(Arc::new(CrawlControl::new()));

        crawler().run(&mut page, PROFILE, &ctx)?;
        drop(ctx);

        let mut messages = Vec::new();
        while let Ok(CrawlEvent::Progress(message)) = events.try_recv() {
            messages.push(message);
        }
        assert_eq!(messages.first().map(String::as_str), Some("Loading profile page..."));
        assert_eq!(messages.last().map(String::as_str), Some("Successfully scraped 2 papers"));
        Ok(())
    }
}
