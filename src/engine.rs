//! Crawl orchestration: the entry points a front end calls.
//!
//! Each crawl runs on its own worker thread with exactly one
//! [`BrowserSession`]. The caller gets a [`CrawlHandle`] to cancel it, to
//! signal that a human has cleared a block page, and to receive progress
//! notifications followed by exactly one terminal [`CrawlEvent::Finished`].

use crate::browser::BrowserSession;
use crate::citations::CitationCrawler;
use crate::config::CrawlConfig;
use crate::error::{CrawlError, Result};
use crate::gate::GateState;
use crate::models::{CiterRecord, CrawlFailure, CrawlOutcome, PublicationRecord};
use crate::profile::ProfileCrawler;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{error, info, warn};
use url::Url;

/// Notifications delivered while a crawl runs
#[derive(Debug)]
pub enum CrawlEvent<T> {
    /// Human-readable status line
    Progress(String),
    /// The crawl is suspended until [`CrawlHandle::resume_after_manual_intervention`]
    AwaitingManualResolution { state: GateState, message: String },
    /// Resume signal received; the page is being re-checked
    Resumed,
    /// Terminal notification, always the last event
    Finished(CrawlOutcome<T>),
}

/// Cancellation flag and manual-resume checkpoint shared with the worker.
#[derive(Debug, Default)]
pub struct CrawlControl {
    cancelled: AtomicBool,
    resume_pending: Mutex<bool>,
    signal: Condvar,
}

impl CrawlControl {
    pub fn new() -> Self {
        Self::default()
    }

    fn pending(&self) -> MutexGuard<'_, bool> {
        self.resume_pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Request cooperative cancellation; also wakes a suspended crawl.
    pub fn cancel(&self) {
        let _guard = self.pending();
        self.cancelled.store(true, Ordering::SeqCst);
        self.signal.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn check_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(CrawlError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Signal that a human has cleared the block page.
    pub fn resume(&self) {
        let mut pending = self.pending();
        *pending = true;
        self.signal.notify_all();
    }

    /// Block until [`resume`](Self::resume) or [`cancel`](Self::cancel).
    ///
    /// Resume signals sent before `announce` runs are discarded, so a stale
    /// signal cannot skip a later checkpoint.
    pub fn await_resume(&self, announce: impl FnOnce()) -> Result<()> {
        *self.pending() = false;
        announce();

        let mut pending = self.pending();
        while !*pending && !self.is_cancelled() {
            pending = self.signal.wait(pending).unwrap_or_else(|e| e.into_inner());
        }
        *pending = false;
        drop(pending);
        self.check_cancelled()
    }
}

/// What a crawler needs from its caller: the control block and an event sink.
pub struct CrawlContext<T> {
    control: Arc<CrawlControl>,
    events: Option<UnboundedSender<CrawlEvent<T>>>,
}

impl<T> CrawlContext<T> {
    pub fn new(control: Arc<CrawlControl>, events: UnboundedSender<CrawlEvent<T>>) -> Self {
        Self {
            control,
            events: Some(events),
        }
    }

    /// Context whose notifications only go to the log
    pub fn detached(control: Arc<CrawlControl>) -> Self {
        Self { control, events: None }
    }

    /// Context plus the receiving end of its event channel
    pub fn channel(control: Arc<CrawlControl>) -> (Self, UnboundedReceiver<CrawlEvent<T>>) {
        let (tx, rx) = unbounded_channel();
        (Self::new(control, tx), rx)
    }

    pub fn control(&self) -> &CrawlControl {
        &self.control
    }

    pub fn check_cancelled(&self) -> Result<()> {
        self.control.check_cancelled()
    }

    fn send(&self, event: CrawlEvent<T>) {
        if let Some(tx) = &self.events {
            // Receiver gone means nobody is listening; the crawl carries on.
            let _ = tx.send(event);
        }
    }

    pub fn progress(&self, message: impl Into<String>) {
        let message = message.into();
        info!("{}", message);
        self.send(CrawlEvent::Progress(message));
    }

    /// Suspend until a human resolves the block in the browser window.
    pub fn await_manual_resolution(&self, state: GateState) -> Result<()> {
        let message = match state {
            GateState::HardBlock => {
                "CAPTCHA detected. Solve it in the browser window, then resume.".to_string()
            }
            _ => "Unusual traffic check detected. Complete the verification in the browser window, then resume."
                .to_string(),
        };

        self.control.await_resume(|| {
            warn!(state = %state, "Awaiting manual verification");
            self.send(CrawlEvent::AwaitingManualResolution { state, message });
        })?;

        info!("Resume signal received");
        self.send(CrawlEvent::Resumed);
        Ok(())
    }

    pub fn finish(&self, outcome: CrawlOutcome<T>) {
        match &outcome {
            CrawlOutcome::Success(records) => info!(count = records.len(), "Crawl finished"),
            CrawlOutcome::Empty => info!("Crawl finished with no results"),
            CrawlOutcome::Failed(failure) => error!(
                reason = failure.reason(),
                collected = failure.collected,
                "Crawl failed: {}",
                failure.message()
            ),
            CrawlOutcome::Cancelled => info!("Crawl cancelled"),
        }
        self.send(CrawlEvent::Finished(outcome));
    }
}

/// Validate a Scholar page URL and pin the interface language to English so
/// text-based locators see the strings they expect.
pub fn normalize_scholar_url(raw: &str) -> Result<Url> {
    let mut url = Url::parse(raw.trim())
        .map_err(|e| CrawlError::InvalidUrl(format!("'{}': {}", raw, e)))?;

    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(CrawlError::InvalidUrl(format!("'{}' is not an http(s) page URL", raw)));
    }

    if !url.query_pairs().any(|(k, _)| k == "hl") {
        url.query_pairs_mut().append_pair("hl", "en");
    }
    Ok(url)
}

/// Caller's grip on a running crawl.
pub struct CrawlHandle<T> {
    control: Arc<CrawlControl>,
    events: UnboundedReceiver<CrawlEvent<T>>,
    worker: JoinHandle<()>,
}

impl<T> CrawlHandle<T> {
    /// Shared control block, e.g. for a Ctrl-C handler
    pub fn control(&self) -> Arc<CrawlControl> {
        Arc::clone(&self.control)
    }

    pub fn cancel(&self) {
        self.control.cancel();
    }

    pub fn resume_after_manual_intervention(&self) {
        self.control.resume();
    }

    /// Next notification; `None` once the worker is gone.
    pub async fn next_event(&mut self) -> Option<CrawlEvent<T>> {
        self.events.recv().await
    }

    /// Blocking variant of [`next_event`](Self::next_event) for non-async callers.
    pub fn blocking_next_event(&mut self) -> Option<CrawlEvent<T>> {
        self.events.blocking_recv()
    }

    /// Whether the worker thread has exited
    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }
}

impl<T> Drop for CrawlHandle<T> {
    fn drop(&mut self) {
        // Nobody can observe the crawl any more.
        if !self.is_finished() {
            self.control.cancel();
        }
    }
}

/// Starts crawls with a fixed configuration.
#[derive(Debug, Clone, Default)]
pub struct CrawlEngine {
    config: CrawlConfig,
}

impl CrawlEngine {
    pub fn new(config: CrawlConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &CrawlConfig {
        &self.config
    }

    /// Crawl every publication on a profile page.
    pub fn start_profile_crawl(&self, profile_url: &str) -> Result<CrawlHandle<PublicationRecord>> {
        let url = normalize_scholar_url(profile_url)?;
        let crawler = ProfileCrawler::new(self.config.clone())?;
        let config = self.config.clone();

        spawn_crawl("scholarcrawl-profile", move |ctx| {
            run_in_session(&config, ctx, |session| crawler.run(session, url.as_str(), ctx))
        })
    }

    /// Crawl every work citing one publication.
    pub fn start_citation_crawl(
        &self,
        paper_url: &str,
        paper_title: &str,
    ) -> Result<CrawlHandle<CiterRecord>> {
        let url = normalize_scholar_url(paper_url)?;
        let title = paper_title.to_string();
        let crawler = CitationCrawler::new(self.config.clone())?;
        let config = self.config.clone();

        spawn_crawl("scholarcrawl-citers", move |ctx| {
            run_in_session(&config, ctx, |session| crawler.run(session, url.as_str(), &title, ctx))
        })
    }
}

fn spawn_crawl<T, F>(name: &str, body: F) -> Result<CrawlHandle<T>>
where
    T: Send + 'static,
    F: FnOnce(&CrawlContext<T>) -> CrawlOutcome<T> + Send + 'static,
{
    let control = Arc::new(CrawlControl::new());
    let (ctx, events) = CrawlContext::channel(Arc::clone(&control));

    let worker = std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            // A panicking crawl still owes the caller a terminal event.
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| body(&ctx))).unwrap_or_else(|payload| {
                CrawlOutcome::Failed(CrawlFailure {
                    error: CrawlError::WorkerPanicked(panic_message(payload.as_ref())),
                    collected: 0,
                })
            });
            ctx.finish(outcome);
        })?;

    Ok(CrawlHandle {
        control,
        events,
        worker,
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Open a session, run `crawl` in it and release the browser whatever happens.
fn run_in_session<T>(
    config: &CrawlConfig,
    ctx: &CrawlContext<T>,
    crawl: impl FnOnce(&mut BrowserSession) -> std::result::Result<Vec<T>, CrawlFailure>,
) -> CrawlOutcome<T> {
    if ctx.control().is_cancelled() {
        return CrawlOutcome::Cancelled;
    }

    ctx.progress("Starting browser...");
    let mut session = match BrowserSession::open(&config.engines, &config.browser) {
        Ok(session) => session,
        Err(error) => return CrawlOutcome::Failed(CrawlFailure { error, collected: 0 }),
    };
    ctx.progress(format!("Using {}", session.engine()));

    let result = crawl(&mut session);
    session.close();
    CrawlOutcome::from_result(result)
}
