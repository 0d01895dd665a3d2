//! # scholarcrawl
//!
//! Google Scholar profile and cited-by crawler driven by a real browser.
//!
//! ## Modules
//!
//! - [`engine`] - Crawl entry points, handles, cancellation and resume
//! - [`profile`] - Publication list of a researcher profile
//! - [`citations`] - Works citing one publication
//! - [`pagination`] - "Show more" expansion and next-page navigation
//! - [`extract`] - Row schemas and field fallback chains
//! - [`gate`] - Block page / CAPTCHA detection
//! - [`browser`] - Browser session and the `PageDriver` seam
//! - [`config`] - Crawl configuration
//! - [`models`] - Records and crawl outcomes
//! - [`error`] - Custom error types
//!
//! ## Usage
//!
//! ```rust,no_run
//! use scholarcrawl::{CrawlEngine, CrawlEvent};
//!
//! fn main() -> anyhow::Result<()> {
//!     let engine = CrawlEngine::default();
//!     let mut handle = engine.start_profile_crawl("https://scholar.google.com/citations?user=abc")?;
//!     while let Some(event) = handle.blocking_next_event() {
//!         match event {
//!             CrawlEvent::Progress(message) => println!("{}", message),
//!             CrawlEvent::AwaitingManualResolution { message, .. } => {
//!                 println!("{}", message);
//!                 handle.resume_after_manual_intervention();
//!             }
//!             CrawlEvent::Resumed => {}
//!             CrawlEvent::Finished(outcome) => println!("{} papers", outcome.into_records().len()),
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod browser;
pub mod citations;
pub mod config;
pub mod engine;
pub mod error;
pub mod extract;
pub mod gate;
pub mod models;
pub mod pagination;
pub mod profile;

pub use config::CrawlConfig;
pub use engine::{CrawlControl, CrawlEngine, CrawlEvent, CrawlHandle};
pub use error::{CrawlError, Result};
pub use models::{CiterRecord, CrawlFailure, CrawlOutcome, PublicationRecord};
