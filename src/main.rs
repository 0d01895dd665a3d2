//! scholarcrawl - Google Scholar profile and cited-by crawler
//!
//! Drives a visible browser window so that CAPTCHAs can be solved by hand.
//!
//! ## Usage
//!
//! ### Publications of a profile
//! ```bash
//! scholarcrawl profile "https://scholar.google.com/citations?user=XXXX"
//! ```
//!
//! ### Works citing one publication
//! ```bash
//! scholarcrawl citers "https://scholar.google.com/citations?view_op=view_citation&..." \
//!     --title "Deep learning" --year 2015
//! ```

use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use regex::Regex;
use scholarcrawl::browser::EngineKind;
use scholarcrawl::config::Pacing;
use scholarcrawl::{CrawlConfig, CrawlEngine, CrawlEvent, CrawlHandle, CrawlOutcome};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, EnvFilter};

// ============================================================================
// CLI Definition
// ============================================================================

/// Google Scholar profile and cited-by crawler
#[derive(Parser)]
#[command(name = "scholarcrawl")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Config file (JSON); defaults to the user config directory
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Browser engine to try, in order: chrome, chromium, edge or a path (repeatable)
    #[arg(long = "engine", global = true)]
    engines: Vec<EngineKind>,

    /// Skip the human-like delays between page actions
    #[arg(long, global = true)]
    fast: bool,

    /// Run the browser headless (block pages are more likely)
    #[arg(long, global = true)]
    headless: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl every publication listed on a profile
    Profile {
        /// Profile URL
        url: String,

        /// Output CSV file (default: scholar_papers_<timestamp>.csv)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Crawl every work citing one publication
    Citers {
        /// Publication page URL (the "link" column of a profile export)
        paper_url: String,

        /// Publication title, used for messages and the output name
        #[arg(long, default_value = "paper")]
        title: String,

        /// Publication year, used for the output name
        #[arg(long)]
        year: Option<String>,

        /// Output CSV file (default: <title>_<year>_citers.csv)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .init();

    let config = build_config(&cli)?;
    let engine = CrawlEngine::new(config).context("Invalid crawl configuration")?;

    match cli.command {
        Commands::Profile { url, output } => {
            let path = output.unwrap_or_else(|| {
                PathBuf::from(format!("scholar_papers_{}.csv", Local::now().format("%Y%m%d_%H%M%S")))
            });
            let handle = engine
                .start_profile_crawl(&url)
                .context("Failed to start profile crawl")?;
            let outcome = drive(handle).await?;
            finish(outcome, &path, "papers")
        }
        Commands::Citers {
            paper_url,
            title,
            year,
            output,
        } => {
            let path = output.unwrap_or_else(|| citers_file_name(&title, year.as_deref()));
            let handle = engine
                .start_citation_crawl(&paper_url, &title)
                .context("Failed to start citation crawl")?;
            let outcome = drive(handle).await?;
            finish(outcome, &path, "citers")
        }
    }
}

/// Config file plus command-line overrides
fn build_config(cli: &Cli) -> Result<CrawlConfig> {
    let mut config = CrawlConfig::load(cli.config.as_deref()).context("Failed to load config")?;

    if !cli.engines.is_empty() {
        config.engines = cli.engines.clone();
    }
    if cli.fast {
        config.pacing = Pacing::instant();
    }
    if cli.headless {
        config.browser.headless = true;
    }
    Ok(config)
}

// ============================================================================
// Crawl Event Loop
// ============================================================================

/// Print progress until the crawl finishes, relaying ENTER as the resume
/// signal and Ctrl-C as cancellation.
async fn drive<T>(mut handle: CrawlHandle<T>) -> Result<CrawlOutcome<T>> {
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut awaiting = false;
    let mut cancelling = false;

    loop {
        tokio::select! {
            event = handle.next_event() => match event {
                Some(CrawlEvent::Progress(message)) => println!("{}", message),
                Some(CrawlEvent::AwaitingManualResolution { message, .. }) => {
                    println!("\n{}", message);
                    println!("Press ENTER once the page shows results again (Ctrl-C to abort)...");
                    awaiting = true;
                }
                Some(CrawlEvent::Resumed) => {
                    awaiting = false;
                    println!("Resuming...");
                }
                Some(CrawlEvent::Finished(outcome)) => return Ok(outcome),
                None => bail!("Crawl worker exited without reporting an outcome"),
            },
            line = stdin.next_line(), if awaiting => {
                awaiting = false;
                match line.context("Failed to read from stdin")? {
                    Some(_) => handle.resume_after_manual_intervention(),
                    None => {
                        warn!("stdin closed while waiting for verification, cancelling");
                        handle.cancel();
                    }
                }
            }
            signal = tokio::signal::ctrl_c(), if !cancelling => {
                signal.context("Failed to listen for Ctrl-C")?;
                println!("\nCancelling...");
                cancelling = true;
                handle.cancel();
            }
        }
    }
}

fn finish<T: Serialize>(outcome: CrawlOutcome<T>, path: &Path, noun: &str) -> Result<()> {
    match outcome {
        CrawlOutcome::Success(records) => {
            println!("Found {} {}", records.len(), noun);
            save_csv(path, &records)
        }
        CrawlOutcome::Empty => {
            println!("No {} found.", noun);
            Ok(())
        }
        CrawlOutcome::Cancelled => {
            println!("Crawl cancelled.");
            Ok(())
        }
        CrawlOutcome::Failed(failure) => bail!(
            "Crawl failed [{}] after {} {}: {}",
            failure.reason(),
            failure.collected,
            noun,
            failure.message()
        ),
    }
}

// ============================================================================
// Output
// ============================================================================

/// Default citer export name: `<title>_<year>_citers.csv`
fn citers_file_name(title: &str, year: Option<&str>) -> PathBuf {
    let stripped = Regex::new(r"[^\w\s-]")
        .map(|re| re.replace_all(title, "").into_owned())
        .unwrap_or_else(|_| title.to_string());
    let joined = Regex::new(r"[-\s]+")
        .map(|re| re.replace_all(stripped.trim(), "_").into_owned())
        .unwrap_or(stripped);
    let clean: String = joined.chars().take(50).collect();
    let clean = if clean.is_empty() { "paper".to_string() } else { clean };

    PathBuf::from(format!("{}_{}_citers.csv", clean, year.unwrap_or("unknown")))
}

/// Save records to a CSV file with a header row
fn save_csv<T: Serialize>(path: &Path, data: &[T]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).context("Failed to create output directory")?;
    }

    let mut wtr = csv::WriterBuilder::new()
        .has_headers(true)
        .from_path(path)
        .context("Failed to create CSV writer")?;

    for item in data {
        wtr.serialize(item).context("Failed to write CSV record")?;
    }

    wtr.flush().context("Failed to flush CSV")?;
    info!(path = %path.display(), rows = data.len(), "CSV written");
    println!("Saved: {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use scholarcrawl::PublicationRecord;

    #[test]
    fn test_citers_file_name() {
        assert_eq!(
            citers_file_name("Deep learning: a review - part 1", Some("2015")),
            PathBuf::from("Deep_learning_a_review_part_1_2015_citers.csv")
        );
        assert_eq!(citers_file_name("???", None), PathBuf::from("paper_unknown_citers.csv"));

        let long = "x".repeat(80);
        let name = citers_file_name(&long, Some("2020"));
        assert_eq!(name, PathBuf::from(format!("{}_2020_citers.csv", "x".repeat(50))));
    }

    #[test]
    fn test_save_csv_writes_header_and_rows() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("out").join("papers.csv");
        let records = vec![PublicationRecord {
            id: 1,
            title: "A paper".to_string(),
            authors_raw: Some("A Author".to_string()),
            venue: None,
            year: Some("2020".to_string()),
            citation_count: 7,
            link: None,
        }];

        save_csv(&path, &records)?;

        let written = std::fs::read_to_string(&path)?;
        let mut lines = written.lines();
        assert_eq!(lines.next(), Some("paper_id,title,authors,publication,year,citations,link"));
        assert_eq!(lines.next(), Some("1,A paper,A Author,,2020,7,"));
        Ok(())
    }

    #[test]
    fn test_cli_overrides() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config_path = dir.path().join("config.json");
        std::fs::write(&config_path, "{}")?;

        let cli = Cli::try_parse_from([
            "scholarcrawl",
            "--config",
            config_path.to_str().context("utf-8 path")?,
            "--engine",
            "chromium",
            "--fast",
            "profile",
            "https://scholar.google.com/citations?user=abc",
        ])?;
        let config = build_config(&cli)?;

        assert_eq!(config.engines, vec![EngineKind::Chromium]);
        assert_eq!(config.pacing, Pacing::instant());
        assert!(!config.browser.headless);
        Ok(())
    }
}
