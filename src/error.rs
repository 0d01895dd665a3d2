//! Custom error types for scholarcrawl.
//!
//! Only page- and session-level failures are represented here. Missing
//! fields and unreadable rows never become errors; the extraction layer
//! models them as absent values or skipped rows.

use thiserror::Error;

/// Main error type for crawl operations.
///
/// Uses `thiserror` for ergonomic error handling and automatic `Display` implementation.
#[derive(Debug, Error)]
pub enum CrawlError {
    /// None of the configured browser engines could be launched
    #[error("No browser available: tried {0}")]
    NoBrowserAvailable(String),

    /// Browser automation error (DevTools protocol, tab, element)
    #[error("Browser error: {0}")]
    Browser(String),

    /// The profile's publications table never appeared
    #[error("Publications table not found on profile page")]
    PublicationsTableNotFound,

    /// The cited-by results container never appeared
    #[error("Citation results not found")]
    ResultsNotFound,

    /// Failed to advance to the next page or batch
    #[error("Pagination error: {0}")]
    Pagination(String),

    /// A page kept failing after the allowed number of retries
    #[error("Giving up after {retries} retries on the same page")]
    MaxRetriesExceeded {
        /// Number of retries that were attempted
        retries: u32,
    },

    /// Input URL is malformed
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Selector or pattern compilation error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(String),

    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Caller requested cancellation
    #[error("Crawl cancelled")]
    Cancelled,

    /// The crawl worker panicked
    #[error("Crawl worker panicked: {0}")]
    WorkerPanicked(String),
}

impl CrawlError {
    /// Short, stable identifier for the failure reason.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoBrowserAvailable(_) => "no_browser_available",
            Self::Browser(_) => "browser_error",
            Self::PublicationsTableNotFound => "publications_table_not_found",
            Self::ResultsNotFound => "results_not_found",
            Self::Pagination(_) => "pagination_error",
            Self::MaxRetriesExceeded { .. } => "max_retries_exceeded",
            Self::InvalidUrl(_) => "invalid_url",
            Self::Parse(_) => "parse_error",
            Self::Config(_) => "config_error",
            Self::Io(_) => "io_error",
            Self::Json(_) => "json_error",
            Self::WorkerPanicked(_) => "worker_panicked",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether the error is a page-level hiccup worth retrying on the same page.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Pagination(_) | Self::Browser(_))
    }
}

/// Result type alias using `CrawlError`
pub type Result<T> = std::result::Result<T, CrawlError>;

/// Extension trait for turning foreign browser errors into `CrawlError::Browser`
pub trait BrowserResultExt<T> {
    /// Map the error into a browser error, prefixed with what was being attempted
    fn browser_ctx(self, what: &str) -> Result<T>;
}

impl<T, E: std::fmt::Display> BrowserResultExt<T> for std::result::Result<T, E> {
    fn browser_ctx(self, what: &str) -> Result<T> {
        self.map_err(|e| CrawlError::Browser(format!("{}: {}", what, e)))
    }
}
