//! Records produced by the crawlers and the outcome wrapper handed to callers.
//!
//! Serialized field names double as CSV column names.

use crate::error::CrawlError;
use serde::{Deserialize, Serialize};

/// One publication row from a researcher's profile page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicationRecord {
    /// 1-based position within the crawl
    #[serde(rename = "paper_id")]
    pub id: usize,
    /// Title (empty when the row carried none)
    pub title: String,
    /// Authors line, unparsed
    #[serde(rename = "authors")]
    pub authors_raw: Option<String>,
    /// Journal/Conference venue
    #[serde(rename = "publication")]
    pub venue: Option<String>,
    /// Four-digit publication year
    pub year: Option<String>,
    /// Number of citations
    #[serde(rename = "citations")]
    pub citation_count: u32,
    /// Link to the publication's own page
    pub link: Option<String>,
}

/// One work citing a publication
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CiterRecord {
    #[serde(rename = "citer_title")]
    pub title: String,
    #[serde(rename = "citer_link")]
    pub link: Option<String>,
    #[serde(rename = "citer_authors")]
    pub authors_raw: Option<String>,
    #[serde(rename = "citer_publication")]
    pub venue: Option<String>,
    #[serde(rename = "citer_year")]
    pub year: Option<String>,
}

/// Terminal result of a crawl.
#[derive(Debug)]
pub enum CrawlOutcome<T> {
    /// At least one record was collected
    Success(Vec<T>),
    /// The crawl completed but found nothing
    Empty,
    /// The crawl stopped on a fatal error
    Failed(CrawlFailure),
    /// The caller cancelled the crawl
    Cancelled,
}

/// Why a crawl failed, with how far it had got.
#[derive(Debug)]
pub struct CrawlFailure {
    pub error: CrawlError,
    /// Records collected before the failure; diagnostic only, never a complete result
    pub collected: usize,
}

impl CrawlFailure {
    /// Machine-identifiable reason
    pub fn reason(&self) -> &'static str {
        self.error.code()
    }

    /// Human-readable message
    pub fn message(&self) -> String {
        self.error.to_string()
    }
}

impl<T> CrawlOutcome<T> {
    /// Package a crawl's result.
    pub fn from_result(result: std::result::Result<Vec<T>, CrawlFailure>) -> Self {
        match result {
            Ok(records) if records.is_empty() => Self::Empty,
            Ok(records) => Self::Success(records),
            Err(failure) if matches!(failure.error, CrawlError::Cancelled) => Self::Cancelled,
            Err(failure) => Self::Failed(failure),
        }
    }

    /// Records of a successful crawl; empty for every other outcome.
    pub fn into_records(self) -> Vec<T> {
        match self {
            Self::Success(records) => records,
            _ => Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}
