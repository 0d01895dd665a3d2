//! Field extraction from result rows.
//!
//! Scholar's markup has no stable contract, so every field is read through an
//! [`ExtractionStrategyChain`]: an ordered list of [`Rule`]s tried against a
//! parsed row until one yields a non-empty value. Absence of an element is
//! never an error, only "no value for this field".

use crate::error::{CrawlError, Result};
use crate::models::{CiterRecord, PublicationRecord};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

/// Year pattern applied to venue/year text
pub const YEAR_PATTERN: &str = r"\b(19|20)\d{2}\b";

/// Delimiter between authors, venue and source in a gray info line
pub const INFO_DELIMITER: &str = " - ";

/// Compile a CSS selector.
pub fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| CrawlError::Parse(format!("selector '{}': {}", css, e)))
}

/// Compile the year pattern.
pub fn year_pattern() -> Result<Regex> {
    Regex::new(YEAR_PATTERN).map_err(|e| CrawlError::Parse(e.to_string()))
}

/// Rendered text of an element: whitespace runs (including non-breaking
/// spaces) collapsed to one space and trimmed.
pub fn rendered_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

/// Logical fields read from a row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Title,
    Link,
    Authors,
    Venue,
    Year,
    CitationCount,
}

/// One way of reading a value from a row.
#[derive(Debug, Clone)]
pub enum Rule {
    /// Text of the first match
    Text(Selector),
    /// Text of the n-th match
    NthText(Selector, usize),
    /// Attribute of the first match carrying it
    Attr(Selector, &'static str),
    /// Authors, venue or year of the first match's text read as an info line
    Info(Selector, Field, Regex),
    /// Year found anywhere in the first match's text
    Year(Selector, Regex),
}

impl Rule {
    pub fn text(css: &str) -> Result<Self> {
        Ok(Self::Text(selector(css)?))
    }

    pub fn nth_text(css: &str, n: usize) -> Result<Self> {
        Ok(Self::NthText(selector(css)?, n))
    }

    pub fn attr(css: &str, attr: &'static str) -> Result<Self> {
        Ok(Self::Attr(selector(css)?, attr))
    }

    pub fn info(css: &str, part: Field) -> Result<Self> {
        Ok(Self::Info(selector(css)?, part, year_pattern()?))
    }

    pub fn year(css: &str) -> Result<Self> {
        Ok(Self::Year(selector(css)?, year_pattern()?))
    }

    /// Apply the rule to a row. Returns `None` when the element is missing or empty.
    pub fn apply(&self, row: ElementRef<'_>) -> Option<String> {
        match self {
            Self::Text(sel) => row.select(sel).next().map(rendered_text).and_then(non_empty),
            Self::NthText(sel, n) => row.select(sel).nth(*n).map(rendered_text).and_then(non_empty),
            Self::Attr(sel, attr) => row
                .select(sel)
                .filter_map(|el| el.value().attr(attr))
                .map(|v| v.trim().to_string())
                .find(|v| !v.is_empty() && !v.starts_with("javascript:")),
            Self::Info(sel, part, pattern) => {
                let line = row.select(sel).next().map(rendered_text)?;
                let info = parse_info_line(&line, pattern);
                match part {
                    Field::Authors => info.authors,
                    Field::Venue => info.venue,
                    Field::Year => info.year,
                    _ => None,
                }
            }
            Self::Year(sel, pattern) => {
                let text = row.select(sel).next().map(rendered_text)?;
                find_year(&text, pattern)
            }
        }
    }
}

fn split_info_line(line: &str) -> Vec<Option<String>> {
    line.split(INFO_DELIMITER)
        .map(|part| non_empty(part.trim().to_string()))
        .collect()
}

fn find_year(text: &str, pattern: &Regex) -> Option<String> {
    pattern.find(text).map(|m| m.as_str().to_string())
}

/// Parsed "authors - venue - year" line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InfoLine {
    pub authors: Option<String>,
    pub venue: Option<String>,
    pub year: Option<String>,
}

/// Split an info line: segment 0 is authors, 1 is venue, and 2 (if present)
/// is scanned for a year.
pub fn parse_info_line(line: &str, pattern: &Regex) -> InfoLine {
    let mut parts = split_info_line(line).into_iter();
    InfoLine {
        authors: parts.next().flatten(),
        venue: parts.next().flatten(),
        year: parts.next().flatten().and_then(|s| find_year(&s, pattern)),
    }
}

/// Citation count from raw cell text: a non-negative integer or `0`.
pub fn parse_count(raw: Option<&str>) -> u32 {
    raw.map(str::trim)
        .filter(|s| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()))
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}

/// Ordered fallback rules for one field; the first non-empty value wins.
#[derive(Debug, Clone)]
pub struct ExtractionStrategyChain {
    field: Field,
    rules: Vec<Rule>,
}

impl ExtractionStrategyChain {
    pub fn new(field: Field, rules: Vec<Rule>) -> Self {
        Self { field, rules }
    }

    pub fn field(&self) -> Field {
        self.field
    }

    pub fn extract(&self, row: ElementRef<'_>) -> Option<String> {
        self.rules.iter().find_map(|rule| rule.apply(row))
    }
}

/// Where rows live in a page and how each field is read from them.
#[derive(Debug, Clone)]
pub struct RowSchema {
    /// Row locators in priority order; the first one matching anything is used
    rows: Vec<Selector>,
    chains: Vec<ExtractionStrategyChain>,
}

impl RowSchema {
    pub fn new(rows: Vec<Selector>, chains: Vec<ExtractionStrategyChain>) -> Self {
        Self { rows, chains }
    }

    /// Rows of a profile's publications table.
    pub fn publications() -> Result<Self> {
        use Field::*;
        Ok(Self::new(
            vec![selector("tr.gsc_a_tr")?],
            vec![
                ExtractionStrategyChain::new(
                    Title,
                    vec![Rule::text("a.gsc_a_at")?, Rule::text(".gsc_a_t a")?],
                ),
                ExtractionStrategyChain::new(
                    Link,
                    vec![Rule::attr("a.gsc_a_at", "data-href")?, Rule::attr("a.gsc_a_at", "href")?],
                ),
                ExtractionStrategyChain::new(Authors, vec![Rule::nth_text(".gs_gray", 0)?]),
                ExtractionStrategyChain::new(Venue, vec![Rule::nth_text(".gs_gray", 1)?]),
                ExtractionStrategyChain::new(
                    Year,
                    vec![Rule::year(".gsc_a_y .gsc_a_h")?, Rule::year(".gsc_a_y")?],
                ),
                ExtractionStrategyChain::new(
                    CitationCount,
                    vec![Rule::text(".gsc_a_c a")?, Rule::text(".gsc_a_c")?],
                ),
            ],
        ))
    }

    /// Rows of a cited-by results page.
    pub fn citers() -> Result<Self> {
        use Field::*;
        Ok(Self::new(
            vec![selector(".gs_ri")?, selector(".gs_r")?],
            vec![
                ExtractionStrategyChain::new(Title, vec![Rule::text(".gs_rt")?, Rule::text("h3 a")?]),
                ExtractionStrategyChain::new(
                    Link,
                    vec![
                        Rule::attr(".gs_rt a", "href")?,
                        Rule::attr(".gs_rt", "href")?,
                        Rule::attr("h3 a", "href")?,
                    ],
                ),
                ExtractionStrategyChain::new(Authors, vec![Rule::info(".gs_a", Authors)?]),
                ExtractionStrategyChain::new(Venue, vec![Rule::info(".gs_a", Venue)?]),
                ExtractionStrategyChain::new(Year, vec![Rule::info(".gs_a", Year)?]),
            ],
        ))
    }

    /// Rows in document order, using the first locator that matches.
    pub fn rows<'a>(&self, document: &'a Html) -> Vec<ElementRef<'a>> {
        self.rows
            .iter()
            .map(|sel| document.select(sel).collect::<Vec<_>>())
            .find(|rows| !rows.is_empty())
            .unwrap_or_default()
    }

    /// Read one field from a row.
    pub fn extract(&self, row: ElementRef<'_>, field: Field) -> Option<String> {
        self.chains
            .iter()
            .find(|chain| chain.field() == field)
            .and_then(|chain| chain.extract(row))
    }

    fn link(&self, row: ElementRef<'_>, base: Option<&Url>) -> Option<String> {
        let href = self.extract(row, Field::Link)?;
        Some(absolutize(&href, base))
    }

    /// Every publication row of a page, numbered from 1 in document order.
    pub fn publications_in(&self, document: &Html, base: Option<&Url>) -> Vec<PublicationRecord> {
        self.rows(document)
            .into_iter()
            .enumerate()
            .map(|(idx, row)| PublicationRecord {
                id: idx + 1,
                title: self.extract(row, Field::Title).unwrap_or_default(),
                authors_raw: self.extract(row, Field::Authors),
                venue: self.extract(row, Field::Venue),
                year: self.extract(row, Field::Year),
                citation_count: parse_count(self.extract(row, Field::CitationCount).as_deref()),
                link: self.link(row, base),
            })
            .collect()
    }

    /// Every citing work of a page that has a title, in document order.
    pub fn citers_in(&self, document: &Html, base: Option<&Url>) -> Vec<CiterRecord> {
        self.rows(document)
            .into_iter()
            .filter_map(|row| {
                let title = self.extract(row, Field::Title)?;
                Some(CiterRecord {
                    title,
                    link: self.link(row, base),
                    authors_raw: self.extract(row, Field::Authors),
                    venue: self.extract(row, Field::Venue),
                    year: self.extract(row, Field::Year),
                })
            })
            .collect()
    }
}

/// Resolve a possibly relative href against the page URL.
pub fn absolutize(href: &str, base: Option<&Url>) -> String {
    base.and_then(|b| b.join(href).ok())
        .map(|u| u.to_string())
        .unwrap_or_else(|| href.to_string())
}
