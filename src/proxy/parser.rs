//! Candidate extraction from fetched listing pages
//!
//! Two strategies are tried in a fixed order:
//! 1. Structured table parsing (the `<table>` layout used by most listing sites)
//! 2. A raw `IP:PORT` pattern scan over the whole text, used only when the
//!    table yields nothing
//!
//! Extraction never fails. Malformed rows are skipped and an empty result is
//! a valid outcome.

use crate::proxy::models::{ProxyRecord, ProxySet, TlsSupport};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::fmt;
use std::net::Ipv4Addr;

/// Regex pattern to match IP:PORT patterns in text
static IP_PORT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(\d{1,3}(?:\.\d{1,3}){3}):(\d{2,5})\b").expect("Invalid IP:PORT regex")
});

static TABLE_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("table").expect("Invalid table selector"));
static TBODY_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("tbody").expect("Invalid tbody selector"));
static ROW_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("tr").expect("Invalid row selector"));
static CELL_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("td").expect("Invalid cell selector"));

/// Which strategy produced a set of candidates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    Table,
    Pattern,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyKind::Table => write!(f, "table"),
            StrategyKind::Pattern => write!(f, "pattern"),
        }
    }
}

/// A way of pulling proxy candidates out of page content
pub trait ExtractionStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    fn extract(&self, page: &str, source: &str) -> ProxySet;
}

/// Column positions of a proxy listing table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableLayout {
    pub address: usize,
    pub port: usize,
    pub country: usize,
    pub tls: usize,
}

impl Default for TableLayout {
    /// IP, Port, Code, Country, Anonymity, Google, Https, Last Checked
    fn default() -> Self {
        Self {
            address: 0,
            port: 1,
            country: 3,
            tls: 6,
        }
    }
}

/// Reads the first `<table>` of an HTML page
#[derive(Debug, Clone, Default)]
pub struct TableStrategy {
    layout: TableLayout,
}

impl TableStrategy {
    pub fn new(layout: TableLayout) -> Self {
        Self { layout }
    }

    fn parse_row(&self, cells: &[String], source: &str) -> Option<ProxyRecord> {
        if cells.len() < 2 {
            return None;
        }
        let address = parse_address(cells.get(self.layout.address)?)?;
        let port = parse_port(cells.get(self.layout.port)?)?;

        // Short rows are kept; missing metadata falls back to defaults
        let country = cells.get(self.layout.country).map(String::as_str).unwrap_or("");
        let tls = cells
            .get(self.layout.tls)
            .map(|c| TlsSupport::from_cell(c))
            .unwrap_or_default();

        Some(
            ProxyRecord::new(address, port, source)
                .with_country(country)
                .with_tls(tls),
        )
    }
}

impl ExtractionStrategy for TableStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Table
    }

    fn extract(&self, page: &str, source: &str) -> ProxySet {
        let html = Html::parse_document(page);
        let Some(table) = html.select(&TABLE_SELECTOR).next() else {
            return ProxySet::new();
        };

        let rows: Vec<ElementRef> = match table.select(&TBODY_SELECTOR).next() {
            Some(tbody) => tbody.select(&ROW_SELECTOR).collect(),
            None => table.select(&ROW_SELECTOR).collect(),
        };

        rows.into_iter()
            .filter_map(|row| {
                let cells: Vec<String> = row
                    .select(&CELL_SELECTOR)
                    .map(|cell| cell.text().collect::<String>().trim().to_string())
                    .collect();
                self.parse_row(&cells, source)
            })
            .collect()
    }
}

/// Scans raw text for `IP:PORT` substrings
#[derive(Debug, Clone, Default)]
pub struct PatternStrategy;

impl ExtractionStrategy for PatternStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Pattern
    }

    fn extract(&self, page: &str, source: &str) -> ProxySet {
        IP_PORT_REGEX
            .captures_iter(page)
            .filter_map(|cap| {
                let address = parse_address(cap.get(1)?.as_str())?;
                let port = parse_port(cap.get(2)?.as_str())?;
                Some(ProxyRecord::new(address, port, source))
            })
            .collect()
    }
}

/// Result of running the extractor over one page
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    /// Strategy that produced the records; `None` when nothing was found
    pub strategy: Option<StrategyKind>,
    pub records: ProxySet,
}

impl Extraction {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Applies the extraction strategies in fallback order
pub struct CandidateExtractor {
    strategies: Vec<Box<dyn ExtractionStrategy>>,
}

impl CandidateExtractor {
    pub fn new() -> Self {
        Self::with_layout(TableLayout::default())
    }

    pub fn with_layout(layout: TableLayout) -> Self {
        Self {
            strategies: vec![
                Box::new(TableStrategy::new(layout)),
                Box::new(PatternStrategy),
            ],
        }
    }

    /// Extract candidates; the first strategy with a non-empty result wins
    pub fn extract(&self, page: &str, source: &str) -> Extraction {
        for strategy in &self.strategies {
            let records = strategy.extract(page, source);
            if !records.is_empty() {
                return Extraction {
                    strategy: Some(strategy.kind()),
                    records,
                };
            }
        }
        Extraction::default()
    }
}

impl Default for CandidateExtractor {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_address(text: &str) -> Option<Ipv4Addr> {
    text.trim().parse().ok()
}

fn parse_port(text: &str) -> Option<u16> {
    let text = text.trim();
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse::<u16>().ok().filter(|&port| port > 0)
}
