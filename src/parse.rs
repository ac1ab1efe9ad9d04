//! HTML parsing — results table extraction and next-page discovery.
//!
//! The parser is a pure function from a fetched page to structured rows:
//! declared headers, cell text with per-cell links, and the opaque cursor
//! behind the site's next-page link. All selectors are compiled once at
//! construction so a selector typo in the configuration surfaces before the
//! first fetch.

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::config::SiteConfig;
use crate::error::{Error, Result};
use crate::types::{ParsedCell, ParsedPage, ParsedRow, RawResponse};

/// Compiled parser for the site's results markup.
pub struct PageParser {
    table: Selector,
    row: Selector,
    header_cell: Selector,
    data_cell: Selector,
    link: Selector,
    next_link_label: String,
    refine_marker: Option<String>,
    whitespace: Regex,
}

impl PageParser {
    /// Compile the configured selectors.
    pub fn new(site: &SiteConfig) -> Result<Self> {
        let table = Selector::parse(&site.table_selector).map_err(|e| Error::Config {
            message: format!("table_selector does not parse: {e}"),
            key: Some("site.table_selector".to_string()),
        })?;

        let row = parse_static_selector("tr")?;
        let header_cell = parse_static_selector("th")?;
        let data_cell = parse_static_selector("td")?;
        let link = parse_static_selector("a[href]")?;

        let whitespace = Regex::new(r"\s+").map_err(|e| Error::Other(format!(
            "whitespace regex failed to compile: {e}"
        )))?;

        Ok(Self {
            table,
            row,
            header_cell,
            data_cell,
            link,
            next_link_label: site.next_link_label.clone(),
            refine_marker: site.refine_marker.as_deref().map(str::to_lowercase),
            whitespace,
        })
    }

    /// Parse one fetched page into headers, rows, and the next-page cursor.
    ///
    /// A page without the results table is an extraction error (the caller
    /// degrades it to an empty page); a present-but-empty table is simply a
    /// page with no rows.
    pub fn parse_page(&self, raw: &RawResponse) -> Result<ParsedPage> {
        if let Some(marker) = &self.refine_marker
            && raw.body.to_lowercase().contains(marker)
        {
            tracing::warn!(url = %raw.url, marker = %marker, "Site asked to refine the query");
        }

        let document = Html::parse_document(&raw.body);

        let table = document
            .select(&self.table)
            .next()
            .ok_or_else(|| Error::Extraction(format!("results table not found at {}", raw.url)))?;

        let headers: Vec<String> = table
            .select(&self.header_cell)
            .map(|th| self.normalize_text(th))
            .collect();

        let mut rows = Vec::new();
        for tr in table.select(&self.row) {
            let cells: Vec<ParsedCell> = tr
                .select(&self.data_cell)
                .map(|td| ParsedCell {
                    text: self.normalize_text(td),
                    links: self.cell_links(td, &raw.url),
                })
                .collect();

            // Header rows and spacer rows carry no td cells
            if !cells.is_empty() {
                rows.push(ParsedRow { cells });
            }
        }

        let next_cursor = self.find_next_cursor(table, &raw.url);

        Ok(ParsedPage {
            headers,
            rows,
            next_cursor,
        })
    }

    /// Collapse runs of whitespace and trim, matching how browsers render
    /// the site's cell text.
    fn normalize_text(&self, element: ElementRef<'_>) -> String {
        let joined: String = element.text().collect();
        self.whitespace.replace_all(&joined, " ").trim().to_string()
    }

    /// Absolute URLs of every link inside a cell, in document order.
    fn cell_links(&self, cell: ElementRef<'_>, base: &Url) -> Vec<String> {
        cell.select(&self.link)
            .filter_map(|a| a.value().attr("href"))
            .filter_map(|href| match base.join(href) {
                Ok(url) => Some(url.to_string()),
                Err(e) => {
                    tracing::debug!(href = %href, error = %e, "Dropping unresolvable link");
                    None
                }
            })
            .collect()
    }

    /// Locate the next-page link by its label (or title attribute) and
    /// return its absolute URL as the opaque cursor token.
    fn find_next_cursor(&self, table: ElementRef<'_>, base: &Url) -> Option<String> {
        for a in table.select(&self.link) {
            let label_matches = self
                .normalize_text(a)
                .contains(self.next_link_label.as_str())
                || a.value().attr("title") == Some(self.next_link_label.as_str());
            if !label_matches {
                continue;
            }

            let href = a.value().attr("href")?;
            match base.join(href) {
                Ok(url) => return Some(url.to_string()),
                Err(e) => {
                    tracing::warn!(href = %href, error = %e, "Next-page link is not a usable URL");
                    return None;
                }
            }
        }
        None
    }
}

fn parse_static_selector(selector: &str) -> Result<Selector> {
    Selector::parse(selector).map_err(|e| Error::Other(format!(
        "selector '{selector}' failed to compile: {e}"
    )))
}
