// result_table.rs
//! Result-page scraping: the per-station protocol table and links to child pages.

use encoding_rs::{Encoding, UTF_8, WINDOWS_1251};
use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::borrow::Cow;

use crate::error::StructuralError;
use crate::feature_schema::FeatureSchema;
use crate::models::{Link, ResultCell};

// Selector and pattern literals below are constants; parsing them cannot fail.
static RECORD_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"vibid=(\d+)").unwrap());
static RESULTS_CONTAINER: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"td[width="90%"]"#).unwrap());
static ROW: Lazy<Selector> = Lazy::new(|| Selector::parse("tr").unwrap());
static CELL: Lazy<Selector> = Lazy::new(|| Selector::parse("td").unwrap());
static NOBR: Lazy<Selector> = Lazy::new(|| Selector::parse("nobr").unwrap());
static BOLD: Lazy<Selector> = Lazy::new(|| Selector::parse("b").unwrap());
static CHILD_LINK: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"a[style="TEXT-DECORATION: none"]"#).unwrap());

static META_CHARSET: Lazy<regex::bytes::Regex> = Lazy::new(|| {
    regex::bytes::Regex::new(r#"(?i-u)<meta[^>]*charset\s*=\s*["']?([a-z0-9_:.\-]+)"#).unwrap()
});

const CHILD_LINK_MARKER: &str = "TEXT-DECORATION: none";
const CHARSET_SNIFF_LEN: usize = 4096;

/// Decodes a stored page to text.
///
/// A byte-order mark wins, then a `<meta>` charset near the top of the page.
/// Without either, valid UTF-8 is taken as is and anything else is read as
/// windows-1251, which is what the result site serves.
pub fn decode_page(bytes: &[u8]) -> Cow<'_, str> {
    let head = &bytes[..bytes.len().min(CHARSET_SNIFF_LEN)];
    let declared = META_CHARSET
        .captures(head)
        .and_then(|caps| Encoding::for_label(&caps[1]))
        .map(Encoding::output_encoding);
    let encoding = match declared {
        Some(encoding) => encoding,
        None if std::str::from_utf8(bytes).is_ok() => UTF_8,
        None => WINDOWS_1251,
    };
    let (text, used, had_errors) = encoding.decode(bytes);
    if had_errors {
        debug!("Page holds bytes that are not valid {}", used.name());
    }
    text
}

/// The record id a result page belongs to, taken from its URL.
pub fn record_id_from_key(key: &str) -> Result<String, StructuralError> {
    RECORD_ID
        .captures(key)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| StructuralError::MissingRecordId {
            key: key.to_string(),
        })
}

/// Parses the station results table of one page.
///
/// The first row holds station column labels; the row after it at position
/// `i` carries `schema.slot(i)`. The table must have exactly `schema.len()`
/// rows after the header and every feature row one cell per station,
/// otherwise the page layout has changed and nothing is emitted.
pub fn parse_result_page(
    key: &str,
    html: &str,
    schema: &FeatureSchema,
) -> Result<Vec<ResultCell>, StructuralError> {
    let record_id = record_id_from_key(key)?;
    let document = Html::parse_document(html);
    let table_not_found = || StructuralError::TableNotFound {
        key: key.to_string(),
    };

    let container = document
        .select(&RESULTS_CONTAINER)
        .next()
        .ok_or_else(table_not_found)?;
    let rows: Vec<ElementRef> = container.select(&ROW).collect();
    let (header, feature_rows) = rows.split_first().ok_or_else(table_not_found)?;

    let labels: Vec<String> = header
        .select(&CELL)
        .map(|cell| inner_text(cell.select(&NOBR).next().unwrap_or(cell)))
        .collect();

    if feature_rows.len() != schema.len() {
        return Err(StructuralError::RowCountMismatch {
            key: key.to_string(),
            expected: schema.len(),
            found: feature_rows.len(),
        });
    }

    let mut cells = Vec::with_capacity(labels.len() * schema.feature_count());
    for (row_index, row) in feature_rows.iter().enumerate() {
        let Some(feature) = schema.slot(row_index) else {
            continue;
        };
        let row_cells: Vec<ElementRef> = row.select(&CELL).collect();
        if row_cells.len() != labels.len() {
            return Err(StructuralError::ColumnCountMismatch {
                key: key.to_string(),
                row: row_index,
                expected: labels.len(),
                found: row_cells.len(),
            });
        }
        for (column, (cell, label)) in row_cells.iter().zip(&labels).enumerate() {
            let text = inner_text(cell.select(&BOLD).next().unwrap_or(*cell));
            let value = parse_count(&text).ok_or_else(|| StructuralError::BadCellValue {
                key: key.to_string(),
                row: row_index,
                column,
                value: text.clone(),
            })?;
            cells.push(ResultCell {
                record_id: record_id.clone(),
                feature,
                station_label: label.clone(),
                value,
            });
        }
    }

    debug!(
        "Parsed {} cells for {} stations from {}",
        cells.len(),
        labels.len(),
        key
    );
    Ok(cells)
}

/// Anchors leading to lower-level result pages.
pub fn child_region_links(html: &str) -> Vec<Link> {
    if !html.contains(CHILD_LINK_MARKER) {
        return Vec::new();
    }
    Html::parse_document(html)
        .select(&CHILD_LINK)
        .filter_map(|anchor| {
            let url = anchor.value().attr("href")?.trim();
            if url.is_empty() {
                return None;
            }
            Some(Link {
                url: url.to_string(),
                text: inner_text(anchor),
            })
        })
        .collect()
}

fn inner_text(element: ElementRef) -> String {
    element
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

// Counts may be printed with thousands separators (spaces, nbsp).
fn parse_count(text: &str) -> Option<u64> {
    let digits: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    digits.parse().ok()
}
