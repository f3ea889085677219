//! Heuristic price extraction from a results page of unknown layout.
//!
//! The remote page is not under our control, so nothing here returns an
//! error: any table, row or cell shape we do not recognise yields `None`.
//!
//! Primary path: find tables whose header mentions price vocabulary, then
//! take the first data row (≥ 6 cells) carrying a plausible quintal price.
//! Secondary path, only when the primary finds nothing: the first
//! currency-prefixed amount anywhere in the page text, tagged
//! [`Extraction::TextPattern`].

use crate::models::{CURRENCY_INR, Extraction, PriceObservation, PriceUnit, Source};
use chrono::{NaiveDate, NaiveDateTime};
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use super::cleaner::{
    PLAUSIBLE_QUINTAL_PRICE, clean_cell, first_plausible_price, first_rupee_amount, parse_date,
    parse_price, parse_strict_number,
};

const PRICE_HEADER_VOCABULARY: &[&str] =
    &["price", "modal", "min", "max", "quintal", "commodity", "variety"];

const MIN_DATA_CELLS: usize = 6;

// Column positions used when the header does not name market/variety.
const FALLBACK_MARKET_COL: usize = 3;
const FALLBACK_VARIETY_COL: usize = 5;

/// What the caller already knows about the query that produced the page.
#[derive(Debug, Clone)]
pub struct ExtractContext {
    pub city: String,
    pub vegetable: String,
    /// Market the query was submitted for; used when the row has no market column.
    pub market_name: String,
    /// Used when the row carries no parseable date.
    pub default_date: NaiveDate,
    pub captured_at: NaiveDateTime,
}

/// Column indexes discovered from a price table's header row.
#[derive(Debug, Default)]
struct Columns {
    market: Option<usize>,
    variety: Option<usize>,
    min: Option<usize>,
    max: Option<usize>,
    modal: Option<usize>,
    date: Option<usize>,
}

impl Columns {
    fn from_headers(headers: &[String]) -> Self {
        let find = |needle: &str| headers.iter().position(|h| h.contains(needle));
        Self {
            market: find("market"),
            variety: find("variety"),
            min: find("min"),
            max: find("max"),
            modal: find("modal"),
            date: find("date"),
        }
    }
}

struct Selectors {
    table: Selector,
    tr: Selector,
    cell: Selector,
    td: Selector,
}

impl Selectors {
    fn new() -> Option<Self> {
        Some(Self {
            table: Selector::parse("table").ok()?,
            tr: Selector::parse("tr").ok()?,
            cell: Selector::parse("th, td").ok()?,
            td: Selector::parse("td").ok()?,
        })
    }
}

pub fn extract_price(html: &str, ctx: &ExtractContext) -> Option<PriceObservation> {
    let doc = Html::parse_document(html);
    let sel = Selectors::new()?;

    if let Some(obs) = extract_from_tables(&doc, &sel, ctx) {
        return Some(obs);
    }

    extract_from_text(&doc, ctx)
}

fn extract_from_tables(doc: &Html, sel: &Selectors, ctx: &ExtractContext) -> Option<PriceObservation> {
    for (table_idx, table) in doc.select(&sel.table).enumerate() {
        let rows: Vec<ElementRef<'_>> = direct_rows(table, sel);
        if rows.len() < 2 {
            continue;
        }

        let headers: Vec<String> = rows[0]
            .select(&sel.cell)
            .map(|c| clean_cell(&c.text().collect::<String>()).to_lowercase())
            .collect();
        let joined = headers.join(" ");
        if !PRICE_HEADER_VOCABULARY.iter().any(|k| joined.contains(k)) {
            continue;
        }
        debug!("Table {}: price table, headers {:?}", table_idx + 1, headers);

        let cols = Columns::from_headers(&headers);
        for row in &rows[1..] {
            let cells: Vec<String> = row
                .select(&sel.td)
                .map(|c| clean_cell(&c.text().collect::<String>()))
                .collect();

            if cells.is_empty() {
                continue;
            }
            if cells.len() == 1 && cells[0].to_lowercase().contains("no data") {
                debug!("Table {}: source reports no data", table_idx + 1);
                continue;
            }
            if cells.len() < MIN_DATA_CELLS {
                continue;
            }

            if let Some(obs) = row_to_observation(&cells, &cols, ctx) {
                return Some(obs);
            }
        }
    }
    None
}

/// Rows belonging to `table` itself, not to tables nested inside it.
fn direct_rows<'a>(table: ElementRef<'a>, sel: &Selectors) -> Vec<ElementRef<'a>> {
    table
        .select(&sel.tr)
        .filter(|tr| {
            tr.ancestors()
                .filter_map(ElementRef::wrap)
                .find(|el| el.value().name() == "table")
                .is_some_and(|owner| owner.id() == table.id())
        })
        .collect()
}

fn row_to_observation(cells: &[String], cols: &Columns, ctx: &ExtractContext) -> Option<PriceObservation> {
    let cell = |idx: Option<usize>| idx.and_then(|i| cells.get(i));

    // A named modal column wins; otherwise the first plausible number in the row.
    let price = cell(cols.modal)
        .and_then(|c| parse_strict_number(c))
        .filter(|v| PLAUSIBLE_QUINTAL_PRICE.contains(v))
        .or_else(|| first_plausible_price(cells))?;

    let market_name = cell(cols.market)
        .or_else(|| cells.get(FALLBACK_MARKET_COL))
        .filter(|s| !s.is_empty() && parse_strict_number(s).is_none())
        .cloned()
        .unwrap_or_else(|| ctx.market_name.clone());

    let variety = cell(cols.variety)
        .or_else(|| cells.get(FALLBACK_VARIETY_COL))
        .filter(|s| !s.is_empty() && parse_strict_number(s).is_none())
        .cloned();

    let observed_date = cell(cols.date)
        .and_then(|c| parse_date(c))
        .or_else(|| cells.iter().find_map(|c| parse_date(c)))
        .unwrap_or(ctx.default_date);

    Some(PriceObservation {
        city: ctx.city.clone(),
        vegetable: ctx.vegetable.clone(),
        price,
        price_unit: PriceUnit::Quintal,
        min_price: cell(cols.min).and_then(|c| parse_price(c)),
        max_price: cell(cols.max).and_then(|c| parse_price(c)),
        market_name,
        variety,
        currency: CURRENCY_INR.to_string(),
        observed_date,
        captured_at: ctx.captured_at,
        source: Source::FreshFetch,
        extraction: Extraction::Table,
        raw_fields: cells.to_vec(),
    })
}

fn extract_from_text(doc: &Html, ctx: &ExtractContext) -> Option<PriceObservation> {
    let text = doc.root_element().text().collect::<Vec<_>>().join(" ");
    let price = first_rupee_amount(&text)?;
    debug!("No price table; low-confidence text match ₹{}", price);

    Some(PriceObservation {
        city: ctx.city.clone(),
        vegetable: ctx.vegetable.clone(),
        price,
        price_unit: PriceUnit::Kg,
        min_price: None,
        max_price: None,
        market_name: ctx.market_name.clone(),
        variety: None,
        currency: CURRENCY_INR.to_string(),
        observed_date: ctx.default_date,
        captured_at: ctx.captured_at,
        source: Source::FreshFetch,
        extraction: Extraction::TextPattern,
        raw_fields: Vec::new(),
    })
}
