use chrono::NaiveDate;
use regex::Regex;
use std::sync::LazyLock;

/// Quintal prices outside this band are header noise, serial numbers or
/// arrivals rather than a vegetable's modal price.
pub const PLAUSIBLE_QUINTAL_PRICE: std::ops::RangeInclusive<f64> = 100.0..=10_000.0;

static STRICT_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+(?:,\d+)*(?:\.\d+)?$").expect("static regex"));

static RUPEE_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:₹|Rs\.?|INR)\s*(\d+(?:,\d+)*(?:\.\d+)?)").expect("static regex")
});

// ── Parsers ───────────────────────────────────────────────────────────────────

/// A whole cell that is just a number, with optional thousands separators.
/// "2,450" → 2450.0 | "1 200.50" → 1200.5 | "2450 Rs" → None
pub fn parse_strict_number(s: &str) -> Option<f64> {
    let compact: String = s.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() || !STRICT_NUMBER.is_match(&compact) {
        return None;
    }
    compact.replace(',', "").parse().ok()
}

/// Lenient price parse for cells under a known price header.
/// "NGN 1,234.56" style noise is stripped; dashes and N/A mean absent.
pub fn parse_price(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() || s == "N/A" || s == "NA" || s == "-" || s == "—" {
        return None;
    }
    let cleaned: String = s
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    cleaned.parse().ok().filter(|v: &f64| *v > 0.0)
}

/// First plausible quintal price among `cells`, scanning left to right.
pub fn first_plausible_price<'a, I>(cells: I) -> Option<f64>
where
    I: IntoIterator<Item = &'a String>,
{
    cells
        .into_iter()
        .filter_map(|c| parse_strict_number(c))
        .find(|v| PLAUSIBLE_QUINTAL_PRICE.contains(v))
}

/// First currency-prefixed amount in free text.
pub fn first_rupee_amount(text: &str) -> Option<f64> {
    RUPEE_TOKEN
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .filter_map(|m| m.as_str().replace(',', "").parse::<f64>().ok())
        .find(|v| *v > 0.0)
}

/// Dates as the market site prints them ("08 Aug 2025", "08-Aug-2025") or ISO.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    for fmt in ["%d %b %Y", "%d-%b-%Y", "%Y-%m-%d", "%d/%m/%Y", "%b %d, %Y"] {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some(d);
        }
    }
    None
}

/// Date format the search form expects in its from/to fields.
pub fn format_form_date(d: NaiveDate) -> String {
    d.format("%d-%b-%Y").to_string()
}

/// Collapse runs of whitespace (including nbsp) inside cell text.
pub fn clean_cell(s: &str) -> String {
    s.split(|c: char| c.is_whitespace() || c == '\u{a0}')
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

// ── Tests ─────────────────────────────────────────────────────────────────────
