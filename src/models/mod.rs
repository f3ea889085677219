use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ── Price observation ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PriceUnit {
    Kg,
    Quintal,
}

impl PriceUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriceUnit::Kg => "kg",
            PriceUnit::Quintal => "quintal",
        }
    }

    /// Kilograms per unit.
    pub fn kilograms(&self) -> f64 {
        match self {
            PriceUnit::Kg => 1.0,
            PriceUnit::Quintal => 100.0,
        }
    }
}

impl FromStr for PriceUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "kg" => Ok(PriceUnit::Kg),
            "quintal" | "qtl" => Ok(PriceUnit::Quintal),
            other => Err(format!("unknown price unit {other:?}")),
        }
    }
}

impl fmt::Display for PriceUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a resolved observation came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    #[serde(alias = "live_fetch")]
    FreshFetch,
    Cache,
    Store,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::FreshFetch => "fresh_fetch",
            Source::Cache => "cache",
            Source::Store => "store",
        }
    }
}

/// How the extractor located the price.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Extraction {
    /// A row of a classified price table.
    Table,
    /// Currency-prefixed token found in free page text; low confidence.
    TextPattern,
}

impl Extraction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Extraction::Table => "table",
            Extraction::TextPattern => "text_pattern",
        }
    }
}

impl FromStr for Extraction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "table" => Ok(Extraction::Table),
            "text_pattern" => Ok(Extraction::TextPattern),
            other => Err(format!("unknown extraction {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceObservation {
    pub city: String,
    pub vegetable: String,
    pub price: f64,
    pub price_unit: PriceUnit,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub market_name: String,
    pub variety: Option<String>,
    pub currency: String,
    pub observed_date: NaiveDate,
    pub captured_at: NaiveDateTime,
    pub source: Source,
    pub extraction: Extraction,
    /// Original row text, kept for diagnosing layout drift.
    pub raw_fields: Vec<String>,
}

pub const CURRENCY_INR: &str = "INR";

impl PriceObservation {
    /// "2450 per quintal" → 24.5
    pub fn price_per_kg(&self) -> f64 {
        round2(self.price / self.price_unit.kilograms())
    }

    pub fn with_source(mut self, source: Source) -> Self {
        self.source = source;
        self
    }

    pub fn is_valid(&self) -> bool {
        self.price.is_finite() && self.price > 0.0
    }
}

pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

// ── Reference data ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VegetableDefinition {
    pub key: String,
    /// Label used in the remote commodity dropdown.
    pub display_name: String,
    /// Value of the remote commodity `<option>`.
    pub commodity_code: String,
    pub synonyms: Vec<String>,
    pub category: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CityDefinition {
    pub key: String,
    pub state_code: String,
    pub district_name: String,
    pub synonyms: Vec<String>,
}

/// One (city, vegetable) cell of the bulk refresh matrix.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ScrapeTarget {
    pub city: String,
    pub vegetable: String,
}

impl ScrapeTarget {
    pub fn new(city: impl Into<String>, vegetable: impl Into<String>) -> Self {
        Self { city: city.into(), vegetable: vegetable.into() }
    }
}

impl fmt::Display for ScrapeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.city, self.vegetable)
    }
}

// ── Form options ──────────────────────────────────────────────────────────────

/// A `<select>` option as read from the remote form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketOption {
    pub id: String,
    pub label: String,
}

impl MarketOption {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self { id: id.into(), label: label.into() }
    }
}

// ── Store statistics ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StoreStats {
    pub total_records: i64,
    pub unique_cities: i64,
    pub unique_vegetables: i64,
    pub latest_update: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VegetableTrend {
    pub vegetable: String,
    pub observations: i64,
    pub cities: i64,
    pub avg_price_per_kg: f64,
    pub min_price_per_kg: f64,
    pub max_price_per_kg: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrendSummary {
    pub days: u32,
    pub stats: StoreStats,
    pub vegetables: Vec<VegetableTrend>,
    pub supported_cities: Vec<String>,
    pub supported_vegetables: Vec<String>,
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn observation(city: &str, vegetable: &str, price: f64, captured_at: NaiveDateTime) -> PriceObservation {
        PriceObservation {
            city: city.into(),
            vegetable: vegetable.into(),
            price,
            price_unit: PriceUnit::Quintal,
            min_price: None,
            max_price: None,
            market_name: "Pune".into(),
            variety: Some("Local".into()),
            currency: CURRENCY_INR.into(),
            observed_date: captured_at.date(),
            captured_at,
            source: Source::FreshFetch,
            extraction: Extraction::Table,
            raw_fields: vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_price_per_kg() {
        let obs = fixtures::observation("pune", "onion", 2450.0, Utc::now().naive_utc());
        assert_eq!(obs.price_per_kg(), 24.5);

        let mut kg = obs.clone();
        kg.price_unit = PriceUnit::Kg;
        kg.price = 31.256;
        assert_eq!(kg.price_per_kg(), 31.26);
    }

    #[test]
    fn test_price_unit_parse() {
        assert_eq!("Quintal".parse::<PriceUnit>(), Ok(PriceUnit::Quintal));
        assert_eq!(" kg ".parse::<PriceUnit>(), Ok(PriceUnit::Kg));
        assert!("litre".parse::<PriceUnit>().is_err());
    }

    #[test]
    fn test_source_serde_accepts_live_fetch() {
        let s: Source = serde_json::from_str("\"live_fetch\"").unwrap();
        assert_eq!(s, Source::FreshFetch);
        assert_eq!(serde_json::to_string(&Source::FreshFetch).unwrap(), "\"fresh_fetch\"");
    }
}
