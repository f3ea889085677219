//! CSV export of stored observations.

use crate::models::PriceObservation;
use anyhow::{Context, Result};
use serde::Serialize;
use std::io::Write;
use std::path::Path;
use tracing::info;

/// One flat CSV line; raw row cells are dropped.
#[derive(Debug, Serialize)]
struct ExportRow<'a> {
    city: &'a str,
    vegetable: &'a str,
    market: &'a str,
    variety: &'a str,
    observed_date: String,
    price: f64,
    price_unit: &'static str,
    min_price: Option<f64>,
    max_price: Option<f64>,
    price_per_kg: f64,
    currency: &'a str,
    captured_at: String,
    extraction: &'static str,
}

impl<'a> From<&'a PriceObservation> for ExportRow<'a> {
    fn from(o: &'a PriceObservation) -> Self {
        Self {
            city: &o.city,
            vegetable: &o.vegetable,
            market: &o.market_name,
            variety: o.variety.as_deref().unwrap_or(""),
            observed_date: o.observed_date.format("%Y-%m-%d").to_string(),
            price: o.price,
            price_unit: o.price_unit.as_str(),
            min_price: o.min_price,
            max_price: o.max_price,
            price_per_kg: o.price_per_kg(),
            currency: &o.currency,
            captured_at: o.captured_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            extraction: o.extraction.as_str(),
        }
    }
}

pub fn write_csv<W: Write>(out: W, observations: &[PriceObservation]) -> Result<usize> {
    let mut writer = csv::Writer::from_writer(out);
    for obs in observations {
        writer.serialize(ExportRow::from(obs))?;
    }
    writer.flush()?;
    Ok(observations.len())
}

pub fn export_to_path(path: &Path, observations: &[PriceObservation]) -> Result<usize> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).with_context(|| format!("Cannot create {:?}", parent))?;
    }
    let file = std::fs::File::create(path).with_context(|| format!("Cannot create {:?}", path))?;
    let n = write_csv(file, observations)?;
    info!("Exported {} observations to {:?}", n, path);
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::observation;
    use chrono::NaiveDate;

    #[test]
    fn test_write_csv() {
        let at = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap().and_hms_opt(9, 30, 0).unwrap();
        let rows = vec![observation("pune", "onion", 2450.0, at)];

        let mut buf = Vec::new();
        assert_eq!(write_csv(&mut buf, &rows).unwrap(), 1);
        let text = String::from_utf8(buf).unwrap();
        let mut lines = text.lines();

        assert_eq!(
            lines.next().unwrap(),
            "city,vegetable,market,variety,observed_date,price,price_unit,min_price,max_price,\
             price_per_kg,currency,captured_at,extraction"
        );
        assert_eq!(
            lines.next().unwrap(),
            "pune,onion,Pune,Local,2024-03-10,2450.0,quintal,,,24.5,INR,2024-03-10 09:30:00,table"
        );
        assert!(lines.next().is_none());
    }

    #[test]
    fn test_empty_export_has_no_rows() {
        let mut buf = Vec::new();
        assert_eq!(write_csv(&mut buf, &[]).unwrap(), 0);
        assert!(buf.is_empty());
    }
}
