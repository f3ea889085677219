//! Inbound tool surface: typed operations over the resolver and store, plus
//! a JSON dispatcher for RPC-style callers.
//!
//! Every answer is an envelope with `status` ok, unavailable or error; no
//! error ever escapes as anything but an `error` envelope.

use crate::error::ResolveError;
use crate::models::{round2, PriceObservation, TrendSummary};
use crate::resolver::{Freshness, Resolution, Resolver};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

pub const TOOL_NAMES: &[&str] = &[
    "get_vegetable_price",
    "compare_vegetable_prices",
    "get_city_prices",
    "get_market_trends",
    "list_supported",
    "clear_cache",
];

const DEFAULT_TREND_DAYS: u32 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Unavailable,
    Error,
}

/// Observation as handed to callers, with the per-kg price spelled out.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PricedObservation {
    #[serde(flatten)]
    pub observation: PriceObservation,
    pub price_per_kg: f64,
}

impl From<PriceObservation> for PricedObservation {
    fn from(observation: PriceObservation) -> Self {
        let price_per_kg = observation.price_per_kg();
        Self { observation, price_per_kg }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PriceAnswer {
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observation: Option<PricedObservation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Comparison {
    pub vegetable: String,
    pub observations: Vec<PricedObservation>,
    /// City with the lowest per-kg price.
    pub cheapest: Option<String>,
    pub average_price_per_kg: Option<f64>,
}

/// Canonical names with the alternative spellings each accepts.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SupportedName {
    pub key: String,
    pub synonyms: Vec<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Supported {
    pub cities: Vec<SupportedName>,
    pub vegetables: Vec<SupportedName>,
}

#[derive(Debug, Deserialize)]
struct PriceArgs {
    city: String,
    vegetable: String,
}

#[derive(Debug, Deserialize)]
struct VegetableArgs {
    vegetable: String,
}

#[derive(Debug, Deserialize)]
struct CityArgs {
    city: String,
}

#[derive(Debug, Default, Deserialize)]
struct TrendArgs {
    days: Option<u32>,
}

pub struct PriceTools {
    resolver: Arc<Resolver>,
}

impl PriceTools {
    pub fn new(resolver: Arc<Resolver>) -> Self {
        Self { resolver }
    }

    pub async fn resolve_price(&self, city: &str, vegetable: &str) -> PriceAnswer {
        match self.resolver.resolve(city, vegetable, Freshness::Api).await {
            Ok(Resolution::Found(obs)) => PriceAnswer {
                status: Status::Ok,
                observation: Some(obs.into()),
                message: None,
            },
            Ok(Resolution::Unavailable { city, vegetable, diagnostic }) => {
                if let Some(d) = diagnostic {
                    info!(%city, %vegetable, "Unavailable: {}", d);
                }
                PriceAnswer {
                    status: Status::Unavailable,
                    observation: None,
                    message: Some(format!("No recent {vegetable} price reported for {city}")),
                }
            }
            Err(e) => PriceAnswer {
                status: Status::Error,
                observation: None,
                message: Some(e.to_string()),
            },
        }
    }

    /// Latest stored price for `vegetable` in every city, cheapest first.
    pub fn compare_across_cities(&self, vegetable: &str) -> Result<Comparison, ResolveError> {
        let veg = self.resolver.catalog().require_vegetable(vegetable)?;

        let mut observations: Vec<PricedObservation> = self
            .resolver
            .store()
            .latest_across_cities(&veg.key)?
            .into_iter()
            .map(PricedObservation::from)
            .collect();
        observations.sort_by(|a, b| a.price_per_kg.total_cmp(&b.price_per_kg));

        let average_price_per_kg = (!observations.is_empty()).then(|| {
            round2(observations.iter().map(|o| o.price_per_kg).sum::<f64>() / observations.len() as f64)
        });
        Ok(Comparison {
            vegetable: veg.key.clone(),
            cheapest: observations.first().map(|o| o.observation.city.clone()),
            average_price_per_kg,
            observations,
        })
    }

    pub fn city_prices(&self, city: &str) -> Result<Vec<PricedObservation>, ResolveError> {
        let c = self.resolver.catalog().require_city(city)?;
        Ok(self
            .resolver
            .store()
            .latest_per_vegetable(&c.key)?
            .into_iter()
            .map(PricedObservation::from)
            .collect())
    }

    /// Store-derived aggregates; never scrapes.
    pub fn trends(&self, days: u32) -> Result<TrendSummary, ResolveError> {
        let store = self.resolver.store();
        let catalog = self.resolver.catalog();
        Ok(TrendSummary {
            days,
            stats: store.stats()?,
            vegetables: store.vegetable_trends(days)?,
            supported_cities: catalog.city_keys(),
            supported_vegetables: catalog.vegetable_keys(),
        })
    }

    pub fn supported(&self) -> Supported {
        let catalog = self.resolver.catalog();
        Supported {
            cities: catalog
                .cities()
                .iter()
                .map(|c| SupportedName { key: c.key.clone(), synonyms: c.synonyms.clone() })
                .collect(),
            vegetables: catalog
                .vegetables()
                .iter()
                .map(|v| SupportedName { key: v.key.clone(), synonyms: v.synonyms.clone() })
                .collect(),
        }
    }

    /// Drop every cached answer; returns how many entries were held.
    pub fn clear_cache(&self) -> usize {
        let n = self.resolver.cache().clear();
        info!("Cleared {} cached prices", n);
        n
    }

    /// Dispatch a named tool with JSON arguments; always answers with an envelope.
    pub async fn call_tool(&self, name: &str, args: &Value) -> Value {
        let result = match name {
            "get_vegetable_price" => match parse_args::<PriceArgs>(args) {
                Ok(a) => return to_value(&self.resolve_price(&a.city, &a.vegetable).await),
                Err(e) => Err(e),
            },
            "compare_vegetable_prices" => parse_args::<VegetableArgs>(args)
                .and_then(|a| self.compare_across_cities(&a.vegetable).map_err(|e| e.to_string()))
                .map(|c| to_value(&c)),
            "get_city_prices" => parse_args::<CityArgs>(args).and_then(|a| {
                let city = a.city.clone();
                self.city_prices(&a.city)
                    .map(|obs| json!({ "city": city, "observations": obs }))
                    .map_err(|e| e.to_string())
            }),
            "get_market_trends" => {
                let days = if args.is_null() {
                    DEFAULT_TREND_DAYS
                } else {
                    parse_args::<TrendArgs>(args).ok().and_then(|a| a.days).unwrap_or(DEFAULT_TREND_DAYS)
                };
                self.trends(days).map(|t| to_value(&t)).map_err(|e| e.to_string())
            }
            "list_supported" => Ok(to_value(&self.supported())),
            "clear_cache" => Ok(json!({ "cleared": self.clear_cache() })),
            other => Err(format!("unknown tool {other:?}; available: {}", TOOL_NAMES.join(", "))),
        };

        match result {
            Ok(Value::Object(mut body)) => {
                body.insert("status".into(), json!(Status::Ok));
                Value::Object(body)
            }
            Ok(other) => json!({ "status": Status::Ok, "result": other }),
            Err(message) => {
                warn!(tool = name, "Tool call failed: {}", message);
                json!({ "status": Status::Error, "message": message })
            }
        }
    }
}

fn parse_args<T: DeserializeOwned>(args: &Value) -> Result<T, String> {
    serde_json::from_value(args.clone()).map_err(|e| format!("invalid arguments: {e}"))
}

fn to_value<T: Serialize>(v: &T) -> Value {
    serde_json::to_value(v).unwrap_or_else(|e| json!({ "status": Status::Error, "message": e.to_string() }))
}
