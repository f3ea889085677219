//! Free-text city/vegetable names → canonical keys and remote identifiers.
//!
//! Matching is case-insensitive on trimmed input: canonical key first, then
//! the synonym list. No fuzzy matching.

mod reference;

use crate::error::ResolveError;
use crate::models::{CityDefinition, ScrapeTarget, VegetableDefinition};

/// Immutable reference data, built once at startup and shared by reference.
#[derive(Debug, Clone)]
pub struct Catalog {
    vegetables: Vec<VegetableDefinition>,
    cities: Vec<CityDefinition>,
}

impl Catalog {
    pub fn new(vegetables: Vec<VegetableDefinition>, cities: Vec<CityDefinition>) -> Self {
        Self { vegetables, cities }
    }

    pub fn builtin() -> Self {
        Self::new(reference::vegetables(), reference::cities())
    }

    pub fn normalize_vegetable(&self, text: &str) -> Option<&VegetableDefinition> {
        let needle = fold(text)?;
        self.vegetables
            .iter()
            .find(|v| v.key == needle)
            .or_else(|| {
                self.vegetables
                    .iter()
                    .find(|v| v.synonyms.iter().any(|s| fold(s).as_deref() == Some(&needle)))
            })
    }

    pub fn normalize_city(&self, text: &str) -> Option<&CityDefinition> {
        let needle = fold(text)?;
        self.cities
            .iter()
            .find(|c| c.key == needle)
            .or_else(|| {
                self.cities
                    .iter()
                    .find(|c| c.synonyms.iter().any(|s| fold(s).as_deref() == Some(&needle)))
            })
    }

    /// Like `normalize_city`, but an unknown name is an error naming the
    /// supported cities.
    pub fn require_city(&self, text: &str) -> Result<&CityDefinition, ResolveError> {
        self.normalize_city(text)
            .ok_or_else(|| ResolveError::unknown_city(text, self.city_keys()))
    }

    pub fn require_vegetable(&self, text: &str) -> Result<&VegetableDefinition, ResolveError> {
        self.normalize_vegetable(text)
            .ok_or_else(|| ResolveError::unknown_vegetable(text, self.vegetable_keys()))
    }

    pub fn city_keys(&self) -> Vec<String> {
        self.cities.iter().map(|c| c.key.clone()).collect()
    }

    pub fn vegetable_keys(&self) -> Vec<String> {
        self.vegetables.iter().map(|v| v.key.clone()).collect()
    }

    #[cfg(test)]
    pub fn vegetable(&self, key: &str) -> Option<&VegetableDefinition> {
        self.vegetables.iter().find(|v| v.key == key)
    }

    #[cfg(test)]
    pub fn city(&self, key: &str) -> Option<&CityDefinition> {
        self.cities.iter().find(|c| c.key == key)
    }

    pub fn vegetables(&self) -> &[VegetableDefinition] {
        &self.vegetables
    }

    pub fn cities(&self) -> &[CityDefinition] {
        &self.cities
    }

    /// Every city × every vegetable, in catalog order.
    pub fn refresh_matrix(&self) -> Vec<ScrapeTarget> {
        self.cities
            .iter()
            .flat_map(|c| {
                self.vegetables
                    .iter()
                    .map(move |v| ScrapeTarget::new(c.key.clone(), v.key.clone()))
            })
            .collect()
    }
}

fn fold(s: &str) -> Option<String> {
    let s = s.trim();
    if s.is_empty() { None } else { Some(s.to_lowercase()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_key_and_synonym_resolves() {
        let catalog = Catalog::builtin();

        for veg in catalog.vegetables() {
            let inputs = std::iter::once(veg.key.clone()).chain(veg.synonyms.iter().cloned());
            for input in inputs {
                for variant in [input.clone(), input.to_uppercase(), format!("  {input}\t")] {
                    let found = catalog.normalize_vegetable(&variant);
                    assert_eq!(found.map(|v| v.key.as_str()), Some(veg.key.as_str()), "{variant:?}");
                }
            }
        }

        for city in catalog.cities() {
            let inputs = std::iter::once(city.key.clone()).chain(city.synonyms.iter().cloned());
            for input in inputs {
                for variant in [input.clone(), input.to_uppercase(), format!(" {input} ")] {
                    let found = catalog.normalize_city(&variant);
                    assert_eq!(found.map(|c| c.key.as_str()), Some(city.key.as_str()), "{variant:?}");
                }
            }
        }
    }

    #[test]
    fn test_unknown_names() {
        let catalog = Catalog::builtin();
        assert!(catalog.normalize_vegetable("dragonfruit").is_none());
        assert!(catalog.normalize_vegetable("tomatoe").is_none());
        assert!(catalog.normalize_vegetable("   ").is_none());
        assert!(catalog.normalize_city("atlantis").is_none());
        assert!(catalog.normalize_city("").is_none());
    }

    #[test]
    fn test_city_codes() {
        let catalog = Catalog::builtin();
        let blr = catalog.normalize_city("Bangalore").unwrap();
        assert_eq!(blr.key, "bengaluru");
        assert_eq!(blr.state_code, "KK");

        let pune = catalog.normalize_city("PUNE").unwrap();
        assert_eq!((pune.state_code.as_str(), pune.district_name.as_str()), ("MH", "Pune"));
    }

    #[test]
    fn test_transliterations() {
        let catalog = Catalog::builtin();
        assert_eq!(catalog.normalize_vegetable("Kanda").unwrap().key, "onion");
        assert_eq!(catalog.normalize_vegetable("आलू").unwrap().key, "potato");
        assert_eq!(catalog.normalize_vegetable("tamatar").unwrap().key, "tomato");
    }

    #[test]
    fn test_unknown_name_error_lists_supported() {
        let catalog = Catalog::builtin();
        let err = catalog.require_city("Gotham").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("\"Gotham\""), "{msg}");
        assert!(msg.contains("mumbai, delhi, pune"), "{msg}");

        let err = catalog.require_vegetable("durian").unwrap_err();
        assert!(err.to_string().ends_with("(supported: tomato, onion, potato)"));
        assert_eq!(catalog.require_vegetable(" Kanda ").unwrap().key, "onion");
    }

    #[test]
    fn test_refresh_matrix() {
        let catalog = Catalog::builtin();
        let matrix = catalog.refresh_matrix();
        assert_eq!(matrix.len(), catalog.cities().len() * catalog.vegetables().len());
        assert_eq!(matrix[0], ScrapeTarget::new("mumbai", "tomato"));
    }
}
