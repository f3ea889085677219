use crate::models::{CityDefinition, VegetableDefinition};

// Commodity codes are only a first guess: the driver re-checks them against
// the live commodity dropdown and falls back to the display name.
const VEGETABLES: &[(&str, &str, &str, &str, &[&str])] = &[
    ("tomato", "Tomato", "78", "daily_essential", &["tomatoes", "tamatar", "tamator", "टमाटर"]),
    ("onion", "Onion", "23", "daily_essential", &["onions", "pyaz", "pyaaz", "kanda", "प्याज"]),
    ("potato", "Potato", "24", "daily_essential", &["potatoes", "aloo", "alu", "batata", "आलू"]),
];

const CITIES: &[(&str, &str, &str, &[&str])] = &[
    ("mumbai", "MH", "Mumbai", &["bombay", "navi mumbai"]),
    ("delhi", "DL", "Delhi", &["new delhi", "ncr"]),
    ("pune", "MH", "Pune", &["poona"]),
    ("bengaluru", "KK", "Bangalore", &["bangalore", "bengaluru urban"]),
    ("hyderabad", "TL", "Hyderabad", &["secunderabad"]),
    ("chennai", "TN", "Chennai", &["madras"]),
    ("kolkata", "WB", "Kolkata", &["calcutta"]),
    ("ahmedabad", "GJ", "Ahmedabad", &["amdavad"]),
    ("jaipur", "RJ", "Jaipur", &["pink city"]),
    ("lucknow", "UP", "Lucknow", &["lakhnau"]),
];

pub fn vegetables() -> Vec<VegetableDefinition> {
    VEGETABLES
        .iter()
        .map(|(key, name, code, category, synonyms)| VegetableDefinition {
            key: key.to_string(),
            display_name: name.to_string(),
            commodity_code: code.to_string(),
            synonyms: synonyms.iter().map(|s| s.to_string()).collect(),
            category: category.to_string(),
        })
        .collect()
}

pub fn cities() -> Vec<CityDefinition> {
    CITIES
        .iter()
        .map(|(key, state, district, synonyms)| CityDefinition {
            key: key.to_string(),
            state_code: state.to_string(),
            district_name: district.to_string(),
            synonyms: synonyms.iter().map(|s| s.to_string()).collect(),
        })
        .collect()
}
