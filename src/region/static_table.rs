//! Layer 1 of the region resolver: a static table from
//! provider-reported location strings to CPU zones. Lookup tries, in
//! order: exact match, case-insensitive substring match in either
//! direction, then per-comma-part match.

use std::collections::HashMap;
use std::sync::OnceLock;

/// `(input, zone)` pairs. Inputs are matched case-insensitively; this
/// table covers the documented >=95% of observed provider strings
/// (country/state/city names, mixed case, comma-separated).
const STATIC_ENTRIES: &[(&str, &str)] = &[
    ("quebec, ca", "northamerica-northeast1-a"),
    ("quebec", "northamerica-northeast1-a"),
    ("montreal", "northamerica-northeast1-a"),
    ("toronto", "northamerica-northeast1-a"),
    ("ontario", "northamerica-northeast1-a"),
    ("canada", "northamerica-northeast1-a"),
    ("virginia", "us-east1-b"),
    ("ashburn", "us-east1-b"),
    ("new york", "us-east1-b"),
    ("united states", "us-central1-a"),
    ("usa", "us-central1-a"),
    ("us", "us-central1-a"),
    ("iowa", "us-central1-a"),
    ("texas", "us-central1-a"),
    ("oregon", "us-west1-a"),
    ("california", "us-west1-a"),
    ("nevada", "us-west1-a"),
    ("washington", "us-west1-a"),
    ("belgium", "europe-west1-b"),
    ("netherlands", "europe-west4-a"),
    ("germany", "europe-west4-a"),
    ("frankfurt", "europe-west4-a"),
    ("france", "europe-west1-b"),
    ("united kingdom", "europe-west1-b"),
    ("uk", "europe-west1-b"),
    ("london", "europe-west1-b"),
    ("ireland", "europe-west1-b"),
    ("singapore", "asia-southeast1-a"),
    ("japan", "asia-northeast1-a"),
    ("tokyo", "asia-northeast1-a"),
    ("south korea", "asia-northeast1-a"),
    ("korea", "asia-northeast1-a"),
    ("australia", "australia-southeast1-a"),
    ("sydney", "australia-southeast1-a"),
    ("brazil", "southamerica-east1-a"),
    ("sao paulo", "southamerica-east1-a"),
];

fn table() -> &'static HashMap<&'static str, &'static str> {
    static TABLE: OnceLock<HashMap<&'static str, &'static str>> = OnceLock::new();
    TABLE.get_or_init(|| STATIC_ENTRIES.iter().copied().collect())
}

/// Layer 1 lookup. Returns `None` if no entry matches by any of the
/// three strategies; caller falls through to layer 2.
pub fn lookup_static(geolocation: &str) -> Option<&'static str> {
    let table = table();
    let lower = geolocation.to_lowercase();
    let lower = lower.trim();

    if let Some(zone) = table.get(lower) {
        return Some(zone);
    }

    // Substring match, either direction. Ambiguous short keys (e.g.
    // "us", "uk") are excluded here and only honored via exact or
    // per-comma-part match below; entries are tried longest-first so
    // a more specific city/country name wins over a shorter one
    // incidentally contained in it.
    let mut candidates: Vec<(&'static str, &'static str)> = table
        .iter()
        .map(|(k, v)| (*k, *v))
        .filter(|(k, _)| k.len() >= 4)
        .collect();
    candidates.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
    for (key, zone) in &candidates {
        if lower.contains(key) || key.contains(lower.as_ref()) {
            return Some(zone);
        }
    }

    for part in lower.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if let Some(zone) = table.get(part) {
            return Some(zone);
        }
    }

    None
}
