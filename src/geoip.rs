//! GeoIP resolution (C1, §4.1).
//!
//! A city-level database is not bundled with this core — `GEOIP_DB_PATH` is
//! accepted as configuration and logged, but every lookup falls through to
//! the deterministic mock table below, translated from the original
//! `_mock_resolve` (`examples/original_source/waf-engine/services/geoip_resolver.py`).
//! The mock is deterministic so that broadcast coordinates are stable across
//! retries, even for private/simulator IP ranges.

use crate::model::GeoAttribution;

struct MockEntry {
    prefix: &'static str,
    code: &'static str,
    name: &'static str,
    city: &'static str,
    lat: f64,
    lon: f64,
}

const MOCK_TABLE: &[MockEntry] = &[
    MockEntry { prefix: "10.1.", code: "US", name: "United States", city: "San Francisco", lat: 37.77, lon: -122.41 },
    MockEntry { prefix: "10.2.", code: "CN", name: "China", city: "Shanghai", lat: 31.23, lon: 121.47 },
    MockEntry { prefix: "10.3.", code: "RU", name: "Russia", city: "Moscow", lat: 55.75, lon: 37.61 },
    MockEntry { prefix: "10.4.", code: "BR", name: "Brazil", city: "Sao Paulo", lat: -23.55, lon: -46.63 },
    MockEntry { prefix: "10.5.", code: "DE", name: "Germany", city: "Berlin", lat: 52.52, lon: 13.40 },
    MockEntry { prefix: "10.6.", code: "IN", name: "India", city: "Mumbai", lat: 19.07, lon: 72.87 },
    MockEntry { prefix: "10.7.", code: "JP", name: "Japan", city: "Tokyo", lat: 35.67, lon: 139.65 },
    MockEntry { prefix: "10.8.", code: "AU", name: "Australia", city: "Sydney", lat: -33.86, lon: 151.20 },
    MockEntry { prefix: "10.9.", code: "FR", name: "France", city: "Paris", lat: 48.85, lon: 2.35 },
    MockEntry { prefix: "10.10.", code: "GB", name: "United Kingdom", city: "London", lat: 51.50, lon: -0.12 },
];

/// Resolves source IPs to a deterministic mock `GeoAttribution`.
///
/// A real MaxMind-style reader is a natural extension point (`db_path` is
/// kept so one can be wired in later without changing the public contract),
/// but is out of scope for this core: resolution always falls through to the
/// mock table.
pub struct GeoIpResolver {
    db_path: String,
    loaded: bool,
}

impl GeoIpResolver {
    pub fn new(db_path: impl Into<String>) -> Self {
        let db_path = db_path.into();
        let loaded = std::path::Path::new(&db_path).exists();
        if !loaded {
            tracing::info!(path = %db_path, "GeoIP database not present, using deterministic mock resolver");
        }
        GeoIpResolver { db_path, loaded }
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn db_path(&self) -> &str {
        &self.db_path
    }

    pub fn resolve(&self, ip_address: &str) -> GeoAttribution {
        mock_resolve(ip_address)
    }
}

fn mock_resolve(ip_address: &str) -> GeoAttribution {
    for entry in MOCK_TABLE {
        if ip_address.starts_with(entry.prefix) {
            return GeoAttribution {
                country_code: entry.code.to_string(),
                country_name: entry.name.to_string(),
                city: entry.city.to_string(),
                lat: entry.lat,
                lon: entry.lon,
                is_private: false,
            };
        }
    }

    let val: i64 = ip_address
        .split('.')
        .filter_map(|p| p.parse::<i64>().ok())
        .sum();
    let val = if val == 0 && !ip_address.contains('.') {
        ip_address.len() as i64
    } else {
        val
    };

    let entry = &MOCK_TABLE[(val.rem_euclid(MOCK_TABLE.len() as i64)) as usize];
    GeoAttribution {
        country_code: entry.code.to_string(),
        country_name: entry.name.to_string(),
        city: entry.city.to_string(),
        lat: entry.lat,
        lon: entry.lon,
        is_private: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_known_prefix() {
        let r = GeoIpResolver::new("/nonexistent/geoip.mmdb");
        let geo = r.resolve("10.1.1.10");
        assert_eq!(geo.country_code, "US");
        assert_eq!(geo.city, "San Francisco");
        assert!((-90.0..=90.0).contains(&geo.lat));
        assert!((-180.0..=180.0).contains(&geo.lon));
    }

    #[test]
    fn resolution_is_deterministic() {
        let r = GeoIpResolver::new("/nonexistent/geoip.mmdb");
        let a = r.resolve("203.0.113.7");
        let b = r.resolve("203.0.113.7");
        assert_eq!(a, b);
    }

    #[test]
    fn fallback_stays_in_table() {
        let r = GeoIpResolver::new("/nonexistent/geoip.mmdb");
        let geo = r.resolve("203.0.113.7");
        assert!(MOCK_TABLE.iter().any(|e| e.code == geo.country_code));
    }
}
