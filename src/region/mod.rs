//! Region-proximity resolver (spec.md section 4.1): maps a GPU's
//! advertised geolocation string to the nearest CPU zone through
//! three layers, tried in order, first hit wins.

mod static_table;

use crate::error::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::{debug, info};

pub use static_table::lookup_static;

/// Which layer produced a resolution; logged alongside every call per
/// spec.md section 4.1 ("every resolution is logged with the layer
/// used").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionLayer {
    Static,
    IpGeo,
    ContinentFallback,
    GlobalDefault,
}

#[derive(Debug, Clone)]
pub struct Resolution {
    pub zone: String,
    pub layer: ResolutionLayer,
    /// Great-circle distance in km to the matched zone center; only
    /// meaningful for [`ResolutionLayer::IpGeo`].
    pub distance_km: Option<f64>,
}

/// Queries an external IP-geolocation service. Failure is non-fatal:
/// the resolver falls through to the continent layer.
#[async_trait]
pub trait IpGeo: Send + Sync + 'static {
    async fn lookup(&self, ip: &str) -> Result<(f64, f64)>;
}

/// HTTP-backed [`IpGeo`] with a 2s timeout, matching the adapter
/// contract in spec.md section 6.
pub struct HttpIpGeo {
    client: reqwest::Client,
    endpoint_template: String,
}

impl HttpIpGeo {
    pub fn new(endpoint_template: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(2))
                .build()
                .expect("reqwest client build"),
            endpoint_template: endpoint_template.into(),
        }
    }
}

#[async_trait]
impl IpGeo for HttpIpGeo {
    async fn lookup(&self, ip: &str) -> Result<(f64, f64)> {
        #[derive(serde::Deserialize)]
        struct Resp {
            lat: f64,
            lon: f64,
        }

        let url = self.endpoint_template.replace("{ip}", ip);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| crate::error::Error::Other(format!("ip geo request failed: {e}")))?
            .json::<Resp>()
            .await
            .map_err(|e| crate::error::Error::Other(format!("ip geo parse failed: {e}")))?;
        Ok((resp.lat, resp.lon))
    }
}

/// `(zone, lat, lon)` centers used by layer 2's nearest-zone search
/// and layer 3's continental defaults.
const ZONE_CENTERS: &[(&str, f64, f64)] = &[
    ("us-central1-a", 41.2619, -95.8608),
    ("us-east1-b", 33.1960, -80.0131),
    ("us-west1-a", 45.5946, -121.1787),
    ("northamerica-northeast1-a", 45.5017, -73.5673),
    ("europe-west1-b", 50.8503, 4.3517),
    ("europe-west4-a", 53.4386, 6.8355),
    ("asia-southeast1-a", 1.3521, 103.8198),
    ("asia-northeast1-a", 35.6762, 139.6503),
    ("australia-southeast1-a", -33.8688, 151.2093),
    ("southamerica-east1-a", -23.5505, -46.6333),
];

const GLOBAL_DEFAULT_ZONE: &str = "us-central1-a";

/// Maximum distance (km) layer 2 will accept before discarding the
/// result, per spec.md section 4.1.
const MAX_IP_GEO_DISTANCE_KM: f64 = 500.0;

const CONTINENT_DEFAULTS: &[(&str, &str)] = &[
    ("north america", "us-central1-a"),
    ("canada", "northamerica-northeast1-a"),
    ("europe", "europe-west1-b"),
    ("asia", "asia-southeast1-a"),
    ("oceania", "australia-southeast1-a"),
    ("australia", "australia-southeast1-a"),
    ("south america", "southamerica-east1-a"),
    ("africa", "europe-west1-b"),
];

fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    const EARTH_RADIUS_KM: f64 = 6371.0;
    let (lat1, lon1, lat2, lon2) = (
        lat1.to_radians(),
        lon1.to_radians(),
        lat2.to_radians(),
        lon2.to_radians(),
    );
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();
    EARTH_RADIUS_KM * c
}

/// Nearest zone center to `(lat, lon)`, with distance in km.
pub fn nearest_zone(lat: f64, lon: f64) -> (String, f64) {
    ZONE_CENTERS
        .iter()
        .map(|(zone, zlat, zlon)| (zone.to_string(), haversine_km(lat, lon, *zlat, *zlon)))
        .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap())
        .expect("ZONE_CENTERS is non-empty")
}

fn continent_fallback(geolocation: &str) -> String {
    let lower = geolocation.to_lowercase();
    for (hint, zone) in CONTINENT_DEFAULTS {
        if lower.contains(hint) {
            return zone.to_string();
        }
    }
    GLOBAL_DEFAULT_ZONE.to_string()
}

/// Resolves a provider-reported geolocation string to a CPU zone.
/// Holds the small, write-rarely learned-L2 cache described in
/// SPEC_FULL.md; the static table itself is immutable and needs no
/// lock.
pub struct RegionResolver {
    ip_geo: Option<Box<dyn IpGeo>>,
    learned: Mutex<HashMap<String, String>>,
}

impl RegionResolver {
    pub fn new(ip_geo: Option<Box<dyn IpGeo>>) -> Self {
        Self {
            ip_geo,
            learned: Mutex::new(HashMap::new()),
        }
    }

    pub fn without_ip_geo() -> Self {
        Self::new(None)
    }

    /// `resolve(geolocation_string, optional gpu_public_ip) -> cpu_zone`.
    /// Three layers tried in order; the first hit wins. L2 network
    /// errors fall through to L3 rather than raising; L3 never fails.
    pub async fn resolve(&self, geolocation: &str, gpu_public_ip: Option<&str>) -> Resolution {
        if let Some(cached) = self.learned.lock().get(geolocation).cloned() {
            debug!(geolocation, zone = %cached, "region resolved from learned cache");
            return Resolution {
                zone: cached,
                layer: ResolutionLayer::Static,
                distance_km: None,
            };
        }

        if let Some(zone) = lookup_static(geolocation) {
            let res = Resolution {
                zone: zone.to_string(),
                layer: ResolutionLayer::Static,
                distance_km: None,
            };
            self.log_resolution(geolocation, &res);
            return res;
        }

        if let (Some(ip_geo), Some(ip)) = (&self.ip_geo, gpu_public_ip) {
            match ip_geo.lookup(ip).await {
                Ok((lat, lon)) => {
                    let (zone, distance) = nearest_zone(lat, lon);
                    if distance <= MAX_IP_GEO_DISTANCE_KM {
                        let res = Resolution {
                            zone: zone.clone(),
                            layer: ResolutionLayer::IpGeo,
                            distance_km: Some(distance),
                        };
                        self.log_resolution(geolocation, &res);
                        self.learned.lock().insert(geolocation.to_string(), zone);
                        return res;
                    }
                    debug!(distance, "ip-geo match discarded: beyond 500km threshold");
                }
                Err(e) => {
                    debug!(error = %e, "ip-geo lookup failed, falling through to continent layer");
                }
            }
        }

        let zone = continent_fallback(geolocation);
        let layer = if zone == GLOBAL_DEFAULT_ZONE && !geolocation.to_lowercase().contains("north america")
        {
            ResolutionLayer::GlobalDefault
        } else {
            ResolutionLayer::ContinentFallback
        };
        let res = Resolution {
            zone,
            layer,
            distance_km: None,
        };
        self.log_resolution(geolocation, &res);
        res
    }

    fn log_resolution(&self, geolocation: &str, res: &Resolution) {
        info!(
            geolocation,
            zone = %res.zone,
            layer = ?res.layer,
            distance_km = res.distance_km,
            "region resolved"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedIpGeo {
        coord: (f64, f64),
    }

    #[async_trait]
    impl IpGeo for FixedIpGeo {
        async fn lookup(&self, _ip: &str) -> Result<(f64, f64)> {
            Ok(self.coord)
        }
    }

    struct FailingIpGeo;

    #[async_trait]
    impl IpGeo for FailingIpGeo {
        async fn lookup(&self, _ip: &str) -> Result<(f64, f64)> {
            Err(crate::error::Error::Other("network down".into()))
        }
    }

    #[tokio::test]
    async fn s1_static_table_hit_quebec() {
        let resolver = RegionResolver::without_ip_geo();
        let res = resolver.resolve("Quebec, CA", None).await;
        assert_eq!(res.zone, "northamerica-northeast1-a");
        assert_eq!(res.layer, ResolutionLayer::Static);
    }

    #[tokio::test]
    async fn ip_geo_used_when_static_misses_and_within_threshold() {
        let resolver = RegionResolver::new(Some(Box::new(FixedIpGeo {
            coord: (50.8503, 4.3517), // Brussels, matches europe-west1-b center exactly
        })));
        let res = resolver.resolve("totally-unknown-locale-xyz", Some("1.2.3.4")).await;
        assert_eq!(res.zone, "europe-west1-b");
        assert_eq!(res.layer, ResolutionLayer::IpGeo);
        assert!(res.distance_km.unwrap() < 1.0);
    }

    #[tokio::test]
    async fn ip_geo_beyond_threshold_falls_through() {
        // Middle of the Pacific: far from every zone center.
        let resolver = RegionResolver::new(Some(Box::new(FixedIpGeo {
            coord: (0.0, -160.0),
        })));
        let res = resolver.resolve("nowhere-in-particular", Some("1.2.3.4")).await;
        assert_ne!(res.layer, ResolutionLayer::IpGeo);
    }

    #[tokio::test]
    async fn ip_geo_network_error_falls_through_without_raising() {
        let resolver = RegionResolver::new(Some(Box::new(FailingIpGeo)));
        let res = resolver.resolve("unknown place", Some("1.2.3.4")).await;
        // Must not panic/error; continent fallback or global default.
        assert!(matches!(
            res.layer,
            ResolutionLayer::ContinentFallback | ResolutionLayer::GlobalDefault
        ));
    }

    #[tokio::test]
    async fn continent_fallback_for_unmatched_but_hinted_input() {
        let resolver = RegionResolver::without_ip_geo();
        let res = resolver.resolve("Some City, Europe", None).await;
        assert_eq!(res.zone, "europe-west1-b");
        assert_eq!(res.layer, ResolutionLayer::ContinentFallback);
    }

    #[tokio::test]
    async fn global_default_never_fails() {
        let resolver = RegionResolver::without_ip_geo();
        let res = resolver.resolve("xyzzy unknown nowhere", None).await;
        assert!(!res.zone.is_empty());
    }

    #[tokio::test]
    async fn learned_cache_short_circuits_subsequent_calls() {
        let resolver = RegionResolver::new(Some(Box::new(FixedIpGeo {
            coord: (50.8503, 4.3517),
        })));
        let first = resolver.resolve("learnable-locale", Some("1.2.3.4")).await;
        assert_eq!(first.layer, ResolutionLayer::IpGeo);

        // Second call must not touch ip_geo again; the Static-tagged
        // cache hit path skips the network call entirely.
        let second = resolver.resolve("learnable-locale", None).await;
        assert_eq!(second.zone, first.zone);
    }

    #[test]
    fn haversine_zero_distance_for_identical_points() {
        assert!(haversine_km(10.0, 10.0, 10.0, 10.0) < 1e-6);
    }
}
