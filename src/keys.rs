//! Key construction for usage counters and cached provider results.

use crate::error::GatewayResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

/// External data providers metered by monthly call volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Mapbox,
    Here,
    TomTom,
    Geoapify,
    OpenRouteService,
    LocationIq,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Mapbox => "mapbox",
            Provider::Here => "here",
            Provider::TomTom => "tomtom",
            Provider::Geoapify => "geoapify",
            Provider::OpenRouteService => "openrouteservice",
            Provider::LocationIq => "locationiq",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metered operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    Geocoding,
    Routing,
    MatrixRouting,
    Poi,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Geocoding => "geocoding",
            Action::Routing => "routing",
            Action::MatrixRouting => "matrix-routing",
            Action::Poi => "poi",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one monthly usage counter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UsageKey {
    pub provider: Provider,
    pub action: Action,
    pub endpoint: Option<String>,
    pub year_month: String,
}

impl UsageKey {
    pub fn new(
        provider: Provider,
        action: Action,
        endpoint: Option<&str>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            provider,
            action,
            endpoint: endpoint.map(sanitize_segment),
            year_month: year_month(at),
        }
    }

    /// `usage:{YYYY-MM}:{provider}:{action}[.{endpoint}]`
    pub fn render(&self) -> String {
        match &self.endpoint {
            Some(endpoint) => format!(
                "usage:{}:{}:{}.{}",
                self.year_month, self.provider, self.action, endpoint
            ),
            None => format!("usage:{}:{}:{}", self.year_month, self.provider, self.action),
        }
    }
}

impl fmt::Display for UsageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Calendar month of `at` in UTC, formatted `YYYY-MM`.
pub fn year_month(at: DateTime<Utc>) -> String {
    at.format("%Y-%m").to_string()
}

/// Builds `{prefix}:{sha256(canonical json of query)}`.
///
/// Object keys are sorted recursively before hashing, so field order never
/// influences the key.
pub fn cache_key<Q: Serialize + ?Sized>(prefix: &str, query: &Q) -> GatewayResult<String> {
    let canonical = canonicalize(serde_json::to_value(query)?);
    let text = serde_json::to_string(&canonical)?;
    let digest = Sha256::digest(text.as_bytes());
    Ok(format!("{}:{}", prefix, hex::encode(digest)))
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, canonicalize(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

/// Replace characters that would break the `:`/`.` key layout.
pub fn sanitize_segment(segment: &str) -> String {
    segment
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' || c == '/' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn at(year: i32, month: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_usage_key_without_endpoint() {
        let key = UsageKey::new(Provider::Mapbox, Action::Geocoding, None, at(2025, 3));
        assert_eq!(key.render(), "usage:2025-03:mapbox:geocoding");
    }

    #[test]
    fn test_usage_key_with_endpoint() {
        let key = UsageKey::new(
            Provider::OpenRouteService,
            Action::MatrixRouting,
            Some("driving-car"),
            at(2025, 3),
        );
        assert_eq!(
            key.render(),
            "usage:2025-03:openrouteservice:matrix-routing.driving-car"
        );
    }

    #[test]
    fn test_usage_key_differs_across_year_rollover() {
        let december = UsageKey::new(Provider::Here, Action::Poi, None, at(2025, 12));
        let january = UsageKey::new(Provider::Here, Action::Poi, None, at(2026, 1));
        assert_eq!(december.year_month, "2025-12");
        assert_eq!(january.year_month, "2026-01");
        assert_ne!(december.render(), january.render());
    }

    #[test]
    fn test_usage_key_month_is_utc() {
        let late = chrono::FixedOffset::east_opt(2 * 3600)
            .unwrap()
            .with_ymd_and_hms(2025, 2, 1, 1, 0, 0)
            .unwrap();
        let key = UsageKey::new(
            Provider::TomTom,
            Action::Routing,
            None,
            late.with_timezone(&Utc),
        );
        assert_eq!(key.year_month, "2025-01");
    }

    #[test]
    fn test_cache_key_ignores_field_order() {
        let a = json!({"text": "berlin", "limit": 5, "country": "de"});
        let b = json!({"country": "de", "text": "berlin", "limit": 5});
        assert_eq!(
            cache_key("geocode:forward", &a).unwrap(),
            cache_key("geocode:forward", &b).unwrap()
        );
    }

    #[test]
    fn test_cache_key_depends_on_prefix_and_values() {
        let q = json!({"text": "berlin"});
        let forward = cache_key("geocode:forward", &q).unwrap();
        assert!(forward.starts_with("geocode:forward:"));
        assert_eq!(forward.len(), "geocode:forward:".len() + 64);
        assert_ne!(forward, cache_key("poi:search", &q).unwrap());
        assert_ne!(forward, cache_key("geocode:forward", &json!({"text": "paris"})).unwrap());
    }

    #[test]
    fn test_sanitize_segment() {
        assert_eq!(sanitize_segment(" search:v2.1 "), "search_v2_1");
    }
}
