use super::{normalize_text, ordered_routes, Coordinate};
use crate::error::GatewayResult;
use crate::gateway::{Feature, FeatureSettings, GatewayContext, ProviderAdapter, ProviderGateway};
use crate::keys::{Action, Provider};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

pub const PROVIDER_PRIORITY: [Provider; 2] = [Provider::Mapbox, Provider::Here];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum GeocodeQuery {
    Forward {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        country: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        language: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        limit: Option<u8>,
    },
    Reverse {
        point: Coordinate,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        language: Option<String>,
    },
}

impl GeocodeQuery {
    pub fn forward(text: impl Into<String>) -> Self {
        GeocodeQuery::Forward {
            text: text.into(),
            country: None,
            language: None,
            limit: None,
        }
    }

    pub fn reverse(lat: f64, lon: f64) -> Self {
        GeocodeQuery::Reverse {
            point: Coordinate::new(lat, lon),
            language: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeocodeResult {
    pub label: String,
    pub point: Coordinate,
    #[serde(default)]
    pub country_code: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

pub struct Geocoding;

impl Feature for Geocoding {
    const NAME: &'static str = "geocoding";
    const ACTION: Action = Action::Geocoding;
    const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30 * 24 * 3600);

    type Query = GeocodeQuery;
    type Output = Vec<GeocodeResult>;

    fn cache_prefix(query: &GeocodeQuery) -> &'static str {
        match query {
            GeocodeQuery::Forward { .. } => "geocode:forward",
            GeocodeQuery::Reverse { .. } => "geocode:reverse",
        }
    }

    fn normalize(query: &GeocodeQuery) -> GeocodeQuery {
        let lower = |value: &Option<String>| value.as_deref().map(normalize_text).filter(|v| !v.is_empty());
        match query {
            GeocodeQuery::Forward {
                text,
                country,
                language,
                limit,
            } => GeocodeQuery::Forward {
                text: normalize_text(text),
                country: lower(country),
                language: lower(language),
                limit: *limit,
            },
            GeocodeQuery::Reverse { point, language } => GeocodeQuery::Reverse {
                point: point.normalized(),
                language: lower(language),
            },
        }
    }
}

pub type GeocodingGateway = ProviderGateway<Geocoding>;

/// Geocoding gateway over `adapters`, in [`PROVIDER_PRIORITY`] order.
pub fn build_gateway(
    ctx: &GatewayContext,
    adapters: Vec<(Provider, Arc<dyn ProviderAdapter<Geocoding>>)>,
    settings: FeatureSettings,
) -> GatewayResult<GeocodingGateway> {
    let routes = ordered_routes(&PROVIDER_PRIORITY, adapters)?;
    ProviderGateway::new(ctx, routes, settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equivalent_forward_queries_share_a_key() {
        let a = GeocodeQuery::Forward {
            text: "  Brandenburger   Tor ".into(),
            country: Some("DE".into()),
            language: None,
            limit: Some(5),
        };
        let b = GeocodeQuery::Forward {
            text: "brandenburger tor".into(),
            country: Some("de".into()),
            language: Some("  ".into()),
            limit: Some(5),
        };
        assert_eq!(
            GeocodingGateway::cache_key(&a).unwrap(),
            GeocodingGateway::cache_key(&b).unwrap()
        );
    }

    #[test]
    fn test_forward_and_reverse_prefixes() {
        let forward = GeocodingGateway::cache_key(&GeocodeQuery::forward("berlin")).unwrap();
        let reverse = GeocodingGateway::cache_key(&GeocodeQuery::reverse(52.52, 13.405)).unwrap();
        assert!(forward.starts_with("geocode:forward:"));
        assert!(reverse.starts_with("geocode:reverse:"));
    }

    #[test]
    fn test_reverse_key_ignores_sub_metre_noise() {
        let a = GeocodingGateway::cache_key(&GeocodeQuery::reverse(52.520_001, 13.405_004)).unwrap();
        let b = GeocodingGateway::cache_key(&GeocodeQuery::reverse(52.519_999, 13.404_996)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_query_wire_format() {
        let query: GeocodeQuery =
            serde_json::from_str(r#"{"kind": "forward", "text": "Paris", "limit": 3}"#).unwrap();
        assert_eq!(
            query,
            GeocodeQuery::Forward {
                text: "Paris".into(),
                country: None,
                language: None,
                limit: Some(3),
            }
        );
    }
}
