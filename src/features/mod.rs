//! Concrete gateway features and their provider priority lists.

pub mod geocoding;
pub mod matrix;
pub mod poi;

use crate::error::{GatewayError, GatewayResult};
use crate::gateway::{Feature, ProviderAdapter, ProviderRoute};
use crate::keys::Provider;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use geocoding::{GeocodeQuery, GeocodeResult, Geocoding, GeocodingGateway};
pub use matrix::{MatrixQuery, MatrixRouting, MatrixRoutingGateway, RouteMatrix, TravelProfile};
pub use poi::{Poi, PoiGateway, PoiQuery, PoiSearch};

/// WGS84 point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Rounded to 5 decimals (about one metre), the cache key resolution.
    pub fn normalized(&self) -> Self {
        Self {
            lat: round5(self.lat),
            lon: round5(self.lon),
        }
    }
}

fn round5(value: f64) -> f64 {
    let rounded = (value * 100_000.0).round() / 100_000.0;
    // -0.0 and 0.0 serialize differently
    if rounded == 0.0 {
        0.0
    } else {
        rounded
    }
}

/// Trim, lowercase and collapse inner whitespace.
pub(crate) fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Orders `adapters` by `priority`.
///
/// Providers in the priority list without an adapter are left out; adapters
/// for providers outside the list are ignored. An empty result is a
/// configuration error.
pub fn ordered_routes<F: Feature>(
    priority: &[Provider],
    adapters: Vec<(Provider, Arc<dyn ProviderAdapter<F>>)>,
) -> GatewayResult<Vec<ProviderRoute<F>>> {
    for (provider, _) in &adapters {
        if !priority.contains(provider) {
            tracing::warn!(
                target: "quota_gateway::features",
                feature = F::NAME,
                provider = %provider,
                "adapter supplied for a provider outside the priority list, ignoring"
            );
        }
    }

    let mut routes = Vec::with_capacity(priority.len());
    for provider in priority {
        match adapters.iter().find(|(p, _)| p == provider) {
            Some((_, adapter)) => routes.push(ProviderRoute::new(*provider, Arc::clone(adapter))),
            None => tracing::warn!(
                target: "quota_gateway::features",
                feature = F::NAME,
                provider = %provider,
                "no adapter configured, provider disabled"
            ),
        }
    }

    if routes.is_empty() {
        return Err(GatewayError::Configuration(format!(
            "no adapter configured for any {} provider (expected one of {:?})",
            F::NAME,
            priority
        )));
    }
    Ok(routes)
}
