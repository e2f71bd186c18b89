use super::{normalize_text, ordered_routes, Coordinate};
use crate::error::GatewayResult;
use crate::gateway::{Feature, FeatureSettings, GatewayContext, ProviderAdapter, ProviderGateway};
use crate::keys::{Action, Provider};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

pub const PROVIDER_PRIORITY: [Provider; 2] = [Provider::Geoapify, Provider::TomTom];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoiQuery {
    pub center: Coordinate,
    pub radius_m: u32,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Poi {
    pub id: String,
    pub name: String,
    pub category: String,
    pub point: Coordinate,
    #[serde(default)]
    pub distance_m: Option<f64>,
}

pub struct PoiSearch;

impl Feature for PoiSearch {
    const NAME: &'static str = "poi";
    const ACTION: Action = Action::Poi;
    const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(24 * 3600);

    type Query = PoiQuery;
    type Output = Vec<Poi>;

    fn cache_prefix(_query: &PoiQuery) -> &'static str {
        "poi:search"
    }

    /// Category order and case carry no meaning.
    fn normalize(query: &PoiQuery) -> PoiQuery {
        let mut categories: Vec<String> = query
            .categories
            .iter()
            .map(|c| normalize_text(c))
            .filter(|c| !c.is_empty())
            .collect();
        categories.sort();
        categories.dedup();

        PoiQuery {
            center: query.center.normalized(),
            radius_m: query.radius_m,
            categories,
            limit: query.limit,
        }
    }
}

pub type PoiGateway = ProviderGateway<PoiSearch>;

pub fn build_gateway(
    ctx: &GatewayContext,
    adapters: Vec<(Provider, Arc<dyn ProviderAdapter<PoiSearch>>)>,
    settings: FeatureSettings,
) -> GatewayResult<PoiGateway> {
    let routes = ordered_routes(&PROVIDER_PRIORITY, adapters)?;
    ProviderGateway::new(ctx, routes, settings)
}
