use super::{ordered_routes, Coordinate};
use crate::error::GatewayResult;
use crate::gateway::{Feature, FeatureSettings, GatewayContext, ProviderAdapter, ProviderGateway};
use crate::keys::{Action, Provider};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

pub const PROVIDER_PRIORITY: [Provider; 2] = [Provider::OpenRouteService, Provider::Mapbox];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TravelProfile {
    #[default]
    Driving,
    Cycling,
    Walking,
}

/// Many-to-many travel matrix request. Row/column order follows the
/// coordinate order and is part of the key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixQuery {
    pub sources: Vec<Coordinate>,
    pub destinations: Vec<Coordinate>,
    #[serde(default)]
    pub profile: TravelProfile,
}

/// `durations_s[i][j]` / `distances_m[i][j]` for source `i` to destination
/// `j`; `None` where the provider found no route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteMatrix {
    pub durations_s: Vec<Vec<Option<f64>>>,
    pub distances_m: Vec<Vec<Option<f64>>>,
}

pub struct MatrixRouting;

impl Feature for MatrixRouting {
    const NAME: &'static str = "matrix";
    const ACTION: Action = Action::MatrixRouting;
    const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(7 * 24 * 3600);

    type Query = MatrixQuery;
    type Output = RouteMatrix;

    fn cache_prefix(_query: &MatrixQuery) -> &'static str {
        "matrix:routing"
    }

    fn normalize(query: &MatrixQuery) -> MatrixQuery {
        MatrixQuery {
            sources: query.sources.iter().map(Coordinate::normalized).collect(),
            destinations: query.destinations.iter().map(Coordinate::normalized).collect(),
            profile: query.profile,
        }
    }
}

pub type MatrixRoutingGateway = ProviderGateway<MatrixRouting>;

pub fn build_gateway(
    ctx: &GatewayContext,
    adapters: Vec<(Provider, Arc<dyn ProviderAdapter<MatrixRouting>>)>,
    settings: FeatureSettings,
) -> GatewayResult<MatrixRoutingGateway> {
    let routes = ordered_routes(&PROVIDER_PRIORITY, adapters)?;
    ProviderGateway::new(ctx, routes, settings)
}
