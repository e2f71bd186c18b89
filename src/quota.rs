use crate::error::{GatewayError, GatewayResult};
use crate::keys::{year_month, Action, Provider};
use crate::usage::UsageCounter;
use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, LazyLock};
use validator::{Validate, ValidationError};

/// Monthly call budget. `None` means unlimited.
pub type QuotaLimit = Option<u64>;

/// Source of monthly quotas. Lookups are pure and side-effect free.
pub trait QuotaPolicy: Send + Sync {
    fn quota(&self, provider: Provider, action: Action, endpoint: Option<&str>) -> QuotaLimit;
}

/// `true` iff another call fits in the budget. A limit of 0 blocks everything.
pub fn within_quota(current: u64, limit: QuotaLimit) -> bool {
    current < limit.unwrap_or(u64::MAX)
}

static ENDPOINT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9_/-]*$").expect("valid endpoint pattern"));

/// Lowercase alphanumerics plus `-`, `_` and `/`, at most 64 characters.
pub fn is_valid_endpoint(endpoint: &str) -> bool {
    endpoint.len() <= 64 && ENDPOINT_PATTERN.is_match(endpoint)
}

fn validate_endpoint(endpoint: &str) -> Result<(), ValidationError> {
    if is_valid_endpoint(endpoint) {
        Ok(())
    } else {
        Err(ValidationError::new("endpoint_format"))
    }
}

/// One configured budget.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct QuotaRule {
    pub provider: Provider,
    pub action: Action,
    #[serde(default)]
    #[validate(length(min = 1, max = 64), custom(function = "validate_endpoint"))]
    pub endpoint: Option<String>,
    /// Absent or null means unlimited.
    #[serde(default)]
    pub limit: QuotaLimit,
}

/// Table-driven [`QuotaPolicy`], usually loaded from the gateway config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct QuotaTable {
    #[serde(default)]
    #[validate(nested)]
    pub rules: Vec<QuotaRule>,
    /// Applies to pairs without a rule. Absent means unlimited.
    #[serde(default)]
    pub default_limit: QuotaLimit,
}

impl QuotaTable {
    pub fn new(rules: Vec<QuotaRule>, default_limit: QuotaLimit) -> GatewayResult<Self> {
        let table = Self {
            rules,
            default_limit,
        };
        table.check()?;
        Ok(table)
    }

    pub fn from_json_str(raw: &str) -> GatewayResult<Self> {
        let table: Self = serde_json::from_str(raw)
            .map_err(|e| GatewayError::Configuration(format!("invalid quota table: {}", e)))?;
        table.check()?;
        Ok(table)
    }

    /// Validates rule shape and rejects rules declared twice.
    pub fn check(&self) -> GatewayResult<()> {
        self.validate()
            .map_err(|e| GatewayError::Configuration(format!("invalid quota rule: {}", e)))?;

        for (i, rule) in self.rules.iter().enumerate() {
            let duplicate = self.rules[..i].iter().any(|other| {
                other.provider == rule.provider
                    && other.action == rule.action
                    && other.endpoint == rule.endpoint
            });
            if duplicate {
                return Err(GatewayError::Configuration(format!(
                    "duplicate quota rule for {}:{}{}",
                    rule.provider,
                    rule.action,
                    rule.endpoint
                        .as_deref()
                        .map(|e| format!(".{}", e))
                        .unwrap_or_default()
                )));
            }
        }
        Ok(())
    }

    /// Adds or replaces a rule.
    pub fn set_rule(&mut self, rule: QuotaRule) {
        self.rules.retain(|r| {
            !(r.provider == rule.provider && r.action == rule.action && r.endpoint == rule.endpoint)
        });
        self.rules.push(rule);
    }

    fn find(&self, provider: Provider, action: Action, endpoint: Option<&str>) -> Option<&QuotaRule> {
        self.rules.iter().find(|r| {
            r.provider == provider && r.action == action && r.endpoint.as_deref() == endpoint
        })
    }
}

impl QuotaPolicy for QuotaTable {
    /// Exact `(provider, action, endpoint)` rule first, then the
    /// endpoint-less rule, then the table default.
    fn quota(&self, provider: Provider, action: Action, endpoint: Option<&str>) -> QuotaLimit {
        endpoint
            .and_then(|e| self.find(provider, action, Some(e)))
            .or_else(|| self.find(provider, action, None))
            .map(|rule| rule.limit)
            .unwrap_or(self.default_limit)
    }
}

/// Snapshot of one provider's budget for the current month.
#[derive(Debug, Clone, Serialize)]
pub struct QuotaStatus {
    pub provider: Provider,
    pub action: Action,
    pub endpoint: Option<String>,
    pub month: String,
    pub used: u64,
    pub limit: QuotaLimit,
    pub remaining: QuotaLimit,
    pub available: bool,
}

/// Pairs the quota policy with the usage counter.
#[derive(Clone)]
pub struct QuotaGate {
    counter: Arc<UsageCounter>,
    policy: Arc<dyn QuotaPolicy>,
}

impl QuotaGate {
    pub fn new(counter: Arc<UsageCounter>, policy: Arc<dyn QuotaPolicy>) -> Self {
        Self { counter, policy }
    }

    pub fn counter(&self) -> &Arc<UsageCounter> {
        &self.counter
    }

    pub fn limit(&self, provider: Provider, action: Action, endpoint: Option<&str>) -> QuotaLimit {
        self.policy.quota(provider, action, endpoint)
    }

    pub async fn check_quota(
        &self,
        provider: Provider,
        action: Action,
        endpoint: Option<&str>,
    ) -> GatewayResult<bool> {
        let limit = self.limit(provider, action, endpoint);
        let current = self.counter.get_current(provider, action, endpoint).await?;
        let usable = within_quota(current, limit);

        tracing::trace!(
            target: "quota_gateway::quota",
            provider = %provider,
            action = %action,
            current,
            limit = ?limit,
            usable,
            "quota checked"
        );
        Ok(usable)
    }

    pub async fn status(
        &self,
        provider: Provider,
        action: Action,
        endpoint: Option<&str>,
    ) -> GatewayResult<QuotaStatus> {
        let now = Utc::now();
        let limit = self.limit(provider, action, endpoint);
        let used = self
            .counter
            .get_current_at(provider, action, endpoint, now)
            .await?;

        Ok(QuotaStatus {
            provider,
            action,
            endpoint: endpoint.map(str::to_string),
            month: year_month(now),
            used,
            limit,
            remaining: limit.map(|l| l.saturating_sub(used)),
            available: within_quota(used, limit),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    fn rule(provider: Provider, action: Action, endpoint: Option<&str>, limit: QuotaLimit) -> QuotaRule {
        QuotaRule {
            provider,
            action,
            endpoint: endpoint.map(str::to_string),
            limit,
        }
    }

    #[test]
    fn test_within_quota() {
        assert!(within_quota(999, Some(1000)));
        assert!(!within_quota(1000, Some(1000)));
        assert!(!within_quota(0, Some(0)));
        assert!(within_quota(u64::MAX - 1, None));
    }

    #[test]
    fn test_lookup_order() {
        let table = QuotaTable::new(
            vec![
                rule(Provider::Mapbox, Action::Geocoding, None, Some(100)),
                rule(Provider::Mapbox, Action::Geocoding, Some("reverse"), Some(10)),
            ],
            Some(5),
        )
        .unwrap();

        assert_eq!(table.quota(Provider::Mapbox, Action::Geocoding, Some("reverse")), Some(10));
        assert_eq!(table.quota(Provider::Mapbox, Action::Geocoding, Some("batch")), Some(100));
        assert_eq!(table.quota(Provider::Mapbox, Action::Geocoding, None), Some(100));
        assert_eq!(table.quota(Provider::Here, Action::Geocoding, None), Some(5));
    }

    #[test]
    fn test_unlimited_by_default() {
        let table = QuotaTable::default();
        assert_eq!(table.quota(Provider::TomTom, Action::Poi, None), None);
    }

    #[test]
    fn test_from_json() {
        let table = QuotaTable::from_json_str(
            r#"{
                "rules": [
                    {"provider": "openrouteservice", "action": "matrix-routing", "limit": 500},
                    {"provider": "here", "action": "geocoding", "limit": 0},
                    {"provider": "mapbox", "action": "geocoding", "limit": null}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(
            table.quota(Provider::OpenRouteService, Action::MatrixRouting, None),
            Some(500)
        );
        assert_eq!(table.quota(Provider::Here, Action::Geocoding, None), Some(0));
        assert_eq!(table.quota(Provider::Mapbox, Action::Geocoding, None), None);
    }

    #[test]
    fn test_rejects_bad_endpoint_and_duplicates() {
        let bad = QuotaTable::new(
            vec![rule(Provider::Here, Action::Routing, Some("Has Spaces"), Some(1))],
            None,
        );
        assert!(matches!(bad, Err(GatewayError::Configuration(_))));

        let dup = QuotaTable::new(
            vec![
                rule(Provider::Here, Action::Routing, None, Some(1)),
                rule(Provider::Here, Action::Routing, None, Some(2)),
            ],
            None,
        );
        assert!(matches!(dup, Err(GatewayError::Configuration(_))));
    }

    #[test]
    fn test_set_rule_replaces() {
        let mut table = QuotaTable::default();
        table.set_rule(rule(Provider::Here, Action::Poi, None, Some(1)));
        table.set_rule(rule(Provider::Here, Action::Poi, None, Some(2)));
        assert_eq!(table.rules.len(), 1);
        assert_eq!(table.quota(Provider::Here, Action::Poi, None), Some(2));
    }

    async fn gate(table: QuotaTable) -> QuotaGate {
        let counter = UsageCounter::init(Arc::new(InMemoryStore::new()), None)
            .await
            .unwrap();
        QuotaGate::new(Arc::new(counter), Arc::new(table))
    }

    #[tokio::test]
    async fn test_check_quota_tracks_usage() {
        let gate = gate(
            QuotaTable::new(vec![rule(Provider::Mapbox, Action::Geocoding, None, Some(2))], None)
                .unwrap(),
        )
        .await;

        for _ in 0..2 {
            assert!(gate.check_quota(Provider::Mapbox, Action::Geocoding, None).await.unwrap());
            gate.counter()
                .increment(Provider::Mapbox, Action::Geocoding, None)
                .await
                .unwrap();
        }
        assert!(!gate.check_quota(Provider::Mapbox, Action::Geocoding, None).await.unwrap());
    }

    #[tokio::test]
    async fn test_zero_quota_blocks_first_call() {
        let gate = gate(
            QuotaTable::new(vec![rule(Provider::Here, Action::Poi, None, Some(0))], None).unwrap(),
        )
        .await;
        assert!(!gate.check_quota(Provider::Here, Action::Poi, None).await.unwrap());
    }

    #[tokio::test]
    async fn test_status_reports_remaining() {
        let gate = gate(
            QuotaTable::new(vec![rule(Provider::TomTom, Action::Poi, None, Some(10))], None)
                .unwrap(),
        )
        .await;
        for _ in 0..3 {
            gate.counter()
                .increment(Provider::TomTom, Action::Poi, None)
                .await
                .unwrap();
        }

        let status = gate.status(Provider::TomTom, Action::Poi, None).await.unwrap();
        assert_eq!(status.used, 3);
        assert_eq!(status.remaining, Some(7));
        assert!(status.available);

        let unlimited = gate.status(Provider::Here, Action::Poi, None).await.unwrap();
        assert_eq!(unlimited.remaining, None);
        assert!(unlimited.available);
    }
}
