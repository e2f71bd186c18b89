use crate::keys::Provider;
use serde::Serialize;
use thiserror::Error;

pub type GatewayResult<T> = Result<T, GatewayError>;
pub type StoreResult<T> = Result<T, StoreError>;

/// Failures raised by the key-value store backing the cache and the counters.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("store connection error: {0}")]
    Connection(String),
    #[error("store command failed: {0}")]
    Command(String),
    #[error("unexpected value under key {key}: {value}")]
    InvalidValue { key: String, value: String },
    #[error("store has been closed")]
    Closed,
    #[error("internal store error: {0}")]
    Internal(String),
}

/// Failure reported by a provider adapter, translated once at the adapter boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpstreamError {
    #[error("network error: {0}")]
    Network(String),
    #[error("provider answered with status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("provider rate limited the request")]
    RateLimited,
    #[error("provider rejected the credentials")]
    Unauthorized,
    #[error("malformed provider response: {0}")]
    MalformedResponse(String),
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Every provider in the feature's list has used up its monthly quota.
    #[error("service unavailable: {reason}")]
    QuotaExhausted { feature: &'static str, reason: String },

    #[error("upstream call to {provider} failed: {source}")]
    Upstream {
        provider: Provider,
        #[source]
        source: UpstreamError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl GatewayError {
    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::Configuration(_) => 500,
            GatewayError::QuotaExhausted { .. } => 503,
            GatewayError::Upstream { .. } => 502,
            GatewayError::Store(_) => 503,
            GatewayError::Serialization(_) => 500,
            GatewayError::InvalidRequest(_) => 400,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            GatewayError::Configuration(_) => "configuration_error",
            GatewayError::QuotaExhausted { .. } => "service_unavailable",
            GatewayError::Upstream { .. } => "upstream_failure",
            GatewayError::Store(_) => "store_unavailable",
            GatewayError::Serialization(_) => "internal_error",
            GatewayError::InvalidRequest(_) => "bad_request",
        }
    }

    pub fn is_quota_exhausted(&self) -> bool {
        matches!(self, GatewayError::QuotaExhausted { .. })
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub code: u16,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str, code: u16) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
            code,
        }
    }

    pub fn from_gateway_error(err: &GatewayError) -> Self {
        Self::new(err.kind(), &err.to_string(), err.status_code())
    }
}

impl axum::response::IntoResponse for GatewayError {
    fn into_response(self) -> axum::response::Response {
        let body = ErrorResponse::from_gateway_error(&self);
        let status = axum::http::StatusCode::from_u16(body.code)
            .unwrap_or(axum::http::StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (status, axum::Json(body)).into_response()
    }
}
