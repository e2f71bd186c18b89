use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;
use tracing::info;

/// Logging middleware for the operational API
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let caller = caller_of(&request);
    let started = Instant::now();

    let response = next.run(request).await;

    info!(
        target: "quota_gateway::middleware",
        method = %method,
        uri = %uri,
        caller = %caller,
        status = %response.status(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "request completed"
    );

    response
}

fn caller_of(request: &Request) -> String {
    if let Some(forwarded) = request.headers().get("x-forwarded-for") {
        if let Ok(forwarded_str) = forwarded.to_str() {
            if let Some(first_ip) = forwarded_str.split(',').next() {
                return first_ip.trim().to_string();
            }
        }
    }

    request
        .headers()
        .get("x-real-ip")
        .and_then(|ip| ip.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| "unknown".to_string())
}
