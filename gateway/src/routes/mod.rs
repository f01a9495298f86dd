//! Route assembly
//!
//! [`create_app`] merges the API and chat routers and applies the
//! cross-cutting layers: connection limits on WebSocket upgrades, per-IP rate
//! limiting, CORS and security headers.

pub mod api;
pub mod chat;

use axum::{Router, middleware};
use http::{Method, header::CONTENT_TYPE};
use std::sync::Arc;
use tower_governor::{
    GovernorLayer, governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::{info, warn};

use crate::middleware::connection_limit_middleware;
use crate::state::AppState;

/// Rate limiting is disabled at or above this many requests per second
pub const RATE_LIMIT_DISABLED_THRESHOLD: u32 = 100_000;

/// Build the complete application router.
///
/// The router must be served with `into_make_service_with_connect_info::<SocketAddr>()`;
/// both the connection limits and the rate limiter key on the peer address.
pub fn create_app(state: Arc<AppState>) -> Router {
    let rate_limit_rps = state.config.rate_limit_requests_per_second;
    let rate_limit_burst = state.config.rate_limit_burst_size;

    let chat_routes = chat::create_chat_router().layer(middleware::from_fn_with_state(
        state.clone(),
        connection_limit_middleware,
    ));

    let governor_layer = if rate_limit_rps < RATE_LIMIT_DISABLED_THRESHOLD {
        // One token is replenished per period
        let period_ms = (1000 / u64::from(rate_limit_rps.max(1))).max(1);
        let governor_config = GovernorConfigBuilder::default()
            .per_millisecond(period_ms)
            .burst_size(rate_limit_burst)
            .key_extractor(SmartIpKeyExtractor)
            .finish();
        match governor_config {
            Some(config) => Some(GovernorLayer::new(config)),
            None => {
                warn!(
                    rps = rate_limit_rps,
                    burst = rate_limit_burst,
                    "Invalid rate limit configuration, rate limiting disabled"
                );
                None
            }
        }
    } else {
        info!("Rate limiting disabled (rate >= {RATE_LIMIT_DISABLED_THRESHOLD}/s)");
        None
    };

    let cors_layer = cors_layer(state.config.cors_allowed_origins.as_deref());

    let security_headers = tower::ServiceBuilder::new()
        .layer(SetResponseHeaderLayer::overriding(
            http::header::X_CONTENT_TYPE_OPTIONS,
            http::HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            http::header::X_FRAME_OPTIONS,
            http::HeaderValue::from_static("DENY"),
        ));

    api::create_api_router()
        .merge(chat_routes)
        .with_state(state)
        .layer(cors_layer)
        .layer(tower::util::option_layer(governor_layer))
        .layer(security_headers)
}

/// `"*"` allows any origin, a comma-separated list allows those origins, and
/// `None` leaves browsers at same-origin.
fn cors_layer(origins: Option<&str>) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE]);

    match origins {
        Some("*") => base.allow_origin(Any).allow_credentials(false),
        Some(origins) => {
            let origins: Vec<_> = origins
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            base.allow_origin(origins).allow_credentials(true)
        }
        None => {
            info!(
                "CORS not configured, defaulting to same-origin only. \
                 Set CORS_ALLOWED_ORIGINS to enable cross-origin access."
            );
            base.allow_credentials(false)
        }
    }
}
