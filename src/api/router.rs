use super::{AppState, handlers};
use axum::Router;
use axum::routing::get;
use axum_prometheus::PrometheusMetricLayer;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Builds the Axum router with all routes and shared state.
pub fn build(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/cron/update-funding", get(handlers::update_funding))
        .route("/spreads", get(handlers::spreads))
        .route("/history/{symbol}", get(handlers::history))
        .route("/price-history/{symbol}", get(handlers::price_history))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// Adds request metrics and the Prometheus scrape endpoint. Installs the
/// global recorder, so call it once per process.
pub fn with_metrics(router: Router) -> Router {
    let (metric_layer, metric_handle) = PrometheusMetricLayer::pair();
    router
        .route("/metrics", get(move || async move { metric_handle.render() }))
        .layer(metric_layer)
}
