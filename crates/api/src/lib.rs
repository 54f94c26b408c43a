pub mod error;
pub mod extractors;
pub mod routes;
pub mod state;

use axum::{
    Router,
    http::HeaderValue,
    routing::{get, post, put},
};
use state::AppState;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.settings.app.cors_origins);

    // Everything scoped to one live event
    let event_routes = Router::new()
        .route(
            "/cameras",
            get(routes::camera::list).post(routes::camera::join),
        )
        .route(
            "/cameras/{camera_id}/status",
            put(routes::camera::report_status),
        )
        .route("/status", get(routes::status::get))
        .route("/stream", get(routes::stream::subscribe))
        .route("/switches", get(routes::status::switches))
        .route("/switch", post(routes::status::manual_switch));

    let api = Router::new().nest("/events/{event_id}", event_routes);

    // Health check; `get` also answers HEAD, which the operator probe uses
    let health = Router::new().route("/health", get(health_check));

    Router::new()
        .nest("/api", api)
        .merge(health)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();
    layer.allow_origin(origins)
}

async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
