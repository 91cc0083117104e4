use std::sync::Arc;

use axum::routing::get;
use axum::{extract::State, response::IntoResponse, Router};
use http::{header::CONTENT_TYPE, StatusCode};
use tracing::error;

use crate::config::settings::MetricsConfig;
use crate::observability::metrics::Metrics;
use crate::server::server::AppState;

#[derive(Clone)]
pub struct MetricsState {
    pub metrics: Arc<Metrics>,
}

impl MetricsState {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self { metrics }
    }
}

impl MetricsState {
    pub fn router(&self, metrics_config: &MetricsConfig) -> Router<AppState> {
        let mut router = Router::new();
        if metrics_config.is_enabled {
            router = router.route(metrics_config.path.as_str(), get(get_metrics));
        }
        router
    }
}

async fn get_metrics(State(state): State<AppState>) -> impl IntoResponse {
    match state.metrics_state.metrics.encode_text() {
        Ok(response) => (
            StatusCode::OK,
            [(CONTENT_TYPE, "text/plain; version=0.0.4")],
            response,
        ),
        Err(err) => {
            error!("failed to encode metrics: {:#}", err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(CONTENT_TYPE, "text/plain; version=0.0.4")],
                "failed to encode metrics".to_owned(),
            )
        }
    }
}
