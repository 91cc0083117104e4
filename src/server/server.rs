use anyhow::{Context, Result};
use axum::Router;
use tracing::info;

use crate::config::settings::SettingsConfig;
use crate::issuer::oauth::IssuerState;
use crate::observability::routes::MetricsState;

#[derive(Clone)]
pub struct AppState {
    pub metrics_state: MetricsState,
    /// Present only when the exporter runs with OAuth credentials.
    pub issuer_state: Option<IssuerState>,
}

impl AppState {
    pub fn new(metrics_state: MetricsState, issuer_state: Option<IssuerState>) -> Self {
        Self {
            metrics_state,
            issuer_state,
        }
    }
}

pub fn router(settings_config: &SettingsConfig, state: AppState) -> Router {
    let mut app = Router::new().merge(state.metrics_state.router(&settings_config.metrics));
    if let Some(issuer_state) = &state.issuer_state {
        app = app.merge(issuer_state.router());
    }
    app.with_state(state)
}

/// Binds the configured address and serves metrics plus, in OAuth mode, the token issuer.
pub async fn start(settings_config: &SettingsConfig, state: AppState) -> Result<()> {
    let metrics = state.metrics_state.metrics.clone();
    let app = router(settings_config, state);

    if !app.has_routes() {
        info!("no routes enabled, http server not started");
        return Ok(());
    }

    let bind_addr = format!("{}:{}", settings_config.server.host, settings_config.server.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;
    info!("listening on {}", bind_addr);

    metrics.up.set(1);
    axum::serve(listener, app).await.context("http server failed")?;
    Ok(())
}
