use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use monzo_exporter::cache::token_source::TokenSource;
use monzo_exporter::cache::token_store::TokenStore;
use monzo_exporter::collector::supervisor::{CollectionSupervisor, CollectorSettings};
use monzo_exporter::config::monzo::TokenMode;
use monzo_exporter::issuer::oauth::IssuerState;
use monzo_exporter::observability::metrics::Metrics;
use monzo_exporter::observability::routes::MetricsState;
use monzo_exporter::observability::service_resources_metrics::collect_process_metrics;
use monzo_exporter::refresh::scheduler::RefreshScheduler;
use monzo_exporter::server::server::{self, AppState};
use monzo_exporter::upstream::client::MonzoClient;
use monzo_exporter::utils::config_loader;
use monzo_exporter::utils::logging::{self, LogLevel};
use tokio::sync::watch;
use tracing::{error, info};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, env = "CONFIG", default_value = "monzo-exporter.yaml")]
    config: String,
    #[arg(long, env = "LOG_LEVEL", value_enum)]
    log_level: Option<LogLevel>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // -------------------------------
    // 1. Load YAML config, set up logging
    // -------------------------------

    let args = Args::parse();
    let service_config = config_loader::run(&args.config).await?;
    logging::run(&service_config, args.log_level).await?;

    let settings = &service_config.settings;
    let metrics = Metrics::new().context("failed to register metrics")?;
    let client = Arc::new(MonzoClient::new(&service_config.monzo.api_url, metrics.clone())?);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // -------------------------------
    // 2. Token source: static list or OAuth store with refresher
    // -------------------------------

    let token_mode = service_config
        .monzo
        .token_mode()
        .ok_or_else(|| anyhow!("no access tokens and no oauth credentials configured"))?;

    let (tokens, issuer_state, mut refresher) = match token_mode {
        TokenMode::Static(access_tokens) => {
            info!("{} static access tokens configured, skipping token refresher", access_tokens.len());
            (TokenSource::Static(Arc::new(access_tokens)), None, None)
        }
        TokenMode::OAuth(credentials) => {
            let store = Arc::new(TokenStore::new(settings.on_refresh_failure));
            let scheduler = RefreshScheduler::new(
                store.clone(),
                client.clone(),
                credentials.clone(),
                metrics.clone(),
                Duration::from_secs(settings.refresh_interval_seconds),
            );
            let refresher = tokio::spawn(scheduler.run(shutdown_rx.clone()));

            let issuer_state = IssuerState::new(
                client.clone(),
                store.clone(),
                metrics.clone(),
                credentials,
                &service_config.monzo.auth_url,
            );
            (TokenSource::Store(store), Some(issuer_state), Some(refresher))
        }
    };

    // -------------------------------
    // 3. Supervised collection
    // -------------------------------

    let supervisor = CollectionSupervisor::new(
        client.clone(),
        tokens,
        metrics.clone(),
        CollectorSettings::from(settings),
    )
    .spawn(shutdown_rx.clone());

    // -------------------------------
    // 4. Process metrics and http server
    // -------------------------------

    let process_metrics = tokio::spawn(collect_process_metrics(
        metrics.clone(),
        settings.metrics.is_enabled,
    ));

    let app_state = AppState::new(MetricsState::new(metrics.clone()), issuer_state);
    let settings_for_server = settings.clone();
    let mut http_server = tokio::spawn(async move { server::start(&settings_for_server, app_state).await });
    let mut http_server_running = true;

    info!("Service starting...");

    // -------------------------------
    // 5. Run until interrupted, then drain collection
    // -------------------------------

    let mut failure = None;
    loop {
        let refresher_exit = async {
            match refresher.as_mut() {
                Some(handle) => handle.await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                res.context("failed to listen for shutdown signal")?;
                info!("shutdown signal received");
                break;
            }
            res = &mut http_server, if http_server_running => {
                http_server_running = false;
                match res {
                    // no routes enabled; keep collecting
                    Ok(Ok(())) => info!("http server exited"),
                    Ok(Err(err)) => {
                        error!("http server failed: {:#}", err);
                        break;
                    }
                    Err(err) => {
                        error!("http server task failed: {}", err);
                        break;
                    }
                }
            }
            res = refresher_exit => {
                let reason = match res {
                    Ok(Ok(())) => "exited".to_owned(),
                    Ok(Err(err)) => format!("failed: {:#}", err),
                    Err(err) => format!("task failed: {}", err),
                };
                error!("token refresher {}, shutting down", reason);
                failure = Some(anyhow!("token refresher {}", reason));
                break;
            }
        }
    }

    shutdown_tx.send_replace(true);
    process_metrics.abort();
    supervisor.join().await?;
    info!("Service stopped");

    match failure {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
