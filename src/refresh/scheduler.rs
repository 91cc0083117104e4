use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::cache::token::TokenRecord;
use crate::cache::token_store::TokenStore;
use crate::config::monzo::OAuthCredentials;
use crate::observability::metrics::Metrics;
use crate::upstream::error::UpstreamError;
use crate::upstream::gateway::UpstreamGateway;

static SUCCESS_MSG: &str = "success";
static FAILURE_MSG: &str = "failure";

/// Refreshes exactly one token per tick: the one that has waited longest.
///
/// With N tokens in the store each token is refreshed once every N ticks.
pub struct RefreshScheduler<G> {
    store: Arc<TokenStore>,
    gateway: Arc<G>,
    credentials: OAuthCredentials,
    metrics: Arc<Metrics>,
    interval: Duration,
}

impl<G: UpstreamGateway> RefreshScheduler<G> {
    pub fn new(
        store: Arc<TokenStore>,
        gateway: Arc<G>,
        credentials: OAuthCredentials,
        metrics: Arc<Metrics>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            gateway,
            credentials,
            metrics,
            interval,
        }
    }

    /// Ticks until `shutdown` flips to `true` or its sender is dropped.
    /// A refresh already in flight is never cancelled.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!("token refresher started, interval {:?}", self.interval);
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    // failures are logged inside; the loop keeps ticking
                    let _ = self.tick().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("token refresher stopped");
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Rotates the head token through the refresh grant.
    pub async fn tick(&self) -> Result<Option<TokenRecord>, UpstreamError> {
        debug!("refreshing oauth tokens");
        let gateway = self.gateway.as_ref();
        let credentials = &self.credentials;

        let res = self
            .store
            .rotate_and_refresh(move |head| async move {
                info!("refreshing token for user {}", head.user_id);
                gateway
                    .refresh_token(&credentials.client_id, &credentials.client_secret, &head.refresh_token)
                    .await
                    .inspect_err(|err| {
                        error!("encountered error refreshing token for user {} => {}", head.user_id, err)
                    })
            })
            .await;

        match &res {
            Ok(Some(refreshed)) => {
                info!("refreshed token for user {}", refreshed.user_id);
                self.metrics.token_refreshes.with_label_values(&[SUCCESS_MSG]).inc();
                self.metrics.set_access_token_expiry(&refreshed.user_id, refreshed.expiry_time);
            }
            Ok(None) => debug!("no tokens to refresh"),
            Err(_) => {
                self.metrics.token_refreshes.with_label_values(&[FAILURE_MSG]).inc();
            }
        }
        self.metrics.tokens_in_store.set(self.store.len().await as i64);

        res
    }
}
