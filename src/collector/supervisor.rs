use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{error, info};

use crate::cache::token_source::TokenSource;
use crate::collector::cycle::{collect_all, CycleOptions, CycleReport};
use crate::config::settings::SettingsConfig;
use crate::observability::metrics::Metrics;
use crate::upstream::gateway::UpstreamGateway;

static SUCCESS_MSG: &str = "success";
static FAILURE_MSG: &str = "failure";

/// Lifecycle of the collection loop: `Running` until a stop is requested,
/// `Draining` while the current cycle finishes, then `Stopped` for good.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Running,
    Draining,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct CollectorSettings {
    pub interval: Duration,
    pub cycle: CycleOptions,
}

impl From<&SettingsConfig> for CollectorSettings {
    fn from(settings: &SettingsConfig) -> Self {
        Self {
            interval: Duration::from_secs(settings.collect_interval_seconds),
            cycle: CycleOptions::from(settings),
        }
    }
}

/// Runs collection cycles forever on a worker task and relaunches the worker
/// immediately whenever it panics. A relaunched worker waits one interval
/// before its first cycle.
pub struct CollectionSupervisor<G> {
    gateway: Arc<G>,
    tokens: TokenSource,
    metrics: Arc<Metrics>,
    settings: CollectorSettings,
}

pub struct SupervisorHandle {
    state: watch::Receiver<SupervisorState>,
    join: JoinHandle<Result<()>>,
}

impl SupervisorHandle {
    pub fn state(&self) -> SupervisorState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SupervisorState> {
        self.state.clone()
    }

    /// Resolves once the supervisor reached `Stopped`.
    pub async fn join(self) -> Result<()> {
        self.join.await?
    }
}

impl<G: UpstreamGateway> CollectionSupervisor<G> {
    pub fn new(
        gateway: Arc<G>,
        tokens: TokenSource,
        metrics: Arc<Metrics>,
        settings: CollectorSettings,
    ) -> Self {
        Self {
            gateway,
            tokens,
            metrics,
            settings,
        }
    }

    /// Starts supervision. Sending `true` on (or dropping the sender of) `shutdown`
    /// stops the loop at the next cycle boundary.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> SupervisorHandle {
        let (state_tx, state_rx) = watch::channel(SupervisorState::Running);
        let join = tokio::spawn(Arc::new(self).supervise(shutdown, state_tx));
        SupervisorHandle {
            state: state_rx,
            join,
        }
    }

    async fn supervise(
        self: Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
        state_tx: watch::Sender<SupervisorState>,
    ) -> Result<()> {
        let mut watching = !stop_requested(&shutdown);
        if !watching {
            state_tx.send_replace(SupervisorState::Draining);
        }

        let mut restarted = false;
        loop {
            info!("starting collection worker");
            let mut worker = tokio::spawn(self.clone().work(shutdown.clone(), restarted));

            let outcome = loop {
                tokio::select! {
                    res = &mut worker => break res,
                    changed = shutdown.changed(), if watching => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!("stop requested, draining collection");
                            state_tx.send_replace(SupervisorState::Draining);
                            watching = false;
                        }
                    }
                }
            };

            match outcome {
                Ok(()) => {
                    state_tx.send_replace(SupervisorState::Stopped);
                    info!("collection stopped");
                    return Ok(());
                }
                Err(err) if err.is_panic() => {
                    error!("collection worker panicked, restarting: {}", err);
                    self.metrics.collector_restarts.inc();
                    if stop_requested(&shutdown) {
                        state_tx.send_replace(SupervisorState::Stopped);
                        info!("collection stopped");
                        return Ok(());
                    }
                    restarted = true;
                }
                Err(err) => {
                    state_tx.send_replace(SupervisorState::Stopped);
                    return Err(anyhow!("collection worker cancelled: {}", err));
                }
            }
        }
    }

    async fn work(self: Arc<Self>, mut shutdown: watch::Receiver<bool>, restarted: bool) {
        if restarted {
            tokio::select! {
                _ = sleep(self.settings.interval) => {}
                _ = shutdown.changed() => {}
            }
        }

        loop {
            if stop_requested(&shutdown) {
                return;
            }

            self.run_cycle().await;

            tokio::select! {
                _ = sleep(self.settings.interval) => {}
                _ = shutdown.changed() => {}
            }
        }
    }

    /// One full pass over the current tokens. Failures are logged and counted, never returned.
    pub async fn run_cycle(&self) -> Option<CycleReport> {
        let access_tokens = self.tokens.access_tokens().await;
        info!("collection cycle start, {} tokens", access_tokens.len());

        match collect_all(
            self.gateway.as_ref(),
            &self.metrics,
            &access_tokens,
            &self.settings.cycle,
        )
        .await
        {
            Ok(report) => {
                self.metrics.collect_cycles.with_label_values(&[SUCCESS_MSG]).inc();
                info!(
                    "collection cycle done, users collected: {}, tokens failed: {}",
                    report.users_collected, report.tokens_failed
                );
                Some(report)
            }
            Err(err) => {
                self.metrics.collect_cycles.with_label_values(&[FAILURE_MSG]).inc();
                error!("collection cycle failed: {:#}", err);
                None
            }
        }
    }
}

fn stop_requested(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow() || shutdown.has_changed().is_err()
}
