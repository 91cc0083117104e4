use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{info, warn};

use crate::collector::summary::summarize_transactions;
use crate::config::settings::{CollectFailurePolicy, SettingsConfig};
use crate::observability::metrics::Metrics;
use crate::upstream::gateway::UpstreamGateway;
use crate::upstream::types::CallerIdentity;

/// Outcome of one pass over all known tokens.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub users_collected: usize,
    pub tokens_failed: usize,
}

/// Per-cycle behaviour taken from `settings`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleOptions {
    pub on_failure: CollectFailurePolicy,
    /// Drop an account's transaction groups that upstream stopped reporting.
    pub prune_stale_transactions: bool,
    pub skip_declined_transactions: bool,
    pub skip_deleted_pots: bool,
}

impl Default for CycleOptions {
    fn default() -> Self {
        Self {
            on_failure: CollectFailurePolicy::AbortCycle,
            prune_stale_transactions: true,
            skip_declined_transactions: false,
            skip_deleted_pots: false,
        }
    }
}

impl From<&SettingsConfig> for CycleOptions {
    fn from(settings: &SettingsConfig) -> Self {
        Self {
            on_failure: settings.on_collect_failure,
            prune_stale_transactions: settings.reset_transactions_each_cycle,
            skip_declined_transactions: settings.skip_declined_transactions,
            skip_deleted_pots: settings.skip_deleted_pots,
        }
    }
}

/// One collection cycle: walks every access token in order and publishes its metrics.
///
/// Under [`CollectFailurePolicy::AbortCycle`] the first failing token ends the cycle
/// and later tokens are not attempted. Under [`CollectFailurePolicy::SkipToken`] the
/// failure is logged and the next token is collected. Series of tokens that are not
/// reached keep their previous values.
pub async fn collect_all<G: UpstreamGateway>(
    gateway: &G,
    metrics: &Metrics,
    access_tokens: &[String],
    options: &CycleOptions,
) -> Result<CycleReport> {
    let mut report = CycleReport::default();

    for (idx, access_token) in access_tokens.iter().enumerate() {
        match collect_token(gateway, metrics, access_token, options).await {
            Ok(identity) => {
                info!("collected metrics for user {}", identity.user_id);
                report.users_collected += 1;
            }
            Err(err) => match options.on_failure {
                CollectFailurePolicy::AbortCycle => {
                    return Err(err.context(format!(
                        "collection aborted at token #{} of {}",
                        idx + 1,
                        access_tokens.len()
                    )));
                }
                CollectFailurePolicy::SkipToken => {
                    warn!("skipping token #{}: {:#}", idx + 1, err);
                    report.tokens_failed += 1;
                }
            },
        }
    }

    Ok(report)
}

async fn collect_token<G: UpstreamGateway>(
    gateway: &G,
    metrics: &Metrics,
    access_token: &str,
    options: &CycleOptions,
) -> Result<CallerIdentity> {
    let identity = gateway
        .fetch_identity(access_token)
        .await
        .context("fetch identity")?;

    // set before account work so a partial failure still shows the attempt
    metrics.set_user_latest_collect(&identity.user_id, Utc::now());

    collect_account_metrics(gateway, metrics, access_token, &identity, options).await?;
    collect_pot_metrics(gateway, metrics, access_token, &identity, options.skip_deleted_pots).await?;

    Ok(identity)
}

async fn collect_account_metrics<G: UpstreamGateway>(
    gateway: &G,
    metrics: &Metrics,
    access_token: &str,
    identity: &CallerIdentity,
    options: &CycleOptions,
) -> Result<()> {
    let user_id = identity.user_id.as_str();
    let account_ids = gateway
        .list_accounts(access_token)
        .await
        .with_context(|| format!("list accounts for user {}", user_id))?;

    for account_id in &account_ids {
        let snapshot = gateway
            .get_balance(access_token, account_id)
            .await
            .with_context(|| format!("get balance of account {}", account_id))?;

        metrics.set_current_balance(user_id, account_id, snapshot.balance);
        metrics.set_total_balance(user_id, account_id, snapshot.total_balance);
        metrics.set_spend_today(user_id, account_id, snapshot.spend_today);

        let transactions = gateway
            .list_transactions_since(access_token, account_id, Utc::now())
            .await
            .with_context(|| format!("list transactions of account {}", account_id))?;

        let summaries = summarize_transactions(&transactions, options.skip_declined_transactions);
        metrics.publish_transactions_amount_today(user_id, account_id, &summaries, options.prune_stale_transactions);
    }

    Ok(())
}

async fn collect_pot_metrics<G: UpstreamGateway>(
    gateway: &G,
    metrics: &Metrics,
    access_token: &str,
    identity: &CallerIdentity,
    skip_deleted: bool,
) -> Result<()> {
    let user_id = identity.user_id.as_str();
    let pots = gateway
        .list_pots(access_token)
        .await
        .with_context(|| format!("list pots for user {}", user_id))?;

    for pot in pots.iter().filter(|pot| !(skip_deleted && pot.deleted)) {
        metrics.set_pot_balance(user_id, &pot.pot_id, &pot.name, pot.balance);
    }

    Ok(())
}
