use chrono::{DateTime, Utc};
use prometheus::{Encoder, Gauge, GaugeVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crate::collector::summary::TransactionSummary;

// (user_id, account_id) -> (description, category) groups last published for that account
type PublishedGroups = HashMap<(String, String), BTreeSet<(String, String)>>;

/// Process-wide metric registry. Built once in `main` and shared as `Arc<Metrics>`.
pub struct Metrics {
    pub registry: Registry,

    // Account metrics
    pub current_balance: GaugeVec,
    pub total_balance: GaugeVec,
    pub spend_today: GaugeVec,
    pub transactions_amount_today: GaugeVec,
    pub pot_balance: GaugeVec,

    // Collection metrics
    pub user_latest_collect: GaugeVec,
    pub collect_cycles: IntCounterVec,
    pub collector_restarts: IntCounter,

    // Token metrics
    pub access_token_expiry: GaugeVec,
    pub tokens_in_store: IntGauge,
    pub token_refreshes: IntCounterVec,

    // Upstream metrics
    pub api_response_code: IntCounterVec,

    pub up: IntGauge,

    // Service resource metrics
    pub process_cpu_usage: Gauge,
    pub process_memory_usage: IntGauge,
    pub process_virtual_memory: IntGauge,
    pub process_open_fds: IntGauge,
    pub process_start_time: IntGauge,
    pub process_uptime: IntGauge,

    published_transaction_groups: Mutex<PublishedGroups>,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Arc<Self>> {
        info!("Initializing Metrics ...");
        let registry = Registry::new_custom(Some("monzo".into()), None)?;

        let metrics: Arc<Metrics> = Arc::new(Self {
            // Account
            current_balance: GaugeVec::new(Opts::new("current_balance", "Shows the currently spendable account balance"), &["user_id", "account_id"])?,
            total_balance: GaugeVec::new(Opts::new("total_balance", "Shows the total account balance including pots"), &["user_id", "account_id"])?,
            spend_today: GaugeVec::new(Opts::new("spend_today", "Shows the spend amount spent today"), &["user_id", "account_id"])?,
            transactions_amount_today: GaugeVec::new(Opts::new("transactions_amount_today", "Shows the amount transacted today for a transaction description"), &["user_id", "account_id", "description", "category"])?,
            pot_balance: GaugeVec::new(Opts::new("pot_balance", "Shows the individual pot balance"), &["user_id", "pot_id", "pot_name"])?,

            // Collection
            user_latest_collect: GaugeVec::new(Opts::new("user_latest_collect", "Shows the unix timestamp of the most recent data collection"), &["user_id"])?,
            collect_cycles: IntCounterVec::new(Opts::new("collect_cycles_total", "Collection cycles by outcome"), &["outcome"])?,
            collector_restarts: IntCounter::new("collector_restarts_total", "Collection worker restarts after a panic")?,

            // Token
            access_token_expiry: GaugeVec::new(Opts::new("access_token_expiry", "Shows the unix timestamp expiry for the access token"), &["user_id"])?,
            tokens_in_store: IntGauge::new("tokens_in_store", "Tokens currently held for rotation")?,
            token_refreshes: IntCounterVec::new(Opts::new("token_refresh_total", "Token refresh attempts by outcome"), &["outcome"])?,

            // Upstream
            api_response_code: IntCounterVec::new(Opts::new("api_response_code", "Shows the response codes per endpoint from the Monzo API"), &["endpoint", "response_code"])?,

            up: IntGauge::new("up", "1 if service is healthy")?,
            process_cpu_usage: Gauge::new("process_cpu_usage_percent", "CPU usage % of this process")?,
            process_memory_usage: IntGauge::new("process_memory_usage_bytes", "Resident memory used by this process")?,
            process_virtual_memory: IntGauge::new("process_virtual_memory_bytes", "Virtual memory used by this process")?,
            process_open_fds: IntGauge::new("process_open_fds", "Number of open file descriptors")?,
            process_start_time: IntGauge::new("process_start_time_seconds", "Process start time (UNIX seconds)")?,
            process_uptime: IntGauge::new("process_uptime_seconds", "Process uptime seconds")?,

            published_transaction_groups: Mutex::new(HashMap::new()),
            registry,
        });

        // Register all metrics in the registry
        let reg = &metrics.registry;
        reg.register(Box::new(metrics.current_balance.clone()))?;
        reg.register(Box::new(metrics.total_balance.clone()))?;
        reg.register(Box::new(metrics.spend_today.clone()))?;
        reg.register(Box::new(metrics.transactions_amount_today.clone()))?;
        reg.register(Box::new(metrics.pot_balance.clone()))?;
        reg.register(Box::new(metrics.user_latest_collect.clone()))?;
        reg.register(Box::new(metrics.collect_cycles.clone()))?;
        reg.register(Box::new(metrics.collector_restarts.clone()))?;
        reg.register(Box::new(metrics.access_token_expiry.clone()))?;
        reg.register(Box::new(metrics.tokens_in_store.clone()))?;
        reg.register(Box::new(metrics.token_refreshes.clone()))?;
        reg.register(Box::new(metrics.api_response_code.clone()))?;
        reg.register(Box::new(metrics.up.clone()))?;

        reg.register(Box::new(metrics.process_cpu_usage.clone()))?;
        reg.register(Box::new(metrics.process_memory_usage.clone()))?;
        reg.register(Box::new(metrics.process_virtual_memory.clone()))?;
        reg.register(Box::new(metrics.process_open_fds.clone()))?;
        reg.register(Box::new(metrics.process_start_time.clone()))?;
        reg.register(Box::new(metrics.process_uptime.clone()))?;

        Ok(metrics)
    }

    /// Prometheus text exposition of everything in the registry.
    pub fn encode_text(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

// Publishers. Values are minor currency units; every setter replaces the previous value.
impl Metrics {
    pub fn set_current_balance(&self, user_id: &str, account_id: &str, balance: i64) {
        debug!("Setting current_balance for user {} for account {} to {}", user_id, account_id, balance);
        self.current_balance.with_label_values(&[user_id, account_id]).set(balance as f64);
    }

    pub fn set_total_balance(&self, user_id: &str, account_id: &str, balance: i64) {
        debug!("Setting total_balance for user {} for account {} to {}", user_id, account_id, balance);
        self.total_balance.with_label_values(&[user_id, account_id]).set(balance as f64);
    }

    pub fn set_spend_today(&self, user_id: &str, account_id: &str, spend: i64) {
        debug!("Setting spend_today for user {} for account {} to {}", user_id, account_id, spend);
        self.spend_today.with_label_values(&[user_id, account_id]).set(spend as f64);
    }

    pub fn set_transactions_amount_today(&self, user_id: &str, account_id: &str, summary: &TransactionSummary) {
        debug!(
            "Setting transactions_amount_today for user {} for account {} for description {} for category {} to {}",
            user_id, account_id, summary.description, summary.category, summary.amount
        );
        self.transactions_amount_today
            .with_label_values(&[user_id, account_id, summary.description.as_str(), summary.category.as_str()])
            .set(summary.amount as f64);
    }

    /// Publishes every group of one account. With `prune_stale` set, groups this account
    /// reported on its previous publish but not now are removed. Other accounts are untouched.
    pub fn publish_transactions_amount_today(
        &self,
        user_id: &str,
        account_id: &str,
        summaries: &[TransactionSummary],
        prune_stale: bool,
    ) {
        let current: BTreeSet<(String, String)> = summaries
            .iter()
            .map(|s| (s.description.clone(), s.category.clone()))
            .collect();

        let mut published = self
            .published_transaction_groups
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let previous = published
            .insert((user_id.to_owned(), account_id.to_owned()), current.clone())
            .unwrap_or_default();

        if prune_stale {
            for (description, category) in previous.difference(&current) {
                debug!(
                    "Removing transactions_amount_today for user {} for account {} for description {} for category {}",
                    user_id, account_id, description, category
                );
                if let Err(err) = self
                    .transactions_amount_today
                    .remove_label_values(&[user_id, account_id, description.as_str(), category.as_str()])
                {
                    debug!("transactions_amount_today series already gone: {}", err);
                }
            }
        }

        for summary in summaries {
            self.set_transactions_amount_today(user_id, account_id, summary);
        }
    }

    pub fn set_pot_balance(&self, user_id: &str, pot_id: &str, pot_name: &str, balance: i64) {
        debug!("Setting pot_balance for user {} for pot {} to {}", user_id, pot_id, balance);
        self.pot_balance.with_label_values(&[user_id, pot_id, pot_name]).set(balance as f64);
    }

    pub fn set_user_latest_collect(&self, user_id: &str, at: DateTime<Utc>) {
        debug!("Setting user_latest_collect for user {} to {}", user_id, at.timestamp());
        self.user_latest_collect.with_label_values(&[user_id]).set(at.timestamp() as f64);
    }

    pub fn set_access_token_expiry(&self, user_id: &str, expiry: DateTime<Utc>) {
        debug!("Setting access_token_expiry for user {} to {}", user_id, expiry.timestamp());
        self.access_token_expiry.with_label_values(&[user_id]).set(expiry.timestamp() as f64);
    }

    pub fn inc_api_response_code(&self, endpoint: &str, response_code: u16) {
        debug!("Incrementing api_response_code {} for endpoint {}", response_code, endpoint);
        self.api_response_code
            .with_label_values(&[endpoint, response_code.to_string().as_str()])
            .inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn gauges_replace_instead_of_accumulating() {
        let metrics = Metrics::new().unwrap();
        metrics.set_current_balance("user_1", "acc_1", 1500);
        metrics.set_current_balance("user_1", "acc_1", 1500);

        assert_eq!(metrics.current_balance.with_label_values(&["user_1", "acc_1"]).get(), 1500.0);
    }

    #[test]
    fn registry_uses_monzo_prefix() {
        let metrics = Metrics::new().unwrap();
        metrics.set_user_latest_collect("user_1", Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap());
        metrics.inc_api_response_code("/accounts", 200);
        metrics.inc_api_response_code("/accounts", 200);

        let text = metrics.encode_text().unwrap();
        assert!(text.contains("monzo_user_latest_collect{user_id=\"user_1\"} 1709251200"));
        assert!(text.contains("monzo_api_response_code{endpoint=\"/accounts\",response_code=\"200\"} 2"));
        assert_eq!(metrics.api_response_code.with_label_values(&["/accounts", "200"]).get(), 2);
    }

    fn summary(category: &str, description: &str, amount: i64) -> TransactionSummary {
        TransactionSummary {
            category: category.to_owned(),
            description: description.to_owned(),
            amount,
        }
    }

    #[test]
    fn republish_prunes_only_that_accounts_missing_groups() {
        let metrics = Metrics::new().unwrap();
        metrics.publish_transactions_amount_today("user_1", "acc_1", &[summary("eating_out", "CAFE", -350), summary("groceries", "MARKET", -900)], true);
        metrics.publish_transactions_amount_today("user_2", "acc_2", &[summary("eating_out", "CAFE", -120)], true);

        metrics.publish_transactions_amount_today("user_1", "acc_1", &[summary("groceries", "MARKET", -1000)], true);

        let text = metrics.encode_text().unwrap();
        assert!(!text.contains(r#"account_id="acc_1",category="eating_out""#));
        assert!(text.contains(
            r#"monzo_transactions_amount_today{account_id="acc_1",category="groceries",description="MARKET",user_id="user_1"} -1000"#
        ));
        assert!(text.contains(
            r#"monzo_transactions_amount_today{account_id="acc_2",category="eating_out",description="CAFE",user_id="user_2"} -120"#
        ));
    }

    #[test]
    fn republish_without_pruning_keeps_old_groups() {
        let metrics = Metrics::new().unwrap();
        metrics.publish_transactions_amount_today("user_1", "acc_1", &[summary("eating_out", "CAFE", -350)], false);
        metrics.publish_transactions_amount_today("user_1", "acc_1", &[], false);

        assert_eq!(
            metrics
                .transactions_amount_today
                .with_label_values(&["user_1", "acc_1", "CAFE", "eating_out"])
                .get(),
            -350.0
        );
    }
}
