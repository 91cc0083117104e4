pub use axum::Router;
pub use serde_json::json;
pub use tokio::task::JoinHandle;

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use reqwest::Client;

use crate::cache::token::TokenRecord;
use crate::observability::metrics::Metrics;
use crate::upstream::error::UpstreamError;
use crate::upstream::gateway::UpstreamGateway;
use crate::upstream::types::{AccountSnapshot, CallerIdentity, PotSnapshot, Transaction};

/// Spawn an Axum router on an ephemeral port and return (JoinHandle, SocketAddr)
pub async fn spawn_axum(router: Router) -> (JoinHandle<()>, SocketAddr) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind failed");
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.expect("server failed");
    });
    (handle, addr)
}

pub fn build_reqwest_client() -> Client {
    Client::builder()
        .timeout(std::time::Duration::from_secs(5))
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .expect("reqwest client")
}

/// Lines of the text exposition that carry `user_id="<user_id>"`.
pub fn series_for_user(metrics: &Metrics, user_id: &str) -> Vec<String> {
    let needle = format!("user_id=\"{}\"", user_id);
    metrics
        .encode_text()
        .unwrap()
        .lines()
        .filter(|line| !line.starts_with('#') && line.contains(&needle))
        .map(str::to_owned)
        .collect()
}

pub fn transaction(category: &str, description: &str, amount: i64) -> Transaction {
    Transaction {
        id: format!("tx_{}_{}", description, amount),
        amount,
        category: category.to_owned(),
        description: description.to_owned(),
        created: Some(Utc::now()),
        decline_reason: None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailAt {
    Identity,
    Accounts,
}

/// Everything the fake upstream knows about the owner of one access token.
#[derive(Debug, Clone, Default)]
pub struct FakeUser {
    pub user_id: String,
    pub accounts: Vec<AccountSnapshot>,
    pub pots: Vec<PotSnapshot>,
    pub transactions: Vec<Transaction>,
}

impl FakeUser {
    pub fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_owned(),
            ..Default::default()
        }
    }

    pub fn with_account(mut self, account_id: &str, balance: i64, total_balance: i64, spend_today: i64) -> Self {
        self.accounts.push(AccountSnapshot {
            account_id: account_id.to_owned(),
            balance,
            total_balance,
            spend_today,
        });
        self
    }

    pub fn with_pot(mut self, pot_id: &str, name: &str, balance: i64) -> Self {
        self.pots.push(PotSnapshot {
            pot_id: pot_id.to_owned(),
            name: name.to_owned(),
            balance,
            deleted: false,
        });
        self
    }

    pub fn with_deleted_pot(mut self, pot_id: &str, name: &str, balance: i64) -> Self {
        self.pots.push(PotSnapshot {
            pot_id: pot_id.to_owned(),
            name: name.to_owned(),
            balance,
            deleted: true,
        });
        self
    }

    pub fn with_transactions(mut self, transactions: Vec<Transaction>) -> Self {
        self.transactions = transactions;
        self
    }
}

/// In-memory [`UpstreamGateway`] with per-token failure and panic injection.
#[derive(Default)]
pub struct FakeGateway {
    users: Mutex<HashMap<String, FakeUser>>,
    failures: Mutex<HashMap<String, FailAt>>,
    panics_remaining: AtomicUsize,
    /// refresh token -> user id
    refreshable: Mutex<HashMap<String, String>>,
    rejected_refresh: Mutex<HashSet<String>>,
    refresh_count: AtomicUsize,
    calls: Mutex<Vec<String>>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(self, access_token: &str, user: FakeUser) -> Self {
        self.users.lock().unwrap().insert(access_token.to_owned(), user);
        self
    }

    pub fn failing(self, access_token: &str, at: FailAt) -> Self {
        self.failures.lock().unwrap().insert(access_token.to_owned(), at);
        self
    }

    /// The next `times` identity calls panic.
    pub fn panicking(self, times: usize) -> Self {
        self.panics_remaining.store(times, Ordering::SeqCst);
        self
    }

    pub fn refreshable(self, refresh_token: &str, user_id: &str) -> Self {
        self.refreshable
            .lock()
            .unwrap()
            .insert(refresh_token.to_owned(), user_id.to_owned());
        self
    }

    pub fn reject_refresh(&self, refresh_token: &str) {
        self.rejected_refresh.lock().unwrap().insert(refresh_token.to_owned());
    }

    pub fn set_user(&self, access_token: &str, user: FakeUser) {
        self.users.lock().unwrap().insert(access_token.to_owned(), user);
    }

    pub fn fail(&self, access_token: &str, at: FailAt) {
        self.failures.lock().unwrap().insert(access_token.to_owned(), at);
    }

    pub fn clear_failure(&self, access_token: &str) {
        self.failures.lock().unwrap().remove(access_token);
    }

    /// Calls in the form `"<operation> <access token or refresh token>"`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, token: &str) -> usize {
        let suffix = format!(" {}", token);
        self.calls().iter().filter(|call| call.ends_with(&suffix)).count()
    }

    fn record(&self, operation: &str, token: &str) {
        self.calls.lock().unwrap().push(format!("{} {}", operation, token));
    }

    fn user(&self, access_token: &str) -> Result<FakeUser, UpstreamError> {
        self.users
            .lock()
            .unwrap()
            .get(access_token)
            .cloned()
            .ok_or_else(|| UpstreamError::Unauthorized {
                endpoint: "/ping/whoami".to_owned(),
            })
    }

    fn fails_at(&self, access_token: &str, at: FailAt) -> bool {
        self.failures.lock().unwrap().get(access_token) == Some(&at)
    }
}

impl UpstreamGateway for FakeGateway {
    async fn fetch_identity(&self, access_token: &str) -> Result<CallerIdentity, UpstreamError> {
        self.record("identity", access_token);
        let should_panic = self
            .panics_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_panic {
            panic!("injected identity panic");
        }
        if self.fails_at(access_token, FailAt::Identity) {
            return Err(UpstreamError::Transport("injected identity failure".to_owned()));
        }
        let user = self.user(access_token)?;
        Ok(CallerIdentity {
            authenticated: true,
            client_id: "oauth2client_test".to_owned(),
            user_id: user.user_id,
        })
    }

    async fn list_accounts(&self, access_token: &str) -> Result<Vec<String>, UpstreamError> {
        self.record("accounts", access_token);
        if self.fails_at(access_token, FailAt::Accounts) {
            return Err(UpstreamError::UnexpectedStatus {
                endpoint: "/accounts".to_owned(),
                status: 500,
            });
        }
        let user = self.user(access_token)?;
        Ok(user.accounts.iter().map(|account| account.account_id.clone()).collect())
    }

    async fn get_balance(&self, access_token: &str, account_id: &str) -> Result<AccountSnapshot, UpstreamError> {
        self.record("balance", access_token);
        self.user(access_token)?
            .accounts
            .into_iter()
            .find(|account| account.account_id == account_id)
            .ok_or_else(|| UpstreamError::Decode(format!("unknown account {}", account_id)))
    }

    async fn list_pots(&self, access_token: &str) -> Result<Vec<PotSnapshot>, UpstreamError> {
        self.record("pots", access_token);
        Ok(self.user(access_token)?.pots)
    }

    async fn list_transactions_since(
        &self,
        access_token: &str,
        _account_id: &str,
        _since: DateTime<Utc>,
    ) -> Result<Vec<Transaction>, UpstreamError> {
        self.record("transactions", access_token);
        Ok(self.user(access_token)?.transactions)
    }

    async fn refresh_token(
        &self,
        _client_id: &str,
        _client_secret: &str,
        refresh_token: &str,
    ) -> Result<TokenRecord, UpstreamError> {
        self.record("refresh", refresh_token);
        if self.rejected_refresh.lock().unwrap().contains(refresh_token) {
            return Err(UpstreamError::RefreshFailed("invalid_grant".to_owned()));
        }
        let user_id = self
            .refreshable
            .lock()
            .unwrap()
            .get(refresh_token)
            .cloned()
            .ok_or_else(|| UpstreamError::RefreshFailed("unknown refresh token".to_owned()))?;

        let n = self.refresh_count.fetch_add(1, Ordering::SeqCst) + 1;
        // a refresh token stays valid for its user across rotations
        Ok(TokenRecord::new(
            user_id,
            format!("access-{}-{}", refresh_token, n),
            refresh_token.to_owned(),
            Utc::now() + Duration::seconds(3300),
        ))
    }
}
