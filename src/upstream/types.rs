use chrono::{DateTime, Utc};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CallerIdentity {
    #[serde(default)]
    pub authenticated: bool,
    #[serde(default)]
    pub client_id: String,
    pub user_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Account {
    pub id: String,
    #[serde(default)]
    pub description: String,
    pub created: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct ListAccountsResponse {
    pub accounts: Vec<Account>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Balance {
    pub balance: i64,
    pub total_balance: i64,
    #[serde(default)]
    pub currency: String,
    pub spend_today: i64,
}

/// Balances of one account, produced fresh every cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountSnapshot {
    pub account_id: String,
    pub balance: i64,
    pub total_balance: i64,
    pub spend_today: i64,
}

impl AccountSnapshot {
    pub fn new(account_id: &str, balance: Balance) -> Self {
        Self {
            account_id: account_id.to_owned(),
            balance: balance.balance,
            total_balance: balance.total_balance,
            spend_today: balance.spend_today,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Pot {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub currency: String,
    pub balance: i64,
    #[serde(default)]
    pub deleted: bool,
}

#[derive(Debug, Deserialize)]
pub struct ListPotsResponse {
    pub pots: Vec<Pot>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PotSnapshot {
    pub pot_id: String,
    pub name: String,
    pub balance: i64,
    pub deleted: bool,
}

impl From<Pot> for PotSnapshot {
    fn from(pot: Pot) -> Self {
        Self {
            pot_id: pot.id,
            name: pot.name,
            balance: pot.balance,
            deleted: pot.deleted,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Transaction {
    #[serde(default)]
    pub id: String,
    /// minor units, negative for spend
    pub amount: i64,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub description: String,
    pub created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub decline_reason: Option<String>,
}

impl Transaction {
    pub fn is_declined(&self) -> bool {
        self.decline_reason.as_deref().is_some_and(|reason| !reason.is_empty())
    }
}

#[derive(Debug, Deserialize)]
pub struct ListTransactionsResponse {
    pub transactions: Vec<Transaction>,
}

/// Token endpoint response for both the code exchange and the refresh grant.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub user_id: String,
    /// seconds
    pub expires_in: f64,
}
