use std::future::Future;

use chrono::{DateTime, Utc};

use crate::cache::token::TokenRecord;
use crate::upstream::error::UpstreamError;
use crate::upstream::types::{AccountSnapshot, CallerIdentity, PotSnapshot, Transaction};

/// Capabilities the exporter consumes from the upstream API.
/// Every call carries its own bearer token; implementations hold no per-user state.
pub trait UpstreamGateway: Send + Sync + 'static {
    fn fetch_identity(
        &self,
        access_token: &str,
    ) -> impl Future<Output = Result<CallerIdentity, UpstreamError>> + Send;

    /// Account ids in upstream order.
    fn list_accounts(
        &self,
        access_token: &str,
    ) -> impl Future<Output = Result<Vec<String>, UpstreamError>> + Send;

    fn get_balance(
        &self,
        access_token: &str,
        account_id: &str,
    ) -> impl Future<Output = Result<AccountSnapshot, UpstreamError>> + Send;

    fn list_pots(
        &self,
        access_token: &str,
    ) -> impl Future<Output = Result<Vec<PotSnapshot>, UpstreamError>> + Send;

    /// Transactions since local midnight of the day `since` falls on.
    fn list_transactions_since(
        &self,
        access_token: &str,
        account_id: &str,
        since: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<Transaction>, UpstreamError>> + Send;

    fn refresh_token(
        &self,
        client_id: &str,
        client_secret: &str,
        refresh_token: &str,
    ) -> impl Future<Output = Result<TokenRecord, UpstreamError>> + Send;
}
