use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Local, SecondsFormat, Utc};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, error};

use crate::cache::token::TokenRecord;
use crate::helpers::time::start_of_day;
use crate::observability::metrics::Metrics;
use crate::upstream::error::UpstreamError;
use crate::upstream::gateway::UpstreamGateway;
use crate::upstream::types::{
    AccountSnapshot, AuthResponse, Balance, CallerIdentity, ListAccountsResponse, ListPotsResponse,
    ListTransactionsResponse, PotSnapshot, Transaction,
};
use crate::utils::constants::{
    DEFAULT_HTTP_TIMEOUT_MS, ENDPOINT_ACCOUNTS, ENDPOINT_BALANCE, ENDPOINT_OAUTH_TOKEN,
    ENDPOINT_POTS, ENDPOINT_TRANSACTIONS, ENDPOINT_WHOAMI,
};

/// `reqwest` implementation of [`UpstreamGateway`] against the Monzo API.
///
/// Every response that carries a status code is counted in `api_response_code`;
/// transport failures are only logged.
#[derive(Clone)]
pub struct MonzoClient {
    client: Client,
    api_url: String,
    metrics: Arc<Metrics>,
}

impl MonzoClient {
    pub fn new(api_url: &str, metrics: Arc<Metrics>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(DEFAULT_HTTP_TIMEOUT_MS))
            .build()?;
        Ok(Self::with_client(client, api_url, metrics))
    }

    pub fn with_client(client: Client, api_url: &str, metrics: Arc<Metrics>) -> Self {
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_owned(),
            metrics,
        }
    }

    /// Exchanges an authorization code for a fresh token pair.
    pub async fn exchange_authorization_code(
        &self,
        client_id: &str,
        client_secret: &str,
        redirect_uri: &str,
        code: &str,
    ) -> Result<TokenRecord, UpstreamError> {
        let form = [
            ("grant_type", "authorization_code"),
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("redirect_uri", redirect_uri),
            ("code", code),
        ];
        let response = self.post_form(ENDPOINT_OAUTH_TOKEN, &form).await?;
        let auth: AuthResponse = self.read_json(ENDPOINT_OAUTH_TOKEN, response).await?;
        TokenRecord::from_auth_response(auth, Utc::now())
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, &str)],
        access_token: &str,
    ) -> Result<T, UpstreamError> {
        let url = format!("{}{}", self.api_url, endpoint);
        debug!("Requesting: Monzo {} {:?}", endpoint, query);

        let response = self
            .client
            .get(&url)
            .query(query)
            .bearer_auth(access_token)
            .send()
            .await
            .inspect_err(|err| error!("Encountered error: Monzo {} request => {}", endpoint, err))?;

        self.read_json(endpoint, response).await
    }

    async fn post_form(&self, endpoint: &str, form: &[(&str, &str)]) -> Result<Response, UpstreamError> {
        let url = format!("{}{}", self.api_url, endpoint);
        debug!("Making POST request to {}", url);

        let response = self
            .client
            .post(&url)
            .form(form)
            .send()
            .await
            .inspect_err(|err| error!("Encountered error: Monzo {} request => {}", endpoint, err))?;
        Ok(response)
    }

    async fn read_json<T: DeserializeOwned>(&self, endpoint: &str, response: Response) -> Result<T, UpstreamError> {
        let status = response.status();
        self.metrics.inc_api_response_code(endpoint, status.as_u16());
        debug!("Response to {} was {}", endpoint, status);

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(UpstreamError::Unauthorized { endpoint: endpoint.to_owned() });
        }
        if !status.is_success() {
            return Err(UpstreamError::UnexpectedStatus {
                endpoint: endpoint.to_owned(),
                status: status.as_u16(),
            });
        }

        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}

/// `since` query value: local midnight of the given instant, as RFC3339 UTC.
pub(crate) fn since_param(since: DateTime<Utc>) -> String {
    start_of_day(&since.with_timezone(&Local))
        .with_timezone(&Utc)
        .to_rfc3339_opts(SecondsFormat::Secs, true)
}

impl UpstreamGateway for MonzoClient {
    async fn fetch_identity(&self, access_token: &str) -> Result<CallerIdentity, UpstreamError> {
        self.get_json(ENDPOINT_WHOAMI, &[], access_token).await
    }

    async fn list_accounts(&self, access_token: &str) -> Result<Vec<String>, UpstreamError> {
        let response: ListAccountsResponse = self.get_json(ENDPOINT_ACCOUNTS, &[], access_token).await?;
        Ok(response.accounts.into_iter().map(|account| account.id).collect())
    }

    async fn get_balance(&self, access_token: &str, account_id: &str) -> Result<AccountSnapshot, UpstreamError> {
        let balance: Balance = self
            .get_json(ENDPOINT_BALANCE, &[("account_id", account_id)], access_token)
            .await?;
        Ok(AccountSnapshot::new(account_id, balance))
    }

    async fn list_pots(&self, access_token: &str) -> Result<Vec<PotSnapshot>, UpstreamError> {
        let response: ListPotsResponse = self.get_json(ENDPOINT_POTS, &[], access_token).await?;
        Ok(response.pots.into_iter().map(PotSnapshot::from).collect())
    }

    async fn list_transactions_since(
        &self,
        access_token: &str,
        account_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Transaction>, UpstreamError> {
        let since = since_param(since);
        let query = [
            ("account_id", account_id),
            ("since", since.as_str()),
            ("expand[]", "merchant"),
        ];
        let response: ListTransactionsResponse = self.get_json(ENDPOINT_TRANSACTIONS, &query, access_token).await?;
        Ok(response.transactions)
    }

    async fn refresh_token(
        &self,
        client_id: &str,
        client_secret: &str,
        refresh_token: &str,
    ) -> Result<TokenRecord, UpstreamError> {
        let form = [
            ("grant_type", "refresh_token"),
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("refresh_token", refresh_token),
        ];
        let response = self.post_form(ENDPOINT_OAUTH_TOKEN, &form).await?;
        let auth: AuthResponse = self
            .read_json(ENDPOINT_OAUTH_TOKEN, response)
            .await
            .map_err(|err| match err {
                UpstreamError::Unauthorized { endpoint } => {
                    UpstreamError::RefreshFailed(format!("{} rejected the refresh grant", endpoint))
                }
                UpstreamError::UnexpectedStatus { endpoint, status } => {
                    UpstreamError::RefreshFailed(format!("{} responded {}", endpoint, status))
                }
                other => other,
            })?;
        TokenRecord::from_auth_response(auth, Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use httpmock::Method::{GET, POST};
    use httpmock::MockServer;
    use serde_json::json;

    fn client_for(server: &MockServer) -> (MonzoClient, Arc<Metrics>) {
        let metrics = Metrics::new().unwrap();
        let client = MonzoClient::new(&server.base_url(), metrics.clone()).unwrap();
        (client, metrics)
    }

    fn response_count(metrics: &Metrics, endpoint: &str, code: &str) -> u64 {
        metrics.api_response_code.with_label_values(&[endpoint, code]).get()
    }

    #[tokio::test]
    async fn fetch_identity_sends_bearer_token() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/ping/whoami").header("authorization", "Bearer tok-1");
                then.status(200).json_body(json!({
                    "authenticated": true,
                    "client_id": "oauth2client_1",
                    "user_id": "user_1"
                }));
            })
            .await;
        let (client, metrics) = client_for(&server);

        let identity = client.fetch_identity("tok-1").await.unwrap();

        mock.assert_async().await;
        assert_eq!(identity.user_id, "user_1");
        assert!(identity.authenticated);
        assert_eq!(response_count(&metrics, "/ping/whoami", "200"), 1);
    }

    #[tokio::test]
    async fn unauthorized_is_counted_and_classified() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/accounts");
                then.status(401).json_body(json!({"code": "unauthorized.bad_access_token"}));
            })
            .await;
        let (client, metrics) = client_for(&server);

        let err = client.list_accounts("expired").await.unwrap_err();

        assert!(matches!(err, UpstreamError::Unauthorized { .. }));
        assert_eq!(response_count(&metrics, "/accounts", "401"), 1);
    }

    #[tokio::test]
    async fn malformed_body_is_a_decode_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/pots");
                then.status(200).body("not json");
            })
            .await;
        let (client, metrics) = client_for(&server);

        let err = client.list_pots("tok").await.unwrap_err();

        assert!(matches!(err, UpstreamError::Decode(_)));
        assert_eq!(response_count(&metrics, "/pots", "200"), 1);
    }

    #[tokio::test]
    async fn transport_failure_emits_no_response_code() {
        let metrics = Metrics::new().unwrap();
        // nothing listens on port 9 of the loopback interface
        let client = MonzoClient::new("http://127.0.0.1:9", metrics.clone()).unwrap();

        let err = client.fetch_identity("tok").await.unwrap_err();

        assert!(matches!(err, UpstreamError::Transport(_)));
        assert!(!metrics.encode_text().unwrap().contains("monzo_api_response_code{"));
    }

    #[tokio::test]
    async fn accounts_keep_upstream_order() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/accounts");
                then.status(200).json_body(json!({"accounts": [
                    {"id": "acc_2", "description": "joint", "created": "2020-01-01T00:00:00Z"},
                    {"id": "acc_1", "description": "personal", "created": "2019-01-01T00:00:00Z"}
                ]}));
            })
            .await;
        let (client, _) = client_for(&server);

        assert_eq!(client.list_accounts("tok").await.unwrap(), vec!["acc_2", "acc_1"]);
    }

    #[tokio::test]
    async fn balance_is_requested_per_account() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/balance").query_param("account_id", "acc_1");
                then.status(200).json_body(json!({
                    "balance": 5000, "total_balance": 6000, "currency": "GBP", "spend_today": -1200
                }));
            })
            .await;
        let (client, _) = client_for(&server);

        let snapshot = client.get_balance("tok", "acc_1").await.unwrap();

        mock.assert_async().await;
        assert_eq!(
            snapshot,
            AccountSnapshot { account_id: "acc_1".into(), balance: 5000, total_balance: 6000, spend_today: -1200 }
        );
    }

    #[tokio::test]
    async fn deleted_pots_are_flagged() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/pots");
                then.status(200).json_body(json!({"pots": [
                    {"id": "pot_1", "name": "Holiday", "currency": "GBP", "balance": 1000, "deleted": false},
                    {"id": "pot_2", "name": "Old", "currency": "GBP", "balance": 0, "deleted": true}
                ]}));
            })
            .await;
        let (client, _) = client_for(&server);

        let pots = client.list_pots("tok").await.unwrap();
        assert_eq!(
            pots,
            vec![
                PotSnapshot { pot_id: "pot_1".into(), name: "Holiday".into(), balance: 1000, deleted: false },
                PotSnapshot { pot_id: "pot_2".into(), name: "Old".into(), balance: 0, deleted: true },
            ]
        );
    }

    #[tokio::test]
    async fn transactions_are_requested_since_midnight() {
        let now = Utc::now();
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/transactions")
                    .query_param("account_id", "acc_1")
                    .query_param("since", since_param(now).as_str())
                    .query_param("expand[]", "merchant");
                then.status(200).json_body(json!({"transactions": [
                    {"id": "tx_1", "amount": -500, "category": "eating_out", "description": "CAFE", "created": "2024-03-01T09:00:00Z"}
                ]}));
            })
            .await;
        let (client, _) = client_for(&server);

        let txs = client.list_transactions_since("tok", "acc_1", now).await.unwrap();

        mock.assert_async().await;
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].amount, -500);
    }

    #[test]
    fn since_param_is_not_after_the_instant() {
        let now = Utc::now();
        let since = DateTime::parse_from_rfc3339(&since_param(now)).unwrap();
        assert!(since <= now);
        assert!(now - since.with_timezone(&Utc) < ChronoDuration::hours(26));
    }

    #[tokio::test]
    async fn refresh_computes_expiry_with_margin() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/oauth2/token");
                then.status(200).json_body(json!({
                    "access_token": "new-access",
                    "refresh_token": "new-refresh",
                    "user_id": "user_1",
                    "expires_in": 3600
                }));
            })
            .await;
        let (client, metrics) = client_for(&server);

        let before = Utc::now();
        let record = client.refresh_token("cid", "secret", "old-refresh").await.unwrap();
        let after = Utc::now();

        mock.assert_async().await;
        assert_eq!(record.access_token, "new-access");
        assert_eq!(record.refresh_token, "new-refresh");
        assert!(record.expiry_time >= before + ChronoDuration::seconds(3300) - ChronoDuration::seconds(1));
        assert!(record.expiry_time <= after + ChronoDuration::seconds(3300));
        assert_eq!(response_count(&metrics, "/oauth2/token", "200"), 1);
    }

    #[tokio::test]
    async fn rejected_refresh_grant_is_refresh_failed() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/oauth2/token");
                then.status(400).json_body(json!({"error": "invalid_grant"}));
            })
            .await;
        let (client, metrics) = client_for(&server);

        let err = client.refresh_token("cid", "secret", "used-refresh").await.unwrap_err();

        assert!(matches!(err, UpstreamError::RefreshFailed(_)));
        assert_eq!(response_count(&metrics, "/oauth2/token", "400"), 1);
    }

    #[tokio::test]
    async fn oversized_expires_in_is_a_decode_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/oauth2/token");
                then.status(200).json_body(json!({
                    "access_token": "new-access",
                    "refresh_token": "new-refresh",
                    "user_id": "user_1",
                    "expires_in": 1e300
                }));
            })
            .await;
        let (client, _) = client_for(&server);

        let err = client.refresh_token("cid", "secret", "old-refresh").await.unwrap_err();

        assert!(matches!(err, UpstreamError::Decode(_)));
    }
}
