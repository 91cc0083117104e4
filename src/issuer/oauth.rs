//! Inbound OAuth handshake. Sends the user to the upstream consent page,
//! verifies the returned state against a cookie, exchanges the code and
//! deposits the resulting token pair into the [`TokenStore`].

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use rand::RngCore;
use reqwest::Url;
use tracing::{error, info, warn};

use crate::cache::token_store::TokenStore;
use crate::config::monzo::OAuthCredentials;
use crate::observability::metrics::Metrics;
use crate::server::server::AppState;
use crate::upstream::client::MonzoClient;
use crate::utils::constants::{CALLBACK_PATH, START_PATH, STATE_COOKIE_NAME, STATE_LENGTH};

#[derive(Clone)]
pub struct IssuerState {
    client: Arc<MonzoClient>,
    store: Arc<TokenStore>,
    metrics: Arc<Metrics>,
    credentials: OAuthCredentials,
    auth_url: String,
}

impl IssuerState {
    pub fn new(
        client: Arc<MonzoClient>,
        store: Arc<TokenStore>,
        metrics: Arc<Metrics>,
        credentials: OAuthCredentials,
        auth_url: &str,
    ) -> Self {
        Self {
            client,
            store,
            metrics,
            credentials,
            auth_url: auth_url.to_owned(),
        }
    }

    pub fn router(&self) -> Router<AppState> {
        info!("served path: {}", START_PATH);
        info!("served path: {}", CALLBACK_PATH);
        Router::new()
            .route(START_PATH, get(handle_journey_start))
            .route(CALLBACK_PATH, get(handle_journey_callback))
    }

    fn redirect_url(&self) -> String {
        format!("{}{}", self.credentials.external_url, CALLBACK_PATH)
    }

    fn authorization_url(&self, state: &str) -> anyhow::Result<Url> {
        let url = Url::parse_with_params(
            &self.auth_url,
            &[
                ("client_id", self.credentials.client_id.as_str()),
                ("redirect_uri", self.redirect_url().as_str()),
                ("state", state),
                ("response_type", "code"),
            ],
        )?;
        Ok(url)
    }
}

fn generate_random_state() -> String {
    let mut random_bytes = [0u8; STATE_LENGTH];
    rand::thread_rng().fill_bytes(&mut random_bytes);
    hex::encode(random_bytes)
}

fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
}

/// The single value of `key`, or `None` when it is absent or repeated.
fn single_param<'a>(params: &'a [(String, String)], key: &str) -> Option<&'a str> {
    let mut values = params.iter().filter(|(k, _)| k == key).map(|(_, v)| v.as_str());
    match (values.next(), values.next()) {
        (Some(value), None) => Some(value),
        _ => None,
    }
}

fn bad_request(message: String) -> Response {
    warn!("token callback rejected: {}", message);
    (StatusCode::BAD_REQUEST, format!("400 - {}", message)).into_response()
}

async fn handle_journey_start(State(state): State<AppState>) -> Response {
    let Some(issuer) = state.issuer_state else {
        return (StatusCode::NOT_FOUND, "404 - Not found").into_response();
    };

    let oauth_state = generate_random_state();
    let location = match issuer.authorization_url(&oauth_state) {
        Ok(url) => url,
        Err(err) => {
            error!("cannot build authorization url from '{}': {}", issuer.auth_url, err);
            return (StatusCode::INTERNAL_SERVER_ERROR, "500 - Invalid auth url").into_response();
        }
    };
    let cookie = format!("{}={}; Path=/; HttpOnly", STATE_COOKIE_NAME, oauth_state);

    let (Ok(location_header), Ok(cookie_header)) =
        (HeaderValue::from_str(location.as_str()), HeaderValue::from_str(&cookie))
    else {
        return (StatusCode::INTERNAL_SERVER_ERROR, "500 - Invalid redirect").into_response();
    };

    info!("redirecting user to {}", issuer.auth_url);
    (
        StatusCode::FOUND,
        [(header::LOCATION, location_header), (header::SET_COOKIE, cookie_header)],
    )
        .into_response()
}

async fn handle_journey_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<Vec<(String, String)>>,
) -> Response {
    let Some(issuer) = state.issuer_state else {
        return (StatusCode::NOT_FOUND, "404 - Not found").into_response();
    };

    let Some(cookie_state) = cookie_value(&headers, STATE_COOKIE_NAME) else {
        return bad_request(format!("No {} cookie set", STATE_COOKIE_NAME));
    };
    let Some(request_state) = single_param(&params, "state") else {
        return bad_request("state not retrievable".to_owned());
    };
    if request_state != cookie_state {
        return bad_request("cookie state and Monzo state differ".to_owned());
    }
    let Some(code) = single_param(&params, "code").filter(|code| !code.is_empty()) else {
        return bad_request("Monzo auth code not retrievable".to_owned());
    };

    let credentials = &issuer.credentials;
    let record = match issuer
        .client
        .exchange_authorization_code(
            &credentials.client_id,
            &credentials.client_secret,
            &issuer.redirect_url(),
            code,
        )
        .await
    {
        Ok(record) => record,
        Err(err) => {
            error!("authorization code exchange failed: {}", err);
            return (StatusCode::INTERNAL_SERVER_ERROR, "500 - Error making request to Monzo").into_response();
        }
    };

    let user_id = record.user_id.clone();
    let expiry_time = record.expiry_time;
    let tokens_in_store = issuer.store.append(record).await;
    issuer.metrics.set_access_token_expiry(&user_id, expiry_time);
    issuer.metrics.tokens_in_store.set(tokens_in_store as i64);
    info!("tokens accepted for user {}", user_id);

    (StatusCode::CREATED, "201 - Tokens received and accepted").into_response()
}
