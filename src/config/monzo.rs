use serde::Deserialize;

use crate::config::settings::SettingsConfig;
use crate::utils::constants::{DEFAULT_MONZO_API_URL, DEFAULT_MONZO_AUTH_URL};

/// ================================
/// Full service configuration
/// ================================
#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    #[serde(default)]
    pub settings: SettingsConfig,
    pub monzo: MonzoConfig,
}

/// ================================
/// Upstream API
/// ================================
#[derive(Debug, Deserialize, Clone)]
pub struct MonzoConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_auth_url")]
    pub auth_url: String,
    /// pre-provisioned access tokens; when set no OAuth flow or refresh runs
    #[serde(default)]
    pub access_tokens: Vec<String>,
    pub oauth: Option<OAuthConfig>,
}

/// OAuth client registered with the upstream API.
#[derive(Debug, Deserialize, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    /// URL on which the exporter is reachable by the user's browser
    pub external_url: String,
}

/// Credentials used for the refresh grant and the code exchange.
#[derive(Clone)]
pub struct OAuthCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub external_url: String,
}

impl std::fmt::Debug for OAuthCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"***")
            .field("external_url", &self.external_url)
            .finish()
    }
}

impl From<&OAuthConfig> for OAuthCredentials {
    fn from(cfg: &OAuthConfig) -> Self {
        Self {
            client_id: cfg.client_id.to_owned(),
            client_secret: cfg.client_secret.to_owned(),
            external_url: cfg.external_url.trim_end_matches('/').to_owned(),
        }
    }
}

/// How access tokens reach the collector.
#[derive(Debug, Clone)]
pub enum TokenMode {
    Static(Vec<String>),
    OAuth(OAuthCredentials),
}

impl MonzoConfig {
    /// Static tokens win over an OAuth block; validation rejects configs with both or neither.
    pub fn token_mode(&self) -> Option<TokenMode> {
        if !self.access_tokens.is_empty() {
            return Some(TokenMode::Static(self.access_tokens.to_owned()));
        }
        self.oauth
            .as_ref()
            .map(|oauth| TokenMode::OAuth(OAuthCredentials::from(oauth)))
    }
}

fn default_api_url() -> String {
    DEFAULT_MONZO_API_URL.to_string()
}

fn default_auth_url() -> String {
    DEFAULT_MONZO_AUTH_URL.to_string()
}
