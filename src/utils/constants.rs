//! Shared constants and invariants

pub const DEFAULT_REFRESH_INTERVAL_SECONDS: u64 = 10;
pub const DEFAULT_COLLECT_INTERVAL_SECONDS: u64 = 30;
pub const DEFAULT_METRICS_PATH: &str = "/metrics";
pub const DEFAULT_HTTP_TIMEOUT_MS: u64 = 10_000;

pub const DEFAULT_MONZO_API_URL: &str = "https://api.monzo.com";
pub const DEFAULT_MONZO_AUTH_URL: &str = "https://auth.monzo.com";

/// subtracted from the lifetime the server reports for a fresh access token
pub const EXPIRY_SAFETY_MARGIN_SECONDS: i64 = 300;

// Token issuer
pub const STATE_COOKIE_NAME: &str = "monzo_exporter_state";
pub const STATE_LENGTH: usize = 32;
pub const START_PATH: &str = "/token/start";
pub const CALLBACK_PATH: &str = "/token/callback";

// Upstream endpoints, also used as the `endpoint` metric label
pub const ENDPOINT_WHOAMI: &str = "/ping/whoami";
pub const ENDPOINT_ACCOUNTS: &str = "/accounts";
pub const ENDPOINT_BALANCE: &str = "/balance";
pub const ENDPOINT_POTS: &str = "/pots";
pub const ENDPOINT_TRANSACTIONS: &str = "/transactions";
pub const ENDPOINT_OAUTH_TOKEN: &str = "/oauth2/token";
