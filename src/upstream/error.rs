/// Failures of a single upstream call.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("unauthorized: access token rejected by {endpoint}")]
    Unauthorized { endpoint: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed response body: {0}")]
    Decode(String),

    #[error("token refresh failed: {0}")]
    RefreshFailed(String),

    #[error("unexpected status {status} from {endpoint}")]
    UnexpectedStatus { endpoint: String, status: u16 },
}

impl From<reqwest::Error> for UpstreamError {
    fn from(e: reqwest::Error) -> Self {
        UpstreamError::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for UpstreamError {
    fn from(e: serde_json::Error) -> Self {
        UpstreamError::Decode(e.to_string())
    }
}
