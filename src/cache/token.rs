use chrono::{DateTime, Utc};

use crate::helpers::time::token_expiry;
use crate::upstream::error::UpstreamError;
use crate::upstream::types::AuthResponse;

/// An access/refresh credential pair plus its owning user and expiry.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenRecord {
    pub user_id: String,
    pub access_token: String,
    pub refresh_token: String,
    pub expiry_time: DateTime<Utc>,
}

impl TokenRecord {
    pub fn new(
        user_id: String,
        access_token: String,
        refresh_token: String,
        expiry_time: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id,
            access_token,
            refresh_token,
            expiry_time,
        }
    }

    /// Record for a token grant received at `received_at`.
    pub fn from_auth_response(auth: AuthResponse, received_at: DateTime<Utc>) -> Result<Self, UpstreamError> {
        let expiry_time = token_expiry(received_at, auth.expires_in)
            .ok_or_else(|| UpstreamError::Decode(format!("expires_in out of range: {}", auth.expires_in)))?;
        Ok(Self {
            user_id: auth.user_id,
            access_token: auth.access_token,
            refresh_token: auth.refresh_token,
            expiry_time,
        })
    }
}

// token values stay out of logs
impl std::fmt::Debug for TokenRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenRecord")
            .field("user_id", &self.user_id)
            .field("access_token", &"***")
            .field("refresh_token", &"***")
            .field("expiry_time", &self.expiry_time)
            .finish()
    }
}
