use std::sync::Arc;

use crate::cache::token_store::TokenStore;

/// Where the collector reads access tokens from on every cycle.
#[derive(Debug, Clone)]
pub enum TokenSource {
    /// pre-provisioned tokens; never refreshed
    Static(Arc<Vec<String>>),
    /// tokens deposited by the issuer and rotated by the refresh scheduler
    Store(Arc<TokenStore>),
}

impl TokenSource {
    pub async fn access_tokens(&self) -> Vec<String> {
        match self {
            TokenSource::Static(tokens) => tokens.as_ref().clone(),
            TokenSource::Store(store) => store.snapshot().await,
        }
    }
}
