use std::collections::VecDeque;
use std::future::Future;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::cache::token::TokenRecord;
use crate::config::settings::RefreshFailurePolicy;
use crate::upstream::error::UpstreamError;

/// Ordered, lock-guarded sequence of token records.
///
/// The sequence only grows through [`TokenStore::append`]; every other operation
/// leaves it a permutation of itself, except a failed refresh under
/// [`RefreshFailurePolicy::Drop`], which removes the head.
/// Duplicate records for one user are legal and rotate independently.
#[derive(Debug)]
pub struct TokenStore {
    inner: Mutex<VecDeque<TokenRecord>>,
    on_refresh_failure: RefreshFailurePolicy,
}

impl TokenStore {
    pub fn new(on_refresh_failure: RefreshFailurePolicy) -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            on_refresh_failure,
        }
    }

    /// Add a record at the tail. Returns the new length.
    pub async fn append(&self, record: TokenRecord) -> usize {
        let mut tokens = self.inner.lock().await;
        info!("appending token for user {}", record.user_id);
        tokens.push_back(record);
        tokens.len()
    }

    /// Copy of every access token in rotation order.
    /// The lock is held only for the copy.
    pub async fn snapshot(&self) -> Vec<String> {
        let tokens = self.inner.lock().await;
        debug!("there are {} tokens in the store", tokens.len());
        tokens.iter().map(|record| record.access_token.clone()).collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }

    /// Pops the head, refreshes it and appends the result at the tail.
    ///
    /// The lock stays held across `refresh`, so at most one refresh is in flight
    /// and readers queue behind it. Returns `Ok(None)` for an empty store.
    /// On failure the head is dropped or requeued according to the store's policy.
    pub async fn rotate_and_refresh<F, Fut>(&self, refresh: F) -> Result<Option<TokenRecord>, UpstreamError>
    where
        F: FnOnce(TokenRecord) -> Fut,
        Fut: Future<Output = Result<TokenRecord, UpstreamError>>,
    {
        let mut tokens = self.inner.lock().await;

        let Some(head) = tokens.pop_front() else {
            debug!("no tokens to refresh");
            return Ok(None);
        };

        match refresh(head.clone()).await {
            Ok(refreshed) => {
                tokens.push_back(refreshed.clone());
                Ok(Some(refreshed))
            }
            Err(err) => {
                match self.on_refresh_failure {
                    RefreshFailurePolicy::Drop => {
                        warn!("dropping token for user {} after failed refresh", head.user_id);
                    }
                    RefreshFailurePolicy::Requeue => {
                        warn!("requeueing token for user {} after failed refresh", head.user_id);
                        tokens.push_back(head);
                    }
                }
                Err(err)
            }
        }
    }
}
