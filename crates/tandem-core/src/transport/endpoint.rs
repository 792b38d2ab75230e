//! Endpoint URL construction
//!
//! Each connection attempt rebuilds the URL: the base endpoint plus the
//! per-process session key, the store id, and a freshly resolved access
//! token when a provider is configured.

use std::future::Future;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use url::Url;

use super::TransportError;

/// Query parameter carrying the per-process session key
pub const SESSION_KEY_PARAM: &str = "sessionKey";
/// Query parameter carrying the store id
pub const STORE_ID_PARAM: &str = "storeId";
/// Query parameter carrying the access token
pub const ACCESS_TOKEN_PARAM: &str = "accessToken";

/// Supplies an access token for each connection attempt
///
/// Called once per attempt and never retried within one. `Ok(None)`
/// connects without a token.
#[async_trait]
pub trait AccessTokenProvider: Send + Sync {
    async fn access_token(&self) -> anyhow::Result<Option<String>>;
}

#[async_trait]
impl<F, Fut> AccessTokenProvider for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Option<String>>> + Send,
{
    async fn access_token(&self) -> anyhow::Result<Option<String>> {
        (self)().await
    }
}

/// A fixed token, e.g. from configuration
#[derive(Debug, Clone)]
pub struct StaticToken(pub String);

#[async_trait]
impl AccessTokenProvider for StaticToken {
    async fn access_token(&self) -> anyhow::Result<Option<String>> {
        Ok(Some(self.0.clone()))
    }
}

/// Key identifying this process to the server, stable for its lifetime
pub fn session_key() -> &'static str {
    static SESSION_KEY: OnceLock<String> = OnceLock::new();
    SESSION_KEY.get_or_init(|| format!("tandem-{}", &uuid::Uuid::new_v4().to_string()[..8]))
}

/// Builds the URL for each connection attempt
#[derive(Clone)]
pub struct Endpoint {
    base: Url,
    store_id: String,
    session_key: String,
    access_token: Option<Arc<dyn AccessTokenProvider>>,
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("base", &self.base.as_str())
            .field("store_id", &self.store_id)
            .field("session_key", &self.session_key)
            .field("access_token", &self.access_token.is_some())
            .finish()
    }
}

impl Endpoint {
    pub fn new(base: Url, store_id: &str) -> Self {
        Self {
            base,
            store_id: store_id.to_string(),
            session_key: session_key().to_string(),
            access_token: None,
        }
    }

    /// Override the session key
    pub fn with_session_key(mut self, key: &str) -> Self {
        self.session_key = key.to_string();
        self
    }

    /// Resolve an access token before every attempt
    pub fn with_access_token(mut self, provider: Option<Arc<dyn AccessTokenProvider>>) -> Self {
        self.access_token = provider;
        self
    }

    /// Base endpoint
    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Build the URL for one connection attempt
    pub async fn build(&self) -> Result<Url, TransportError> {
        let mut url = self.base.clone();
        if url.cannot_be_a_base() {
            return Err(TransportError::InvalidUrl {
                url: url.to_string(),
                details: "endpoint cannot carry query parameters".to_string(),
            });
        }

        set_query_param(&mut url, SESSION_KEY_PARAM, &self.session_key);
        set_query_param(&mut url, STORE_ID_PARAM, &self.store_id);

        if let Some(ref provider) = self.access_token {
            let token = provider
                .access_token()
                .await
                .map_err(|e| TransportError::AccessToken(format!("{:#}", e)))?;
            if let Some(token) = token.filter(|t| !t.is_empty()) {
                set_query_param(&mut url, ACCESS_TOKEN_PARAM, &token);
            }
        }

        Ok(url)
    }
}

/// Set a query parameter, replacing any existing value
fn set_query_param(url: &mut Url, key: &str, value: &str) {
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != key)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let mut pairs = url.query_pairs_mut();
    pairs.clear();
    for (k, v) in &kept {
        pairs.append_pair(k, v);
    }
    pairs.append_pair(key, value);
}
