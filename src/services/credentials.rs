// services/credentials.rs
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::config::ClientCredentials;
use crate::errors::{AppError, Result};
use crate::services::mpesa_service::{GatewayError, MpesaGateway};
use crate::services::retry::{Retry, RetryConfig};

/// Used when the gateway omits or garbles `expires_in`.
const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(3599);
const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(60);
/// Daraja tokens live an hour; anything advertised past a day is noise.
const MAX_TOKEN_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    refresh_at: Instant,
}

/// Bearer token cache shared by every gateway operation.
///
/// Tokens are refreshed `refresh_margin` before their advertised expiry.
/// Concurrent callers that find the cache stale queue on `refresh_lock`, and
/// only the first of them goes to the network.
pub struct CredentialProvider {
    gateway: Arc<dyn MpesaGateway>,
    credentials: Option<ClientCredentials>,
    cache: RwLock<Option<CachedToken>>,
    refresh_lock: Mutex<()>,
    refresh_margin: Duration,
    retry: RetryConfig,
}

impl CredentialProvider {
    pub fn new(gateway: Arc<dyn MpesaGateway>, credentials: Option<ClientCredentials>) -> Self {
        CredentialProvider {
            gateway,
            credentials,
            cache: RwLock::new(None),
            refresh_lock: Mutex::new(()),
            refresh_margin: DEFAULT_REFRESH_MARGIN,
            retry: RetryConfig::gateway(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_refresh_margin(mut self, margin: Duration) -> Self {
        self.refresh_margin = margin;
        self
    }

    pub async fn get_token(&self) -> Result<String> {
        let credentials = self.credentials.as_ref().ok_or_else(|| {
            AppError::configuration("MPESA_CONSUMER_KEY and MPESA_CONSUMER_SECRET must be set")
        })?;

        if let Some(token) = self.fresh_token().await {
            return Ok(token);
        }

        let _guard = self.refresh_lock.lock().await;

        // Someone else may have refreshed while we waited.
        if let Some(token) = self.fresh_token().await {
            debug!("Using token refreshed by a concurrent caller");
            return Ok(token);
        }

        info!("Requesting new access token");
        let auth = Retry::new(self.retry.clone())
            .run(
                "token",
                || self.gateway.fetch_token(credentials),
                GatewayError::is_transient,
            )
            .await
            .map_err(|e| {
                error!("Failed to get access token: {}", e);
                AppError::GatewayAuth(e.to_string())
            })?;

        let ttl = auth
            .expires_in
            .as_deref()
            .and_then(|raw| raw.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TOKEN_TTL)
            .min(MAX_TOKEN_TTL);
        // Short-lived tokens still get used for half their life.
        let margin = self.refresh_margin.min(ttl / 2);
        let now = Instant::now();
        let refresh_at = now
            .checked_add(ttl - margin)
            .unwrap_or(now);

        *self.cache.write().await = Some(CachedToken {
            token: auth.access_token.clone(),
            refresh_at,
        });

        info!(ttl_secs = ttl.as_secs(), "Access token obtained");
        Ok(auth.access_token)
    }

    /// Drops the cached token, e.g. after the gateway answers 401.
    pub async fn invalidate(&self) {
        *self.cache.write().await = None;
    }

    async fn fresh_token(&self) -> Option<String> {
        let cached = self.cache.read().await;
        cached
            .as_ref()
            .filter(|c| Instant::now() < c.refresh_at)
            .map(|c| c.token.clone())
    }
}
