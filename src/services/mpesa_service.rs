// services/mpesa_service.rs
use async_trait::async_trait;
use reqwest::{header, Client};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, error};

use crate::config::{ClientCredentials, MpesaConfig};
use crate::errors::AppError;
use crate::models::mpesa::{
    AuthResponse, GatewayErrorBody, StkPushRequest, StkPushResponse, StkQueryRequest,
    StkQueryResponse, STILL_PROCESSING_CODE,
};
use crate::services::signing::basic_auth_header;

/// Transport-level failure talking to the gateway.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// The request never left this host.
    #[error("could not connect to gateway: {0}")]
    Connect(String),

    #[error("gateway request timed out: {0}")]
    Timeout(String),

    #[error("gateway transport error: {0}")]
    Transport(String),

    #[error("gateway returned {status}: {message}")]
    Rejected {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("unexpected gateway response: {0}")]
    Malformed(String),
}

impl GatewayError {
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_connect() {
            GatewayError::Connect(err.to_string())
        } else if err.is_timeout() {
            GatewayError::Timeout(err.to_string())
        } else if err.is_decode() {
            GatewayError::Malformed(err.to_string())
        } else {
            GatewayError::Transport(err.to_string())
        }
    }

    /// Safe to retry for idempotent calls.
    pub fn is_transient(&self) -> bool {
        match self {
            GatewayError::Connect(_) | GatewayError::Timeout(_) | GatewayError::Transport(_) => {
                true
            }
            GatewayError::Rejected { status, .. } => {
                (*status >= 500 || *status == 429) && !self.is_still_processing()
            }
            GatewayError::Malformed(_) => false,
        }
    }

    pub fn is_still_processing(&self) -> bool {
        matches!(
            self,
            GatewayError::Rejected { code: Some(code), .. } if code == STILL_PROCESSING_CODE
        )
    }

    /// Whether the gateway certainly never acted on the request.
    pub fn is_clean_failure(&self) -> bool {
        matches!(self, GatewayError::Connect(_) | GatewayError::Rejected { .. })
    }
}

/// The three gateway endpoints this service talks to.
#[async_trait]
pub trait MpesaGateway: Send + Sync {
    async fn fetch_token(&self, credentials: &ClientCredentials)
        -> Result<AuthResponse, GatewayError>;

    async fn stk_push(
        &self,
        token: &str,
        request: &StkPushRequest,
    ) -> Result<StkPushResponse, GatewayError>;

    async fn stk_query(
        &self,
        token: &str,
        request: &StkQueryRequest,
    ) -> Result<StkQueryResponse, GatewayError>;
}

/// reqwest-backed Daraja client. Every call carries the configured timeout.
#[derive(Debug, Clone)]
pub struct DarajaClient {
    client: Client,
    auth_url: String,
    stk_push_url: String,
    stk_query_url: String,
}

impl DarajaClient {
    pub fn new(config: &MpesaConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(config.http_timeout)
            .connect_timeout(config.http_timeout.min(std::time::Duration::from_secs(10)))
            .build()
            .map_err(|e| AppError::configuration(format!("failed to create HTTP client: {}", e)))?;

        Ok(DarajaClient {
            client,
            auth_url: config.auth_url(),
            stk_push_url: config.stk_push_url(),
            stk_query_url: config.stk_query_url(),
        })
    }

    async fn read_json<T: DeserializeOwned>(
        response: reqwest::Response,
        operation: &str,
    ) -> Result<T, GatewayError> {
        let status = response.status();
        let body = response.text().await.map_err(GatewayError::from_reqwest)?;

        if !status.is_success() {
            let parsed: Option<GatewayErrorBody> = serde_json::from_str(&body).ok();
            let (code, message) = match parsed {
                Some(b) => (b.error_code, b.error_message),
                None => (None, None),
            };
            let message = message.unwrap_or_else(|| body.chars().take(200).collect());
            error!(operation, status = status.as_u16(), code = ?code, "Gateway call failed: {}", message);
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                code,
                message,
            });
        }

        serde_json::from_str(&body).map_err(|e| GatewayError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl MpesaGateway for DarajaClient {
    async fn fetch_token(
        &self,
        credentials: &ClientCredentials,
    ) -> Result<AuthResponse, GatewayError> {
        debug!("Requesting gateway access token");
        let response = self
            .client
            .get(&self.auth_url)
            .header(
                header::AUTHORIZATION,
                basic_auth_header(&credentials.consumer_key, &credentials.consumer_secret),
            )
            .send()
            .await
            .map_err(GatewayError::from_reqwest)?;

        let auth: AuthResponse = Self::read_json(response, "token").await?;
        if auth.access_token.is_empty() {
            return Err(GatewayError::Malformed("empty access_token".into()));
        }
        Ok(auth)
    }

    async fn stk_push(
        &self,
        token: &str,
        request: &StkPushRequest,
    ) -> Result<StkPushResponse, GatewayError> {
        let response = self
            .client
            .post(&self.stk_push_url)
            .bearer_auth(token)
            .json(request)
            .send()
            .await
            .map_err(GatewayError::from_reqwest)?;

        Self::read_json(response, "stk_push").await
    }

    async fn stk_query(
        &self,
        token: &str,
        request: &StkQueryRequest,
    ) -> Result<StkQueryResponse, GatewayError> {
        let response = self
            .client
            .post(&self.stk_query_url)
            .bearer_auth(token)
            .json(request)
            .send()
            .await
            .map_err(GatewayError::from_reqwest)?;

        Self::read_json(response, "stk_query").await
    }
}
