// config.rs
use std::env;
use std::time::Duration;

use crate::errors::{AppError, Result};

const SANDBOX_BASE_URL: &str = "https://sandbox.safaricom.co.ke";
const PRODUCTION_BASE_URL: &str = "https://api.safaricom.co.ke";

#[derive(Debug, Clone)]
pub struct MpesaConfig {
    pub consumer_key: Option<String>,
    pub consumer_secret: Option<String>,
    pub short_code: Option<String>,
    pub passkey: Option<String>,
    pub callback_url: Option<String>,
    pub environment: String,
    pub base_url_override: Option<String>,
    pub account_reference: String,
    pub http_timeout: Duration,
}

/// Client credentials for the token endpoint, checked before any network call.
#[derive(Debug, Clone)]
pub struct ClientCredentials {
    pub consumer_key: String,
    pub consumer_secret: String,
}

/// Everything a signed push or status query needs.
#[derive(Debug, Clone)]
pub struct StkSettings {
    pub short_code: String,
    pub passkey: String,
    pub callback_url: String,
    pub account_reference: String,
}

#[derive(Debug, Clone)]
pub struct SmsConfig {
    pub api_key: String,
    pub username: String,
    pub from: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub mpesa: MpesaConfig,
    pub sms: Option<SmsConfig>,
    pub jwt_secret: String,
    pub database_url: String,
    pub database_name: String,
    pub port: u16,
    pub host: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let require = |key: &str| {
            get(key).ok_or_else(|| AppError::configuration(format!("{} must be set", key)))
        };

        let environment = get("MPESA_ENVIRONMENT").unwrap_or_else(|| "sandbox".to_string());
        if environment != "sandbox" && environment != "production" {
            return Err(AppError::configuration(format!(
                "MPESA_ENVIRONMENT must be 'sandbox' or 'production', got '{}'",
                environment
            )));
        }

        let http_timeout_secs = match get("MPESA_HTTP_TIMEOUT_SECS") {
            Some(raw) => raw.parse::<u64>().map_err(|_| {
                AppError::configuration("MPESA_HTTP_TIMEOUT_SECS must be a number")
            })?,
            None => 30,
        };
        if http_timeout_secs == 0 {
            return Err(AppError::configuration(
                "MPESA_HTTP_TIMEOUT_SECS must be greater than 0",
            ));
        }

        let port = match get("PORT") {
            Some(raw) => raw
                .parse::<u16>()
                .map_err(|_| AppError::configuration("PORT must be a number"))?,
            None => 3000,
        };

        let sms = get("SMS_API_KEY").map(|api_key| SmsConfig {
            api_key,
            username: get("SMS_USERNAME").unwrap_or_else(|| "sandbox".to_string()),
            from: get("SMS_FROM").unwrap_or_else(|| "Rentals".to_string()),
        });

        Ok(AppConfig {
            mpesa: MpesaConfig {
                consumer_key: get("MPESA_CONSUMER_KEY"),
                consumer_secret: get("MPESA_CONSUMER_SECRET"),
                short_code: get("MPESA_SHORT_CODE"),
                passkey: get("MPESA_PASSKEY"),
                callback_url: get("MPESA_CALLBACK_URL"),
                environment,
                base_url_override: get("MPESA_BASE_URL"),
                account_reference: get("MPESA_ACCOUNT_REFERENCE")
                    .unwrap_or_else(|| "RentalPayment".to_string()),
                http_timeout: Duration::from_secs(http_timeout_secs),
            },
            sms,
            jwt_secret: require("JWT_SECRET")?,
            database_url: require("DATABASE_URL")?,
            database_name: get("DATABASE_NAME").unwrap_or_else(|| "rentals".to_string()),
            port,
            host: get("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
        })
    }

    pub fn is_production(&self) -> bool {
        self.mpesa.is_production()
    }
}

impl MpesaConfig {
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn base_url(&self) -> String {
        if let Some(url) = &self.base_url_override {
            return url.trim_end_matches('/').to_string();
        }
        if self.is_production() {
            PRODUCTION_BASE_URL.to_string()
        } else {
            SANDBOX_BASE_URL.to_string()
        }
    }

    pub fn auth_url(&self) -> String {
        format!("{}/oauth/v1/generate?grant_type=client_credentials", self.base_url())
    }

    pub fn stk_push_url(&self) -> String {
        format!("{}/mpesa/stkpush/v1/processrequest", self.base_url())
    }

    pub fn stk_query_url(&self) -> String {
        format!("{}/mpesa/stkpushquery/v1/query", self.base_url())
    }

    pub fn client_credentials(&self) -> Result<ClientCredentials> {
        match (&self.consumer_key, &self.consumer_secret) {
            (Some(key), Some(secret)) => Ok(ClientCredentials {
                consumer_key: key.clone(),
                consumer_secret: secret.clone(),
            }),
            _ => Err(AppError::configuration(
                "MPESA_CONSUMER_KEY and MPESA_CONSUMER_SECRET must be set",
            )),
        }
    }

    pub fn stk_settings(&self) -> Result<StkSettings> {
        let missing: Vec<&str> = [
            ("MPESA_SHORT_CODE", &self.short_code),
            ("MPESA_PASSKEY", &self.passkey),
            ("MPESA_CALLBACK_URL", &self.callback_url),
        ]
        .iter()
        .filter(|(_, value)| value.is_none())
        .map(|(name, _)| *name)
        .collect();

        if !missing.is_empty() {
            return Err(AppError::configuration(format!(
                "missing gateway settings: {}",
                missing.join(", ")
            )));
        }

        Ok(StkSettings {
            short_code: self.short_code.clone().unwrap_or_default(),
            passkey: self.passkey.clone().unwrap_or_default(),
            callback_url: self.callback_url.clone().unwrap_or_default(),
            account_reference: self.account_reference.clone(),
        })
    }

    /// True when every value a gateway operation needs is present.
    pub fn is_configured(&self) -> bool {
        self.client_credentials().is_ok() && self.stk_settings().is_ok()
    }

    pub fn config_info(&self) -> serde_json::Value {
        serde_json::json!({
            "environment": self.environment,
            "is_production": self.is_production(),
            "business_shortcode": self.short_code,
            "callback_url": self.callback_url,
            "consumer_key_set": self.consumer_key.is_some(),
            "consumer_secret_set": self.consumer_secret.is_some(),
            "passkey_set": self.passkey.is_some(),
        })
    }
}
