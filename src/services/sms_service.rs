use reqwest::Client;
use tracing::debug;

use crate::config::SmsConfig;
use crate::errors::{AppError, Result};

const AFRICAS_TALKING_URL: &str = "https://api.africastalking.com/version1/messaging";

#[derive(Clone)]
pub struct SMSService {
    api_key: String,
    username: String,
    from: String,
    client: Client,
}

impl SMSService {
    pub fn new(config: &SmsConfig) -> Self {
        Self {
            api_key: config.api_key.clone(),
            username: config.username.clone(),
            from: config.from.clone(),
            client: Client::new(),
        }
    }

    pub async fn send(&self, phone: &str, message: &str) -> Result<()> {
        debug!("Sending SMS to {}", phone);

        let response = self
            .client
            .post(AFRICAS_TALKING_URL)
            .header("apiKey", &self.api_key)
            .header("Accept", "application/json")
            .form(&[
                ("username", self.username.as_str()),
                ("to", phone),
                ("message", message),
                ("from", self.from.as_str()),
            ])
            .send()
            .await
            .map_err(|e| AppError::GatewayRequest(format!("SMS API error: {}", e)))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(AppError::GatewayRequest(format!(
                "SMS sending failed with status: {}",
                response.status()
            )))
        }
    }
}
