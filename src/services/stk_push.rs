// services/stk_push.rs
use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{error, info, warn};

use crate::config::MpesaConfig;
use crate::database::{PaymentLedger, PropertyDirectory};
use crate::errors::{AppError, Result};
use crate::models::mpesa::StkPushRequest;
use crate::models::payment::{NewPayment, PaymentRequest};
use crate::services::credentials::CredentialProvider;
use crate::services::mpesa_service::{GatewayError, MpesaGateway};
use crate::services::retry::{Retry, RetryConfig};
use crate::services::signing::{normalize_phone_number, sign_stk_password, wire_amount, Clock};

const TRANSACTION_TYPE: &str = "CustomerPayBillOnline";
// Daraja field limits.
const ACCOUNT_REFERENCE_MAX: usize = 12;
const TRANSACTION_DESC_MAX: usize = 13;

#[derive(Debug, Clone)]
pub struct InitiatePayment {
    pub user_id: String,
    pub property_id: String,
    pub phone_number: String,
    pub amount: Decimal,
    pub payment_type: String,
}

#[derive(Debug, Clone)]
pub struct InitiatedPayment {
    pub payment: PaymentRequest,
    pub customer_message: String,
}

/// Sends STK pushes and records the resulting PENDING rows.
///
/// A push is never retried here: once the request may have left this host,
/// a second attempt could charge the payer twice.
pub struct PushPaymentInitiator {
    mpesa: MpesaConfig,
    credentials: Arc<CredentialProvider>,
    gateway: Arc<dyn MpesaGateway>,
    ledger: Arc<dyn PaymentLedger>,
    properties: Arc<dyn PropertyDirectory>,
    clock: Arc<dyn Clock>,
    retry: RetryConfig,
}

fn truncate(value: &str, max: usize) -> String {
    value.chars().take(max).collect()
}

impl PushPaymentInitiator {
    pub fn new(
        mpesa: MpesaConfig,
        credentials: Arc<CredentialProvider>,
        gateway: Arc<dyn MpesaGateway>,
        ledger: Arc<dyn PaymentLedger>,
        properties: Arc<dyn PropertyDirectory>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        PushPaymentInitiator {
            mpesa,
            credentials,
            gateway,
            ledger,
            properties,
            clock,
            retry: RetryConfig::gateway(),
        }
    }

    /// Retry policy for the ledger write that follows an accepted push.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub async fn initiate(&self, request: InitiatePayment) -> Result<InitiatedPayment> {
        let amount_units = wire_amount(request.amount)?;
        let phone = normalize_phone_number(&request.phone_number)?;
        let payment_type = request.payment_type.trim().to_string();
        if payment_type.is_empty() {
            return Err(AppError::invalid_data("paymentType is required"));
        }

        // Configuration is checked before anything touches the network.
        let settings = self.mpesa.stk_settings()?;
        self.mpesa.client_credentials()?;

        if self.properties.owner_of(&request.property_id).await?.is_none() {
            return Err(AppError::not_found(format!("Property {}", request.property_id)));
        }

        let token = self.credentials.get_token().await?;
        let signed = sign_stk_password(&settings.short_code, &settings.passkey, self.clock.now());

        let push = StkPushRequest {
            business_short_code: settings.short_code.clone(),
            password: signed.password,
            timestamp: signed.timestamp,
            transaction_type: TRANSACTION_TYPE.to_string(),
            amount: amount_units,
            party_a: phone.clone(),
            party_b: settings.short_code.clone(),
            phone_number: phone,
            callback_url: settings.callback_url.clone(),
            account_reference: truncate(&settings.account_reference, ACCOUNT_REFERENCE_MAX),
            transaction_desc: truncate(&payment_type, TRANSACTION_DESC_MAX),
        };

        info!(
            user_id = %request.user_id,
            property_id = %request.property_id,
            amount = %request.amount,
            wire_amount = amount_units,
            "C2B: sending STK push"
        );

        let response = match self.gateway.stk_push(&token, &push).await {
            Ok(response) => response,
            Err(e) if e.is_clean_failure() => {
                if matches!(e, GatewayError::Rejected { status: 401, .. }) {
                    self.credentials.invalidate().await;
                }
                warn!("STK push rejected: {}", e);
                return Err(AppError::GatewayRequest(e.to_string()));
            }
            Err(e) => {
                error!(
                    user_id = %request.user_id,
                    property_id = %request.property_id,
                    "STK push outcome unknown, not retrying: {}", e
                );
                return Err(AppError::PaymentOutcomeUnknown(e.to_string()));
            }
        };

        if response.response_code != "0" {
            warn!(
                response_code = %response.response_code,
                "STK push declined: {}", response.response_description
            );
            return Err(AppError::GatewayRequest(response.response_description));
        }
        if response.checkout_request_id.trim().is_empty() {
            error!("STK push accepted without a CheckoutRequestID");
            return Err(AppError::PaymentOutcomeUnknown(
                "gateway accepted the push but returned no CheckoutRequestID".into(),
            ));
        }

        let payment = PaymentRequest::pending(
            NewPayment {
                amount: request.amount,
                phone_number: request.phone_number.trim().to_string(),
                payment_type,
                checkout_request_id: response.checkout_request_id.clone(),
                merchant_request_id: response.merchant_request_id.clone(),
                user_id: request.user_id,
                property_id: request.property_id,
            },
            self.clock.now(),
        );

        // The payer has been prompted from here on, so a lost write must not
        // read as a clean failure the client would resubmit.
        self.record_pending(&payment).await?;

        info!(
            payment_id = %payment.id,
            checkout_request_id = %payment.checkout_request_id,
            "C2B initiated"
        );

        let customer_message = if response.customer_message.is_empty() {
            "Check your phone to complete the payment".to_string()
        } else {
            response.customer_message
        };

        Ok(InitiatedPayment {
            payment,
            customer_message,
        })
    }

    async fn record_pending(&self, payment: &PaymentRequest) -> Result<()> {
        let written = Retry::new(self.retry.clone())
            .run(
                "ledger_insert",
                || self.ledger.insert(payment),
                |e| !matches!(e, AppError::DuplicateKey),
            )
            .await;

        let err = match written {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        // A retried insert may collide with its own earlier, unacknowledged write.
        if matches!(err, AppError::DuplicateKey) {
            if let Ok(Some(existing)) = self
                .ledger
                .find_by_checkout_id(&payment.checkout_request_id)
                .await
            {
                if existing.id == payment.id {
                    return Ok(());
                }
            }
        }

        error!(
            payment_id = %payment.id,
            checkout_request_id = %payment.checkout_request_id,
            merchant_request_id = %payment.merchant_request_id,
            user_id = %payment.user_id,
            property_id = %payment.property_id,
            amount = %payment.amount,
            "STK push accepted but ledger write failed: {}", err
        );
        Err(AppError::PaymentOutcomeUnknown(format!(
            "push accepted as CheckoutRequestID {} but could not be recorded: {}",
            payment.checkout_request_id, err
        )))
    }
}
