// services/status_reconciler.rs
use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::config::MpesaConfig;
use crate::database::PaymentLedger;
use crate::errors::{AppError, Result};
use crate::models::mpesa::{StkQueryRequest, StkQueryResponse};
use crate::models::payment::{
    PaymentRequest, Settlement, SettlementOutcome, SettlementSource, Transition,
};
use crate::services::credentials::CredentialProvider;
use crate::services::mpesa_service::{GatewayError, MpesaGateway};
use crate::services::notifier::PaymentNotifier;
use crate::services::retry::{Retry, RetryConfig};
use crate::services::settlement::settle;
use crate::services::signing::{sign_stk_password, Clock};

/// ResultCode the query endpoint uses for "still under processing".
const QUERY_PROCESSING_RESULT: i64 = 4999;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GatewayReportedState {
    Pending,
    #[serde(rename_all = "camelCase")]
    Completed { result_code: i64, result_desc: String },
    #[serde(rename_all = "camelCase")]
    Failed { result_code: i64, result_desc: String },
}

#[derive(Debug, Clone)]
pub struct StatusReport {
    pub gateway_state: GatewayReportedState,
    /// Ledger row after any reconciliation.
    pub payment: PaymentRequest,
    /// True if this query moved the row out of PENDING.
    pub reconciled: bool,
}

pub fn map_query_response(response: &StkQueryResponse) -> Result<GatewayReportedState> {
    if let Some(code) = response.response_code.as_deref() {
        if code != "0" {
            return Err(AppError::GatewayRequest(
                response
                    .response_description
                    .clone()
                    .unwrap_or_else(|| format!("query rejected with ResponseCode {}", code)),
            ));
        }
    }

    let Some(raw) = response.result_code.as_deref() else {
        return Ok(GatewayReportedState::Pending);
    };
    let result_code = raw.trim().parse::<i64>().map_err(|_| {
        AppError::GatewayRequest(format!("unrecognised ResultCode '{}'", raw))
    })?;
    let result_desc = response.result_desc.clone().unwrap_or_default();

    Ok(match result_code {
        0 => GatewayReportedState::Completed {
            result_code,
            result_desc,
        },
        QUERY_PROCESSING_RESULT => GatewayReportedState::Pending,
        _ => GatewayReportedState::Failed {
            result_code,
            result_desc,
        },
    })
}

/// Asks the gateway for a transaction's state and, when the gateway reports a
/// terminal state for a row that is still PENDING, applies it through the
/// same conditional transition the callback uses.
pub struct StatusReconciler {
    mpesa: MpesaConfig,
    credentials: Arc<CredentialProvider>,
    gateway: Arc<dyn MpesaGateway>,
    ledger: Arc<dyn PaymentLedger>,
    notifier: Arc<dyn PaymentNotifier>,
    clock: Arc<dyn Clock>,
    retry: RetryConfig,
}

impl StatusReconciler {
    pub fn new(
        mpesa: MpesaConfig,
        credentials: Arc<CredentialProvider>,
        gateway: Arc<dyn MpesaGateway>,
        ledger: Arc<dyn PaymentLedger>,
        notifier: Arc<dyn PaymentNotifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        StatusReconciler {
            mpesa,
            credentials,
            gateway,
            ledger,
            notifier,
            clock,
            retry: RetryConfig::gateway(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub async fn query_status(&self, checkout_request_id: &str) -> Result<StatusReport> {
        let payment = self
            .ledger
            .find_by_checkout_id(checkout_request_id)
            .await?
            .ok_or_else(|| AppError::not_found("Payment"))?;

        let settings = self.mpesa.stk_settings()?;
        let token = self.credentials.get_token().await?;
        let signed = sign_stk_password(&settings.short_code, &settings.passkey, self.clock.now());

        let query = StkQueryRequest {
            business_short_code: settings.short_code.clone(),
            password: signed.password,
            timestamp: signed.timestamp,
            checkout_request_id: checkout_request_id.to_string(),
        };

        let result = Retry::new(self.retry.clone())
            .run(
                "stk_query",
                || self.gateway.stk_query(&token, &query),
                GatewayError::is_transient,
            )
            .await;

        let gateway_state = match result {
            Ok(response) => map_query_response(&response)?,
            Err(e) if e.is_still_processing() => GatewayReportedState::Pending,
            Err(e) => {
                if matches!(e, GatewayError::Rejected { status: 401, .. }) {
                    self.credentials.invalidate().await;
                }
                return Err(AppError::GatewayRequest(e.to_string()));
            }
        };

        let settlement = match &gateway_state {
            GatewayReportedState::Pending => None,
            GatewayReportedState::Completed {
                result_code,
                result_desc,
            } => Some(Settlement {
                // The query endpoint does not return the receipt number.
                outcome: SettlementOutcome::Completed { receipt: None },
                result_code: *result_code,
                result_desc: result_desc.clone(),
                source: SettlementSource::StatusQuery,
                at: self.clock.now(),
            }),
            GatewayReportedState::Failed {
                result_code,
                result_desc,
            } => Some(Settlement {
                outcome: SettlementOutcome::Failed,
                result_code: *result_code,
                result_desc: result_desc.clone(),
                source: SettlementSource::StatusQuery,
                at: self.clock.now(),
            }),
        };

        let (payment, reconciled) = match settlement {
            Some(settlement) if !payment.status.is_terminal() => {
                match settle(
                    self.ledger.as_ref(),
                    &self.notifier,
                    checkout_request_id,
                    settlement,
                )
                .await?
                {
                    Transition::Applied(updated) => (updated, true),
                    Transition::AlreadySettled(current) => (current, false),
                    // Row vanished between lookup and update; ledger rows are never deleted.
                    Transition::UnknownCheckout => {
                        return Err(AppError::not_found("Payment"));
                    }
                }
            }
            _ => (payment, false),
        };

        info!(
            checkout_request_id,
            gateway_state = ?gateway_state,
            ledger_status = payment.status.as_str(),
            reconciled,
            "Status query complete"
        );

        Ok(StatusReport {
            gateway_state,
            payment,
            reconciled,
        })
    }
}
