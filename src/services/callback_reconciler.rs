// services/callback_reconciler.rs
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::database::PaymentLedger;
use crate::errors::{AppError, Result};
use crate::models::mpesa::{StkCallback, StkCallbackEnvelope};
use crate::models::payment::{
    PaymentStatus, Settlement, SettlementOutcome, SettlementSource, Transition,
};
use crate::services::notifier::PaymentNotifier;
use crate::services::settlement::settle;
use crate::services::signing::Clock;

/// What happened to one delivered callback. The gateway is acknowledged in
/// every case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackOutcome {
    Applied(PaymentStatus),
    Duplicate(PaymentStatus),
    /// Row was already COMPLETED by a status query; only the receipt was added.
    ReceiptAttached,
    UnknownCheckout,
    Malformed,
    LedgerUnavailable,
}

pub fn parse_callback(body: &[u8]) -> Result<StkCallback> {
    let envelope: StkCallbackEnvelope = serde_json::from_slice(body)
        .map_err(|e| AppError::CallbackParse(e.to_string()))?;
    let callback = envelope.body.stk_callback;
    if callback.checkout_request_id.trim().is_empty() {
        return Err(AppError::CallbackParse("empty CheckoutRequestID".into()));
    }
    Ok(callback)
}

pub struct CallbackReconciler {
    ledger: Arc<dyn PaymentLedger>,
    notifier: Arc<dyn PaymentNotifier>,
    clock: Arc<dyn Clock>,
}

impl CallbackReconciler {
    pub fn new(
        ledger: Arc<dyn PaymentLedger>,
        notifier: Arc<dyn PaymentNotifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        CallbackReconciler {
            ledger,
            notifier,
            clock,
        }
    }

    pub async fn handle(&self, body: &[u8]) -> CallbackOutcome {
        let callback = match parse_callback(body) {
            Ok(callback) => callback,
            Err(e) => {
                warn!(body_len = body.len(), "Ignoring callback: {}", e);
                return CallbackOutcome::Malformed;
            }
        };

        info!(
            checkout_request_id = %callback.checkout_request_id,
            merchant_request_id = ?callback.merchant_request_id,
            result_code = callback.result_code,
            "Received M-Pesa callback"
        );

        let (outcome, receipt) = if callback.is_success() {
            let receipt = callback.receipt_number();
            if receipt.is_none() {
                warn!(
                    checkout_request_id = %callback.checkout_request_id,
                    "Successful callback carried no receipt number"
                );
            }
            (
                SettlementOutcome::Completed {
                    receipt: receipt.clone(),
                },
                receipt,
            )
        } else {
            (SettlementOutcome::Failed, None)
        };

        let settlement = Settlement {
            outcome,
            result_code: callback.result_code,
            result_desc: callback.result_desc.clone(),
            source: SettlementSource::Callback,
            at: self.clock.now(),
        };

        match settle(
            self.ledger.as_ref(),
            &self.notifier,
            &callback.checkout_request_id,
            settlement,
        )
        .await
        {
            Ok(Transition::Applied(p)) => CallbackOutcome::Applied(p.status),
            Ok(Transition::AlreadySettled(p)) => match receipt {
                Some(receipt)
                    if p.status == PaymentStatus::Completed
                        && p.gateway_receipt_number.is_none() =>
                {
                    self.backfill_receipt(&callback.checkout_request_id, &receipt, p.status)
                        .await
                }
                _ => CallbackOutcome::Duplicate(p.status),
            },
            Ok(Transition::UnknownCheckout) => CallbackOutcome::UnknownCheckout,
            Err(e) => {
                error!(
                    checkout_request_id = %callback.checkout_request_id,
                    "Ledger unavailable while applying callback: {}", e
                );
                CallbackOutcome::LedgerUnavailable
            }
        }
    }

    async fn backfill_receipt(
        &self,
        checkout_request_id: &str,
        receipt: &str,
        status: PaymentStatus,
    ) -> CallbackOutcome {
        match self
            .ledger
            .attach_receipt(checkout_request_id, receipt, self.clock.now())
            .await
        {
            Ok(Some(_)) => {
                info!(checkout_request_id, receipt, "Receipt attached to settled payment");
                CallbackOutcome::ReceiptAttached
            }
            Ok(None) => CallbackOutcome::Duplicate(status),
            Err(e) => {
                error!(checkout_request_id, "Failed to attach receipt: {}", e);
                CallbackOutcome::LedgerUnavailable
            }
        }
    }
}
