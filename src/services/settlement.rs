// services/settlement.rs
use std::sync::Arc;

use tracing::{info, warn};

use crate::database::PaymentLedger;
use crate::errors::Result;
use crate::models::payment::{PaymentStatus, Settlement, Transition};
use crate::services::notifier::{dispatch_completed, PaymentNotifier};

/// Applies `settlement` if the row is still PENDING and notifies on completion.
/// Shared by the callback and status-query paths so both race on the same guard.
pub async fn settle(
    ledger: &dyn PaymentLedger,
    notifier: &Arc<dyn PaymentNotifier>,
    checkout_request_id: &str,
    settlement: Settlement,
) -> Result<Transition> {
    let transition = ledger
        .settle_if_pending(checkout_request_id, &settlement)
        .await?;

    match &transition {
        Transition::Applied(payment) => {
            info!(
                checkout_request_id,
                payment_id = %payment.id,
                status = payment.status.as_str(),
                source = ?settlement.source,
                result_code = settlement.result_code,
                "Payment settled"
            );
            if payment.status == PaymentStatus::Completed {
                dispatch_completed(notifier.clone(), payment.clone());
            }
        }
        Transition::AlreadySettled(payment) => {
            info!(
                checkout_request_id,
                status = payment.status.as_str(),
                source = ?settlement.source,
                "Payment already settled, ignoring"
            );
        }
        Transition::UnknownCheckout => {
            warn!(checkout_request_id, "No payment matches checkout request id");
        }
    }

    Ok(transition)
}
