// services/notifier.rs
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::models::payment::PaymentRequest;
use crate::services::signing::normalize_phone_number;
use crate::services::sms_service::SMSService;

/// Fire-and-forget hook run after a payment reaches COMPLETED.
#[async_trait]
pub trait PaymentNotifier: Send + Sync {
    async fn payment_completed(&self, payment: &PaymentRequest);
}

/// Spawns the notification so settlement never waits on it.
pub fn dispatch_completed(notifier: Arc<dyn PaymentNotifier>, payment: PaymentRequest) {
    tokio::spawn(async move {
        notifier.payment_completed(&payment).await;
    });
}

#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl PaymentNotifier for LogNotifier {
    async fn payment_completed(&self, payment: &PaymentRequest) {
        info!(
            payment_id = %payment.id,
            property_id = %payment.property_id,
            receipt = ?payment.gateway_receipt_number,
            "Payment completed"
        );
    }
}

pub struct SmsReceiptNotifier {
    sms: SMSService,
}

impl SmsReceiptNotifier {
    pub fn new(sms: SMSService) -> Self {
        Self { sms }
    }
}

pub fn receipt_message(payment: &PaymentRequest) -> String {
    match &payment.gateway_receipt_number {
        Some(receipt) => format!(
            "Payment of KES {} for {} (property {}) received. M-Pesa receipt {}.",
            payment.amount, payment.payment_type, payment.property_id, receipt
        ),
        None => format!(
            "Payment of KES {} for {} (property {}) received.",
            payment.amount, payment.payment_type, payment.property_id
        ),
    }
}

#[async_trait]
impl PaymentNotifier for SmsReceiptNotifier {
    async fn payment_completed(&self, payment: &PaymentRequest) {
        let phone = match normalize_phone_number(&payment.phone_number) {
            Ok(p) => format!("+{}", p),
            Err(_) => payment.phone_number.clone(),
        };
        if let Err(e) = self.sms.send(&phone, &receipt_message(payment)).await {
            warn!(payment_id = %payment.id, "Failed to send payment receipt SMS: {}", e);
        }
    }
}
