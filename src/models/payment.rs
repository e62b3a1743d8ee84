use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Completed => "COMPLETED",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Refunded => "REFUNDED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }
}

/// Which path settled a payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettlementSource {
    Callback,
    StatusQuery,
}

/// Ledger entity. Never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRequest {
    #[serde(rename = "_id")]
    pub id: String,

    pub amount: Decimal,
    pub phone_number: String,
    pub payment_type: String,

    // Gateway correlation
    pub checkout_request_id: String,
    pub merchant_request_id: String,

    // Status tracking
    pub status: PaymentStatus,
    pub gateway_receipt_number: Option<String>,
    pub result_code: Option<i64>,
    pub result_desc: Option<String>,
    pub settled_by: Option<SettlementSource>,

    pub user_id: String,
    pub property_id: String,

    // Timestamps
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Fields known once the gateway has accepted a push.
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub amount: Decimal,
    pub phone_number: String,
    pub payment_type: String,
    pub checkout_request_id: String,
    pub merchant_request_id: String,
    pub user_id: String,
    pub property_id: String,
}

impl PaymentRequest {
    pub fn pending(new: NewPayment, now: DateTime<Utc>) -> Self {
        PaymentRequest {
            id: Uuid::new_v4().to_string(),
            amount: new.amount,
            phone_number: new.phone_number,
            payment_type: new.payment_type,
            checkout_request_id: new.checkout_request_id,
            merchant_request_id: new.merchant_request_id,
            status: PaymentStatus::Pending,
            gateway_receipt_number: None,
            result_code: None,
            result_desc: None,
            settled_by: None,
            user_id: new.user_id,
            property_id: new.property_id,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SettlementOutcome {
    Completed { receipt: Option<String> },
    Failed,
}

/// A terminal transition to apply to a PENDING row.
#[derive(Debug, Clone, PartialEq)]
pub struct Settlement {
    pub outcome: SettlementOutcome,
    pub result_code: i64,
    pub result_desc: String,
    pub source: SettlementSource,
    pub at: DateTime<Utc>,
}

impl Settlement {
    pub fn target_status(&self) -> PaymentStatus {
        match self.outcome {
            SettlementOutcome::Completed { .. } => PaymentStatus::Completed,
            SettlementOutcome::Failed => PaymentStatus::Failed,
        }
    }

    /// Caller must already hold the PENDING guard.
    pub fn apply_to(&self, payment: &mut PaymentRequest) {
        payment.status = self.target_status();
        payment.result_code = Some(self.result_code);
        payment.result_desc = Some(self.result_desc.clone());
        payment.settled_by = Some(self.source);
        payment.updated_at = self.at;
        if let SettlementOutcome::Completed { receipt } = &self.outcome {
            payment.gateway_receipt_number = receipt.clone();
            payment.completed_at = Some(self.at);
        }
    }
}

/// Result of a conditional PENDING -> terminal update.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Applied(PaymentRequest),
    AlreadySettled(PaymentRequest),
    UnknownCheckout,
}

// ===== API DTOs =====

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct InitiatePaymentBody {
    pub amount: Decimal,

    #[validate(length(min = 9, max = 16, message = "phoneNumber looks invalid"))]
    pub phone_number: String,

    #[validate(length(min = 1, message = "propertyId is required"))]
    pub property_id: String,

    #[validate(length(min = 1, max = 64, message = "paymentType is required"))]
    pub payment_type: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiatePaymentResponse {
    pub success: bool,
    pub payment_id: String,
    pub checkout_request_id: String,
    pub merchant_request_id: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentView {
    pub id: String,
    pub amount: Decimal,
    pub phone_number: String,
    pub payment_type: String,
    pub checkout_request_id: String,
    pub merchant_request_id: String,
    pub status: PaymentStatus,
    pub gateway_receipt_number: Option<String>,
    pub result_desc: Option<String>,
    pub user_id: String,
    pub property_id: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&PaymentRequest> for PaymentView {
    fn from(p: &PaymentRequest) -> Self {
        PaymentView {
            id: p.id.clone(),
            amount: p.amount,
            phone_number: p.phone_number.clone(),
            payment_type: p.payment_type.clone(),
            checkout_request_id: p.checkout_request_id.clone(),
            merchant_request_id: p.merchant_request_id.clone(),
            status: p.status,
            gateway_receipt_number: p.gateway_receipt_number.clone(),
            result_desc: p.result_desc.clone(),
            user_id: p.user_id.clone(),
            property_id: p.property_id.clone(),
            created_at: p.created_at,
            completed_at: p.completed_at,
        }
    }
}
