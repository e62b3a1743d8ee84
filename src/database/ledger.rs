// database/ledger.rs
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::errors::{AppError, Result};
use crate::models::payment::{PaymentRequest, PaymentStatus, Settlement, Transition};

/// Durable store of payment records.
///
/// `settle_if_pending` is the only mutation and must be an atomic
/// compare-and-set on `status == PENDING`: of any number of racing calls for
/// one checkout id, at most one returns `Transition::Applied`.
#[async_trait]
pub trait PaymentLedger: Send + Sync {
    /// Fails with `DuplicateKey` if the id or checkout id already exists.
    async fn insert(&self, payment: &PaymentRequest) -> Result<()>;

    async fn find_by_id(&self, id: &str) -> Result<Option<PaymentRequest>>;

    async fn find_by_checkout_id(&self, checkout_request_id: &str)
        -> Result<Option<PaymentRequest>>;

    async fn settle_if_pending(
        &self,
        checkout_request_id: &str,
        settlement: &Settlement,
    ) -> Result<Transition>;

    /// Fills in the receipt of a COMPLETED row that settled without one.
    /// Never changes status; returns the updated row, or `None` if the row
    /// is missing, not COMPLETED, or already carries a receipt.
    async fn attach_receipt(
        &self,
        checkout_request_id: &str,
        receipt: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<PaymentRequest>>;

    /// Rows paid by `user_id` or concerning any of `property_ids`, newest first.
    async fn list_visible_to(
        &self,
        user_id: &str,
        property_ids: &[String],
    ) -> Result<Vec<PaymentRequest>>;
}

#[derive(Default)]
struct LedgerRows {
    by_id: HashMap<String, PaymentRequest>,
    checkout_index: HashMap<String, String>,
}

/// Process-local ledger; the write lock makes the conditional update atomic.
#[derive(Default)]
pub struct InMemoryPaymentLedger {
    rows: RwLock<LedgerRows>,
}

impl InMemoryPaymentLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.by_id.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn all(&self) -> Vec<PaymentRequest> {
        self.rows.read().await.by_id.values().cloned().collect()
    }
}

#[async_trait]
impl PaymentLedger for InMemoryPaymentLedger {
    async fn insert(&self, payment: &PaymentRequest) -> Result<()> {
        let mut rows = self.rows.write().await;
        if rows.by_id.contains_key(&payment.id)
            || rows.checkout_index.contains_key(&payment.checkout_request_id)
        {
            return Err(AppError::DuplicateKey);
        }
        rows.checkout_index
            .insert(payment.checkout_request_id.clone(), payment.id.clone());
        rows.by_id.insert(payment.id.clone(), payment.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<PaymentRequest>> {
        Ok(self.rows.read().await.by_id.get(id).cloned())
    }

    async fn find_by_checkout_id(
        &self,
        checkout_request_id: &str,
    ) -> Result<Option<PaymentRequest>> {
        let rows = self.rows.read().await;
        Ok(rows
            .checkout_index
            .get(checkout_request_id)
            .and_then(|id| rows.by_id.get(id))
            .cloned())
    }

    async fn settle_if_pending(
        &self,
        checkout_request_id: &str,
        settlement: &Settlement,
    ) -> Result<Transition> {
        let mut rows = self.rows.write().await;
        let Some(id) = rows.checkout_index.get(checkout_request_id).cloned() else {
            return Ok(Transition::UnknownCheckout);
        };
        let payment = rows
            .by_id
            .get_mut(&id)
            .ok_or_else(|| AppError::Ledger(format!("dangling checkout index for {}", id)))?;

        if payment.status != PaymentStatus::Pending {
            return Ok(Transition::AlreadySettled(payment.clone()));
        }
        settlement.apply_to(payment);
        Ok(Transition::Applied(payment.clone()))
    }

    async fn attach_receipt(
        &self,
        checkout_request_id: &str,
        receipt: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<PaymentRequest>> {
        let mut rows = self.rows.write().await;
        let Some(id) = rows.checkout_index.get(checkout_request_id).cloned() else {
            return Ok(None);
        };
        match rows.by_id.get_mut(&id) {
            Some(payment)
                if payment.status == PaymentStatus::Completed
                    && payment.gateway_receipt_number.is_none() =>
            {
                payment.gateway_receipt_number = Some(receipt.to_string());
                payment.updated_at = at;
                Ok(Some(payment.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn list_visible_to(
        &self,
        user_id: &str,
        property_ids: &[String],
    ) -> Result<Vec<PaymentRequest>> {
        let rows = self.rows.read().await;
        let mut payments: Vec<PaymentRequest> = rows
            .by_id
            .values()
            .filter(|p| p.user_id == user_id || property_ids.contains(&p.property_id))
            .cloned()
            .collect();
        payments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(payments)
    }
}
