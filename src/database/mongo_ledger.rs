// database/mongo_ledger.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::TryStreamExt;
use mongodb::{
    bson::{doc, to_document, Document},
    error::{ErrorKind, WriteFailure},
    options::{IndexOptions, ReturnDocument},
    Collection, Database, IndexModel,
};
use serde::Serialize;
use tracing::info;

use crate::database::ledger::PaymentLedger;
use crate::errors::{AppError, Result};
use crate::models::payment::{
    PaymentRequest, PaymentStatus, Settlement, SettlementOutcome, SettlementSource, Transition,
};

pub const PAYMENTS_COLLECTION: &str = "payment_requests";

const DUPLICATE_KEY_CODE: i32 = 11000;

/// Fields written by a terminal transition; names match `PaymentRequest`.
#[derive(Serialize)]
struct SettlementFields<'a> {
    status: PaymentStatus,
    result_code: i64,
    result_desc: &'a str,
    settled_by: SettlementSource,
    updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    gateway_receipt_number: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    completed_at: Option<DateTime<Utc>>,
}

impl<'a> From<&'a Settlement> for SettlementFields<'a> {
    fn from(s: &'a Settlement) -> Self {
        let (receipt, completed_at) = match &s.outcome {
            SettlementOutcome::Completed { receipt } => (receipt.as_deref(), Some(s.at)),
            SettlementOutcome::Failed => (None, None),
        };
        SettlementFields {
            status: s.target_status(),
            result_code: s.result_code,
            result_desc: &s.result_desc,
            settled_by: s.source,
            updated_at: s.at,
            gateway_receipt_number: receipt,
            completed_at,
        }
    }
}

#[derive(Clone)]
pub struct MongoPaymentLedger {
    collection: Collection<PaymentRequest>,
}

impl MongoPaymentLedger {
    pub fn new(db: &Database) -> Self {
        MongoPaymentLedger {
            collection: db.collection(PAYMENTS_COLLECTION),
        }
    }

    /// The unique index is what makes `checkout_request_id` a safe lookup key.
    pub async fn ensure_indexes(&self) -> Result<()> {
        let unique_checkout = IndexModel::builder()
            .keys(doc! { "checkout_request_id": 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();
        let by_user = IndexModel::builder().keys(doc! { "user_id": 1 }).build();
        let by_property = IndexModel::builder().keys(doc! { "property_id": 1 }).build();

        self.collection
            .create_indexes([unique_checkout, by_user, by_property])
            .await?;
        info!("Ledger indexes ensured on '{}'", PAYMENTS_COLLECTION);
        Ok(())
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(e)) => e.code == DUPLICATE_KEY_CODE,
        ErrorKind::Command(e) => e.code == DUPLICATE_KEY_CODE,
        _ => false,
    }
}

/// Matches a COMPLETED row whose receipt was never recorded.
fn receipt_backfill_filter(checkout_request_id: &str) -> Document {
    doc! {
        "checkout_request_id": checkout_request_id,
        "status": PaymentStatus::Completed.as_str(),
        "gateway_receipt_number": null,
    }
}

#[async_trait]
impl PaymentLedger for MongoPaymentLedger {
    async fn insert(&self, payment: &PaymentRequest) -> Result<()> {
        match self.collection.insert_one(payment).await {
            Ok(_) => Ok(()),
            Err(e) if is_duplicate_key(&e) => Err(AppError::DuplicateKey),
            Err(e) => Err(e.into()),
        }
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<PaymentRequest>> {
        Ok(self.collection.find_one(doc! { "_id": id }).await?)
    }

    async fn find_by_checkout_id(
        &self,
        checkout_request_id: &str,
    ) -> Result<Option<PaymentRequest>> {
        Ok(self
            .collection
            .find_one(doc! { "checkout_request_id": checkout_request_id })
            .await?)
    }

    async fn settle_if_pending(
        &self,
        checkout_request_id: &str,
        settlement: &Settlement,
    ) -> Result<Transition> {
        let fields = to_document(&SettlementFields::from(settlement))?;

        // Single round trip; the status predicate is the compare-and-set guard.
        let updated = self
            .collection
            .find_one_and_update(
                doc! {
                    "checkout_request_id": checkout_request_id,
                    "status": PaymentStatus::Pending.as_str(),
                },
                doc! { "$set": fields },
            )
            .return_document(ReturnDocument::After)
            .await?;

        if let Some(payment) = updated {
            return Ok(Transition::Applied(payment));
        }

        match self.find_by_checkout_id(checkout_request_id).await? {
            Some(existing) => Ok(Transition::AlreadySettled(existing)),
            None => Ok(Transition::UnknownCheckout),
        }
    }

    async fn attach_receipt(
        &self,
        checkout_request_id: &str,
        receipt: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<PaymentRequest>> {
        let updated_at = mongodb::bson::to_bson(&at)?;
        Ok(self
            .collection
            .find_one_and_update(
                receipt_backfill_filter(checkout_request_id),
                doc! { "$set": {
                    "gateway_receipt_number": receipt,
                    "updated_at": updated_at,
                } },
            )
            .return_document(ReturnDocument::After)
            .await?)
    }

    async fn list_visible_to(
        &self,
        user_id: &str,
        property_ids: &[String],
    ) -> Result<Vec<PaymentRequest>> {
        let filter = if property_ids.is_empty() {
            doc! { "user_id": user_id }
        } else {
            doc! {
                "$or": [
                    { "user_id": user_id },
                    { "property_id": { "$in": property_ids.to_vec() } }
                ]
            }
        };

        let cursor = self.collection.find(filter).await?;
        let mut payments: Vec<PaymentRequest> = cursor.try_collect().await?;

        // Sort by created_at descending
        payments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(payments)
    }
}
