// handlers/payment_handlers.rs
use axum::{
    body::Bytes,
    extract::{Path, State},
    Extension, Json,
};
use serde_json::{json, Value};
use tracing::debug;
use validator::Validate;

use crate::errors::{AppError, Result};
use crate::middleware::auth::Claims;
use crate::models::payment::{
    InitiatePaymentBody, InitiatePaymentResponse, PaymentRequest, PaymentView,
};
use crate::services::callback_reconciler::CallbackOutcome;
use crate::services::stk_push::InitiatePayment;
use crate::state::AppState;

/// Readable by the payer and by the owner of the property paid for.
async fn ensure_can_read(state: &AppState, claims: &Claims, payment: &PaymentRequest) -> Result<()> {
    if payment.user_id == claims.sub {
        return Ok(());
    }
    match state.properties.owner_of(&payment.property_id).await? {
        Some(owner) if owner == claims.sub => Ok(()),
        _ => Err(AppError::Authorization),
    }
}

pub async fn initiate_payment(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(body): Json<InitiatePaymentBody>,
) -> Result<Json<InitiatePaymentResponse>> {
    body.validate()?;

    let initiated = state
        .initiator
        .initiate(InitiatePayment {
            user_id: claims.sub,
            property_id: body.property_id,
            phone_number: body.phone_number,
            amount: body.amount,
            payment_type: body.payment_type,
        })
        .await?;

    Ok(Json(InitiatePaymentResponse {
        success: true,
        payment_id: initiated.payment.id,
        checkout_request_id: initiated.payment.checkout_request_id,
        merchant_request_id: initiated.payment.merchant_request_id,
        message: initiated.customer_message,
    }))
}

/// Public webhook. Always acknowledges so the gateway never redelivers a
/// message we cannot make progress on.
pub async fn mpesa_callback(State(state): State<AppState>, body: Bytes) -> Json<Value> {
    let outcome = state.callbacks.handle(&body).await;
    debug!(?outcome, "Callback processed");

    let desc = match outcome {
        CallbackOutcome::Malformed => "Received",
        _ => "Accepted",
    };
    Json(json!({
        "ResultCode": 0,
        "ResultDesc": desc
    }))
}

pub async fn payment_status(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(checkout_request_id): Path<String>,
) -> Result<Json<Value>> {
    let payment = state
        .ledger
        .find_by_checkout_id(&checkout_request_id)
        .await?
        .ok_or_else(|| AppError::not_found("Payment"))?;
    ensure_can_read(&state, &claims, &payment).await?;

    let report = state.status.query_status(&checkout_request_id).await?;

    Ok(Json(json!({
        "success": true,
        "checkoutRequestId": checkout_request_id,
        "gatewayState": report.gateway_state,
        "reconciled": report.reconciled,
        "payment": PaymentView::from(&report.payment),
    })))
}

pub async fn payment_history(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Value>> {
    let owned = state.properties.owned_by(&claims.sub).await?;
    let payments = state.ledger.list_visible_to(&claims.sub, &owned).await?;
    let views: Vec<PaymentView> = payments.iter().map(PaymentView::from).collect();

    Ok(Json(json!({
        "success": true,
        "count": views.len(),
        "payments": views,
    })))
}

pub async fn get_payment(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
) -> Result<Json<PaymentView>> {
    let payment = state
        .ledger
        .find_by_id(&id)
        .await?
        .ok_or_else(|| AppError::not_found("Payment"))?;
    ensure_can_read(&state, &claims, &payment).await?;

    Ok(Json(PaymentView::from(&payment)))
}
