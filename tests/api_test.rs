mod common;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use rental_payments::build_router;
use rental_payments::models::payment::PaymentStatus;

use common::*;

async fn send(h: &Harness, request: Request<Body>) -> (StatusCode, Value) {
    let response = build_router(h.state.clone()).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn get(uri: &str, user: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(user) = user {
        builder = builder.header(header::AUTHORIZATION, bearer(user));
    }
    builder.body(Body::empty()).unwrap()
}

fn post_json(uri: &str, user: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(user) = user {
        builder = builder.header(header::AUTHORIZATION, bearer(user));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn initiate_body() -> Value {
    json!({
        "amount": "2500.50",
        "phoneNumber": "+254712345678",
        "propertyId": PROPERTY_ID,
        "paymentType": "rent"
    })
}

async fn initiate_as_tenant(h: &Harness) -> Value {
    let (status, body) = send(
        h,
        post_json("/api/payments/initiate", Some(TENANT), initiate_body()),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    body
}

#[tokio::test]
async fn health_reports_gateway_configuration() {
    let h = harness().await;

    let (status, body) = send(&h, get("/api/health", None)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["mpesa"], true);
}

#[tokio::test]
async fn callback_always_gets_an_ack() {
    let h = harness().await;

    let request = Request::builder()
        .method("POST")
        .uri("/api/payments/mpesa/callback")
        .body(Body::from("definitely not json"))
        .unwrap();
    let (status, body) = send(&h, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ResultCode"], 0);
}

#[tokio::test]
async fn callback_settles_payment_through_http() {
    let h = harness().await;
    let initiated = initiate_as_tenant(&h).await;
    let checkout = initiated["checkoutRequestId"].as_str().unwrap();

    let request = Request::builder()
        .method("POST")
        .uri("/api/payments/mpesa/callback")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(success_callback(checkout, "NLJ7RT61SV")))
        .unwrap();
    let (status, body) = send(&h, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ResultDesc"], "Accepted");

    let rows = h.ledger.all().await;
    assert_eq!(rows[0].status, PaymentStatus::Completed);
}

#[tokio::test]
async fn initiate_requires_authentication() {
    let h = harness().await;

    let (status, body) = send(
        &h,
        post_json("/api/payments/initiate", None, initiate_body()),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
    assert_eq!(h.gateway.push_count(), 0);
}

#[tokio::test]
async fn initiate_returns_checkout_identifiers() {
    let h = harness().await;

    let body = initiate_as_tenant(&h).await;

    assert_eq!(body["success"], true);
    assert!(body["checkoutRequestId"].as_str().unwrap().starts_with("ws_CO_"));
    assert!(body["paymentId"].is_string());
    assert_eq!(h.gateway.last_push().unwrap().amount, 2501);
}

#[tokio::test]
async fn initiate_with_invalid_body_is_rejected() {
    let h = harness().await;

    let (status, body) = send(
        &h,
        post_json(
            "/api/payments/initiate",
            Some(TENANT),
            json!({
                "amount": "100",
                "phoneNumber": "0712345678",
                "propertyId": "",
                "paymentType": "rent"
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
    assert_eq!(h.gateway.push_count(), 0);
}

#[tokio::test]
async fn ambiguous_push_surfaces_as_gateway_timeout() {
    let h = harness().await;
    h.gateway.script_push(PushReply::Timeout);

    let (status, body) = send(
        &h,
        post_json("/api/payments/initiate", Some(TENANT), initiate_body()),
    )
    .await;

    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body["code"], "PAYMENT_OUTCOME_UNKNOWN");
    assert!(h.ledger.is_empty().await);
}

#[tokio::test]
async fn unconfigured_gateway_reports_configuration_error() {
    let h = harness_with(unconfigured_config()).await;

    let (status, body) = send(
        &h,
        post_json("/api/payments/initiate", Some(TENANT), initiate_body()),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["code"], "CONFIGURATION_ERROR");
}

#[tokio::test]
async fn payment_is_visible_to_payer_and_owner_only() {
    let h = harness().await;
    let initiated = initiate_as_tenant(&h).await;
    let uri = format!("/api/payments/{}", initiated["paymentId"].as_str().unwrap());

    let (status, body) = send(&h, get(&uri, Some(TENANT))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "PENDING");
    assert_eq!(body["amount"], "2500.50");

    let (status, _) = send(&h, get(&uri, Some(LANDLORD))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&h, get(&uri, Some(STRANGER))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "FORBIDDEN");
}

#[tokio::test]
async fn history_is_scoped_to_payer_and_owner() {
    let h = harness().await;
    initiate_as_tenant(&h).await;
    initiate_as_tenant(&h).await;

    let (_, body) = send(&h, get("/api/payments/history", Some(TENANT))).await;
    assert_eq!(body["count"], 2);

    let (_, body) = send(&h, get("/api/payments/history", Some(LANDLORD))).await;
    assert_eq!(body["count"], 2);

    let (status, body) = send(&h, get("/api/payments/history", Some(STRANGER))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 0);
}

#[tokio::test]
async fn status_for_unknown_checkout_is_not_found() {
    let h = harness().await;

    let (status, body) = send(
        &h,
        get("/api/payments/ws_CO_missing/status", Some(TENANT)),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
    assert_eq!(h.gateway.query_count(), 0);
}

#[tokio::test]
async fn status_endpoint_reconciles_and_reports() {
    let h = harness().await;
    let initiated = initiate_as_tenant(&h).await;
    let checkout = initiated["checkoutRequestId"].as_str().unwrap();
    h.gateway.script_query(QueryReply::Result {
        code: "1037",
        desc: "DS timeout user cannot be reached",
    });

    let (status, body) = send(
        &h,
        get(&format!("/api/payments/{}/status", checkout), Some(TENANT)),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reconciled"], true);
    assert_eq!(body["gatewayState"]["state"], "FAILED");
    assert_eq!(body["gatewayState"]["resultCode"], 1037);
    assert_eq!(body["payment"]["status"], "FAILED");
}

#[tokio::test]
async fn status_endpoint_checks_access_before_querying() {
    let h = harness().await;
    let initiated = initiate_as_tenant(&h).await;
    let checkout = initiated["checkoutRequestId"].as_str().unwrap();

    let (status, _) = send(
        &h,
        get(&format!("/api/payments/{}/status", checkout), Some(STRANGER)),
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(h.gateway.query_count(), 0);
}
