use axum::{
    middleware,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::json;

use crate::handlers::payment_handlers;
use crate::middleware::auth::auth_middleware;
use crate::state::AppState;

pub fn payment_routes(state: AppState) -> Router<AppState> {
    let user_routes = Router::new()
        .route("/initiate", post(payment_handlers::initiate_payment))
        .route("/history", get(payment_handlers::payment_history))
        // `:id` is the checkout request id here
        .route("/:id/status", get(payment_handlers::payment_status))
        .route("/:id", get(payment_handlers::get_payment))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware));

    Router::new()
        .route("/health", get(payments_health))
        // Gateway-origin, unauthenticated
        .route("/mpesa/callback", post(payment_handlers::mpesa_callback))
        .merge(user_routes)
}

async fn payments_health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "payments",
        "timestamp": Utc::now().to_rfc3339(),
        "features": ["stk-push", "callback", "status-query", "history"]
    }))
}
