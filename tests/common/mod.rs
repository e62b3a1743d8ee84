#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};

use rental_payments::config::{AppConfig, ClientCredentials};
use rental_payments::database::{InMemoryPaymentLedger, InMemoryPropertyDirectory, PaymentLedger};
use rental_payments::errors::{AppError, Result as AppResult};
use rental_payments::middleware::auth::Claims;
use rental_payments::models::mpesa::{
    AuthResponse, StkPushRequest, StkPushResponse, StkQueryRequest, StkQueryResponse,
    STILL_PROCESSING_CODE,
};
use rental_payments::models::payment::{PaymentRequest, Settlement, Transition};
use rental_payments::services::mpesa_service::{GatewayError, MpesaGateway};
use rental_payments::services::notifier::PaymentNotifier;
use rental_payments::services::retry::RetryConfig;
use rental_payments::services::signing::Clock;
use rental_payments::{AppState, Ports};

pub const JWT_SECRET: &str = "test-jwt-secret";
pub const PROPERTY_ID: &str = "42";
pub const LANDLORD: &str = "landlord-1";
pub const TENANT: &str = "tenant-1";
pub const STRANGER: &str = "stranger-1";

#[derive(Debug, Clone)]
pub enum PushReply {
    Accept,
    Reject { status: u16, message: &'static str },
    Declined,
    Timeout,
    Refused,
}

#[derive(Debug, Clone)]
pub enum QueryReply {
    Result { code: &'static str, desc: &'static str },
    Accepted,
    Processing,
    Unavailable,
}

/// Scripted stand-in for the Daraja endpoints.
pub struct ScriptedGateway {
    pub token_fetches: AtomicU32,
    pub push_requests: Mutex<Vec<StkPushRequest>>,
    pub query_requests: Mutex<Vec<StkQueryRequest>>,
    push_script: Mutex<VecDeque<PushReply>>,
    query_script: Mutex<VecDeque<QueryReply>>,
    default_query: Mutex<QueryReply>,
    query_delay: Mutex<Duration>,
    sequence: AtomicU32,
}

impl Default for ScriptedGateway {
    fn default() -> Self {
        ScriptedGateway {
            token_fetches: AtomicU32::new(0),
            push_requests: Mutex::new(Vec::new()),
            query_requests: Mutex::new(Vec::new()),
            push_script: Mutex::new(VecDeque::new()),
            query_script: Mutex::new(VecDeque::new()),
            default_query: Mutex::new(QueryReply::Processing),
            query_delay: Mutex::new(Duration::ZERO),
            sequence: AtomicU32::new(0),
        }
    }
}

impl ScriptedGateway {
    pub fn script_push(&self, reply: PushReply) {
        self.push_script.lock().unwrap().push_back(reply);
    }

    pub fn script_query(&self, reply: QueryReply) {
        self.query_script.lock().unwrap().push_back(reply);
    }

    pub fn set_default_query(&self, reply: QueryReply) {
        *self.default_query.lock().unwrap() = reply;
    }

    pub fn set_query_delay(&self, delay: Duration) {
        *self.query_delay.lock().unwrap() = delay;
    }

    pub fn push_count(&self) -> usize {
        self.push_requests.lock().unwrap().len()
    }

    pub fn query_count(&self) -> usize {
        self.query_requests.lock().unwrap().len()
    }

    pub fn last_push(&self) -> Option<StkPushRequest> {
        self.push_requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl MpesaGateway for ScriptedGateway {
    async fn fetch_token(
        &self,
        _credentials: &ClientCredentials,
    ) -> Result<AuthResponse, GatewayError> {
        let n = self.token_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(AuthResponse {
            access_token: format!("access-token-{}", n),
            expires_in: Some("3599".into()),
        })
    }

    async fn stk_push(
        &self,
        _token: &str,
        request: &StkPushRequest,
    ) -> Result<StkPushResponse, GatewayError> {
        self.push_requests.lock().unwrap().push(request.clone());
        let reply = self
            .push_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(PushReply::Accept);

        match reply {
            PushReply::Accept => {
                let n = self.sequence.fetch_add(1, Ordering::SeqCst);
                Ok(StkPushResponse {
                    merchant_request_id: format!("29115-34620561-{}", n),
                    checkout_request_id: format!("ws_CO_19122019102036392{}", n),
                    response_code: "0".into(),
                    response_description: "Success. Request accepted for processing".into(),
                    customer_message: "Success. Request accepted for processing".into(),
                })
            }
            PushReply::Declined => Ok(StkPushResponse {
                merchant_request_id: String::new(),
                checkout_request_id: String::new(),
                response_code: "1".into(),
                response_description: "Merchant limit exceeded".into(),
                customer_message: String::new(),
            }),
            PushReply::Reject { status, message } => Err(GatewayError::Rejected {
                status,
                code: Some("400.002.02".into()),
                message: message.into(),
            }),
            PushReply::Timeout => Err(GatewayError::Timeout("operation timed out".into())),
            PushReply::Refused => Err(GatewayError::Connect("connection refused".into())),
        }
    }

    async fn stk_query(
        &self,
        _token: &str,
        request: &StkQueryRequest,
    ) -> Result<StkQueryResponse, GatewayError> {
        self.query_requests.lock().unwrap().push(request.clone());
        let delay = *self.query_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let reply = self
            .query_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.default_query.lock().unwrap().clone());

        let accepted = |result_code: Option<&str>, desc: &str| StkQueryResponse {
            response_code: Some("0".into()),
            response_description: Some("The service request has been accepted successsfully".into()),
            checkout_request_id: Some(request.checkout_request_id.clone()),
            result_code: result_code.map(str::to_string),
            result_desc: Some(desc.to_string()),
        };

        match reply {
            QueryReply::Result { code, desc } => Ok(accepted(Some(code), desc)),
            QueryReply::Accepted => Ok(accepted(None, "")),
            QueryReply::Processing => Err(GatewayError::Rejected {
                status: 500,
                code: Some(STILL_PROCESSING_CODE.into()),
                message: "The transaction is being processed".into(),
            }),
            QueryReply::Unavailable => Err(GatewayError::Rejected {
                status: 503,
                code: None,
                message: "Service Unavailable".into(),
            }),
        }
    }
}

/// Delegates to the in-memory ledger but can drop the next few inserts.
pub struct FlakyLedger {
    inner: Arc<InMemoryPaymentLedger>,
    insert_failures: AtomicU32,
}

impl FlakyLedger {
    pub fn new(inner: Arc<InMemoryPaymentLedger>) -> Self {
        FlakyLedger {
            inner,
            insert_failures: AtomicU32::new(0),
        }
    }

    pub fn fail_next_inserts(&self, count: u32) {
        self.insert_failures.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl PaymentLedger for FlakyLedger {
    async fn insert(&self, payment: &PaymentRequest) -> AppResult<()> {
        let failing = self
            .insert_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(AppError::Ledger("connection reset by peer".into()));
        }
        self.inner.insert(payment).await
    }

    async fn find_by_id(&self, id: &str) -> AppResult<Option<PaymentRequest>> {
        self.inner.find_by_id(id).await
    }

    async fn find_by_checkout_id(
        &self,
        checkout_request_id: &str,
    ) -> AppResult<Option<PaymentRequest>> {
        self.inner.find_by_checkout_id(checkout_request_id).await
    }

    async fn settle_if_pending(
        &self,
        checkout_request_id: &str,
        settlement: &Settlement,
    ) -> AppResult<Transition> {
        self.inner
            .settle_if_pending(checkout_request_id, settlement)
            .await
    }

    async fn attach_receipt(
        &self,
        checkout_request_id: &str,
        receipt: &str,
        at: DateTime<Utc>,
    ) -> AppResult<Option<PaymentRequest>> {
        self.inner
            .attach_receipt(checkout_request_id, receipt, at)
            .await
    }

    async fn list_visible_to(
        &self,
        user_id: &str,
        property_ids: &[String],
    ) -> AppResult<Vec<PaymentRequest>> {
        self.inner.list_visible_to(user_id, property_ids).await
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    completed: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn completed(&self) -> Vec<String> {
        self.completed.lock().unwrap().clone()
    }

    /// Notifications are spawned, so give them a moment to land.
    pub async fn wait_for(&self, count: usize) -> Vec<String> {
        for _ in 0..100 {
            if self.completed.lock().unwrap().len() >= count {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.completed()
    }
}

#[async_trait]
impl PaymentNotifier for RecordingNotifier {
    async fn payment_completed(&self, payment: &PaymentRequest) {
        self.completed.lock().unwrap().push(payment.id.clone());
    }
}

pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// 2024-03-01 09:30:15 UTC, i.e. 12:30:15 in Nairobi.
pub fn fixed_instant() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 15).unwrap()
}

pub fn config_from(pairs: &[(&str, &str)]) -> AppConfig {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    AppConfig::from_lookup(|key| map.get(key).cloned()).unwrap()
}

pub fn gateway_config() -> AppConfig {
    config_from(&[
        ("JWT_SECRET", JWT_SECRET),
        ("DATABASE_URL", "mongodb://localhost:27017"),
        ("MPESA_CONSUMER_KEY", "consumer"),
        ("MPESA_CONSUMER_SECRET", "secret"),
        ("MPESA_SHORT_CODE", "174379"),
        (
            "MPESA_PASSKEY",
            "bfb279f9aa9bdbcf158e97dd71a467cd2e0c893059b10f78e6b72ada1ed2c919",
        ),
        ("MPESA_CALLBACK_URL", "https://rentals.example.com/api/payments/mpesa/callback"),
    ])
}

pub fn unconfigured_config() -> AppConfig {
    config_from(&[
        ("JWT_SECRET", JWT_SECRET),
        ("DATABASE_URL", "mongodb://localhost:27017"),
    ])
}

pub struct Harness {
    pub state: AppState,
    pub gateway: Arc<ScriptedGateway>,
    pub ledger: Arc<InMemoryPaymentLedger>,
    /// What the services actually write through; wraps `ledger`.
    pub flaky_ledger: Arc<FlakyLedger>,
    pub properties: Arc<InMemoryPropertyDirectory>,
    pub notifier: Arc<RecordingNotifier>,
}

pub async fn harness() -> Harness {
    harness_with(gateway_config()).await
}

pub async fn harness_with(config: AppConfig) -> Harness {
    let gateway = Arc::new(ScriptedGateway::default());
    let ledger = Arc::new(InMemoryPaymentLedger::new());
    let flaky_ledger = Arc::new(FlakyLedger::new(ledger.clone()));
    let properties = Arc::new(InMemoryPropertyDirectory::new());
    let notifier = Arc::new(RecordingNotifier::default());

    properties.add(PROPERTY_ID, LANDLORD).await;
    properties.add("43", LANDLORD).await;

    let ports = Ports {
        gateway: gateway.clone(),
        ledger: flaky_ledger.clone(),
        properties: properties.clone(),
        notifier: notifier.clone(),
        clock: Arc::new(FixedClock(fixed_instant())),
    };
    let state = AppState::with_retry(config, ports, RetryConfig::immediate(3));

    Harness {
        state,
        gateway,
        ledger,
        flaky_ledger,
        properties,
        notifier,
    }
}

pub fn bearer(user_id: &str) -> String {
    let claims = Claims {
        sub: user_id.to_string(),
        phone: None,
        exp: (Utc::now().timestamp() + 3600) as usize,
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .unwrap();
    format!("Bearer {}", token)
}

pub fn success_callback(checkout_request_id: &str, receipt: &str) -> Vec<u8> {
    serde_json::json!({
        "Body": {
            "stkCallback": {
                "MerchantRequestID": "29115-34620561-1",
                "CheckoutRequestID": checkout_request_id,
                "ResultCode": 0,
                "ResultDesc": "The service request is processed successfully.",
                "CallbackMetadata": {
                    "Item": [
                        {"Name": "Amount", "Value": 1501},
                        {"Name": "MpesaReceiptNumber", "Value": receipt},
                        {"Name": "TransactionDate", "Value": 20240301123015_i64},
                        {"Name": "PhoneNumber", "Value": 254712345678_i64}
                    ]
                }
            }
        }
    })
    .to_string()
    .into_bytes()
}

pub fn failure_callback(checkout_request_id: &str, code: i64, desc: &str) -> Vec<u8> {
    serde_json::json!({
        "Body": {
            "stkCallback": {
                "MerchantRequestID": "29115-34620561-1",
                "CheckoutRequestID": checkout_request_id,
                "ResultCode": code,
                "ResultDesc": desc
            }
        }
    })
    .to_string()
    .into_bytes()
}
