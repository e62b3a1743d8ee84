pub mod callback_reconciler;
pub mod credentials;
pub mod mpesa_service;
pub mod notifier;
pub mod retry;
pub mod settlement;
pub mod signing;
pub mod sms_service;
pub mod status_reconciler;
pub mod stk_push;
