use std::sync::Arc;

use crate::config::AppConfig;
use crate::database::{PaymentLedger, PropertyDirectory};
use crate::services::callback_reconciler::CallbackReconciler;
use crate::services::credentials::CredentialProvider;
use crate::services::mpesa_service::MpesaGateway;
use crate::services::notifier::PaymentNotifier;
use crate::services::retry::RetryConfig;
use crate::services::signing::Clock;
use crate::services::status_reconciler::StatusReconciler;
use crate::services::stk_push::PushPaymentInitiator;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub ledger: Arc<dyn PaymentLedger>,
    pub properties: Arc<dyn PropertyDirectory>,
    pub initiator: Arc<PushPaymentInitiator>,
    pub callbacks: Arc<CallbackReconciler>,
    pub status: Arc<StatusReconciler>,
}

/// Collaborators injected into every payment component.
pub struct Ports {
    pub gateway: Arc<dyn MpesaGateway>,
    pub ledger: Arc<dyn PaymentLedger>,
    pub properties: Arc<dyn PropertyDirectory>,
    pub notifier: Arc<dyn PaymentNotifier>,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    pub fn new(config: AppConfig, ports: Ports) -> Self {
        Self::with_retry(config, ports, RetryConfig::gateway())
    }

    pub fn with_retry(config: AppConfig, ports: Ports, retry: RetryConfig) -> Self {
        let credentials = Arc::new(
            CredentialProvider::new(ports.gateway.clone(), config.mpesa.client_credentials().ok())
                .with_retry(retry.clone()),
        );

        let initiator = PushPaymentInitiator::new(
            config.mpesa.clone(),
            credentials.clone(),
            ports.gateway.clone(),
            ports.ledger.clone(),
            ports.properties.clone(),
            ports.clock.clone(),
        )
        .with_retry(retry.clone());
        let callbacks = CallbackReconciler::new(
            ports.ledger.clone(),
            ports.notifier.clone(),
            ports.clock.clone(),
        );
        let status = StatusReconciler::new(
            config.mpesa.clone(),
            credentials,
            ports.gateway,
            ports.ledger.clone(),
            ports.notifier,
            ports.clock,
        )
        .with_retry(retry);

        AppState {
            config: Arc::new(config),
            ledger: ports.ledger,
            properties: ports.properties,
            initiator: Arc::new(initiator),
            callbacks: Arc::new(callbacks),
            status: Arc::new(status),
        }
    }
}
