use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use rental_payments::config::AppConfig;
use rental_payments::database::connection::get_db_client;
use rental_payments::database::{MongoPaymentLedger, MongoPropertyDirectory};
use rental_payments::errors::set_expose_details;
use rental_payments::services::mpesa_service::{DarajaClient, MpesaGateway};
use rental_payments::services::notifier::{LogNotifier, PaymentNotifier, SmsReceiptNotifier};
use rental_payments::services::signing::SystemClock;
use rental_payments::services::sms_service::SMSService;
use rental_payments::{build_router, AppState, Ports};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::from_env().context("failed to load configuration")?;
    set_expose_details(!config.is_production());

    let app_state = initialize_app_state(config).await?;
    let addr = bind_address(&app_state.config)?;
    let app = build_router(app_state);

    start_server(app, addr).await
}

async fn initialize_app_state(config: AppConfig) -> anyhow::Result<AppState> {
    let db = get_db_client(&config)
        .await
        .context("failed to connect to MongoDB")?;

    let ledger = MongoPaymentLedger::new(&db);
    ledger
        .ensure_indexes()
        .await
        .context("failed to create ledger indexes")?;

    tracing::info!("🔧 Initializing M-Pesa gateway client...");
    tracing::info!("🌐 Environment: {}", config.mpesa.environment);
    if config.mpesa.is_configured() {
        tracing::info!("✅ M-Pesa configuration present");
    } else {
        tracing::warn!("M-Pesa configuration incomplete; payment operations will fail until it is set");
    }
    let gateway: Arc<dyn MpesaGateway> =
        Arc::new(DarajaClient::new(&config.mpesa).context("failed to build gateway client")?);

    let notifier: Arc<dyn PaymentNotifier> = match &config.sms {
        Some(sms) => {
            tracing::info!("✅ SMS payment receipts enabled");
            Arc::new(SmsReceiptNotifier::new(SMSService::new(sms)))
        }
        None => Arc::new(LogNotifier),
    };

    let ports = Ports {
        gateway,
        ledger: Arc::new(ledger),
        properties: Arc::new(MongoPropertyDirectory::new(&db)),
        notifier,
        clock: Arc::new(SystemClock),
    };

    Ok(AppState::new(config, ports))
}

fn bind_address(config: &AppConfig) -> anyhow::Result<SocketAddr> {
    format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| format!("invalid bind address {}:{}", config.host, config.port))
}

async fn start_server(app: axum::Router, addr: SocketAddr) -> anyhow::Result<()> {
    tracing::info!("🚀 Server starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
