use hansa_payments::api::{build_router, AppState};
use hansa_payments::config::AppConfig;
use hansa_payments::database;
use hansa_payments::database::escrow_repository::EscrowRepository;
use hansa_payments::database::payment_repository::PaymentRepository;
use hansa_payments::database::transaction_repository::TransactionRepository;
use hansa_payments::database::webhook_repository::WebhookRepository;
use hansa_payments::logging::init_tracing;
use hansa_payments::payments::factory::GatewayFactory;
use hansa_payments::services::escrow_service::EscrowManager;
use hansa_payments::services::notification_service::NotificationService;
use hansa_payments::services::payment_orchestrator::PaymentOrchestrator;
use hansa_payments::services::webhook_processor::WebhookProcessor;
use hansa_payments::workers::{AutoReleaseConfig, AutoReleaseWorker};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::from_env()?;
    config.validate()?;

    let pool = database::init_pool(&config.database).await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("database migrations applied");

    let gateways = Arc::new(GatewayFactory::from_env());
    info!(providers = ?gateways.list_available(), "payment providers ready");

    let notifier = NotificationService::new();

    let escrow = Arc::new(EscrowManager::new(
        EscrowRepository::new(pool.clone()),
        TransactionRepository::new(pool.clone()),
        notifier.clone(),
        config.escrow.auto_release_days,
    ));

    let orchestrator = Arc::new(PaymentOrchestrator::new(
        PaymentRepository::new(pool.clone()),
        escrow.clone(),
        TransactionRepository::new(pool.clone()),
        gateways.clone(),
        notifier.clone(),
    ));

    let webhooks = Arc::new(WebhookProcessor::new(
        PaymentRepository::new(pool.clone()),
        WebhookRepository::new(pool.clone()),
        orchestrator.clone(),
        gateways.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let auto_release = AutoReleaseWorker::new(
        escrow.clone(),
        AutoReleaseConfig::from_escrow_config(&config.escrow),
    );
    let auto_release_handle = tokio::spawn(auto_release.run(shutdown_rx.clone()));

    let retry_handle = tokio::spawn(webhook_retry_loop(webhooks.clone(), shutdown_rx.clone()));

    let state = AppState {
        orchestrator,
        escrow,
        webhooks,
        pool,
    };
    let app = build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "hansa payment core listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server stopped, signalling workers");
    let _ = shutdown_tx.send(true);
    let _ = auto_release_handle.await;
    let _ = retry_handle.await;

    info!("shutdown complete");
    Ok(())
}

/// Drains the webhook event ledger: events that failed processing get
/// re-dispatched until their retry budget runs out.
async fn webhook_retry_loop(
    webhooks: Arc<WebhookProcessor>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let interval = Duration::from_secs(60);
    info!(interval_secs = interval.as_secs(), "webhook retry loop started");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                match webhooks.retry_pending(50).await {
                    Ok(0) => {}
                    Ok(n) => info!(retried = n, "webhook events reprocessed"),
                    Err(e) => error!(error = %e, "webhook retry sweep failed"),
                }
            }
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    info!("webhook retry loop shutting down");
                    break;
                }
            }
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install ctrl-c handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl-c"),
        _ = terminate => info!("received SIGTERM"),
    }
}
