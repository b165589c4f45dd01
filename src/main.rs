//! subscription-sync
//!
//! Keeps local subscription records reconciled with the payment processor.
//!
//! Usage:
//!   subscription-sync serve
//!   subscription-sync sweep [--days N]
//!   subscription-sync check-user <user_id>

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use subscription_sync::adapters::http::{app_router, SubscriptionAppState};
use subscription_sync::adapters::{
    postgres, InMemorySubscriptionStore, PostgresSubscriptionStore, StripeClient, StripeConfig,
    SystemClock,
};
use subscription_sync::application::{
    EventRouter, HandleWebhookHandler, RenewalSweeper, SubscriptionReconciler,
};
use subscription_sync::config::{AppConfig, ServerConfig};
use subscription_sync::domain::foundation::UserId;
use subscription_sync::domain::subscription::{EventAuthenticator, PlanCatalog};
use subscription_sync::ports::{Clock, SubscriptionStore};

#[derive(Parser)]
#[command(name = "subscription-sync")]
#[command(version)]
#[command(about = "Reconcile local subscriptions with the payment processor", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the notification endpoint and run scheduled sweeps
    Serve,

    /// Run one renewal sweep and print its summary
    Sweep {
        /// Lookahead window in days; anything above 0 is a read-only preview
        #[arg(long, default_value_t = 0)]
        days: u32,
    },

    /// Reconcile a single user against the processor
    CheckUser {
        /// Local user id
        user_id: String,
    },
}

/// Wired dependencies shared by every command.
struct Services {
    clock: Arc<dyn Clock>,
    sweeper: Arc<RenewalSweeper>,
    webhook_handler: Arc<HandleWebhookHandler>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load()?;
    init_tracing(&config.server)?;
    config.validate()?;

    info!(
        environment = ?config.server.environment,
        test_mode = config.payment.is_test_mode(),
        "Configuration loaded"
    );

    let services = build_services(&config).await?;

    match cli.command {
        Commands::Serve => serve(&config, services).await?,
        Commands::Sweep { days } => {
            let summary = services
                .sweeper
                .sweep(services.clock.now(), days, None)
                .await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::CheckUser { user_id } => {
            let user_id = UserId::new(user_id)?;
            let check = services
                .sweeper
                .check_user(&user_id, services.clock.now())
                .await?;
            println!("{}", serde_json::to_string_pretty(&check)?);
        }
    }

    Ok(())
}

fn init_tracing(server: &ServerConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&server.log_level))?;

    let registry = tracing_subscriber::registry().with(filter);
    if server.json_logs() {
        registry.with(tracing_subscriber::fmt::layer().json()).try_init()?;
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()?;
    }
    Ok(())
}

async fn build_services(config: &AppConfig) -> Result<Services> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let store: Arc<dyn SubscriptionStore> = match &config.database {
        Some(database) => {
            let pool = postgres::connect(database).await?;
            let store = PostgresSubscriptionStore::new(pool);
            store.ensure_schema().await?;
            Arc::new(store)
        }
        None => {
            warn!("No database configured, using the in-memory store");
            Arc::new(InMemorySubscriptionStore::new())
        }
    };

    let payment = &config.payment;
    let processor = Arc::new(StripeClient::new(
        StripeConfig::new(payment.stripe_api_key.clone())
            .with_base_url(payment.api_base_url.clone())
            .with_timeout(payment.request_timeout()),
    )?);

    let catalog = Arc::new(PlanCatalog::standard(
        payment.stripe_monthly_price_id.clone(),
        payment.stripe_yearly_price_id.clone(),
    )?);

    let reconciler = Arc::new(
        SubscriptionReconciler::new(store.clone(), catalog, clock.clone())
            .with_max_write_attempts(config.reconciler.max_write_attempts),
    );

    let sweeper = Arc::new(
        RenewalSweeper::new(store, processor, reconciler.clone())
            .with_concurrency(config.sweep.concurrency),
    );

    let authenticator = Arc::new(EventAuthenticator::new(
        payment.stripe_webhook_secret.clone(),
        payment.webhook_tolerance_secs,
        clock.clone(),
    ));
    let webhook_handler = Arc::new(HandleWebhookHandler::new(
        authenticator,
        Arc::new(EventRouter::new(reconciler)),
    ));

    Ok(Services {
        clock,
        sweeper,
        webhook_handler,
    })
}

async fn serve(config: &AppConfig, services: Services) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let sweep_task = if config.sweep.is_scheduled() {
        Some(tokio::spawn(run_scheduled_sweeps(
            services.sweeper.clone(),
            services.clock.clone(),
            Duration::from_secs(config.sweep.interval_secs),
            shutdown_rx.clone(),
        )))
    } else {
        info!("Scheduled sweeps disabled");
        None
    };

    let state = SubscriptionAppState {
        webhook_handler: services.webhook_handler,
        sweeper: services.sweeper,
        clock: services.clock,
    };
    let app = app_router(state, config.server.request_timeout());

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "HTTP server listening");

    let mut server_shutdown = shutdown_rx;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = server_shutdown.wait_for(|stop| *stop).await;
        })
        .await?;

    if let Some(task) = sweep_task {
        if let Err(e) = task.await {
            error!(error = %e, "Sweep task ended abnormally");
        }
    }

    info!("Shutdown complete");
    Ok(())
}

/// Runs a full sweep every `period` until shutdown is signaled.
///
/// A sweep in progress sees the same signal and stops starting new items.
async fn run_scheduled_sweeps(
    sweeper: Arc<RenewalSweeper>,
    clock: Arc<dyn Clock>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match sweeper.sweep(clock.now(), 0, Some(shutdown.clone())).await {
                    Ok(summary) => info!(
                        processed = summary.processed,
                        renewed = summary.renewed,
                        expired = summary.expired,
                        failed = summary.failed,
                        interrupted = summary.interrupted,
                        "Scheduled sweep finished"
                    ),
                    Err(e) => error!(error = %e, "Scheduled sweep failed"),
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}
