mod config;

use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use relay_api::auth::{AppStateInner, TokenKeys};
use relay_core::fanout::FanoutDispatcher;
use relay_core::identity::{DomainPolicy, IdentityGate};
use relay_core::push::{DryRunPushProvider, HttpPushProvider, PushProvider};
use relay_core::registry::DeviceRegistry;
use relay_core::sweeper::{RetentionSweeper, run_daily_schedule};
use relay_core::triggers::{DispatchTable, RetryPolicy, TriggerBus, TriggerRuntime};
use relay_db::Database;
use relay_types::events::Topic;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relay=debug,relay_core=debug,relay_api=debug,tower_http=debug".into()),
        )
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("FATAL: {:#}", e);
            eprintln!("       Fix your environment or .env file and restart.");
            std::process::exit(1);
        }
    };

    let db = Arc::new(Database::open(&config.db_path)?);
    let policy = DomainPolicy::new(config.allowed_email_suffix.clone());
    let retention = chrono::Duration::days(config.retention_days);
    let (bus, events) = TriggerBus::channel();

    let push: Arc<dyn PushProvider> = match &config.push_endpoint {
        Some(endpoint) => {
            info!("Push provider: {}", endpoint);
            Arc::new(HttpPushProvider::new(endpoint.clone(), config.push_server_key.clone()))
        }
        None => {
            warn!("RELAY_PUSH_ENDPOINT unset, push messages will only be logged");
            Arc::new(DryRunPushProvider)
        }
    };

    // One handler per topic
    let mut table = DispatchTable::new();
    table.subscribe(
        Topic::IdentityCreated,
        Arc::new(IdentityGate::new(db.clone(), policy.clone())),
    )?;
    table.subscribe(
        Topic::NotificationCreated,
        Arc::new(FanoutDispatcher::new(db.clone(), DeviceRegistry::new(db.clone()), push)),
    )?;
    table.subscribe(
        Topic::ScheduleTick,
        Arc::new(RetentionSweeper::new(db.clone(), retention, config.sweep_batch_size)),
    )?;

    let retry = RetryPolicy {
        max_attempts: config.trigger_max_attempts,
        backoff: std::time::Duration::from_millis(config.trigger_backoff_ms),
    };
    tokio::spawn(TriggerRuntime::new(table, retry).run(events));
    tokio::spawn(run_daily_schedule(bus.clone(), config.sweep_timezone, config.sweep_hour));

    let state = Arc::new(AppStateInner::new(
        db,
        TokenKeys::from_secret(&config.jwt_secret),
        bus,
        policy,
        retention,
    ));

    let app = relay_api::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    info!("Relay listening on {}", config.addr);
    info!(
        "Allowed email suffix: {} | retention: {} days | sweep: {:02}:00 {}",
        config.allowed_email_suffix, config.retention_days, config.sweep_hour, config.sweep_timezone
    );

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
