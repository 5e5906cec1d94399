use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::{error, info};

use feira_api::config;
use feira_api::db;
use feira_api::events::{self, EventSender, SideEffects};
use feira_api::services::fiscal::FiscalService;
use feira_api::services::notifications::NotificationService;
use feira_api::{app_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_config = config::load_config().context("failed to load configuration")?;
    config::init_tracing(app_config.log_level(), app_config.log_json);

    info!(
        environment = %app_config.environment,
        "starting feira-api {}",
        env!("CARGO_PKG_VERSION")
    );

    let db = Arc::new(
        db::establish_connection_from_app_config(&app_config)
            .await
            .context("failed to connect to the database")?,
    );

    if app_config.auto_migrate {
        db::bootstrap_schema(db.as_ref())
            .await
            .context("failed to bootstrap the database schema")?;
        info!("database schema bootstrapped");
    }

    let config = Arc::new(app_config);

    // side-effect pipeline: handlers emit events, the background loop runs
    // emails and fiscal emission after the triggering transaction commits
    let (tx, rx) = mpsc::channel(config.event_channel_capacity);
    let events = EventSender::new(tx);
    let effects = SideEffects {
        notifications: Some(Arc::new(NotificationService::from_config(
            db.clone(),
            &config,
        ))),
        fiscal: Some(Arc::new(FiscalService::from_config(
            db.clone(),
            &config,
            Some(events.clone()),
        ))),
    };
    let event_loop = tokio::spawn(events::process_events(rx, effects));

    let state = Arc::new(AppState::new(db, config.clone(), events));

    // evict expired in-process rate-limit windows once per window
    let limiter = state.rate_limiter.clone();
    let cleanup_period = Duration::from_secs(config.rate_limit_window_seconds.max(1));
    let limiter_janitor = tokio::spawn(async move {
        let mut tick = tokio::time::interval(cleanup_period);
        loop {
            tick.tick().await;
            limiter.cleanup_expired();
        }
    });

    let app = app_router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("invalid host/port configuration")?;
    info!(%addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("failed to bind listener")?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

    info!("server stopped; draining event loop");
    limiter_janitor.abort();
    event_loop.abort();
    if let Err(e) = event_loop.await {
        if !e.is_cancelled() {
            error!(error = %e, "event loop ended abnormally");
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => error!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}
