use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use ringside::calendar::{CalendarProvider, DisabledCalendar, GoogleCalendar};
use ringside::config::Config;
use ringside::engine::{Collaborators, Engine};
use ringside::notifications::{ClientNotifier, LogNotifier, WebhookNotifier};
use ringside::notify::NotifyHub;
use ringside::routes::create_router;
use ringside::{observability, reconciler, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;
    observability::init_logging(config.log_json);
    observability::init(config.metrics_port);

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    let collaborators = collaborators(&config)?;
    let engine = Arc::new(Engine::new(
        config.wal_path(),
        Arc::new(NotifyHub::new()),
        collaborators,
        config.engine_settings(),
    )?);

    let shutdown = CancellationToken::new();
    let reconciler = tokio::spawn(reconciler::run_sync_reconciler(
        engine.clone(),
        config.reconcile_interval,
        shutdown.clone(),
    ));
    let compactor = tokio::spawn(reconciler::run_compactor(
        engine.clone(),
        config.compact_threshold,
        shutdown.clone(),
    ));

    let addr = format!("{}:{}", config.bind, config.port);
    info!("ringside listening on {addr}");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  timezone: {}", config.clock.name());
    info!("  calendar: {}", if config.google_access_token.is_some() { "google" } else { "disabled" });
    info!("  admin api: {}", if config.admin_token.is_some() { "enabled" } else { "disabled" });

    let state = Arc::new(AppState { config, engine });
    let app = create_router(state);
    let listener = TcpListener::bind(&addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    // HTTP drained; stop background work.
    shutdown.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(10), async {
        let _ = reconciler.await;
        let _ = compactor.await;
    })
    .await;

    info!("ringside stopped");
    Ok(())
}

fn collaborators(config: &Config) -> Result<Collaborators, Box<dyn std::error::Error>> {
    let calendar: Arc<dyn CalendarProvider> = match &config.google_access_token {
        Some(token) => Arc::new(GoogleCalendar::new(
            &config.google_api_base,
            token.clone(),
            config.calendar_timeout,
        )?),
        None => Arc::new(DisabledCalendar),
    };
    let notifier: Arc<dyn ClientNotifier> = match &config.notify_webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url.clone(), Duration::from_secs(10))?),
        None => Arc::new(LogNotifier),
    };
    Ok(Collaborators {
        calendar,
        notifier,
        ..Collaborators::default()
    })
}

/// Resolves on SIGTERM or ctrl-c, or when shutdown was already requested.
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to register SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
        _ = token.cancelled() => {}
    }
    info!("shutdown signal received, draining connections...");
}
