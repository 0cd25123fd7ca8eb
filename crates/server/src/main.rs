mod bootstrap;
mod events_api;
mod health;
mod slack_api;
mod upstream;

use std::time::Duration;

use anyhow::Result;
use esibot_core::config::{AppConfig, LoadOptions};
use esibot_slack::monitor::send_startup_greeting;
use tokio::sync::watch;

fn init_logging(config: &AppConfig) {
    use esibot_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let monitor_task = match app.monitor() {
        Some(monitor) => Some(tokio::spawn(monitor.run(async move {
            let _ = shutdown_rx.changed().await;
        }))),
        None => {
            let routes = app.prime_routes().await;
            tracing::info!(
                event_name = "system.server.routes_primed",
                correlation_id = "bootstrap",
                routes,
                "status monitor disabled; routes loaded once"
            );
            None
        }
    };

    if app.config.slack.send_startup_message {
        let delivered =
            send_startup_greeting(app.sink.as_ref(), &app.config.slack.ping_channels).await;
        tracing::info!(
            event_name = "system.server.greeting_sent",
            correlation_id = "bootstrap",
            delivered,
            "startup greeting sent"
        );
    }

    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        "esibot-server listening"
    );

    axum::serve(listener, app.router()).with_graceful_shutdown(wait_for_shutdown()).await?;

    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "esibot-server stopping"
    );
    let _ = shutdown_tx.send(true);
    if let Some(task) = monitor_task {
        let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
        if tokio::time::timeout(grace, task).await.is_err() {
            tracing::warn!(
                event_name = "system.server.monitor_shutdown_timeout",
                correlation_id = "shutdown",
                "status monitor did not stop within the grace period"
            );
        }
    }

    Ok(())
}

async fn wait_for_shutdown() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(
            event_name = "system.server.signal_error",
            correlation_id = "shutdown",
            error = %error,
            "failed to listen for shutdown signal"
        );
        std::future::pending::<()>().await;
    }
}
