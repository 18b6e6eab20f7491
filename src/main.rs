use std::process::ExitCode;

use tacstats::settings::resolve_config_path;
use tacstats::StatsSettings;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "info";

/// `RUST_LOG` wins; otherwise the configured filter, otherwise `info`.
fn init_logging(configured_filter: Option<&str>) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(configured_filter.unwrap_or(DEFAULT_LOG_FILTER)))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let config_path = resolve_config_path(std::env::args().nth(1));
    let settings = match StatsSettings::load(&config_path) {
        Ok(settings) => settings,
        Err(error) => {
            init_logging(None);
            tracing::error!(
                config_path = %config_path.display(),
                error = %error,
                "Failed to load configuration"
            );
            return ExitCode::FAILURE;
        }
    };
    init_logging(settings.log_filter.as_deref());

    let (shutdown_sender, shutdown_receiver) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %error, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
        tracing::info!("Shutdown requested");
        if shutdown_sender.send(true).is_err() {
            tracing::debug!("Ingestion already stopped");
        }
    });

    match tacstats::run(settings, shutdown_receiver).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(error = %error, "Ingestion stopped with an error");
            ExitCode::FAILURE
        }
    }
}
