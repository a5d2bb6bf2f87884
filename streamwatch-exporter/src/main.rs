//! YouTube live stream exporter.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};

use streamwatch_common::init_tracing;
use streamwatch_exporter::schema::validate_schema;
use streamwatch_exporter::{
    ExporterConfig, HttpServer, MetricRegistry, StreamEntity, Supervisor, VideoPlatformApi,
    YouTubeClient,
};

/// Poll YouTube live streams and expose them as Prometheus metrics.
#[derive(Parser, Debug)]
#[command(name = "streamwatch-exporter")]
#[command(about = "Export YouTube live stream state as Prometheus metrics")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long, default_value = "streamwatch.json5")]
    config: String,

    /// HTTP listen address (overrides config).
    #[arg(long)]
    listen: Option<String>,

    /// Log level (overrides config).
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = ExporterConfig::load_from_file(&args.config)?;

    // CLI overrides
    if let Some(listen) = args.listen {
        config.exporter.listen = listen;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    config.validate()?;

    init_tracing(&config.logging)?;
    validate_schema()?;

    info!(
        config = %args.config,
        streams = config.streams.len(),
        "Starting StreamWatch exporter"
    );

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let registry = Arc::new(MetricRegistry::new(config.exporter.prefix.clone()));

    let listen_addr = config
        .exporter
        .listen
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid listen address: {}", e))?;
    // Bind before polling starts so a taken port stops the exporter
    let http_server =
        HttpServer::bind(registry.clone(), listen_addr, config.exporter.path.clone()).await?;

    let http_task = tokio::spawn(async move {
        if let Err(e) = http_server.run(shutdown_rx).await {
            error!("HTTP server error: {}", e);
        }
    });

    // One HTTP connection pool, one client per API key
    let http_client = YouTubeClient::http_client(config.polling.request_timeout())?;
    let base_url = config.api.base_url.clone();
    let api_for = Arc::new(move |entity: &StreamEntity| -> Arc<dyn VideoPlatformApi> {
        Arc::new(YouTubeClient::new(
            http_client.clone(),
            base_url.clone(),
            entity.api_key.clone(),
        ))
    });

    let mut supervisor = Supervisor::new(
        registry.clone(),
        api_for,
        config.polling.cadence(),
        config.polling.stagger(),
    );

    // Streams keep starting until a signal arrives
    tokio::select! {
        result = supervisor.start(config.entities()) => {
            result?;
            wait_for_signal().await;
        }
        _ = wait_for_signal() => {}
    }

    // The HTTP task may already be gone if serving failed
    let _ = shutdown_tx.send(true);
    supervisor.shutdown(Duration::from_secs(5)).await;

    let _ = tokio::time::timeout(Duration::from_secs(5), http_task).await;

    info!(
        series_count = registry.series_count(),
        streams = registry.registered_streams(),
        "Final statistics"
    );

    info!("Exporter stopped");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn wait_for_signal() {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = async {
            #[cfg(unix)]
            {
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        sigterm.recv().await;
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to listen for SIGTERM");
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}
