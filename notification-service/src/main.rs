use axum::{routing::get, Json, Router};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use event_booking::{metrics_endpoint, BookingStore, Metrics, ServiceConfig};

mod service;
mod sink;

use service::NotificationService;
use sink::LogSink;

#[derive(Parser, Debug)]
#[command(name = "notification-service")]
#[command(about = "Notification consumer for the booking queue")]
struct Args {
    /// Config file path; environment variables override it
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Serve /metrics and /health on this port
    #[arg(long = "metrics-port")]
    metrics_port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config = ServiceConfig::load("notification-service", args.config.as_deref())?;
    info!(
        "Starting notification-service ({} environment)",
        config.environment
    );

    // Read-only follower of the booking store; this process only
    // re-checks booking status, it never writes.
    let store = BookingStore::open_secondary(
        config.store.table_path(),
        config.store.secondary_path(&config.service_name),
    )?;

    let metrics = Arc::new(Metrics::new()?);

    if let Some(port) = args.metrics_port {
        tokio::spawn(serve_metrics(port, metrics.clone()));
    }

    let service = NotificationService::new(&config, store, Arc::new(LogSink), metrics)?;
    service.run().await?;

    Ok(())
}

async fn serve_metrics(port: u16, metrics: Arc<Metrics>) {
    let app = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_endpoint))
        .with_state(metrics);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Metrics listener on {}", addr);

    match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => {
            if let Err(e) = axum::serve(listener, app).await {
                error!("Metrics listener failed: {}", e);
            }
        }
        Err(e) => error!("Failed to bind metrics listener on {}: {}", addr, e),
    }
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "notification-service",
    }))
}
