use axum::{
    extract::{FromRef, Query, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use clap::Parser;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use event_booking::{
    metrics_endpoint, Booking, BookingError, BookingStore, CreateBooking, Metrics,
    NotificationPublisher, ServiceConfig,
};

mod service;

use service::BookingService;

#[derive(Parser, Debug)]
#[command(name = "booking-service")]
#[command(about = "Booking REST API")]
struct Args {
    /// Port to listen on
    #[arg(short = 'p', long = "port", default_value = "8080")]
    port: u16,

    /// Config file path; environment variables override it
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,
}

#[derive(Clone)]
struct AppState {
    service: BookingService,
    metrics: Arc<Metrics>,
}

impl FromRef<AppState> for Arc<Metrics> {
    fn from_ref(state: &AppState) -> Self {
        state.metrics.clone()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config = ServiceConfig::load("booking-service", args.config.as_deref())?;
    info!(
        "Starting booking-service ({} environment)",
        config.environment
    );

    let store = BookingStore::open(config.store.table_path())?;
    let publisher = NotificationPublisher::new(config.to_kafka_config(), &config.queue)?;
    let metrics = Arc::new(Metrics::new()?);

    let service = BookingService::new(
        store.clone(),
        Arc::new(publisher.clone()),
        metrics.clone(),
    );
    let state = AppState {
        service,
        metrics: metrics.clone(),
    };

    let app = Router::new()
        .route("/bookings", post(create_booking).get(list_bookings))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_endpoint))
        .layer(middleware::from_fn_with_state(metrics, track_requests))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    info!("booking-service listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    publisher.flush(Duration::from_secs(10)).await?;
    store.flush()?;

    Ok(())
}

async fn create_booking(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> Result<(StatusCode, Json<Booking>), ApiError> {
    let request: CreateBooking = serde_json::from_value(body)
        .map_err(|e| ApiError(BookingError::Validation(format!("Invalid request body: {}", e))))?;

    let booking = state.service.create_booking(request).await.map_err(ApiError)?;
    Ok((StatusCode::CREATED, Json(booking)))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    event_id: Option<String>,
}

async fn list_bookings(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Booking>>, ApiError> {
    let bookings = state
        .service
        .list_bookings(query.event_id.as_deref())
        .map_err(ApiError)?;
    Ok(Json(bookings))
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "booking-service",
    }))
}

async fn track_requests(
    State(metrics): State<Arc<Metrics>>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let response = next.run(request).await;
    metrics
        .request_duration
        .observe(start.elapsed().as_secs_f64());
    response
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to install shutdown handler: {}", e);
    }
}

struct ApiError(BookingError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            BookingError::Validation(_) => StatusCode::BAD_REQUEST,
            BookingError::Conflict { .. } => StatusCode::CONFLICT,
            e if e.is_dependency() => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        }

        (
            status,
            Json(serde_json::json!({ "error": self.0.to_string() })),
        )
            .into_response()
    }
}
