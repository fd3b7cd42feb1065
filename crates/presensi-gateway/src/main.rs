//! Presensi Gateway server binary

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tower_http::cors::CorsLayer;
use tracing::info;

use presensi_common::config::GatewayConfig;
use presensi_gateway::admission::{AdmissionConfig, AdmissionController};
use presensi_gateway::cache::QueryCache;
use presensi_gateway::db::Database;
use presensi_gateway::executor::QueryExecutor;
use presensi_gateway::http_api::{self, AppState};
use presensi_gateway::monitor::SystemMonitor;
use presensi_gateway::rate_limit::RateLimiter;
use presensi_gateway::routes::RouteTable;
use presensi_gateway::{metrics, telemetry};

#[derive(Parser, Debug)]
#[command(name = "presensi-gateway", about = "Request admission and data-access control plane")]
struct Args {
    /// HTTP listen port
    #[arg(long, env = "PRESENSI_HTTP_PORT", default_value = "8080")]
    http_port: u16,

    /// Listen address
    #[arg(long, env = "PRESENSI_HTTP_HOST", default_value = "0.0.0.0")]
    http_host: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    let config = GatewayConfig::from_env();

    telemetry::init(&config.telemetry);
    metrics::init_metrics();
    info!(version = env!("CARGO_PKG_VERSION"), "Starting presensi-gateway");

    let db = Database::connect(&config.database).await;
    let cache = QueryCache::new(&config.cache);
    let executor = Arc::new(QueryExecutor::new(
        db.clone(),
        cache.clone(),
        &config.executor,
    ));
    let admission = AdmissionController::new(AdmissionConfig::from(&config.admission));
    let monitor = Arc::new(SystemMonitor::new(config.monitor.clone()));
    let limiter = RateLimiter::new(&config.rate_limit);
    let routes = Arc::new(RouteTable::standard());

    {
        let monitor = monitor.clone();
        let db = db.clone();
        let admission = admission.clone();
        tokio::spawn(async move {
            monitor.run(db, admission).await;
        });
    }
    tokio::spawn(limiter.clone().run_pruner());

    let state = AppState {
        db,
        cache,
        executor,
        admission,
        monitor,
        limiter,
        routes,
    };
    let app = http_api::router(state).layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("{}:{}", args.http_host, args.http_port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "HTTP server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown signal received");
}
