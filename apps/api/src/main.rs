use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dotenv::dotenv;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{self, TraceLayer};
use tracing::{info, warn, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod router;

use shared_config::AppConfig;

#[tokio::main]
async fn main() {
    // Loading Env Vars
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Cliniq booking API server");

    // Load configuration
    let config = AppConfig::from_env();

    // Set up CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Wire all cells once at startup; handlers only clone Arc handles.
    let cells = router::AppCells::new(&config);

    spawn_payout_sweep(&config, &cells);

    // Build the application router
    let app = router::create_router(&cells)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(trace::DefaultMakeSpan::new().level(Level::INFO))
                .on_response(trace::DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors);

    // Run the server
    let addr = SocketAddr::from(([0, 0, 0, 0], 3000));
    info!("Listening on {}", addr);

    let listener = TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}

/// Periodic payout sweep. Each tick is independent and idempotent, so a
/// failed run just waits for the next one.
fn spawn_payout_sweep(config: &AppConfig, cells: &router::AppCells) {
    if config.payout_sweep_interval_seconds == 0 {
        warn!("Payout sweep disabled (PAYOUT_SWEEP_INTERVAL_SECONDS=0)");
        return;
    }

    let payouts = Arc::clone(&cells.settlement.payouts);
    let service_role_key = config.supabase_service_role_key.clone();
    let interval_seconds = config.payout_sweep_interval_seconds;

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_seconds));

        loop {
            interval.tick().await;

            match payouts.run_sweep(Utc::now(), &service_role_key).await {
                Ok(report) => {
                    if report.examined > 0 {
                        info!(
                            "Payout sweep: {} examined, {} paid, {} skipped, {} failed",
                            report.examined, report.paid, report.skipped, report.failed
                        );
                    }
                }
                Err(e) => warn!("Payout sweep failed: {}", e),
            }
        }
    });

    info!("Payout sweep running every {}s", config.payout_sweep_interval_seconds);
}
