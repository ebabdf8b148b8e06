// HTTP front end for feature detection.
// Two detection endpoints share one admission gate; see routes.rs.

pub mod routes;

use axum::{http::Method, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::detection::FeatureDetector;

/// Shared state for request handlers
#[derive(Clone)]
pub struct AppState {
    pub detector: Arc<FeatureDetector>,
}

/// Build the application router.
pub fn router(detector: Arc<FeatureDetector>) -> Router {
    // Read-only API, callable from any origin
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_origin(Any);

    Router::new()
        .merge(routes::api_routes())
        .with_state(AppState { detector })
        .layer(cors)
}

/// Serve until Ctrl-C.
pub async fn serve(addr: SocketAddr, detector: Arc<FeatureDetector>) -> std::io::Result<()> {
    let capacity = detector.gate().capacity();
    let app = router(detector);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!(
        "Listening on {} ({} concurrent jobs)",
        listener.local_addr()?,
        capacity
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
            log::info!("Shutdown signal received, draining requests...");
        })
        .await?;

    log::info!("Server stopped");
    Ok(())
}
