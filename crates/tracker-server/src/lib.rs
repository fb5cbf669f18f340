pub mod error;
pub mod middleware;
pub mod notify;
pub mod routes;
pub mod state;
pub mod worker;

use axum::routing::{get, post};
use axum::Router;
use std::path::Path;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Build the axum Router with all API routes and middleware.
/// Used by `serve()` and available for integration testing.
pub fn build_router(app_state: state::AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Events (SSE)
        .route("/api/events", get(routes::events::sse_events))
        // Orders
        .route(
            "/api/orders",
            get(routes::orders::list_orders).post(routes::orders::create_order),
        )
        .route(
            "/api/orders/bulk-transition",
            post(routes::orders::bulk_transition),
        )
        .route("/api/orders/{id}", get(routes::orders::get_order))
        .route(
            "/api/orders/{id}/history",
            get(routes::orders::get_history),
        )
        .route(
            "/api/orders/{id}/transition",
            post(routes::orders::transition_order),
        )
        // Auto-progress
        .route("/api/auto-progress", get(routes::progress::get_status))
        .route("/api/auto-progress/run", post(routes::progress::run_now))
        .layer(axum::middleware::from_fn_with_state(
            app_state.clone(),
            middleware::auto_progress,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state)
}

/// Start the tracker API server with its background worker.
pub async fn serve(root: &Path, port: u16) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    serve_on(root, listener).await
}

/// Start the server on a pre-bound listener.
///
/// Unlike `serve`, this accepts a `TcpListener` that was already bound so the
/// caller can read the actual port before starting (useful when `port = 0`).
pub async fn serve_on(root: &Path, listener: tokio::net::TcpListener) -> anyhow::Result<()> {
    let actual_port = listener.local_addr()?.port();
    let app_state = state::AppState::open(root)?;
    let worker = app_state.worker.clone();
    let app = build_router(app_state);

    tracing::info!("tracker server listening on http://localhost:{actual_port}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    worker.stop();
    Ok(())
}
