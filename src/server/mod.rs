//! Embedded HTTP server exposing the Git backend's REST surface.
//!
//! JSON `{success, ...}` envelopes under `/api/git`, no-store cache
//! headers and permissive CORS so a browser client on another origin
//! can drive it.

mod routes;

use axum::http::{header, HeaderValue};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::set_header::SetResponseHeaderLayer;

pub use routes::SharedBackend;

pub fn router(backend: SharedBackend) -> Router {
    let api = Router::new()
        .route("/status", get(routes::get_status))
        .route(
            "/config",
            get(routes::get_config).post(routes::update_config),
        )
        .route("/files", get(routes::list_files))
        .route(
            "/file/{name}",
            get(routes::read_file)
                .post(routes::write_file)
                .delete(routes::delete_file),
        )
        .route("/rename", post(routes::rename_file))
        .route("/history/{name}", get(routes::file_history))
        .route("/sync", post(routes::sync_remote))
        .with_state(backend);

    Router::new()
        .nest("/api/git", api)
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store, no-cache, must-revalidate, private"),
        ))
        .layer(CorsLayer::permissive())
}

/// Bind and serve until the process is stopped.
pub async fn serve(backend: SharedBackend, port: u16) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    log::info!("Server running at http://localhost:{}", port);
    axum::serve(listener, router(backend)).await
}
