//! HTTP API server.
//!
//! Routes live under `/api` and are split by resource. Uploaded
//! photos are served statically from `/uploads`. Storage access goes through
//! [`AppState::with_storage`], which runs each call on the blocking pool.

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::Method;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::classifier::PlaceholderClassifier;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::storage::Storage;

mod error;
mod extract;
mod routes;
mod state;
pub mod upload;

pub use error::ApiError;
pub use extract::AuthUser;
pub use state::AppState;

/// Room for the non-file multipart fields on top of the image limit.
const FORM_OVERHEAD_BYTES: usize = 64 * 1024;

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .max_age(state.config().cors_max_age());
    let body_limit = state.config().storage.max_upload_bytes + FORM_OVERHEAD_BYTES;

    Router::new()
        .route("/health", get(health))
        .nest("/api", routes::api())
        .nest_service("/uploads", ServeDir::new(state.upload_dir()))
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "message": "TreeZam API is running" }))
}

async fn not_found() -> ApiError {
    ApiError::not_found("Not found")
}

/// Open storage, bind the configured address and serve until Ctrl+C or
/// SIGTERM.
///
/// # Errors
///
/// Returns an error if storage cannot be opened, the upload directory
/// cannot be created, or the listener cannot be bound.
pub async fn serve(config: Config) -> Result<()> {
    let storage = Storage::open(config.database_path())?;
    storage.prune_expired_sessions(Utc::now())?;

    let upload_dir = config.upload_dir().join(upload::TREE_UPLOAD_SUBDIR);
    tokio::fs::create_dir_all(&upload_dir)
        .await
        .map_err(|source| Error::DirectoryCreate {
            path: upload_dir.clone(),
            source,
        })?;

    let addr = config.bind_address()?;
    let state = AppState::new(config, storage, Arc::new(PlaceholderClassifier));
    let pruner = spawn_session_pruner(state.clone());

    let listener = TcpListener::bind(addr).await?;
    info!("TreeZam API listening on {}", listener.local_addr()?);
    info!("Serving uploads from {}", state.upload_dir().display());

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    pruner.abort();
    info!("Server shut down");
    Ok(())
}

/// Delete expired sessions every configured interval.
pub fn spawn_session_pruner(state: AppState) -> JoinHandle<()> {
    let period = state.config().session_prune_interval();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // The first tick fires immediately; startup already pruned.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = state
                .with_storage(|s| s.prune_expired_sessions(Utc::now()))
                .await
            {
                warn!("Session pruning failed: {}", e);
            }
        }
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
