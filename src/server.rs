use crate::canvas::Canvas;
use crate::config::Config;
use crate::handlers::{get_canvas, get_pixel, health_check, homepage, place_pixel, AppState, SharedState};
use crate::key_generator::KeyStrategy;
use crate::middleware::logging_middleware;
use axum::routing::get;
use axum::{middleware, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Build the HTTP router over a shared canvas.
pub fn create_app(canvas: Arc<Canvas>, keys: KeyStrategy) -> Router {
    let shared_state: SharedState = AppState::new(canvas, keys);

    Router::new()
        .route("/", get(homepage))
        .route("/pixel", get(get_pixel))
        .route("/canvas", get(get_canvas).post(place_pixel))
        .route("/health", get(health_check))
        .with_state(shared_state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(middleware::from_fn(logging_middleware)),
        )
}

pub struct Server {
    app: Router,
    bind_addr: SocketAddr,
}

impl Server {
    pub fn new(config: &Config, canvas: Arc<Canvas>) -> Self {
        let keys = KeyStrategy::from_trust_proxy(config.trust_proxy_headers);
        Self {
            app: create_app(canvas, keys),
            bind_addr: config.bind_addr,
        }
    }

    /// Serve until Ctrl+C or SIGTERM.
    pub async fn run(self) -> std::io::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.bind_addr).await?;

        tracing::info!("Canvas server listening on {}", listener.local_addr()?);
        tracing::info!("Canvas view available at /canvas");

        axum::serve(
            listener,
            self.app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        },
    }
}
