mod config;
mod docs;
mod engine;
mod handlers;
mod models;
mod routes;
mod session;
mod websocket;

use std::panic;
use std::sync::Arc;

use config::Config;
use engine::cdp::CdpEngine;
use engine::BrowserEngine;
use routes::create_app_routes;
use session::Session;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// State shared by every HTTP and WebSocket handler
pub struct AppState {
    pub session: Arc<Session>,
    pub config: Config,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Set panic hook for better error messages
    panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
    }));

    // Load configuration; the outcome is logged once tracing is up
    let loaded = Config::load();
    let config = loaded.as_ref().cloned().unwrap_or_default();

    // Initialize tracing
    let default_filter = format!(
        "cobrowse=debug,tower_http=debug,axum::rejection=trace,{}",
        config.log_level
    );
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .init();

    info!("Starting server...");
    match &loaded {
        Ok(_) => info!("✅ Configuration loaded successfully"),
        Err(e) => {
            error!("❌ Failed to load configuration: {}", e);
            warn!("Using default configuration");
        }
    }
    if config.recheck_control_on_execute {
        info!("Control is re-checked when each queued command runs");
    }

    // Launch the shared browser
    let engine = match CdpEngine::launch(config.launch_options()).await {
        Ok(engine) => engine,
        Err(e) => {
            error!("Failed to launch browser: {}", e);
            return;
        }
    };
    let engine: Arc<dyn BrowserEngine> = engine;

    let session = match Session::start(config.session_config(), engine.clone()).await {
        Ok(session) => session,
        Err(e) => {
            error!("Failed to start session: {}", e);
            if let Err(e) = engine.close().await {
                warn!("Failed to close browser: {}", e);
            }
            return;
        }
    };

    let state = Arc::new(AppState {
        session: session.clone(),
        config: config.clone(),
    });
    let app_routes = create_app_routes(state);

    // Start the HTTP/API server
    let listener = match tokio::net::TcpListener::bind(config.server_address()).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", config.server_address(), e);
            session.shutdown().await;
            return;
        }
    };

    info!("🚀 Server running on http://{}", config.server_address());
    info!("📡 WebSocket available at ws://{}/ws", config.server_address());
    info!("📚 Swagger UI available at http://{}/swagger", config.server_address());

    if let Err(e) = axum::serve(listener, app_routes)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {}", e);
    }

    session.shutdown().await;
    info!("Server stopped");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
