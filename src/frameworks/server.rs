// Framework bootstrap for the game server runtime.

use crate::frameworks::config::Settings;
use crate::interface_adapters::net::{
    create_lobby_handler, delete_lobby_handler, lobby_state_handler, save_lobby_handler,
    ws_handler,
};
use crate::interface_adapters::state::AppState;
use crate::use_cases::LobbyRegistry;

use axum::{
    Router,
    routing::{get, post},
};
use std::net::SocketAddr;
use std::{collections::HashSet, io::Result, sync::Arc};

fn init_runtime() {
    let _ = dotenvy::dotenv();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let json = matches!(std::env::var("LOG_FORMAT").as_deref(), Ok("json"));
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .json()
            .with_current_span(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .init();
    }

    std::panic::set_hook(Box::new(|info| {
        let backtrace = std::backtrace::Backtrace::capture();
        tracing::error!(%info, ?backtrace, "panic");
    }));
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/lobbies", post(create_lobby_handler))
        .route(
            "/lobbies/{lobby_id}",
            get(lobby_state_handler).delete(delete_lobby_handler),
        )
        .route("/lobbies/{lobby_id}/save", post(save_lobby_handler))
        .with_state(state)
}

/// Serves on `listener` with settings from the environment.
pub async fn run(listener: tokio::net::TcpListener) -> Result<()> {
    let settings = Settings::load().map_err(std::io::Error::other)?;
    serve(listener, settings).await
}

pub async fn serve(listener: tokio::net::TcpListener, settings: Settings) -> Result<()> {
    let address = listener.local_addr()?;
    let state = build_state(&settings).await?;
    let app = router(state);

    tracing::info!(
        %address,
        tick_rate_hz = settings.tick_rate_hz,
        default_lobby = %settings.default_lobby_id,
        "listening"
    );

    // Serve app and report errors rather than panicking
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .inspect_err(|e| {
            tracing::error!(error = %e, "server error");
        })
}

pub async fn run_with_config() -> Result<()> {
    init_runtime();

    let settings = Settings::load().inspect_err(|e| {
        tracing::error!(error = %e, "failed to load settings");
    });
    let settings = settings.map_err(std::io::Error::other)?;
    let address = SocketAddr::from((settings.bind_address, settings.http_port));

    // Bind TCP listener with error handling
    let listener = tokio::net::TcpListener::bind(address)
        .await
        .inspect_err(|e| {
            tracing::error!(%address, error = %e, "failed to bind");
        })?;

    serve(listener, settings).await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        // Without a signal handler the server runs until killed.
        tracing::warn!(error = %e, "failed to install ctrl-c handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}

async fn build_state(settings: &Settings) -> Result<Arc<AppState>> {
    // Setup Lobby Registry
    // This owns the set of active lobby world tasks.
    let lobby_registry = Arc::new(LobbyRegistry::new(settings.lobby_settings()));

    // Keep the default lobby pinned so it never gets deleted.
    lobby_registry
        .create_lobby(
            settings.default_lobby_id.clone(),
            HashSet::new(),
            true,
            None,
        )
        .await
        .map_err(std::io::Error::other)?;

    Ok(Arc::new(AppState {
        lobby_registry,
        default_lobby_id: Arc::from(settings.default_lobby_id.as_str()),
        delta_history: settings.delta_history,
    }))
}
