use std::{net::SocketAddr, sync::Arc};

use {
    axum::{
        Router,
        extract::{ConnectInfo, State, WebSocketUpgrade},
        response::{IntoResponse, Json},
        routing::{get, post},
    },
    medlink_config::MedlinkConfig,
    tokio::task::JoinHandle,
    tower_http::{
        catch_panic::CatchPanicLayer,
        cors::{Any, CorsLayer},
        trace::TraceLayer,
    },
    tracing::{info, warn},
};

use medlink_protocol::PROTOCOL_VERSION;

use crate::{api, state::GatewayState, ws::handle_connection};

// ── Shared app state ─────────────────────────────────────────────────────────

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) gateway: Arc<GatewayState>,
}

// ── Server startup ───────────────────────────────────────────────────────────

/// Build the gateway router (shared between production startup and tests).
///
/// Serve it with `into_make_service_with_connect_info::<SocketAddr>()`; the
/// WebSocket handler reads the peer address.
pub fn build_gateway_app(state: Arc<GatewayState>) -> Router {
    let app_state = AppState { gateway: state };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/register-hospital", post(api::register_hospital))
        .route("/registered-hospitals", get(api::registered_hospitals))
        .route("/ws", get(ws_upgrade_handler))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state)
}

/// Periodically delete requests older than the retention window.
pub fn spawn_sweeper(state: Arc<GatewayState>) -> JoinHandle<()> {
    let period = state.config.ledger.sweep_interval();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        // The first tick completes immediately; nothing can have expired yet.
        interval.tick().await;
        loop {
            interval.tick().await;
            state.sweep().await;
        }
    })
}

/// Start the gateway HTTP + WebSocket server and run until Ctrl-C.
pub async fn start_gateway(config: MedlinkConfig) -> anyhow::Result<()> {
    let addr: SocketAddr = config.server.address().parse()?;
    let state = GatewayState::new(config);
    let app = build_gateway_app(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Startup banner.
    let ledger = &state.config.ledger;
    let lines = [
        format!("medlink hub v{}", state.version),
        format!("protocol v{PROTOCOL_VERSION}, listening on {addr}"),
        format!(
            "requests kept {}s, swept every {}s",
            ledger.retention_secs,
            ledger.sweep_interval().as_secs()
        ),
    ];
    let width = lines.iter().map(|l| l.len()).max().unwrap_or(0) + 4;
    info!("┌{}┐", "─".repeat(width));
    for line in &lines {
        info!("│  {:<w$}│", line, w = width - 2);
    }
    info!("└{}┘", "─".repeat(width));

    let sweeper = spawn_sweeper(Arc::clone(&state));

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    sweeper.abort();
    info!("medlink hub stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.gateway.stats().await;
    Json(serde_json::json!({
        "status": "ok",
        "version": state.gateway.version,
        "hostname": state.gateway.hostname,
        "protocol": PROTOCOL_VERSION,
        "connections": stats.connections,
        "hospitalsRegistered": stats.hospitals_registered,
        "hospitalsOnline": stats.hospitals_online,
        "activeRequests": stats.active_requests,
    }))
}

async fn ws_upgrade_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state.gateway, addr))
}
