use std::{net::SocketAddr, sync::Arc, time::Duration};

use {
    anyhow::Context,
    axum::{
        Router,
        extract::{ConnectInfo, State, WebSocketUpgrade},
        response::{IntoResponse, Json},
        routing::get,
    },
    tower_http::cors::{Any, CorsLayer},
    tracing::{error, info, warn},
};

use {
    coldwire_config::Config,
    coldwire_exec::Executor,
    coldwire_protocol::{Outbound, PROTOCOL_VERSION, encode},
};

use crate::{session::handle_connection, state::GatewayState};

/// How long draining may take before the process is force-terminated.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

// ── Shared app state ─────────────────────────────────────────────────────────

#[derive(Clone)]
struct AppState {
    gateway: Arc<GatewayState>,
}

// ── Server startup ───────────────────────────────────────────────────────────

/// Build the gateway router (shared between production startup and tests).
pub fn build_gateway_app(state: Arc<GatewayState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_upgrade_handler))
        .layer(cors)
        .with_state(AppState { gateway: state })
}

/// Start the gateway: bind, accept connections until a shutdown signal,
/// then drain. A bind failure (port already in use) is the only fatal
/// startup error; it propagates out and the process exits non-zero.
pub async fn start_gateway(config: &Config) -> anyhow::Result<()> {
    let project_root = match &config.exec.project_root {
        Some(root) => root.clone(),
        None => std::env::current_dir().context("cannot resolve working directory")?,
    };
    let executor = Executor::new(&config.exec.shell, &config.exec.agent, project_root);
    let state = GatewayState::new(executor);

    let app = build_gateway_app(Arc::clone(&state));

    let addr: SocketAddr = format!("{}:{}", config.gateway.bind, config.gateway.port)
        .parse()
        .context("invalid bind address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr} (port already in use?)"))?;

    // Startup banner.
    let lines = [
        format!("coldwire gateway v{}", state.version),
        format!("protocol v{PROTOCOL_VERSION}, listening on ws://{addr}/ws"),
        format!("project root: {}", state.executor.project_root().display()),
        "command types: shell, agent (auto-classified)".to_string(),
    ];
    let width = lines.iter().map(|l| l.len()).max().unwrap_or(0) + 4;
    info!("┌{}┐", "─".repeat(width));
    for line in &lines {
        info!("│  {:<w$}│", line, w = width - 2);
    }
    info!("└{}┘", "─".repeat(width));

    let drain_state = Arc::clone(&state);
    let graceful = async move {
        shutdown_signal().await;
        drain(drain_state).await;
    };

    // Run the server with ConnectInfo for remote IP extraction.
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(graceful)
    .await?;

    info!("gateway stopped");
    Ok(())
}

// ── Shutdown ─────────────────────────────────────────────────────────────────

/// Resolves on SIGINT or, on unix, SIGTERM.
async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install interrupt handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            },
            Err(e) => {
                warn!(error = %e, "failed to install termination handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => {},
        _ = terminate => {},
    }
}

/// Tell every client the gateway is going away, ask the write loops to
/// close, and arm the force-exit watchdog. Each closing connection kills
/// the processes it owns on its own close path.
async fn drain(state: Arc<GatewayState>) {
    let open = state.client_count().await;
    info!(connections = open, "shutdown signal received, draining");

    state
        .broadcast(&encode(&Outbound::system("Server shutting down")))
        .await;
    state.shutdown.cancel();

    tokio::spawn(async move {
        tokio::time::sleep(SHUTDOWN_GRACE).await;
        error!(
            "drain did not finish within {}s, forcing exit",
            SHUTDOWN_GRACE.as_secs()
        );
        std::process::exit(1);
    });
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let connections = state.gateway.client_count().await;
    Json(serde_json::json!({
        "status": "ok",
        "version": state.gateway.version,
        "protocol": PROTOCOL_VERSION,
        "connections": connections,
    }))
}

async fn ws_upgrade_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state.gateway, addr))
}
