use anyhow::Context;
use axum::{
    Json, Router,
    http::StatusCode,
    routing::{get, post},
};
use hw_api_types::{ErrorKind, NetworkId};
use hw_extension_bridge::BridgeExtension;
use hw_horizon::HorizonClient;
use hw_network::parse_network;
use hw_session::{SessionConfig, SessionCoordinator, SessionError};
use hw_storage::FileSessionStore;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

mod routes;

#[derive(Debug, Serialize)]
struct HealthResponse {
    service: &'static str,
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct VersionResponse {
    service: &'static str,
    version: &'static str,
}

#[derive(Debug, Serialize)]
pub(crate) struct ErrorResponse {
    pub(crate) error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) kind: Option<ErrorKind>,
}

pub(crate) type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) coordinator: SessionCoordinator,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let network = match std::env::var("SESSION_NETWORK") {
        Ok(raw) => parse_network(&raw).context("SESSION_NETWORK is not a recognized network")?,
        Err(_) => NetworkId::Testnet,
    };
    let store_path = std::env::var("SESSION_STORE_PATH")
        .unwrap_or_else(|_| "data/session-marker.json".to_owned());

    let coordinator = SessionCoordinator::start(
        SessionConfig { network },
        Arc::new(BridgeExtension::new(None)),
        Arc::new(HorizonClient::new()),
        Arc::new(FileSessionStore::new(store_path)),
    )
    .await;

    // Resolve any rehydrated marker before taking traffic.
    coordinator.check_connection().await;

    if let Some(every) = reconcile_interval()? {
        info!("reconciling against the extension every {}s", every.as_secs());
        let periodic = coordinator.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                periodic.check_connection().await;
            }
        });
    }

    let app = app(AppState { coordinator });

    let addr = match std::env::var("SESSION_ADDR") {
        Ok(raw) => raw.parse::<SocketAddr>().context("SESSION_ADDR must be host:port")?,
        Err(_) => SocketAddr::from(([0, 0, 0, 0], 8080)),
    };
    info!("session-service listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

pub(crate) fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/version", get(version))
        .route("/session", get(routes::get_session))
        .route("/session/connect", post(routes::connect_wallet))
        .route("/session/disconnect", post(routes::disconnect_wallet))
        .route("/session/network", post(routes::switch_network))
        .route("/session/reconcile", post(routes::reconcile_session))
        .route("/session/balance/refresh", post(routes::refresh_balance))
        .route("/explorer/{resource}/{value}", get(routes::explorer_link))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        service: "session-service",
        status: "ok",
    })
}

async fn version() -> Json<VersionResponse> {
    Json(VersionResponse {
        service: "session-service",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to install shutdown handler: {err}");
    }
}

fn reconcile_interval() -> anyhow::Result<Option<Duration>> {
    match std::env::var("RECONCILE_INTERVAL_SECS") {
        Ok(raw) => {
            let secs: u64 = raw
                .trim()
                .parse()
                .context("RECONCILE_INTERVAL_SECS must be an integer")?;
            Ok((secs > 0).then(|| Duration::from_secs(secs)))
        }
        Err(_) => Ok(None),
    }
}

pub(crate) fn bad_request(message: &str) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: message.to_owned(),
            kind: None,
        }),
    )
}

pub(crate) fn session_error(err: &SessionError) -> (StatusCode, Json<ErrorResponse>) {
    let status = match err {
        SessionError::ExtensionNotFound => StatusCode::SERVICE_UNAVAILABLE,
        SessionError::UserRejected => StatusCode::FORBIDDEN,
        SessionError::NetworkMismatch { .. }
        | SessionError::ManualSwitchRequired { .. }
        | SessionError::Superseded => StatusCode::CONFLICT,
        SessionError::BalanceUnavailable { .. } | SessionError::ExtensionUnresponsive(_) => {
            StatusCode::BAD_GATEWAY
        }
        SessionError::UnknownNetwork(_) => StatusCode::BAD_REQUEST,
    };
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
            kind: Some(err.kind()),
        }),
    )
}
