use axum::{
    Json,
    extract::{Path, Query, State},
};
use hw_api_types::ConnectionSnapshot;
use hw_network::{ExplorerResource, explorer_url_for, parse_network};
use hw_session::SessionError;
use serde::{Deserialize, Serialize};

use crate::{ApiResult, AppState, bad_request, session_error};

#[derive(Debug, Deserialize)]
pub(crate) struct SwitchNetworkRequest {
    pub(crate) network: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ExplorerQuery {
    pub(crate) network: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ExplorerLinkResponse {
    pub(crate) url: String,
}

pub(crate) async fn get_session(State(state): State<AppState>) -> Json<ConnectionSnapshot> {
    Json(state.coordinator.snapshot())
}

pub(crate) async fn connect_wallet(State(state): State<AppState>) -> ApiResult<ConnectionSnapshot> {
    state
        .coordinator
        .connect()
        .await
        .map(Json)
        .map_err(|err| session_error(&err))
}

pub(crate) async fn disconnect_wallet(State(state): State<AppState>) -> Json<ConnectionSnapshot> {
    Json(state.coordinator.disconnect().await)
}

pub(crate) async fn switch_network(
    State(state): State<AppState>,
    Json(request): Json<SwitchNetworkRequest>,
) -> ApiResult<ConnectionSnapshot> {
    if request.network.trim().is_empty() {
        return Err(bad_request("network is required"));
    }
    let target = parse_network(&request.network)
        .map_err(|err| session_error(&SessionError::from(err)))?;
    state
        .coordinator
        .switch_network(target)
        .await
        .map(Json)
        .map_err(|err| session_error(&err))
}

pub(crate) async fn reconcile_session(State(state): State<AppState>) -> Json<ConnectionSnapshot> {
    Json(state.coordinator.check_connection().await)
}

pub(crate) async fn refresh_balance(State(state): State<AppState>) -> ApiResult<ConnectionSnapshot> {
    state
        .coordinator
        .refresh_balance()
        .await
        .map(Json)
        .map_err(|err| session_error(&err))
}

pub(crate) async fn explorer_link(
    State(state): State<AppState>,
    Path((resource, value)): Path<(String, String)>,
    Query(query): Query<ExplorerQuery>,
) -> ApiResult<ExplorerLinkResponse> {
    let resource = ExplorerResource::parse(&resource)
        .ok_or_else(|| bad_request("resource must be 'account' or 'tx'"))?;
    if value.trim().is_empty() {
        return Err(bad_request("value is required"));
    }
    let network = match query.network {
        Some(label) => {
            parse_network(&label).map_err(|err| session_error(&SessionError::from(err)))?
        }
        None => state.coordinator.snapshot().network,
    };
    Ok(Json(ExplorerLinkResponse {
        url: explorer_url_for(&value, resource, network),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use hw_api_types::NetworkId;
    use hw_extension::ScriptedExtension;
    use hw_ledger_client::{BalanceSource, LedgerError, NativeBalance};
    use hw_session::{SessionConfig, SessionCoordinator};
    use hw_storage::InMemorySessionStore;
    use std::sync::Arc;
    use tower::ServiceExt;

    const ADDRESS: &str = "GBUQWP3BOUZX34TOND2QV7QQ7K7VJTG6VSE7WMLBTMDJLLAW7YKGU6HJ";

    struct StaticBalances(&'static str);

    #[async_trait::async_trait]
    impl BalanceSource for StaticBalances {
        async fn native_balance(
            &self,
            address: &str,
            network: NetworkId,
        ) -> Result<NativeBalance, LedgerError> {
            Ok(NativeBalance {
                address: address.to_owned(),
                network,
                amount: self.0.to_owned(),
            })
        }
    }

    async fn test_app(extension: ScriptedExtension) -> Router {
        let coordinator = SessionCoordinator::start(
            SessionConfig::default(),
            Arc::new(extension),
            Arc::new(StaticBalances("50.0000000")),
            Arc::new(InMemorySessionStore::default()),
        )
        .await;
        crate::app(crate::AppState { coordinator })
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post(uri: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_owned()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let app = test_app(ScriptedExtension::installed(ADDRESS, "TESTNET")).await;
        let response = app.oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["service"], "session-service");
    }

    #[tokio::test]
    async fn session_starts_disconnected() {
        let app = test_app(ScriptedExtension::installed(ADDRESS, "TESTNET")).await;
        let response = app.oneshot(get("/session")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "disconnected");
        assert_eq!(body["network"], "testnet");
        assert_eq!(body["address"], serde_json::Value::Null);
    }

    #[tokio::test]
    async fn connect_round_trip() {
        let app = test_app(ScriptedExtension::installed(ADDRESS, "TESTNET")).await;

        let response = app
            .clone()
            .oneshot(post("/session/connect"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "connected");
        assert_eq!(body["address"], ADDRESS);

        let response = app.oneshot(post("/session/disconnect")).await.unwrap();
        let body = body_json(response).await;
        assert_eq!(body["status"], "disconnected");
        assert_eq!(body["balance"], "0");
    }

    #[tokio::test]
    async fn missing_extension_maps_to_service_unavailable() {
        let app = test_app(ScriptedExtension::absent()).await;
        let response = app.oneshot(post("/session/connect")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = body_json(response).await;
        assert_eq!(body["kind"], "extension_not_found");
    }

    #[tokio::test]
    async fn unknown_network_label_is_rejected() {
        let app = test_app(ScriptedExtension::installed(ADDRESS, "TESTNET")).await;
        let response = app
            .oneshot(post_json("/session/network", r#"{"network":"futurenet"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["kind"], "unknown_network");
    }

    #[tokio::test]
    async fn switch_while_disconnected_updates_preference() {
        let app = test_app(ScriptedExtension::installed(ADDRESS, "TESTNET")).await;
        let response = app
            .oneshot(post_json("/session/network", r#"{"network":"mainnet"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "disconnected");
        assert_eq!(body["network"], "mainnet");
    }

    #[tokio::test]
    async fn explorer_links_follow_the_session_network() {
        let app = test_app(ScriptedExtension::installed(ADDRESS, "TESTNET")).await;

        let response = app
            .clone()
            .oneshot(get(&format!("/explorer/account/{ADDRESS}")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(
            body["url"],
            format!("https://stellar.expert/explorer/testnet/account/{ADDRESS}")
        );

        let response = app
            .oneshot(get("/explorer/tx/abc123?network=mainnet"))
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["url"], "https://stellar.expert/explorer/public/tx/abc123");
    }

    #[tokio::test]
    async fn unknown_explorer_resource_is_rejected() {
        let app = test_app(ScriptedExtension::installed(ADDRESS, "TESTNET")).await;
        let response = app.oneshot(get("/explorer/ledger/123")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
