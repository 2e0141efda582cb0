use async_trait::async_trait;
use hw_extension::{AccessGrant, ExtensionError, WalletExtension};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// HTTP bridge to the browser wallet extension.
///
/// The extension itself lives in the user's browser; a small companion
/// process exposes it over localhost and this adapter talks to that bridge.
/// Reads `WALLET_BRIDGE_URL` from environment at construction time
/// (default: `http://127.0.0.1:8811`).
pub struct BridgeExtension {
    endpoint: String,
    http: reqwest::Client,
}

/// Approval waits on a human clicking through the extension popup.
const ACCESS_DEADLINE: Duration = Duration::from_secs(120);
/// Pure lookups answer immediately or not at all.
const QUERY_DEADLINE: Duration = Duration::from_secs(5);

impl Default for BridgeExtension {
    fn default() -> Self {
        Self::new(None)
    }
}

impl BridgeExtension {
    pub fn new(endpoint: Option<String>) -> Self {
        let endpoint = endpoint
            .or_else(|| std::env::var("WALLET_BRIDGE_URL").ok())
            .unwrap_or_else(|| "http://127.0.0.1:8811".to_string());
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn get_json<T>(&self, path: &str, deadline: Duration) -> Result<T, ExtensionError>
    where
        T: serde::de::DeserializeOwned,
    {
        let url = format!("{}{}", self.endpoint, path);
        let request = self.http.get(&url).send();
        let response = tokio::time::timeout(deadline, request)
            .await
            .map_err(|_| ExtensionError::Unresponsive(format!("{path} timed out")))?
            .map_err(classify_transport)?;

        let status = response.status();
        if let Some(error) = classify_status(status) {
            return Err(error);
        }
        response
            .json::<T>()
            .await
            .map_err(|err| ExtensionError::Unresponsive(format!("{path} parse: {err}")))
    }
}

// ── Bridge REST API types ────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct StatusResponse {
    installed: bool,
}

#[derive(Debug, Deserialize)]
struct AccessResponse {
    address: String,
}

#[derive(Debug, Deserialize)]
struct AddressResponse {
    address: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NetworkResponse {
    network: Option<String>,
}

#[async_trait]
impl WalletExtension for BridgeExtension {
    async fn is_available(&self) -> bool {
        match self.get_json::<StatusResponse>("/status", QUERY_DEADLINE).await {
            Ok(status) => status.installed,
            Err(err) => {
                debug!("bridge status probe failed: {err}");
                false
            }
        }
    }

    async fn request_access(&self) -> Result<AccessGrant, ExtensionError> {
        let url = format!("{}/access", self.endpoint);
        let request = self.http.post(&url).send();
        let response = tokio::time::timeout(ACCESS_DEADLINE, request)
            .await
            .map_err(|_| ExtensionError::Unresponsive("access request timed out".to_owned()))?
            .map_err(classify_transport)?;

        let status = response.status();
        if let Some(error) = classify_status(status) {
            return Err(error);
        }
        let granted: AccessResponse = response
            .json()
            .await
            .map_err(|err| ExtensionError::Unresponsive(format!("access parse: {err}")))?;
        Ok(AccessGrant {
            address: granted.address,
        })
    }

    async fn address(&self) -> Result<Option<String>, ExtensionError> {
        let current: AddressResponse = self.get_json("/address", QUERY_DEADLINE).await?;
        Ok(current.address)
    }

    async fn network(&self) -> Result<Option<String>, ExtensionError> {
        let current: NetworkResponse = self.get_json("/network", QUERY_DEADLINE).await?;
        Ok(current.network)
    }
}

fn classify_transport(err: reqwest::Error) -> ExtensionError {
    if err.is_connect() {
        // Nothing listening on the bridge port means no extension to talk to.
        ExtensionError::NotInstalled
    } else if err.is_timeout() {
        ExtensionError::Unresponsive("request timed out".to_owned())
    } else {
        ExtensionError::Unresponsive(err.to_string())
    }
}

fn classify_status(status: reqwest::StatusCode) -> Option<ExtensionError> {
    if status.is_success() {
        return None;
    }
    match status {
        reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => {
            Some(ExtensionError::Rejected)
        }
        reqwest::StatusCode::NOT_FOUND => Some(ExtensionError::NotInstalled),
        _ => Some(ExtensionError::Unresponsive(format!("bridge returned HTTP {status}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_trailing_slash_from_endpoint() {
        let bridge = BridgeExtension::new(Some("http://localhost:9999/".to_owned()));
        assert_eq!(bridge.endpoint(), "http://localhost:9999");
    }

    #[test]
    fn declined_statuses_map_to_rejected() {
        assert_eq!(
            classify_status(reqwest::StatusCode::FORBIDDEN),
            Some(ExtensionError::Rejected)
        );
        assert_eq!(
            classify_status(reqwest::StatusCode::UNAUTHORIZED),
            Some(ExtensionError::Rejected)
        );
        assert_eq!(classify_status(reqwest::StatusCode::OK), None);
    }

    #[test]
    fn missing_bridge_routes_map_to_not_installed() {
        assert_eq!(
            classify_status(reqwest::StatusCode::NOT_FOUND),
            Some(ExtensionError::NotInstalled)
        );
        assert!(matches!(
            classify_status(reqwest::StatusCode::BAD_GATEWAY),
            Some(ExtensionError::Unresponsive(_))
        ));
    }
}
