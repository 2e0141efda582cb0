use async_trait::async_trait;
use hw_api_types::NetworkId;
use hw_ledger_client::{BalanceSource, LedgerError, NativeBalance};
use serde::Deserialize;
use std::time::Duration;
use tracing::warn;

const REQUEST_DEADLINE: Duration = Duration::from_secs(10);
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Real HTTP adapter for Stellar Horizon.
///
/// Endpoints come from the network profiles; `HORIZON_TESTNET_URL` and
/// `HORIZON_MAINNET_URL` override them at construction time.
pub struct HorizonClient {
    testnet_url: String,
    mainnet_url: String,
    http: reqwest::Client,
}

impl Default for HorizonClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HorizonClient {
    pub fn new() -> Self {
        Self::with_endpoints(
            std::env::var("HORIZON_TESTNET_URL").ok(),
            std::env::var("HORIZON_MAINNET_URL").ok(),
        )
    }

    pub fn with_endpoints(testnet: Option<String>, mainnet: Option<String>) -> Self {
        let testnet = testnet.unwrap_or_else(|| hw_network::TESTNET.horizon_url.to_string());
        let mainnet = mainnet.unwrap_or_else(|| hw_network::MAINNET.horizon_url.to_string());
        Self {
            testnet_url: testnet.trim_end_matches('/').to_string(),
            mainnet_url: mainnet.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    fn endpoint_for(&self, network: NetworkId) -> &str {
        match network {
            NetworkId::Testnet => &self.testnet_url,
            NetworkId::Mainnet => &self.mainnet_url,
        }
    }

    /// `Ok(None)` when Horizon has never seen the account (404).
    async fn fetch_account(&self, url: &str) -> Result<Option<AccountResponse>, LedgerError> {
        let request = self.http.get(url).send();
        let response = tokio::time::timeout(REQUEST_DEADLINE, request)
            .await
            .map_err(|_| LedgerError::Transport("request deadline exceeded".to_owned()))?
            .map_err(|err| LedgerError::Transport(err.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LedgerError::Http {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<AccountResponse>()
            .await
            .map(Some)
            .map_err(|err| LedgerError::Malformed(err.to_string()))
    }
}

// ── Horizon REST API types ───────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct AccountResponse {
    balances: Vec<BalanceEntry>,
}

#[derive(Debug, Deserialize)]
struct BalanceEntry {
    balance: String,
    asset_type: String,
}

fn native_amount(account: &AccountResponse) -> Option<&str> {
    account
        .balances
        .iter()
        .find(|entry| entry.asset_type == "native")
        .map(|entry| entry.balance.as_str())
}

#[async_trait]
impl BalanceSource for HorizonClient {
    async fn native_balance(
        &self,
        address: &str,
        network: NetworkId,
    ) -> Result<NativeBalance, LedgerError> {
        let url = format!("{}/accounts/{}", self.endpoint_for(network), address);

        let account = match self.fetch_account(&url).await {
            Ok(account) => account,
            Err(err) if err.is_retryable() => {
                warn!("horizon balance fetch failed, retrying once: {err}");
                tokio::time::sleep(RETRY_BACKOFF).await;
                self.fetch_account(&url).await?
            }
            Err(err) => return Err(err),
        };

        let amount = match &account {
            // Unfunded accounts are a normal state for fresh wallets.
            None => "0".to_owned(),
            Some(account) => native_amount(account)
                .ok_or_else(|| {
                    LedgerError::Malformed("account record has no native balance".to_owned())
                })?
                .to_owned(),
        };

        Ok(NativeBalance {
            address: address.to_owned(),
            network,
            amount,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const ADDRESS: &str = "GBUQWP3BOUZX34TOND2QV7QQ7K7VJTG6VSE7WMLBTMDJLLAW7YKGU6HJ";

    fn canned(status: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        )
    }

    /// Listener that answers one connection per reply; `None` drops the
    /// socket unanswered, which surfaces client-side as a transport error.
    fn stub_horizon(replies: Vec<Option<String>>) -> Result<(String, Arc<AtomicUsize>)> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let endpoint = format!("http://{}", listener.local_addr()?);
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = hits.clone();
        std::thread::spawn(move || {
            for reply in replies {
                let Ok((mut socket, _)) = listener.accept() else {
                    return;
                };
                seen.fetch_add(1, Ordering::SeqCst);
                let mut head = [0u8; 1024];
                let _ = socket.read(&mut head);
                if let Some(raw) = reply {
                    let _ = socket.write_all(raw.as_bytes());
                }
            }
        });
        Ok((endpoint, hits))
    }

    #[test]
    fn picks_native_entry_from_account_record() {
        let raw = r#"{
            "balances": [
                {"balance": "12.0000000", "asset_type": "credit_alphanum12", "asset_code": "HERITAGE"},
                {"balance": "120.5000000", "asset_type": "native"}
            ]
        }"#;
        let account: AccountResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(native_amount(&account), Some("120.5000000"));
    }

    #[test]
    fn missing_native_entry_is_detected() {
        let raw = r#"{"balances": [{"balance": "1", "asset_type": "credit_alphanum4", "asset_code": "HERI"}]}"#;
        let account: AccountResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(native_amount(&account), None);
    }

    #[test]
    fn endpoint_overrides_take_precedence() {
        let client = HorizonClient::with_endpoints(Some("http://localhost:8000/".to_owned()), None);
        assert_eq!(client.endpoint_for(NetworkId::Testnet), "http://localhost:8000");
        assert_eq!(
            client.endpoint_for(NetworkId::Mainnet),
            "https://horizon.stellar.org"
        );
    }

    #[tokio::test]
    async fn unfunded_account_reads_as_zero() -> Result<()> {
        let (endpoint, hits) = stub_horizon(vec![Some(canned("404 Not Found", ""))])?;
        let client = HorizonClient::with_endpoints(Some(endpoint), None);

        let balance = client.native_balance(ADDRESS, NetworkId::Testnet).await?;
        assert_eq!(balance.amount, "0");
        // A missing account is an answer, not a failure; no retry.
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test]
    async fn dropped_connection_is_retried_once() -> Result<()> {
        let body = r#"{"balances": [{"balance": "120.5000000", "asset_type": "native"}]}"#;
        let (endpoint, hits) = stub_horizon(vec![None, Some(canned("200 OK", body))])?;
        let client = HorizonClient::with_endpoints(Some(endpoint), None);

        let balance = client.native_balance(ADDRESS, NetworkId::Testnet).await?;
        assert_eq!(balance.amount, "120.5000000");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        Ok(())
    }

    #[tokio::test]
    async fn persistent_transport_failure_surfaces() -> Result<()> {
        let (endpoint, hits) = stub_horizon(vec![None, None])?;
        let client = HorizonClient::with_endpoints(Some(endpoint), None);

        let err = client
            .native_balance(ADDRESS, NetworkId::Testnet)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Transport(_)));
        // One retry after the first failure, then the error surfaces.
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        Ok(())
    }
}
