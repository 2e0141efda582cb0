use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NetworkId {
    Testnet,
    Mainnet,
}

impl NetworkId {
    pub fn as_str(self) -> &'static str {
        match self {
            NetworkId::Testnet => "testnet",
            NetworkId::Mainnet => "mainnet",
        }
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Switching,
    Error,
}

impl ConnectionStatus {
    /// An operation is still in flight and the session may change shortly.
    pub fn is_transient(self) -> bool {
        matches!(self, ConnectionStatus::Connecting | ConnectionStatus::Switching)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ExtensionNotFound,
    UserRejected,
    NetworkMismatch,
    ManualSwitchRequired,
    BalanceUnavailable,
    UnknownNetwork,
    ExtensionUnresponsive,
    Superseded,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorDetail {
    pub kind: ErrorKind,
    pub message: String,
}

/// The session read model handed to every consumer. One value, no partial
/// views: either it came out of the coordinator whole or not at all.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionSnapshot {
    pub status: ConnectionStatus,
    pub address: Option<String>,
    pub balance: String,
    pub balance_stale: bool,
    pub network: NetworkId,
    pub last_error: Option<ErrorDetail>,
}

impl ConnectionSnapshot {
    pub fn disconnected(network: NetworkId) -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            address: None,
            balance: "0".to_owned(),
            balance_stale: false,
            network,
            last_error: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }
}

const TRUNCATE_KEEP: usize = 4;

/// Shortens an account id for display: `GBUQ...HJLM`. Ids short enough to
/// show whole are returned unchanged.
pub fn truncate_address(address: &str) -> String {
    let chars: Vec<char> = address.chars().collect();
    if chars.len() <= TRUNCATE_KEEP * 2 + 3 {
        return address.to_owned();
    }
    let head: String = chars[..TRUNCATE_KEEP].iter().collect();
    let tail: String = chars[chars.len() - TRUNCATE_KEEP..].iter().collect();
    format!("{head}...{tail}")
}
