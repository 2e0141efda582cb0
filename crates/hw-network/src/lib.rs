//! Network profiles and label handling for the Stellar networks the
//! marketplace runs against.
//!
//! Wallet extensions report networks under their own labels ("TESTNET",
//! "PUBLIC", ...), so everything that crosses that boundary goes through
//! [`parse_network`] before it touches typed state.

use hw_api_types::NetworkId;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NetworkError {
    #[error("unknown network identifier: {0}")]
    UnknownNetwork(String),
}

#[derive(Debug, Clone, Copy)]
pub struct NetworkProfile {
    pub id: NetworkId,
    pub horizon_url: &'static str,
    pub explorer_base_url: &'static str,
    pub passphrase: &'static str,
}

pub const TESTNET: NetworkProfile = NetworkProfile {
    id: NetworkId::Testnet,
    horizon_url: "https://horizon-testnet.stellar.org",
    explorer_base_url: "https://stellar.expert/explorer/testnet",
    passphrase: "Test SDF Network ; September 2015",
};

pub const MAINNET: NetworkProfile = NetworkProfile {
    id: NetworkId::Mainnet,
    horizon_url: "https://horizon.stellar.org",
    explorer_base_url: "https://stellar.expert/explorer/public",
    passphrase: "Public Global Stellar Network ; September 2015",
};

pub fn profile(network: NetworkId) -> &'static NetworkProfile {
    match network {
        NetworkId::Testnet => &TESTNET,
        NetworkId::Mainnet => &MAINNET,
    }
}

/// Normalizes a network label before it touches typed state. Freighter-style
/// extensions report "TESTNET" and "PUBLIC".
pub fn parse_network(label: &str) -> Result<NetworkId, NetworkError> {
    match label.trim().to_ascii_lowercase().as_str() {
        "testnet" | "test" => Ok(NetworkId::Testnet),
        "mainnet" | "public" | "pubnet" => Ok(NetworkId::Mainnet),
        _ => Err(NetworkError::UnknownNetwork(label.trim().to_owned())),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExplorerResource {
    Account,
    Transaction,
}

impl ExplorerResource {
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "account" => Some(ExplorerResource::Account),
            "tx" | "transaction" => Some(ExplorerResource::Transaction),
            _ => None,
        }
    }

    fn path_segment(self) -> &'static str {
        match self {
            ExplorerResource::Account => "account",
            ExplorerResource::Transaction => "tx",
        }
    }
}

/// Builds a block-explorer link for an account id or transaction hash on the
/// given network.
pub fn explorer_url_for(value: &str, resource: ExplorerResource, network: NetworkId) -> String {
    format!(
        "{}/{}/{}",
        profile(network).explorer_base_url,
        resource.path_segment(),
        value
    )
}
