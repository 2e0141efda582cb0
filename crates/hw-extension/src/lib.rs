//! Boundary to the user's browser wallet extension.
//!
//! Everything the session coordinator knows about the extension goes through
//! [`WalletExtension`]; the extension decides approval and network, we only
//! observe. [`ScriptedExtension`] is the in-process stand-in used by tests.

use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExtensionError {
    #[error("no wallet extension is installed")]
    NotInstalled,
    #[error("the request was declined in the wallet extension")]
    Rejected,
    #[error("wallet extension did not respond: {0}")]
    Unresponsive(String),
}

/// Outcome of a successful access request: the account the user approved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessGrant {
    pub address: String,
}

#[async_trait]
pub trait WalletExtension: Send + Sync {
    /// Whether an extension is reachable at all. Must not prompt the user.
    async fn is_available(&self) -> bool;
    /// Prompts the user for access. Blocks until approved, declined, or the
    /// extension gives up.
    async fn request_access(&self) -> Result<AccessGrant, ExtensionError>;
    /// Currently authorized account, `None` when no session is active.
    /// Must not prompt the user.
    async fn address(&self) -> Result<Option<String>, ExtensionError>;
    /// Network label as the extension reports it (for Freighter-style
    /// extensions: "TESTNET", "PUBLIC"). Must not prompt the user.
    async fn network(&self) -> Result<Option<String>, ExtensionError>;
}

#[derive(Debug, Clone)]
struct Script {
    available: bool,
    access_error: Option<ExtensionError>,
    address: Option<String>,
    network: Option<String>,
    latency: Duration,
}

/// Deterministic [`WalletExtension`] for tests. Every answer is scripted up
/// front and can be reshaped mid-test to simulate the user acting inside the
/// extension popup.
pub struct ScriptedExtension {
    script: Mutex<Script>,
    access_requests: AtomicUsize,
    network_queries: AtomicUsize,
}

impl ScriptedExtension {
    /// An installed extension with an approved session on `network`.
    pub fn installed(address: &str, network: &str) -> Self {
        Self {
            script: Mutex::new(Script {
                available: true,
                access_error: None,
                address: Some(address.to_owned()),
                network: Some(network.to_owned()),
                latency: Duration::ZERO,
            }),
            access_requests: AtomicUsize::new(0),
            network_queries: AtomicUsize::new(0),
        }
    }

    /// No extension installed at all.
    pub fn absent() -> Self {
        Self {
            script: Mutex::new(Script {
                available: false,
                access_error: None,
                address: None,
                network: None,
                latency: Duration::ZERO,
            }),
            access_requests: AtomicUsize::new(0),
            network_queries: AtomicUsize::new(0),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.lock().available = available;
    }

    /// Makes the next access requests fail with `error`; `None` restores
    /// approval.
    pub fn set_access_error(&self, error: Option<ExtensionError>) {
        self.lock().access_error = error;
    }

    pub fn set_address(&self, address: Option<&str>) {
        self.lock().address = address.map(str::to_owned);
    }

    /// The user revoked access inside the extension.
    pub fn clear_session(&self) {
        self.lock().address = None;
    }

    pub fn set_network(&self, network: Option<&str>) {
        self.lock().network = network.map(str::to_owned);
    }

    /// Injects a delay before every answer, for interleaving tests.
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = latency;
    }

    pub fn access_requests(&self) -> usize {
        self.access_requests.load(Ordering::SeqCst)
    }

    pub fn network_queries(&self) -> usize {
        self.network_queries.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn script(&self) -> Script {
        self.lock().clone()
    }

    async fn pause(&self, latency: Duration) {
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl WalletExtension for ScriptedExtension {
    async fn is_available(&self) -> bool {
        let script = self.script();
        self.pause(script.latency).await;
        script.available
    }

    async fn request_access(&self) -> Result<AccessGrant, ExtensionError> {
        self.access_requests.fetch_add(1, Ordering::SeqCst);
        let script = self.script();
        self.pause(script.latency).await;
        if !script.available {
            return Err(ExtensionError::NotInstalled);
        }
        if let Some(error) = script.access_error {
            return Err(error);
        }
        match script.address {
            Some(address) => Ok(AccessGrant { address }),
            None => Err(ExtensionError::Unresponsive("no account in extension".to_owned())),
        }
    }

    async fn address(&self) -> Result<Option<String>, ExtensionError> {
        let script = self.script();
        self.pause(script.latency).await;
        if !script.available {
            return Err(ExtensionError::NotInstalled);
        }
        Ok(script.address)
    }

    async fn network(&self) -> Result<Option<String>, ExtensionError> {
        self.network_queries.fetch_add(1, Ordering::SeqCst);
        let script = self.script();
        self.pause(script.latency).await;
        if !script.available {
            return Err(ExtensionError::NotInstalled);
        }
        Ok(script.network)
    }
}
