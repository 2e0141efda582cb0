use async_trait::async_trait;
use hw_api_types::NetworkId;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct NativeBalance {
    pub address: String,
    pub network: NetworkId,
    /// Decimal string straight from the ledger, never parsed into a float.
    pub amount: String,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("ledger transport: {0}")]
    Transport(String),
    #[error("ledger returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("malformed ledger response: {0}")]
    Malformed(String),
}

impl LedgerError {
    /// Transient transport failures are worth one more try; HTTP errors and
    /// garbage payloads are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Transport(_))
    }
}

#[async_trait]
pub trait BalanceSource: Send + Sync {
    async fn native_balance(
        &self,
        address: &str,
        network: NetworkId,
    ) -> Result<NativeBalance, LedgerError>;
}
