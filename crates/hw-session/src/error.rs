use hw_api_types::{ErrorDetail, ErrorKind, NetworkId};
use hw_extension::ExtensionError;
use hw_network::NetworkError;
use thiserror::Error;

/// Every way a session operation can fail, classified for consumers. The
/// message is what a UI would show; [`SessionError::kind`] is what it would
/// branch on.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("no wallet extension detected; install one and reload")]
    ExtensionNotFound,
    #[error("wallet access request was declined")]
    UserRejected,
    #[error("wallet extension is on {actual}, but {expected} was requested")]
    NetworkMismatch { expected: NetworkId, actual: String },
    #[error("please switch to {target} in your wallet extension, then retry (it currently reports {actual})")]
    ManualSwitchRequired { target: NetworkId, actual: String },
    #[error("balance lookup failed: {reason}")]
    BalanceUnavailable { reason: String },
    #[error("unknown network identifier: {0}")]
    UnknownNetwork(String),
    #[error("wallet extension did not respond: {0}")]
    ExtensionUnresponsive(String),
    #[error("superseded by a newer session operation")]
    Superseded,
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::ExtensionNotFound => ErrorKind::ExtensionNotFound,
            SessionError::UserRejected => ErrorKind::UserRejected,
            SessionError::NetworkMismatch { .. } => ErrorKind::NetworkMismatch,
            SessionError::ManualSwitchRequired { .. } => ErrorKind::ManualSwitchRequired,
            SessionError::BalanceUnavailable { .. } => ErrorKind::BalanceUnavailable,
            SessionError::UnknownNetwork(_) => ErrorKind::UnknownNetwork,
            SessionError::ExtensionUnresponsive(_) => ErrorKind::ExtensionUnresponsive,
            SessionError::Superseded => ErrorKind::Superseded,
        }
    }

    pub fn detail(&self) -> ErrorDetail {
        ErrorDetail {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

impl From<ExtensionError> for SessionError {
    fn from(err: ExtensionError) -> Self {
        match err {
            ExtensionError::NotInstalled => SessionError::ExtensionNotFound,
            ExtensionError::Rejected => SessionError::UserRejected,
            ExtensionError::Unresponsive(detail) => SessionError::ExtensionUnresponsive(detail),
        }
    }
}

impl From<NetworkError> for SessionError {
    fn from(err: NetworkError) -> Self {
        match err {
            NetworkError::UnknownNetwork(label) => SessionError::UnknownNetwork(label),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_failures_classify() {
        assert_eq!(
            SessionError::from(ExtensionError::NotInstalled).kind(),
            ErrorKind::ExtensionNotFound
        );
        assert_eq!(
            SessionError::from(ExtensionError::Rejected).kind(),
            ErrorKind::UserRejected
        );
        assert_eq!(
            SessionError::from(ExtensionError::Unresponsive("boom".to_owned())).kind(),
            ErrorKind::ExtensionUnresponsive
        );
    }

    #[test]
    fn manual_switch_message_names_the_target() {
        let err = SessionError::ManualSwitchRequired {
            target: NetworkId::Mainnet,
            actual: "TESTNET".to_owned(),
        };
        let message = err.to_string();
        assert!(message.contains("switch to mainnet"));
        assert!(message.contains("TESTNET"));
    }

    #[test]
    fn detail_carries_kind_and_message() {
        let detail = SessionError::UserRejected.detail();
        assert_eq!(detail.kind, ErrorKind::UserRejected);
        assert_eq!(detail.message, "wallet access request was declined");
    }
}
