//! Wallet-session coordination for the heritage-asset marketplace.
//!
//! [`SessionCoordinator`] owns the connection lifecycle against a browser
//! wallet extension and publishes a single [`hw_api_types::ConnectionSnapshot`]
//! read model that every surface renders from.

mod coordinator;
mod error;

pub use coordinator::{SessionConfig, SessionCoordinator};
pub use error::SessionError;
