//! Error types surfaced by the hub to its callers

use thiserror::Error;

use crate::actors::client::ClientId;

/// Result type alias for hub operations
pub type HubResult<T> = Result<T, HubError>;

/// Errors returned by [`HubHandle`](crate::actors::hub::HubHandle) operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HubError {
    /// The hub has been shut down and no longer accepts commands
    #[error("notification hub is shut down")]
    ShutDown,

    /// A client with the same connection id is already registered
    #[error("client {0} is already registered")]
    AlreadyRegistered(ClientId),

    /// The client was closed before it could be admitted
    #[error("client {0} was closed before registration")]
    ClientClosed(ClientId),
}
