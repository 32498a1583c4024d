//! API shared state

use std::sync::Arc;

use crate::actors::hub::HubHandle;

use super::identity::IdentityResolver;

/// Shared state passed to all API handlers
#[derive(Clone)]
pub struct ApiState {
    /// Handle to the notification hub
    pub hub: HubHandle,

    /// Token verification for websocket handshakes
    pub identity: Arc<IdentityResolver>,
}

impl ApiState {
    pub fn new(hub: HubHandle, identity: IdentityResolver) -> Self {
        Self {
            hub,
            identity: Arc::new(identity),
        }
    }
}
