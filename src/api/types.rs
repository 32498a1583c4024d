//! API request and response types

use serde::{Deserialize, Serialize};

/// GET /api/v1/health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub clients: usize,
}

/// GET /api/v1/clients query parameters
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientsQuery {
    pub topic: Option<String>,
}

/// GET /api/v1/clients response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientCountResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    pub count: usize,
}

/// GET /api/v1/stream query parameters
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamParams {
    /// Identity token, for browsers that cannot set headers on websocket requests
    pub token: Option<String>,
}
