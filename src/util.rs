use std::net::SocketAddr;

const HUB_BIND_ADDR: &str = "HUB_BIND_ADDR";

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";

pub fn get_default_bind_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// Bind address from `HUB_BIND_ADDR`, if set and parseable
pub fn get_bind_addr() -> Option<SocketAddr> {
    let addr_from_env = std::env::var(HUB_BIND_ADDR).ok()?;
    match addr_from_env.parse() {
        Ok(addr) => Some(addr),
        Err(e) => {
            tracing::warn!(
                "ignoring invalid {HUB_BIND_ADDR}={addr_from_env} ({e}), default is {DEFAULT_BIND_ADDR}"
            );
            None
        }
    }
}

const HUB_JWT_SECRET: &str = "HUB_JWT_SECRET";

pub fn get_jwt_secret() -> Option<String> {
    std::env::var(HUB_JWT_SECRET)
        .ok()
        .filter(|secret| !secret.is_empty())
}
