use crate::DEFAULT_ADDR;
use std::net::SocketAddr;
use std::time::Duration;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address
    pub addr: SocketAddr,

    /// Longest time the event loop sleeps in `poll` before it re-checks
    /// every connection and the shutdown flag
    pub poll_timeout: Duration,

    /// Connections accepted beyond this many are closed immediately
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.parse().unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 1234))),
            poll_timeout: Duration::from_millis(1000),
            max_connections: 10_000,
        }
    }
}

impl ServerConfig {
    /// Same defaults, different listen address.
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            addr,
            ..Default::default()
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.poll_timeout.is_zero() {
            anyhow::bail!("poll_timeout must be > 0");
        }

        if self.max_connections == 0 {
            anyhow::bail!("max_connections must be > 0");
        }

        Ok(())
    }
}
