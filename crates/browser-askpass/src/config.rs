//! Broker configuration.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::ServiceError;

/// Credential broker settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Address to listen on. Must be loopback; port 0 picks a free port.
    pub listen_address: SocketAddr,

    /// How long a request may wait for its credential, in seconds.
    pub timeout_seconds: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            listen_address: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
            timeout_seconds: 10,
        }
    }
}

impl BrokerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Reject addresses reachable from other hosts.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::NotLoopback` for any non-loopback address.
    pub fn validate(&self) -> Result<(), ServiceError> {
        if !self.listen_address.ip().is_loopback() {
            return Err(ServiceError::NotLoopback {
                address: self.listen_address.to_string(),
            });
        }
        Ok(())
    }
}
