//! CSMS runtime configuration

use std::net::SocketAddr;
use std::time::Duration;

/// Settings for the central system
#[derive(Debug, Clone)]
pub struct CsmsConfig {
    /// WebSocket listener for charge-point connections
    pub ws_addr: SocketAddr,

    /// HTTP listener for the REST control plane
    pub http_addr: SocketAddr,

    /// Heartbeat interval handed to charge points in BootNotification replies
    pub boot_interval_secs: i32,

    /// How long to wait for a charge point to answer an outbound call
    pub request_timeout: Duration,

    /// Validity window stamped on outbound reservations
    pub reservation_validity: Duration,
}

impl Default for CsmsConfig {
    fn default() -> Self {
        Self {
            ws_addr: ([0, 0, 0, 0], 9000).into(),
            http_addr: ([0, 0, 0, 0], 8080).into(),
            boot_interval_secs: 10,
            request_timeout: Duration::from_secs(30),
            reservation_validity: Duration::from_secs(15 * 60),
        }
    }
}

impl CsmsConfig {
    /// Set the WebSocket bind address
    pub fn with_ws_addr(mut self, addr: SocketAddr) -> Self {
        self.ws_addr = addr;
        self
    }

    /// Set the REST bind address
    pub fn with_http_addr(mut self, addr: SocketAddr) -> Self {
        self.http_addr = addr;
        self
    }

    /// Set the outbound request timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the reservation validity window
    pub fn with_reservation_validity(mut self, validity: Duration) -> Self {
        self.reservation_validity = validity;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_builder() {
        let config = CsmsConfig::default()
            .with_ws_addr("127.0.0.1:9001".parse().unwrap())
            .with_request_timeout(Duration::from_secs(5));

        assert_eq!(config.ws_addr.port(), 9001);
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.boot_interval_secs, 10);
        assert_eq!(config.reservation_validity, Duration::from_secs(900));
    }
}
