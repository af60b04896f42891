use std::net::{IpAddr, Ipv4Addr};

use serde::{Deserialize, Serialize};

use crate::address::DEFAULT_PORT;
use crate::error::NetError;

/// Largest UDP payload an IPv4 datagram can carry.
pub const MAX_UDP_PAYLOAD: usize = 65_507;
pub const DEFAULT_DATAGRAM_SIZE: usize = MAX_UDP_PAYLOAD;
pub const DEFAULT_PORT_ATTEMPTS: u16 = 64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetConfig {
    pub bind_ip: IpAddr,
    /// First port tried; each "address in use" moves on to the next one.
    pub base_port: u16,
    pub max_port_attempts: u16,
    /// Artificial delay applied to every outgoing and incoming datagram.
    pub forced_latency_ms: u32,
    /// Largest payload sent or accepted. Bigger outgoing payloads are refused
    /// and bigger incoming datagrams are dropped, never truncated.
    pub max_datagram_size: usize,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            base_port: DEFAULT_PORT,
            max_port_attempts: DEFAULT_PORT_ATTEMPTS,
            forced_latency_ms: 0,
            max_datagram_size: DEFAULT_DATAGRAM_SIZE,
        }
    }
}

impl NetConfig {
    pub fn validate(&self) -> Result<(), NetError> {
        if self.max_datagram_size == 0 || self.max_datagram_size > MAX_UDP_PAYLOAD {
            return Err(NetError::InvalidConfig(format!(
                "max_datagram_size must be between 1 and {}",
                MAX_UDP_PAYLOAD
            )));
        }
        if self.max_port_attempts == 0 {
            return Err(NetError::InvalidConfig(
                "max_port_attempts must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = NetConfig::default();
        assert_eq!(config.base_port, 48960);
        assert_eq!(config.forced_latency_ms, 0);
        assert_eq!(config.max_datagram_size, MAX_UDP_PAYLOAD);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_out_of_range_sizes() {
        let config = NetConfig {
            max_datagram_size: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(NetError::InvalidConfig(_))));

        let config = NetConfig {
            max_datagram_size: MAX_UDP_PAYLOAD + 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = NetConfig {
            max_port_attempts: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
