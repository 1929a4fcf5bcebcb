//! Link configuration.
//!
//! Defaults match the host's stock export setup: multicast group
//! 239.255.50.10 on port 5010 for the outbound stream, port 7778 for
//! commands back to the host, and port 7790 for the call protocol.

use std::net::Ipv4Addr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level configuration for a link session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Directory holding the JSON schema documents. `None` means probe the
    /// host's default locations at startup.
    #[serde(default)]
    pub schema_dir: Option<PathBuf>,
    #[serde(default)]
    pub network: NetworkConfig,
}

/// Addresses and ports for the export stream and the call protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Host running the simulator.
    pub server_ip: Ipv4Addr,
    /// Multicast group the export stream is published on.
    pub multicast_group: Ipv4Addr,
    /// Local interface to bind receive sockets on.
    pub bind_addr: Ipv4Addr,
    /// Port the export stream arrives on.
    pub receive_port: u16,
    /// Port the host listens on for commands.
    pub send_port: u16,
    /// TCP port of the call protocol server.
    pub call_port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            server_ip: Ipv4Addr::new(127, 0, 0, 1),
            multicast_group: Ipv4Addr::new(239, 255, 50, 10),
            bind_addr: Ipv4Addr::UNSPECIFIED,
            receive_port: 5010,
            send_port: 7778,
            call_port: 7790,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_network_config() {
        let net = NetworkConfig::default();
        assert_eq!(net.server_ip, Ipv4Addr::new(127, 0, 0, 1));
        assert_eq!(net.multicast_group, Ipv4Addr::new(239, 255, 50, 10));
        assert_eq!(net.bind_addr, Ipv4Addr::UNSPECIFIED);
        assert_eq!(net.receive_port, 5010);
        assert_eq!(net.send_port, 7778);
        assert_eq!(net.call_port, 7790);
    }

    #[test]
    fn test_default_schema_dir_unset() {
        let cfg = LinkConfig::default();
        assert!(cfg.schema_dir.is_none());
    }

    #[test]
    fn test_config_roundtrips_through_json() {
        let cfg = LinkConfig {
            schema_dir: Some(PathBuf::from("/tmp/json")),
            network: NetworkConfig {
                server_ip: Ipv4Addr::new(192, 168, 1, 10),
                ..NetworkConfig::default()
            },
        };
        let text = serde_json::to_string(&cfg).unwrap();
        let back: LinkConfig = serde_json::from_str(&text).unwrap();
        assert_eq!(back.schema_dir, cfg.schema_dir);
        assert_eq!(back.network.server_ip, cfg.network.server_ip);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let cfg: LinkConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.network.receive_port, 5010);
    }
}
