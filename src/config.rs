use std::net::SocketAddr;

use crate::error::{DictatorError, Result};

/// Default UDP port shared by every node of a cluster.
pub const DEFAULT_PORT: u16 = 43001;

/// Timing of the election and leader loops.
///
/// Every range is half-open: a draw from `[min, max)`. When `min == max`
/// the draw is exactly `min`.
#[derive(Debug, Clone)]
pub struct ElectionConfig {
    /// Lower bound of the randomized window a node waits for a heartbeat
    /// before it declares itself leader.
    pub election_timeout_min_ms: u64,
    pub election_timeout_max_ms: u64,
    /// Bounds of the heartbeat period drawn once per tenure.
    pub heartbeat_interval_min_ms: u64,
    pub heartbeat_interval_max_ms: u64,
    /// Capacity of the per-tenure command response channel.
    pub response_buffer: usize,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            election_timeout_min_ms: 500,
            election_timeout_max_ms: 1500,
            heartbeat_interval_min_ms: 100,
            heartbeat_interval_max_ms: 150,
            response_buffer: 16,
        }
    }
}

impl ElectionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.election_timeout_min_ms > self.election_timeout_max_ms {
            return Err(DictatorError::Config(format!(
                "election timeout min {}ms exceeds max {}ms",
                self.election_timeout_min_ms, self.election_timeout_max_ms
            )));
        }
        if self.heartbeat_interval_min_ms > self.heartbeat_interval_max_ms {
            return Err(DictatorError::Config(format!(
                "heartbeat interval min {}ms exceeds max {}ms",
                self.heartbeat_interval_min_ms, self.heartbeat_interval_max_ms
            )));
        }
        if self.heartbeat_interval_min_ms == 0 {
            return Err(DictatorError::Config(
                "heartbeat interval must be positive".to_string(),
            ));
        }
        if self.heartbeat_interval_max_ms >= self.election_timeout_min_ms {
            tracing::warn!(
                heartbeat_interval_max_ms = self.heartbeat_interval_max_ms,
                election_timeout_min_ms = self.election_timeout_min_ms,
                "Heartbeat period may exceed the election window, expect leadership flapping"
            );
        }
        if self.response_buffer == 0 {
            return Err(DictatorError::Config(
                "response buffer must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub listen_addr: SocketAddr,
    /// Destination of every outbound packet without an explicit address.
    pub broadcast_addr: SocketAddr,
    /// Datagrams longer than this are truncated and fail to decode.
    pub max_packet_size: usize,
    /// Capacity of the inbound and outbound packet channels.
    pub channel_capacity: usize,
    pub election: ElectionConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            broadcast_addr: SocketAddr::from(([255, 255, 255, 255], DEFAULT_PORT)),
            max_packet_size: 8192,
            channel_capacity: 64,
            election: ElectionConfig::default(),
        }
    }
}

impl NodeConfig {
    pub fn new(listen_addr: SocketAddr, broadcast_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            broadcast_addr,
            ..Default::default()
        }
    }

    pub fn with_election(mut self, election: ElectionConfig) -> Self {
        self.election = election;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_packet_size == 0 {
            return Err(DictatorError::Config(
                "max packet size must be positive".to_string(),
            ));
        }
        if self.channel_capacity == 0 {
            return Err(DictatorError::Config(
                "channel capacity must be positive".to_string(),
            ));
        }
        self.election.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn election_config_default() {
        let cfg = ElectionConfig::default();
        assert_eq!(cfg.election_timeout_min_ms, 500);
        assert_eq!(cfg.election_timeout_max_ms, 1500);
        assert_eq!(cfg.heartbeat_interval_min_ms, 100);
        assert_eq!(cfg.heartbeat_interval_max_ms, 150);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn node_config_default() {
        let cfg = NodeConfig::default();
        assert_eq!(cfg.listen_addr.to_string(), "0.0.0.0:43001");
        assert_eq!(cfg.broadcast_addr.to_string(), "255.255.255.255:43001");
        assert_eq!(cfg.max_packet_size, 8192);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn node_config_new() {
        let listen: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let target: SocketAddr = "127.0.0.1:9001".parse().unwrap();
        let cfg = NodeConfig::new(listen, target);
        assert_eq!(cfg.listen_addr, listen);
        assert_eq!(cfg.broadcast_addr, target);
        assert_eq!(cfg.channel_capacity, 64);
    }

    #[test]
    fn inverted_ranges_are_rejected() {
        let cfg = ElectionConfig {
            election_timeout_min_ms: 200,
            election_timeout_max_ms: 100,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(DictatorError::Config(_))));

        let cfg = ElectionConfig {
            heartbeat_interval_min_ms: 90,
            heartbeat_interval_max_ms: 80,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(DictatorError::Config(_))));
    }

    #[test]
    fn degenerate_range_is_accepted() {
        let cfg = ElectionConfig {
            election_timeout_min_ms: 300,
            election_timeout_max_ms: 300,
            ..Default::default()
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn zero_sizes_are_rejected() {
        let cfg = NodeConfig {
            max_packet_size: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = NodeConfig::default().with_election(ElectionConfig {
            response_buffer: 0,
            ..Default::default()
        });
        assert!(cfg.validate().is_err());
    }
}
