use crate::session::SessionTimings;
use shared::DEFAULT_PORT;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: IpAddr,
    /// 0 picks a free port
    pub port: u16,
    pub timings: SessionTimings,
    /// Outbound messages buffered per connection before new ones are dropped.
    /// Values below 1 are treated as 1.
    pub send_queue: usize,
    /// Pending events buffered in front of the dispatcher, at least 1
    pub event_queue: usize,
}

impl ServerConfig {
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            timings: SessionTimings::default(),
            send_queue: 64,
            event_queue: 1024,
        }
    }
}
