use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::debug;

use crate::contexts::PortProbe;

/// One bounded TCP connect per attempt
pub struct TcpPortProbe {
    connect_timeout: Duration,
}

impl TcpPortProbe {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl PortProbe for TcpPortProbe {
    fn is_open(&mut self, host: &str, port: u16) -> bool {
        let addrs = match (host, port).to_socket_addrs() {
            Ok(addrs) => addrs,
            Err(e) => {
                debug!("Cannot resolve {}:{}: {}", host, port, e);
                return false;
            }
        };
        addrs
            .into_iter()
            .any(|addr| TcpStream::connect_timeout(&addr, self.connect_timeout).is_ok())
    }
}
