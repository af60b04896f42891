use std::io;

use crate::address::AddressKind;

#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("failed to bind UDP socket on port {port}: {source}")]
    Bind { port: u16, source: io::Error },
    #[error("no free UDP port found starting at {base}")]
    PortsExhausted { base: u16 },
    #[error("socket error: {0}")]
    Socket(#[from] io::Error),
    #[error("{0:?} address has no socket representation")]
    NoSocketAddress(AddressKind),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("read of {requested} bits past end of message ({remaining} bits left)")]
    ReadOverrun { requested: usize, remaining: usize },
}
