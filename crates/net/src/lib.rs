//! Bit-packed message codec and UDP transport for client/server game state.
//!
//! [`NetMessage`] builds and parses payloads, [`NetAddress`] names endpoints,
//! and [`NetManager`] moves payloads over a non-blocking UDP socket or the
//! in-process loopback queues.

pub mod address;
pub mod clock;
pub mod config;
pub mod error;
pub mod facade;
pub mod manager;
pub mod message;
pub mod stats;

pub use address::{AddressFamily, AddressKind, DEFAULT_PORT, NetAddress};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::NetConfig;
pub use error::NetError;
pub use facade::{
    net_get_loopback_packet, net_init, net_process, net_send, net_set_callbacks, net_shutdown,
};
pub use manager::{Channel, NetManager, NetPacket, PacketHandler};
pub use message::{DEFAULT_MESSAGE_BITS, INTEGER_BITS, MAX_STRING_LENGTH, NetMessage};
pub use stats::NetworkStats;
