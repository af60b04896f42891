//! Flat entry points for game loops that prefer free functions.
//!
//! There is no global instance: `net_init` hands back the manager and every
//! other call takes it explicitly.

use crate::address::NetAddress;
use crate::config::NetConfig;
use crate::error::NetError;
use crate::manager::{Channel, NetManager, PacketHandler};

pub fn net_init<C>(config: NetConfig) -> Result<NetManager<C>, NetError> {
    NetManager::new(config)
}

/// Call once per tick.
pub fn net_process<C>(net: &mut NetManager<C>, ctx: &mut C) {
    net.process(ctx);
}

pub fn net_send<C>(net: &mut NetManager<C>, channel: Channel, address: &NetAddress, bytes: &[u8]) {
    net.send_packet(channel, address, bytes);
}

pub fn net_get_loopback_packet<C>(net: &mut NetManager<C>, channel: Channel) -> Option<Vec<u8>> {
    net.get_loopback_packet(channel)
}

pub fn net_set_callbacks<C>(net: &mut NetManager<C>, handler: impl PacketHandler<C> + 'static) {
    net.set_callbacks(handler);
}

/// Closes the socket and drops the handler along with anything still queued.
pub fn net_shutdown<C>(net: NetManager<C>) {
    drop(net);
}
