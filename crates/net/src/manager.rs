use std::any::Any;
use std::collections::VecDeque;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::panic::{self, AssertUnwindSafe};

use crate::address::NetAddress;
use crate::clock::{Clock, SystemClock};
use crate::config::NetConfig;
use crate::error::NetError;
use crate::message::NetMessage;
use crate::stats::NetworkStats;

/// Direction of a packet, used to pick the in-process loopback queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    ClientToServer,
    ServerToClient,
}

#[derive(Debug, Clone)]
pub struct NetPacket {
    pub address: NetAddress,
    pub payload: Vec<u8>,
    pub timestamp_us: u64,
}

impl NetPacket {
    fn is_due(&self, now_us: u64, latency_us: u64) -> bool {
        now_us.saturating_sub(self.timestamp_us) >= latency_us
    }
}

/// Receiver of inbound packets.
///
/// The handler gets the manager back while it runs, so it can reply with
/// [`NetManager::send_packet`]. Errors and panics are logged by the manager
/// and never stop the processing loop.
pub trait PacketHandler<C> {
    fn on_packet(
        &mut self,
        net: &mut NetManager<C>,
        ctx: &mut C,
        from: &NetAddress,
        message: &mut NetMessage<'static>,
    ) -> anyhow::Result<()>;
}

impl<C, F> PacketHandler<C> for F
where
    F: FnMut(
        &mut NetManager<C>,
        &mut C,
        &NetAddress,
        &mut NetMessage<'static>,
    ) -> anyhow::Result<()>,
{
    fn on_packet(
        &mut self,
        net: &mut NetManager<C>,
        ctx: &mut C,
        from: &NetAddress,
        message: &mut NetMessage<'static>,
    ) -> anyhow::Result<()> {
        self(net, ctx, from, message)
    }
}

/// Owns the UDP socket and the four packet queues.
///
/// `C` is the caller's context type, handed through [`process`] to the
/// installed [`PacketHandler`].
///
/// [`process`]: NetManager::process
pub struct NetManager<C = ()> {
    socket: UdpSocket,
    local_addr: SocketAddr,
    forced_latency_ms: u32,
    clock: Box<dyn Clock>,
    handler: Option<Box<dyn PacketHandler<C>>>,
    /// Bumped by every `set_callbacks`/`clear_callbacks`.
    handler_generation: u64,
    send_queue: VecDeque<NetPacket>,
    receive_queue: VecDeque<NetPacket>,
    client_loop_queue: VecDeque<Vec<u8>>,
    server_loop_queue: VecDeque<Vec<u8>>,
    max_datagram_size: usize,
    /// One byte longer than `max_datagram_size`, so truncation is visible.
    recv_buffer: Vec<u8>,
    stats: NetworkStats,
}

impl<C> NetManager<C> {
    pub fn new(config: NetConfig) -> Result<Self, NetError> {
        Self::with_clock(config, SystemClock::new())
    }

    pub fn with_clock(config: NetConfig, clock: impl Clock + 'static) -> Result<Self, NetError> {
        config.validate()?;

        let socket = bind_first_free(&config)?;
        socket.set_nonblocking(true)?;
        let local_addr = socket.local_addr()?;

        log::info!("UDP socket bound to {}", local_addr);

        Ok(Self {
            socket,
            local_addr,
            forced_latency_ms: config.forced_latency_ms,
            clock: Box::new(clock),
            handler: None,
            handler_generation: 0,
            send_queue: VecDeque::new(),
            receive_queue: VecDeque::new(),
            client_loop_queue: VecDeque::new(),
            server_loop_queue: VecDeque::new(),
            max_datagram_size: config.max_datagram_size,
            recv_buffer: vec![0u8; config.max_datagram_size + 1],
            stats: NetworkStats::default(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn stats(&self) -> &NetworkStats {
        &self.stats
    }

    pub fn forced_latency(&self) -> u32 {
        self.forced_latency_ms
    }

    /// Packets already queued keep their timestamps and are released against
    /// the new latency on the next `process`.
    pub fn set_forced_latency(&mut self, latency_ms: u32) {
        self.forced_latency_ms = latency_ms;
    }

    pub fn set_callbacks(&mut self, handler: impl PacketHandler<C> + 'static) {
        self.handler = Some(Box::new(handler));
        self.handler_generation += 1;
    }

    pub fn clear_callbacks(&mut self) {
        self.handler = None;
        self.handler_generation += 1;
    }

    pub fn pending_send(&self) -> usize {
        self.send_queue.len()
    }

    pub fn pending_receive(&self) -> usize {
        self.receive_queue.len()
    }

    pub fn pending_loopback(&self, channel: Channel) -> usize {
        match channel {
            Channel::ClientToServer => self.server_loop_queue.len(),
            Channel::ServerToClient => self.client_loop_queue.len(),
        }
    }

    /// Pumps the socket, then releases every queued packet whose forced
    /// latency has elapsed.
    ///
    /// Never blocks and never fails: socket errors are logged and counted.
    pub fn process(&mut self, ctx: &mut C) {
        self.drain_socket(ctx);
        self.release_queues(ctx);
    }

    /// Hands one payload to the installed handler.
    pub fn process_packet(&mut self, ctx: &mut C, from: NetAddress, payload: Vec<u8>) {
        let Some(mut handler) = self.handler.take() else {
            log::debug!(
                "Dropping {} byte packet from {}: no handler installed",
                payload.len(),
                from
            );
            return;
        };

        let generation = self.handler_generation;
        let mut message = NetMessage::from_vec(payload);
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            handler.on_packet(self, ctx, &from, &mut message)
        }));

        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.stats.handler_errors += 1;
                log::warn!("Packet handler failed on packet from {}: {:#}", from, e);
            }
            Err(payload) => {
                self.stats.handler_errors += 1;
                log::error!(
                    "Packet handler panicked on packet from {}: {}",
                    from,
                    panic_message(payload.as_ref())
                );
            }
        }

        // A handler that set or cleared the callbacks while running stays out.
        if self.handler_generation == generation {
            self.handler = Some(handler);
        }
    }

    /// Sends `payload` to `address`.
    ///
    /// Loopback payloads go to the in-process queue for `channel`. Anything
    /// else is held in the send queue while a forced latency is set, or sent
    /// straight away. Delivery is best effort.
    pub fn send_packet(&mut self, channel: Channel, address: &NetAddress, payload: &[u8]) {
        if address.is_loopback() {
            self.loop_queue(channel).push_back(payload.to_vec());
            self.stats.loopback_queued += 1;
        } else if self.forced_latency_ms > 0 {
            self.send_queue.push_back(NetPacket {
                address: *address,
                payload: payload.to_vec(),
                timestamp_us: self.clock.now_micros(),
            });
        } else {
            self.transmit(address, payload);
        }
    }

    pub fn get_loopback_packet(&mut self, channel: Channel) -> Option<Vec<u8>> {
        self.loop_queue(channel).pop_front()
    }

    fn loop_queue(&mut self, channel: Channel) -> &mut VecDeque<Vec<u8>> {
        match channel {
            Channel::ClientToServer => &mut self.server_loop_queue,
            Channel::ServerToClient => &mut self.client_loop_queue,
        }
    }

    fn drain_socket(&mut self, ctx: &mut C) {
        loop {
            match self.socket.recv_from(&mut self.recv_buffer) {
                Ok((size, from)) if size > self.max_datagram_size => {
                    self.stats.receive_errors += 1;
                    log::warn!(
                        "Dropping datagram from {}: larger than {} bytes",
                        from,
                        self.max_datagram_size
                    );
                }
                Ok((size, from)) => {
                    self.stats.record_received(size);
                    log::trace!("Received {} bytes from {}", size, from);

                    let packet = NetPacket {
                        address: NetAddress::from(from),
                        payload: self.recv_buffer[..size].to_vec(),
                        timestamp_us: self.clock.now_micros(),
                    };

                    if self.forced_latency_ms == 0 {
                        self.process_packet(ctx, packet.address, packet.payload);
                    } else {
                        self.receive_queue.push_back(packet);
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                // ICMP port unreachable from an earlier send surfaces here on
                // some platforms; the socket itself is still fine.
                Err(ref e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::ConnectionReset | io::ErrorKind::Interrupted
                    ) =>
                {
                    self.stats.receive_errors += 1;
                    log::debug!("Ignoring receive error: {}", e);
                }
                Err(e) => {
                    self.stats.receive_errors += 1;
                    log::warn!("Receive failed: {}", e);
                    break;
                }
            }
        }
    }

    fn release_queues(&mut self, ctx: &mut C) {
        let now = self.clock.now_micros();
        let latency_us = u64::from(self.forced_latency_ms) * 1000;

        while self
            .send_queue
            .front()
            .is_some_and(|p| p.is_due(now, latency_us))
        {
            if let Some(packet) = self.send_queue.pop_front() {
                self.transmit(&packet.address, &packet.payload);
            }
        }

        while self
            .receive_queue
            .front()
            .is_some_and(|p| p.is_due(now, latency_us))
        {
            if let Some(packet) = self.receive_queue.pop_front() {
                self.process_packet(ctx, packet.address, packet.payload);
            }
        }
    }

    fn transmit(&mut self, address: &NetAddress, payload: &[u8]) {
        if payload.len() > self.max_datagram_size {
            self.stats.send_errors += 1;
            log::warn!(
                "Refusing to send {} bytes to {}: limit is {}",
                payload.len(),
                address,
                self.max_datagram_size
            );
            return;
        }

        let target = match address.to_socket_addr() {
            Ok(target) => target,
            Err(e) => {
                self.stats.send_errors += 1;
                log::warn!("Cannot send {} bytes to {}: {}", payload.len(), address, e);
                return;
            }
        };

        match self.socket.send_to(payload, target) {
            Ok(bytes) => {
                self.stats.record_sent(bytes);
                log::trace!("Sent {} bytes to {}", bytes, target);
            }
            Err(e) => {
                self.stats.send_errors += 1;
                log::warn!("Send to {} failed: {}", target, e);
            }
        }
    }
}

impl<C> Drop for NetManager<C> {
    fn drop(&mut self) {
        let discarded = self.send_queue.len()
            + self.receive_queue.len()
            + self.client_loop_queue.len()
            + self.server_loop_queue.len();
        log::info!(
            "Closing UDP socket on {} ({} queued packets discarded)",
            self.local_addr,
            discarded
        );
    }
}

fn bind_first_free(config: &NetConfig) -> Result<UdpSocket, NetError> {
    for offset in 0..config.max_port_attempts {
        let Some(port) = config.base_port.checked_add(offset) else {
            break;
        };

        match UdpSocket::bind(SocketAddr::new(config.bind_ip, port)) {
            Ok(socket) => {
                if offset > 0 {
                    log::info!(
                        "Port {} in use, bound to {} instead",
                        config.base_port,
                        port
                    );
                }
                return Ok(socket);
            }
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                log::debug!("Port {} in use, trying {}", port, port.wrapping_add(1));
            }
            Err(source) => return Err(NetError::Bind { port, source }),
        }
    }

    Err(NetError::PortsExhausted {
        base: config.base_port,
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}
