use std::net::SocketAddr;
use std::time::{Duration, Instant};

use gamenet::{Channel, NetAddress, NetError, NetManager, NetMessage, NetworkStats, PacketHandler};

use crate::config::ToolConfig;
use crate::probe::Probe;

#[derive(Debug, Default)]
pub struct EchoState {
    pub echoed: u64,
}

struct EchoHandler;

impl PacketHandler<EchoState> for EchoHandler {
    fn on_packet(
        &mut self,
        net: &mut NetManager<EchoState>,
        state: &mut EchoState,
        from: &NetAddress,
        message: &mut NetMessage<'static>,
    ) -> anyhow::Result<()> {
        let mut probe = Probe::decode(message)?;
        log::debug!("Probe {} '{}' from {}", probe.sequence, probe.label, from);

        probe.reply = true;
        net.send_packet(Channel::ServerToClient, from, &probe.encode());
        state.echoed += 1;
        Ok(())
    }
}

pub struct EchoServer {
    net: NetManager<EchoState>,
    state: EchoState,
    tick: u64,
    tick_duration: Duration,
    last_tick_time: Instant,
    accumulator: Duration,
    stats_interval_ticks: u64,
}

impl EchoServer {
    pub fn new(config: &ToolConfig) -> Result<Self, NetError> {
        let mut net = NetManager::new(config.net.clone())?;
        net.set_callbacks(EchoHandler);

        Ok(Self {
            net,
            state: EchoState::default(),
            tick: 0,
            tick_duration: Duration::from_secs_f64(1.0 / config.tick_rate.max(1) as f64),
            last_tick_time: Instant::now(),
            accumulator: Duration::ZERO,
            stats_interval_ticks: config.stats_interval_ticks,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.net.local_addr()
    }

    pub fn stats(&self) -> &NetworkStats {
        self.net.stats()
    }

    pub fn echoed(&self) -> u64 {
        self.state.echoed
    }

    /// Runs until `max_ticks` ticks have elapsed, or forever without a limit.
    pub fn run(&mut self, max_ticks: Option<u64>) {
        while !max_ticks.is_some_and(|max| self.tick >= max) {
            self.tick_once();
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    pub fn tick_once(&mut self) {
        let now = Instant::now();
        self.accumulator += now - self.last_tick_time;
        self.last_tick_time = now;

        while self.accumulator >= self.tick_duration {
            self.accumulator -= self.tick_duration;
            self.tick();
        }
    }

    fn tick(&mut self) {
        self.net.process(&mut self.state);
        self.tick += 1;

        if self.stats_interval_ticks > 0 && self.tick % self.stats_interval_ticks == 0 {
            let stats = self.net.stats();
            log::info!(
                "tick {}: {} received, {} sent, {} echoed, {} rejected",
                self.tick,
                stats.packets_received,
                stats.packets_sent,
                self.state.echoed,
                stats.handler_errors
            );
        }
    }
}
