use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};

use gamenet::{AddressFamily, Channel, NetAddress, NetManager, NetMessage};

use crate::config::ToolConfig;

const PROBE_MAGIC: u32 = 0x4E50;
const MAGIC_BITS: usize = 16;
const REPLY_WAIT: Duration = Duration::from_secs(1);

/// Probe payload exchanged between the probe client and the echo server.
#[derive(Debug, Clone, PartialEq)]
pub struct Probe {
    pub sequence: u32,
    pub sent_ms: u32,
    pub reply: bool,
    pub label: String,
}

impl Probe {
    pub fn encode(&self) -> Vec<u8> {
        let mut msg = NetMessage::new();
        msg.write_integer(PROBE_MAGIC, MAGIC_BITS);
        msg.write_integer(self.sequence, 32);
        msg.write_integer(self.sent_ms, 32);
        msg.write_bool(self.reply);
        msg.write_string(&self.label);
        msg.buffer().to_vec()
    }

    pub fn decode(msg: &mut NetMessage<'_>) -> Result<Self> {
        let magic = msg.try_read_integer(MAGIC_BITS)?;
        if magic != PROBE_MAGIC {
            bail!("bad probe magic {:#06x}", magic);
        }

        let probe = Probe {
            sequence: msg.read_integer(32),
            sent_ms: msg.read_integer(32),
            reply: msg.read_bool(),
            label: msg.read_string(),
        };

        if msg.overrun() {
            bail!("truncated probe {}", probe.sequence);
        }
        Ok(probe)
    }
}

#[derive(Debug)]
struct ProbeState {
    start: Instant,
    rtts_ms: Vec<u32>,
}

impl ProbeState {
    fn now_ms(&self) -> u32 {
        self.start.elapsed().as_millis() as u32
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProbeReport {
    pub sent: u32,
    pub received: usize,
    pub min_ms: Option<u32>,
    pub max_ms: Option<u32>,
    pub avg_ms: Option<f32>,
}

impl ProbeReport {
    fn from_rtts(sent: u32, rtts_ms: &[u32]) -> Self {
        let avg_ms = (!rtts_ms.is_empty())
            .then(|| rtts_ms.iter().sum::<u32>() as f32 / rtts_ms.len() as f32);
        Self {
            sent,
            received: rtts_ms.len(),
            min_ms: rtts_ms.iter().copied().min(),
            max_ms: rtts_ms.iter().copied().max(),
            avg_ms,
        }
    }
}

pub fn run_probe(
    config: &ToolConfig,
    target: &str,
    family: AddressFamily,
    count: u32,
    interval: Duration,
) -> Result<ProbeReport> {
    let server = NetAddress::resolve(target, family);
    if !server.is_valid() {
        bail!("could not resolve '{}'", target);
    }
    if server.is_loopback() {
        bail!("'{}' is the in-process loopback; use the loopback command", target);
    }

    let mut net: NetManager<ProbeState> =
        NetManager::new(config.net.clone()).context("opening probe socket")?;
    net.set_callbacks(
        |_: &mut NetManager<ProbeState>,
         state: &mut ProbeState,
         from: &NetAddress,
         message: &mut NetMessage<'static>|
         -> anyhow::Result<()> {
            let probe = Probe::decode(message)?;
            if !probe.reply {
                bail!("unexpected request from {}", from);
            }
            let rtt = state.now_ms().saturating_sub(probe.sent_ms);
            log::info!("Reply {} from {}: {} ms", probe.sequence, from, rtt);
            state.rtts_ms.push(rtt);
            Ok(())
        },
    );

    log::info!("Probing {} from {}", server, net.local_addr());

    let tick = Duration::from_secs_f64(1.0 / config.tick_rate.max(1) as f64);
    let mut state = ProbeState {
        start: Instant::now(),
        rtts_ms: Vec::new(),
    };
    let mut sent = 0;
    let mut next_send = Instant::now();
    let mut last_send = Instant::now();

    loop {
        let now = Instant::now();
        if sent < count && now >= next_send {
            let probe = Probe {
                sequence: sent,
                sent_ms: state.now_ms(),
                reply: false,
                label: format!("probe-{}", sent),
            };
            net.send_packet(Channel::ClientToServer, &server, &probe.encode());
            sent += 1;
            next_send = now + interval;
            last_send = now;
        }

        net.process(&mut state);

        let all_back = state.rtts_ms.len() >= count as usize;
        let waited_out = sent == count && last_send.elapsed() >= REPLY_WAIT;
        if all_back || waited_out {
            break;
        }
        thread::sleep(tick);
    }

    Ok(ProbeReport::from_rtts(sent, &state.rtts_ms))
}

/// Runs requests and replies through the in-process queues only.
pub fn run_loopback(config: &ToolConfig, count: u32) -> Result<usize> {
    let mut net: NetManager =
        NetManager::new(config.net.clone()).context("opening loopback socket")?;
    let local = NetAddress::loopback();

    for sequence in 0..count {
        let probe = Probe {
            sequence,
            sent_ms: 0,
            reply: false,
            label: format!("loop-{}", sequence),
        };
        net.send_packet(Channel::ClientToServer, &local, &probe.encode());
    }

    while let Some(payload) = net.get_loopback_packet(Channel::ClientToServer) {
        let mut probe = Probe::decode(&mut NetMessage::view(&payload))?;
        log::debug!("Server side got {:?}", probe);
        probe.reply = true;
        net.send_packet(Channel::ServerToClient, &local, &probe.encode());
    }

    let mut echoed = 0;
    while let Some(payload) = net.get_loopback_packet(Channel::ServerToClient) {
        let probe = Probe::decode(&mut NetMessage::view(&payload))?;
        if probe.reply {
            echoed += 1;
        }
    }

    Ok(echoed)
}
