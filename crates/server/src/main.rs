mod config;
mod probe;
mod server;

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};

use config::ToolConfig;
use gamenet::AddressFamily;
use server::EchoServer;

#[derive(Parser)]
#[command(name = "gamenet-server")]
#[command(about = "UDP echo server and probe tool for the gamenet transport")]
struct Args {
    #[arg(short, long, help = "TOML config file")]
    config: Option<PathBuf>,

    #[arg(short, long)]
    bind: Option<IpAddr>,

    #[arg(short, long, help = "First port to try binding")]
    port: Option<u16>,

    #[arg(short, long)]
    tick_rate: Option<u32>,

    #[arg(long, help = "Artificial latency in ms applied to every datagram")]
    latency: Option<u32>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Echo every probe back to its sender
    Serve {
        #[arg(long, help = "Stop after this many ticks")]
        ticks: Option<u64>,
    },
    /// Send probes to a server and report round-trip times
    Probe {
        target: String,

        #[arg(short = 'n', long, default_value_t = 10)]
        count: u32,

        #[arg(long, default_value_t = 100)]
        interval_ms: u64,

        #[arg(long, value_enum, default_value_t = Family::Any)]
        family: Family,
    },
    /// Round-trip probes through the in-process loopback queues
    Loopback {
        #[arg(short = 'n', long, default_value_t = 5)]
        count: u32,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Family {
    Any,
    V4,
    V6,
}

impl From<Family> for AddressFamily {
    fn from(family: Family) -> Self {
        match family {
            Family::Any => AddressFamily::Any,
            Family::V4 => AddressFamily::Ipv4,
            Family::V6 => AddressFamily::Ipv6,
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ToolConfig::load(path)?,
        None => ToolConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.net.bind_ip = bind;
    }
    if let Some(port) = args.port {
        config.net.base_port = port;
    }
    if let Some(tick_rate) = args.tick_rate {
        config.tick_rate = tick_rate;
    }
    if let Some(latency) = args.latency {
        config.net.forced_latency_ms = latency;
    }

    match args.command {
        Command::Serve { ticks } => {
            let mut server = EchoServer::new(&config)?;
            log::info!("Echo server started on {}", server.local_addr());
            server.run(ticks);
            log::info!(
                "Echo server shutting down after {} echoes ({} packets received)",
                server.echoed(),
                server.stats().packets_received
            );
        }
        Command::Probe {
            target,
            count,
            interval_ms,
            family,
        } => {
            let report = probe::run_probe(
                &config,
                &target,
                family.into(),
                count,
                Duration::from_millis(interval_ms),
            )?;
            match (report.min_ms, report.avg_ms, report.max_ms) {
                (Some(min), Some(avg), Some(max)) => log::info!(
                    "{}/{} replies, rtt min/avg/max = {}/{:.1}/{} ms",
                    report.received,
                    report.sent,
                    min,
                    avg,
                    max
                ),
                _ => log::warn!("0/{} replies", report.sent),
            }
        }
        Command::Loopback { count } => {
            let echoed = probe::run_loopback(&config, count)?;
            log::info!("{}/{} probes echoed through loopback", echoed, count);
        }
    }

    Ok(())
}
