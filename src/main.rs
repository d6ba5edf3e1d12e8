//! Command-line frontend for the DS-TWR ranging roles
//!
//! Runs either side of the exchange over UDP between two processes, or a
//! self-contained demo with both roles in-process over the simulated link.

use std::net::SocketAddr;
use std::thread;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::warn;

use ds_twr::ranging::SPEED_OF_LIGHT;
use ds_twr::sim::{self, SimConfig};
use ds_twr::time::DEVICE_TIME_UNIT_SECONDS;
use ds_twr::udp::UdpTransceiver;
use ds_twr::{Initiator, RangingConfig, RangingResult, Responder};

#[derive(Parser)]
#[command(name = "ds-twr")]
#[command(author, version, about = "Double-sided two-way ranging over UDP", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Drive ranging exchanges against a responder
    Initiator {
        /// Local address to bind
        #[arg(long, default_value = "0.0.0.0:52100")]
        listen: SocketAddr,

        /// Address of the responder
        #[arg(long)]
        peer: SocketAddr,

        /// TX antenna delay, in device time units
        #[arg(long, default_value = "16436")]
        antenna_delay: u16,

        /// Number of exchanges to run (0 = forever)
        #[arg(long, default_value = "0")]
        count: u64,
    },

    /// Answer ranging exchanges and report measured distances
    Responder {
        /// Local address to bind
        #[arg(long, default_value = "0.0.0.0:52101")]
        listen: SocketAddr,

        /// Address of the initiator
        #[arg(long)]
        peer: SocketAddr,

        /// Number of results to report (0 = forever)
        #[arg(long, default_value = "0")]
        count: u64,

        /// Print results as JSON, one object per line
        #[arg(long)]
        json: bool,
    },

    /// Run both roles in-process over a simulated link
    Demo {
        /// Simulated distance between the nodes, in metres
        #[arg(long, default_value = "10.0")]
        distance: f64,

        /// Clock offset between the two simulated nodes, in device time units
        #[arg(long, default_value = "0")]
        clock_offset: u64,

        /// Number of exchanges to run
        #[arg(long, default_value = "5")]
        count: u64,

        /// Print results as JSON, one object per line
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(log_level.into())
                .from_env_lossy(),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Initiator {
            listen,
            peer,
            antenna_delay,
            count,
        } => cmd_initiator(listen, peer, antenna_delay, count),

        Commands::Responder {
            listen,
            peer,
            count,
            json,
        } => cmd_responder(listen, peer, count, json),

        Commands::Demo {
            distance,
            clock_offset,
            count,
            json,
        } => cmd_demo(distance, clock_offset, count, json),
    }
}

fn cmd_initiator(listen: SocketAddr, peer: SocketAddr, antenna_delay: u16, count: u64) -> Result<()> {
    let radio = UdpTransceiver::bind(listen, peer)
        .with_context(|| format!("failed to bind {listen}"))?;
    let config = RangingConfig {
        antenna_delay,
        ..RangingConfig::default()
    };
    let mut initiator = Initiator::new(radio, config);

    if count == 0 {
        initiator.run();
    }
    for _ in 0..count {
        if let Err(error) = initiator.run_once() {
            warn!(%error, "ranging exchange abandoned");
        }
    }
    Ok(())
}

fn cmd_responder(listen: SocketAddr, peer: SocketAddr, count: u64, json: bool) -> Result<()> {
    let radio = UdpTransceiver::bind(listen, peer)
        .with_context(|| format!("failed to bind {listen}"))?;
    let mut responder = Responder::new(radio, RangingConfig::default());

    if count == 0 {
        responder.run(|result| print_result(&result, json));
    }
    let mut reported = 0;
    while reported < count {
        match responder.run_once() {
            Ok(result) => {
                print_result(&result, json);
                reported += 1;
            }
            Err(error) => warn!(%error, "ranging exchange abandoned"),
        }
    }
    Ok(())
}

fn cmd_demo(distance: f64, clock_offset: u64, count: u64, json: bool) -> Result<()> {
    let flight_time = (distance / SPEED_OF_LIGHT / DEVICE_TIME_UNIT_SECONDS).round() as u64;
    let (left, right) = sim::pair(SimConfig {
        flight_time,
        offset_b: clock_offset,
        ..SimConfig::default()
    });

    let responder = thread::spawn(move || {
        let mut responder = Responder::new(right, RangingConfig::default());
        let mut results = Vec::new();
        for _ in 0..count {
            match responder.run_once() {
                Ok(result) => results.push(result),
                Err(error) => warn!(%error, "ranging exchange abandoned"),
            }
        }
        results
    });

    let mut initiator = Initiator::new(left, RangingConfig::default());
    for _ in 0..count {
        if let Err(error) = initiator.run_once() {
            warn!(%error, "ranging exchange abandoned");
        }
    }

    // Closing the channel unblocks the responder if it is still listening.
    drop(initiator);

    let results = responder
        .join()
        .map_err(|_| anyhow::anyhow!("responder thread panicked"))?;
    for result in results {
        print_result(&result, json);
    }
    Ok(())
}

fn print_result(result: &RangingResult, json: bool) {
    if json {
        match serde_json::to_string(result) {
            Ok(line) => println!("{line}"),
            Err(error) => warn!(%error, "failed to serialize result"),
        }
    } else {
        println!(
            "distance: {:8.3} m    time of flight: {:7.3} ns",
            result.distance,
            result.time_of_flight * 1e9,
        );
    }
}
