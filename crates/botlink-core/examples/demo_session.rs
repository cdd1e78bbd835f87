//! BotLink demo session
//!
//! Drives a simulated robot through a complete session: handshake, interval
//! change, upload, run and download. Useful for watching the wire traffic
//! without hardware.
//!
//! Usage:
//!   cargo run --example demo_session -- [OPTIONS]
//!
//! Options:
//!   --firmware N      Firmware version to simulate (default: 10)
//!   --count N         Instructions to upload (default: 40)
//!   --loss RATE       Random download packet loss, 0.0-1.0 (default: 0)
//!   --seed N          Seed for the packet loss generator (default: 1)
//!
//! Set `RUST_LOG=botlink_core=debug` to see every payload. With `--loss`, a
//! lost final payload ends the download with a timeout.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use botlink_core::prelude::*;
use tracing_subscriber::EnvFilter;

struct Options {
    firmware_version: u32,
    count: usize,
    loss: f64,
    seed: u64,
}

fn parse_args() -> Result<Options> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut options = Options {
        firmware_version: 10,
        count: 40,
        loss: 0.0,
        seed: 1,
    };

    let mut i = 0;
    while i < args.len() {
        let value = args.get(i + 1).map(String::as_str);
        match args[i].as_str() {
            "--firmware" | "-f" => {
                options.firmware_version = value.context("--firmware needs a value")?.parse()?;
            }
            "--count" | "-n" => {
                options.count = value.context("--count needs a value")?.parse()?;
            }
            "--loss" => {
                options.loss = value.context("--loss needs a value")?.parse()?;
            }
            "--seed" => {
                options.seed = value.context("--seed needs a value")?.parse()?;
            }
            other => bail!("Unknown option: {}", other),
        }
        i += 2;
    }
    Ok(options)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let options = parse_args()?;
    println!("=== BotLink Demo Session ===");
    println!("Firmware: {}", options.firmware_version);

    let robot = Arc::new(
        MockRobot::new(options.firmware_version)
            .with_packet_loss(options.loss, options.seed),
    );
    let session = RobotSession::connect(robot.clone(), ConnectionConfig::default())
        .await
        .context("handshake failed")?;

    let info = session.info();
    println!("{}", serde_json::to_string_pretty(&info)?);

    session.set_interval(2).await?;
    println!("Interval: {}", session.interval());

    let program: Vec<Instruction> = (0..options.count)
        .map(|i| {
            let speed = (i * 100 / options.count.max(1)) as u8;
            Instruction::new(speed, 100 - speed)
        })
        .collect();
    session.upload_instructions(&program, true).await?;
    println!("Uploaded and ran {} instructions", program.len());

    let report = session.download_instructions().await?;
    println!(
        "Downloaded {} instructions, {} of {} payloads lost",
        report.instructions.len(),
        report.lost_packets.len(),
        report.expected_packets
    );
    let mismatches = program
        .iter()
        .zip(&report.instructions)
        .filter(|(sent, received)| !sent.approx_eq(received))
        .count();
    println!("Mismatched instructions: {}", mismatches);

    let counters = session.counters();
    println!(
        "Traffic: {} bytes out in {} writes, {} bytes in over {} payloads",
        counters.tx_bytes, counters.tx_packets, counters.rx_bytes, counters.rx_packets
    );

    session.disconnect().await?;
    println!("Disconnected");
    Ok(())
}
