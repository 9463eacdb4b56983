// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use consts::{DEFAULT_BAUDRATE, DEFAULT_CHUNK_SIZE, DEFAULT_TIMEOUT_MS};

mod serial;
mod uploader;

use serial::SerialLink;
use uploader::{Timeouts, Uploader};

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
    /// Serial port the bootloader listens on
    #[arg(short, long, default_value = "/dev/ttyUSB0")]
    port: String,
    #[arg(short, long, default_value_t = DEFAULT_BAUDRATE)]
    baudrate: u32,
    /// Data bytes per frame
    #[arg(short, long, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,
    /// How long to wait for each response
    #[arg(short, long, default_value_t = DEFAULT_TIMEOUT_MS)]
    timeout_ms: u64,
    /// How long to wait for the answer to the first Data frame, which triggers the erase
    #[arg(long, default_value_t = 10_000)]
    erase_timeout_ms: u64,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a firmware image
    Upload {
        /// Raw application binary
        file: PathBuf,
    },
    /// Tell the bootloader to drop the current session
    Abort,
    /// List the available serial ports
    ListPorts,
}

fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();

    let args = Args::parse();
    let timeouts = Timeouts {
        response: Duration::from_millis(args.timeout_ms),
        erase: Duration::from_millis(args.erase_timeout_ms),
    };

    match args.command {
        Commands::ListPorts => serial::list_ports().context("Cannot enumerate serial ports")?,
        Commands::Upload { file } => {
            let image = std::fs::read(&file).with_context(|| format!("Cannot read {}", file.display()))?;
            log::info!("Uploading {} ({} bytes)", file.display(), image.len());
            let mut uploader = Uploader::new(open(&args.port, args.baudrate, timeouts)?, timeouts);
            uploader.upload(&image, args.chunk_size).context("Update failed")?;
            println!("Update of {} bytes committed", image.len());
        }
        Commands::Abort => {
            let mut uploader = Uploader::new(open(&args.port, args.baudrate, timeouts)?, timeouts);
            uploader.abort().context("Abort failed")?;
            println!("Session aborted");
        }
    }
    Ok(())
}

fn open(port: &str, baudrate: u32, timeouts: Timeouts) -> anyhow::Result<SerialLink> {
    SerialLink::open(port, baudrate, timeouts.response).with_context(|| format!("Cannot open {port}"))
}
