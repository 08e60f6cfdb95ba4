use std::path::PathBuf;

use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use dfu_core::SuffixPolicy;
use dfu_core::session::{SessionConfig, flash};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "USB DFU firmware flasher (Pure Rust)", long_about = None)]
struct Args {
    /// USB vendor id, hex (e.g. 0483 or 0x0483)
    #[arg(value_parser = parse_hex_id)]
    vendor_id: Option<u16>,

    /// USB product id, hex
    #[arg(value_parser = parse_hex_id)]
    product_id: Option<u16>,

    /// Path to the firmware file (.dfu)
    firmware: Option<String>,

    /// Control transfer timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// DFU suffix handling: required, optional or none
    #[arg(long)]
    suffix: Option<SuffixPolicy>,

    /// Load settings from a TOML file; command line values win
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the effective settings to a TOML file
    #[arg(long)]
    save_config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn parse_hex_id(s: &str) -> Result<u16, String> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u16::from_str_radix(digits, 16).map_err(|e| format!("invalid hex id '{s}': {e}"))
}

fn resolve_config(args: &Args) -> anyhow::Result<SessionConfig> {
    let mut config = match &args.config {
        Some(path) => SessionConfig::load_from_file(path)?,
        None => SessionConfig::default(),
    };

    if let Some(vid) = args.vendor_id {
        config.vendor_id = vid;
    }
    if let Some(pid) = args.product_id {
        config.product_id = pid;
    }
    if let Some(path) = &args.firmware {
        config.firmware_path = path.clone();
    }
    if let Some(timeout) = args.timeout_ms {
        config.timeout_ms = timeout;
    }
    if let Some(policy) = args.suffix {
        config.suffix = policy;
    }
    Ok(config)
}

fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to install log subscriber: {e}");
    }

    let config = match resolve_config(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("Error: {:#}", e);
            std::process::exit(1);
        }
    };

    if args.config.is_none()
        && (args.vendor_id.is_none() || args.product_id.is_none() || args.firmware.is_none())
    {
        Args::command()
            .error(
                ErrorKind::MissingRequiredArgument,
                "<VENDOR_ID> <PRODUCT_ID> <FIRMWARE> are required unless --config is given",
            )
            .exit();
    }
    if config.firmware_path.is_empty() {
        Args::command()
            .error(ErrorKind::MissingRequiredArgument, "no firmware file given")
            .exit();
    }

    if let Some(path) = &args.save_config {
        if let Err(e) = config.save_to_file(path) {
            error!("Error: failed to save config: {:#}", e);
            std::process::exit(1);
        }
        info!(path = %path.display(), "Saved configuration");
    }

    info!("Starting dfu-util (nusb backend)...");

    if let Err(e) = flash(&config) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}
