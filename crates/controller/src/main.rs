//! wolite-ctl
//!
//! Operator CLI: manages device records and drives companions.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::signal;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use wolite_controller::{fetch_fingerprint, FileDeviceStore, PairRequest, PairingOrchestrator};

/// Wolite controller CLI
#[derive(Parser, Debug)]
#[command(name = "wolite-ctl")]
#[command(author = "Wolite Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Pair with Wolite companions and send power commands", long_about = None)]
struct Args {
    /// Device store file
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Owner the device records belong to
    #[arg(long, default_value = "local", global = true)]
    owner: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "warn", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a companion's certificate fingerprint (unverified)
    Fingerprint { url: String },
    /// Register a device
    AddDevice {
        name: String,
        #[arg(long)]
        mac: String,
    },
    /// List devices
    List,
    /// Pair a device with its companion
    Pair {
        id: u64,
        url: String,
        #[arg(long)]
        token: String,
        /// Expected fingerprint, as printed by `wolite-companion fingerprint`
        #[arg(long)]
        fingerprint: Option<String>,
    },
    /// Remove a device's companion pairing
    Unpair { id: u64 },
    /// Send shutdown, reboot, sleep or hibernate
    Power { id: u64, action: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    wolite_core::tls::install_default_provider();

    let args = Args::parse();
    setup_logging(&args.log_level)?;

    tokio::select! {
        result = run(args) => result,
        _ = signal::ctrl_c() => {
            info!("Interrupted");
            Ok(())
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let path = match args.store {
        Some(path) => path,
        None => default_store_path()?,
    };
    let owner = args.owner.as_str();
    let orchestrator = PairingOrchestrator::new(FileDeviceStore::new(path));

    match args.command {
        Command::Fingerprint { url } => {
            let fingerprint = fetch_fingerprint(&url)
                .await
                .context("Failed to fetch fingerprint")?;
            println!("{}", fingerprint);
            println!("{}", fingerprint.to_colon_hex());
            println!("Compare this with `wolite-companion fingerprint` on the host before pairing.");
        }
        Command::AddDevice { name, mac } => {
            let device = orchestrator.store().insert(owner, &name, &mac).await?;
            println!("Added device {} ({})", device.id, device.name);
        }
        Command::List => {
            for device in orchestrator.store().list(owner).await? {
                let state = match (&device.companion_url, &device.companion_fingerprint) {
                    (Some(url), Some(fp)) if device.is_paired() => format!("paired {} {}", url, fp),
                    _ => "unpaired".to_string(),
                };
                println!("{:>4}  {:<20} {:<17} {}", device.id, device.name, device.mac_address, state);
            }
        }
        Command::Pair {
            id,
            url,
            token,
            fingerprint,
        } => {
            let mut req = PairRequest::new(url, token);
            if let Some(fp) = fingerprint {
                req = req.with_fingerprint(fp);
            }
            let device = orchestrator
                .pair(owner, id, req)
                .await
                .context("Pairing failed")?;
            if let Some(fp) = device.companion_fingerprint {
                println!("Paired device {} with fingerprint {}", device.id, fp.to_colon_hex());
            }
        }
        Command::Unpair { id } => {
            orchestrator.unpair(owner, id).await?;
            println!("Unpaired device {}", id);
        }
        Command::Power { id, action } => {
            let resp = orchestrator
                .power(owner, id, &action)
                .await
                .context("Power command failed")?;
            println!("{}", resp.message);
        }
    }

    Ok(())
}

fn default_store_path() -> Result<PathBuf> {
    dirs::data_dir()
        .map(|d| d.join("wolite").join("devices.json"))
        .context("No data directory found; pass --store")
}

/// Setup logging with tracing
fn setup_logging(level: &str) -> Result<()> {
    let log_level = level.parse::<Level>().unwrap_or(Level::WARN);

    let filter = EnvFilter::builder()
        .with_default_directive(log_level.into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(())
}
