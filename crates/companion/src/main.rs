//! Wolite Companion
//!
//! Host agent binary: serves the HTTPS power API and manages its certificate and token.

use anyhow::{Context, Result};
use axum_server::Handle;
use clap::{Parser, Subcommand};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use wolite_companion::auth::TOKEN_FILE_GRACE;
use wolite_companion::{
    AppState, CertStore, CommandExecutor, CompanionConfig, CompanionServer, Identity, TokenStore,
};

/// In-flight requests get this long to finish after a shutdown signal
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Wolite Companion - authenticated remote power control for this machine
#[derive(Parser, Debug)]
#[command(name = "wolite-companion")]
#[command(author = "Wolite Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Companion agent for Wolite remote power management", long_about = None)]
struct Args {
    /// HTTPS port (persisted to config.json when given)
    #[arg(short, long, global = true)]
    port: Option<u16>,

    /// Bind address
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED), global = true)]
    bind: IpAddr,

    /// Directory holding config, certificate and token files
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTPS server (default)
    Serve,
    /// Issue a new token; restart a running companion for it to take effect
    RegenToken,
    /// Replace the certificate; every controller must pair again
    RegenCert,
    /// Print the current certificate fingerprint
    Fingerprint,
}

#[tokio::main]
async fn main() -> Result<()> {
    wolite_core::tls::install_default_provider();

    let args = Args::parse();
    setup_logging(&args.log_level)?;

    let dir = match args.config_dir {
        Some(dir) => dir,
        None => CompanionConfig::default_dir()?,
    };
    CompanionConfig::ensure_dir(&dir)?;

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(&dir, args.bind, args.port).await,
        Command::RegenToken => regen_token(&dir).await,
        Command::RegenCert => regen_cert(&dir),
        Command::Fingerprint => print_fingerprint(&dir),
    }
}

async fn serve(dir: &Path, bind: IpAddr, port: Option<u16>) -> Result<()> {
    info!("Starting Wolite Companion v{}", env!("CARGO_PKG_VERSION"));

    let config = CompanionConfig::load_or_create(dir, port).context("Failed to load config")?;

    let tokens = TokenStore::load(dir)
        .await
        .context("Failed to load token store")?;
    if tokens.temp_token_path().exists() {
        println!("============================================");
        println!("New token written to {}", tokens.temp_token_path().display());
        println!("It is deleted in {} seconds", TOKEN_FILE_GRACE.as_secs());
        println!("============================================");
    }

    let identity = load_identity(dir)?;
    info!(fingerprint = %identity.fingerprint, "certificate loaded");

    let state = AppState::new(
        tokens.clone(),
        Arc::new(CommandExecutor::system()),
        identity.fingerprint,
    );
    let server = CompanionServer::new(&identity, state).context("Failed to configure TLS")?;

    let addr = SocketAddr::new(bind, config.port);
    let listener = std::net::TcpListener::bind(addr)
        .with_context(|| format!("Failed to bind {}", addr))?;

    let handle = Handle::new();
    let mut server_task = tokio::spawn(server.serve(listener, handle.clone()));

    let result = tokio::select! {
        _ = shutdown_signal() => {
            handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
            (&mut server_task).await
        }
        result = &mut server_task => result,
    };

    tokens.cleanup();

    match result.context("Server task failed")? {
        Ok(()) => {
            info!("Shutdown complete");
            Ok(())
        }
        Err(e) => {
            error!("Server error: {}", e);
            Err(e.into())
        }
    }
}

/// Load the TLS identity, generating one on first run
///
/// A certificate that exists but fails to decode or has expired is an integrity
/// error; it is reported, never replaced.
fn load_identity(dir: &Path) -> Result<Identity> {
    let store = CertStore::new(dir);
    if !store.exists() {
        info!(path = %store.cert_path().display(), "no certificate found, generating");
        store.generate().context("Failed to generate certificate")?;
    }
    store.load().context("Certificate integrity check failed")
}

async fn regen_token(dir: &Path) -> Result<()> {
    let tokens = TokenStore::load(dir)
        .await
        .context("Failed to load token store")?;
    tokens
        .regenerate()
        .await
        .context("Failed to regenerate token")?;

    println!("New token written to {}", tokens.temp_token_path().display());
    println!(
        "Copy it now; the file is deleted in {} seconds (Ctrl+C to delete now)",
        TOKEN_FILE_GRACE.as_secs()
    );

    tokio::select! {
        _ = tokio::time::sleep(TOKEN_FILE_GRACE) => {}
        _ = shutdown_signal() => {}
    }

    tokens.cleanup();
    Ok(())
}

fn regen_cert(dir: &Path) -> Result<()> {
    let store = CertStore::new(dir);
    store.clear().context("Failed to remove old certificate")?;
    let fingerprint = store
        .generate()
        .context("Failed to generate certificate")?;

    warn!("certificate replaced, paired controllers must pair again");
    println!("{}", fingerprint);
    Ok(())
}

fn print_fingerprint(dir: &Path) -> Result<()> {
    let fingerprint = CertStore::new(dir)
        .fingerprint()
        .context("Failed to read certificate")?;
    println!("{}", fingerprint);
    Ok(())
}

/// Resolves on Ctrl+C or, on Unix, SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to setup SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}

/// Setup logging with tracing
fn setup_logging(level: &str) -> Result<()> {
    let log_level = level.parse::<Level>().unwrap_or(Level::INFO);

    let filter = EnvFilter::builder()
        .with_default_directive(log_level.into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(())
}
