//! OmniRouter CLI
//!
//! Command-line entry point: loads configuration, starts the module watcher
//! and serves HTTP until interrupted.
//!
//! # Usage
//!
//! ```bash
//! # Run with ./omnirouter.toml
//! omnirouter
//!
//! # Use another configuration file
//! omnirouter --config /etc/omnirouter.toml
//!
//! # Override the module root and listen address
//! omnirouter --root ./modules --listen 127.0.0.1:9000
//!
//! # Run with verbose logging
//! omnirouter --verbose
//! ```

use anyhow::Context;
use clap::Parser;
use omnirouter::config::{Config, DEFAULT_CONFIG_FILE};
use omnirouter::{NAME, Runtime, VERSION, logging, server};
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// OmniRouter - HTTP front end for hot-loaded native modules
#[derive(Parser, Debug)]
#[command(name = "omnirouter")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Serve HTTP through hot-loaded native modules", long_about = None)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "OMNIROUTER_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Module source directory (overrides modules.path)
    #[arg(long, env = "OMNIROUTER_ROOT")]
    root: Option<PathBuf>,

    /// Staging directory (overrides modules.mirrorlib)
    #[arg(long, env = "OMNIROUTER_MIRROR")]
    mirror: Option<PathBuf>,

    /// Address to listen on (overrides server.listen)
    #[arg(short, long, env = "OMNIROUTER_LISTEN")]
    listen: Option<SocketAddr>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn apply(&self, config: &mut Config) {
        if let Some(root) = &self.root {
            config.modules.path = Some(root.clone());
        }
        if let Some(mirror) = &self.mirror {
            config.modules.mirrorlib = mirror.clone();
        }
        if let Some(listen) = self.listen {
            config.server.listen = listen.to_string();
        }
        if self.verbose {
            config.logging.level = "debug".to_string();
        }
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run(Args::parse()).await {
        error!("{:#}", e);
        eprintln!("{}: {:#}", NAME, e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    // A missing file is fine when everything comes from flags.
    let mut config = if args.config.exists() || args.root.is_none() {
        Config::load(&args.config)?
    } else {
        Config::default()
    };
    args.apply(&mut config);
    let settings = config.resolve().context("invalid configuration")?;

    let _guard = logging::init(&settings.logging).context("failed to initialize logging")?;

    info!("{} v{} starting", NAME, VERSION);
    info!(path = %args.config.display(), "Configuration loaded");
    settings.warn_unknown_keys();
    info!(
        root = %settings.root.display(),
        mirror = %settings.mirror_dir.display(),
        listen = %settings.listen,
        default_capabilities = %settings.policy.default,
        "Configuration"
    );

    let cancel = CancellationToken::new();
    tokio::spawn(server::shutdown_signal(cancel.clone()));

    Runtime::new(&settings).run(cancel).await?;
    Ok(())
}
