use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

/// Tollgate gateway
#[derive(Debug, Parser)]
#[command(name = "tollgate", about = "Credit admission and provider resilience gateway for generation APIs")]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "tollgate.toml", env = "TOLLGATE_CONFIG")]
    pub config: PathBuf,

    /// Override the listen address
    #[arg(long, env = "TOLLGATE_LISTEN")]
    pub listen: Option<SocketAddr>,

    /// Log filter used when `RUST_LOG` is unset
    #[arg(long, default_value = "info", env = "TOLLGATE_LOG")]
    pub log: String,
}
