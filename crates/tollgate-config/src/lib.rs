#![allow(clippy::must_use_candidate)]

pub mod auth;
mod duration;
mod env;
pub mod ledger;
mod loader;
pub mod provider;
pub mod server;
pub mod sync;
pub mod telemetry;

use serde::Deserialize;

pub use auth::*;
pub use ledger::*;
pub use provider::*;
pub use server::*;
pub use sync::*;
pub use telemetry::*;

/// Top-level Tollgate configuration
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Inbound credential verification
    #[serde(default)]
    pub auth: AuthConfig,
    /// Upstream generation provider
    #[serde(default)]
    pub provider: ProviderConfig,
    /// Credits, costs and daily limits
    #[serde(default)]
    pub ledger: LedgerConfig,
    /// Multi-device sync channel
    #[serde(default)]
    pub sync: SyncConfig,
    /// Telemetry configuration
    #[serde(default)]
    pub telemetry: Option<TelemetryConfig>,
}
