//! Programmatic configuration builder for integration tests

use std::net::SocketAddr;
use std::time::Duration;

use secrecy::SecretString;
use tollgate_config::{Config, CorsConfig, LedgerConfig, ServerConfig, WorkspaceConfig};

use super::jwt::TEST_SECRET;

/// Builder for constructing test configurations
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Authenticated, demo-mode gateway listening on localhost
    pub fn new() -> Self {
        let mut config = Config {
            server: ServerConfig {
                listen_address: Some(SocketAddr::from(([127, 0, 0, 1], 0))),
                ..ServerConfig::default()
            },
            ..Config::default()
        };
        config.auth.jwt_secret = SecretString::from(TEST_SECRET.to_owned());

        Self { config }
    }

    /// Point the gateway at a mock upstream
    pub fn with_upstream(mut self, base_url: &str) -> Self {
        self.config.provider.api_key = Some(SecretString::from("sk-test-key"));
        self.config.provider.base_url = Some(base_url.parse().expect("valid URL"));
        self
    }

    pub fn with_demo_fallback(mut self) -> Self {
        self.config.provider.demo_fallback = true;
        self
    }

    pub fn with_chat_timeout(mut self, timeout: Duration) -> Self {
        self.config.provider.timeouts.chat = timeout;
        self
    }

    pub fn with_workspace(mut self, name: &str, system_prompt: &str) -> Self {
        self.config.provider.workspaces.insert(
            name.to_owned(),
            WorkspaceConfig {
                system_prompt: Some(system_prompt.to_owned()),
            },
        );
        self
    }

    /// Adjust ledger settings in place
    pub fn with_ledger(mut self, configure: impl FnOnce(&mut LedgerConfig)) -> Self {
        configure(&mut self.config.ledger);
        self
    }

    pub fn with_heartbeat(mut self, interval: Duration) -> Self {
        self.config.sync.heartbeat_interval = interval;
        self
    }

    pub fn with_cors(mut self, config: CorsConfig) -> Self {
        self.config.server.cors = Some(config);
        self
    }

    /// Trust the `x-account-id` header instead of bearer tokens
    pub fn without_auth(mut self) -> Self {
        self.config.auth.enabled = false;
        self
    }

    /// Disable health endpoint
    pub fn without_health(mut self) -> Self {
        self.config.server.health.enabled = false;
        self
    }

    /// Build the final config
    pub fn build(self) -> Config {
        self.config
    }
}
