use std::path::Path;

use secrecy::ExposeSecret;

use crate::{Config, FamilyConfig};

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Reads the file, expands `{{ env.VAR }}` placeholders, then
    /// deserializes and validates the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, environment variable
    /// expansion fails, TOML parsing fails, or validation fails
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;

        Self::from_toml(&raw)
    }

    /// Parse and validate configuration from TOML text
    ///
    /// # Errors
    ///
    /// Returns an error if expansion, parsing or validation fails
    pub fn from_toml(raw: &str) -> anyhow::Result<Self> {
        let expanded =
            crate::env::expand_env(raw).map_err(|e| anyhow::anyhow!("config variable expansion failed: {e}"))?;

        let mut config: Self =
            toml::from_str(&expanded).map_err(|e| anyhow::anyhow!("failed to parse config: {e}"))?;

        // A key expanded from an unset variable is blank; treat it as unset
        config.provider.api_key = config
            .provider
            .api_key
            .take()
            .filter(|key| !key.expose_secret().trim().is_empty());

        config.validate()?;

        Ok(config)
    }

    /// Validate that the configuration is internally consistent
    ///
    /// # Errors
    ///
    /// Returns an error describing the first inconsistency found
    pub fn validate(&self) -> anyhow::Result<()> {
        self.validate_auth_config()?;
        self.validate_provider_config()?;
        self.validate_ledger_config()?;
        self.validate_sync_config()?;
        Ok(())
    }

    fn validate_auth_config(&self) -> anyhow::Result<()> {
        if self.auth.enabled && self.auth.jwt_secret.expose_secret().is_empty() {
            anyhow::bail!("auth.jwt_secret must not be empty when auth is enabled");
        }

        Ok(())
    }

    fn validate_provider_config(&self) -> anyhow::Result<()> {
        let provider = &self.provider;

        let timeouts = [
            ("chat", provider.timeouts.chat),
            ("image", provider.timeouts.image),
            ("video", provider.timeouts.video),
        ];
        for (feature, timeout) in timeouts {
            if timeout.is_zero() {
                anyhow::bail!("provider.timeouts.{feature} must be greater than 0");
            }
        }

        if provider.discovery_interval.is_zero() {
            anyhow::bail!("provider.discovery_interval must be greater than 0");
        }

        let families = [
            ("chat", &provider.families.chat),
            ("image", &provider.families.image),
            ("video", &provider.families.video),
        ];
        for (feature, family) in families {
            validate_family(feature, family)?;
        }

        Ok(())
    }

    fn validate_ledger_config(&self) -> anyhow::Result<()> {
        let costs = self.ledger.costs;
        if costs.chat < 0 || costs.image < 0 || costs.video < 0 {
            anyhow::bail!("ledger.costs must not be negative");
        }

        let credits = self.ledger.initial_credits;
        if credits.free < 0 || credits.pro_monthly < 0 || credits.pro_yearly < 0 {
            anyhow::bail!("ledger.initial_credits must not be negative");
        }

        Ok(())
    }

    fn validate_sync_config(&self) -> anyhow::Result<()> {
        if self.sync.heartbeat_interval.is_zero() {
            anyhow::bail!("sync.heartbeat_interval must be greater than 0");
        }

        if self.sync.channel_capacity == 0 {
            anyhow::bail!("sync.channel_capacity must be greater than 0");
        }

        Ok(())
    }
}

fn validate_family(feature: &str, family: &FamilyConfig) -> anyhow::Result<()> {
    if family.default_model.trim().is_empty() {
        anyhow::bail!("provider.families.{feature}.default_model must not be empty");
    }

    if family.prefix.is_empty() {
        anyhow::bail!("provider.families.{feature}.prefix must not be empty");
    }

    regex::Regex::new(&family.naming_pattern)
        .map_err(|e| anyhow::anyhow!("invalid naming_pattern for {feature} family: {e}"))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use secrecy::ExposeSecret;

    use crate::{Config, ExportProtocol, LogFormat};

    const MINIMAL: &str = r#"
        [auth]
        jwt_secret = "test-secret"
    "#;

    #[test]
    fn minimal_config_uses_defaults() {
        let config = Config::from_toml(MINIMAL).unwrap();

        assert!(config.provider.api_key.is_none());
        assert_eq!(config.provider.timeouts.chat, Duration::from_secs(30));
        assert_eq!(config.provider.timeouts.image, Duration::from_secs(60));
        assert_eq!(config.provider.timeouts.video, Duration::from_secs(120));
        assert_eq!(config.provider.discovery_interval, Duration::from_secs(300));
        assert_eq!(config.provider.families.chat.prefix, "family-");
        assert_eq!(config.ledger.limits.free.chat, 50);
        assert_eq!(config.ledger.limits.free.image, 10);
        assert_eq!(config.ledger.limits.free.video, 5);
        assert!(!config.ledger.charge_demo);
        assert_eq!(config.sync.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.sync.channel_capacity, 64);
        assert!(config.server.health.enabled);
        assert_eq!(config.server.health.path, "/health");
        assert!(config.telemetry.is_none());
    }

    #[test]
    fn blank_api_key_means_demo_mode() {
        let raw = r#"
            [auth]
            jwt_secret = "test-secret"

            [provider]
            api_key = "{{ env.TOLLGATE_UNSET_TEST_KEY | default("") }}"
        "#;

        let config = Config::from_toml(raw).unwrap();
        assert!(config.provider.api_key.is_none());
    }

    #[test]
    fn full_config_parses() {
        let raw = r#"
            [server]
            listen_address = "127.0.0.1:8080"

            [server.cors]
            origins = ["https://app.example.com"]
            credentials = true

            [auth]
            jwt_secret = "s3cret"
            issuer = "https://auth.example.com"

            [provider]
            api_key = "sk-live"
            base_url = "https://llm.internal/v1"
            demo_fallback = true
            discovery_interval = "1m"
            default_workspace = "general"

            [provider.timeouts]
            chat = "10s"

            [provider.families.chat]
            prefix = "studio-"
            default_model = "gpt-4.1"
            fallback_priority = ["gpt-4o-mini"]
            naming_pattern = "^gpt-"
            aliases = { "studio-fast" = "gpt-4o-mini" }

            [provider.workspaces.general]
            system_prompt = "You are helpful."

            [ledger]
            low_credit_threshold = 5
            charge_demo = true

            [ledger.costs]
            image = 3

            [ledger.limits.free]
            chat = 10

            [sync]
            heartbeat_interval = "15s"
            channel_capacity = 8

            [telemetry]
            service_name = "tollgate-test"
            log_format = "json"

            [telemetry.exporter]
            endpoint = "http://localhost:4318"
            protocol = "http_proto"
        "#;

        let config = Config::from_toml(raw).unwrap();

        assert_eq!(config.server.listen_address.unwrap().port(), 8080);
        assert!(!config.server.cors.as_ref().unwrap().allows_any_origin());
        assert_eq!(config.auth.issuer.as_deref(), Some("https://auth.example.com"));
        assert_eq!(config.provider.api_key.as_ref().unwrap().expose_secret(), "sk-live");
        assert!(config.provider.demo_fallback);
        assert_eq!(config.provider.discovery_interval, Duration::from_secs(60));
        assert_eq!(config.provider.timeouts.chat, Duration::from_secs(10));
        assert_eq!(config.provider.timeouts.video, Duration::from_secs(120));
        assert_eq!(config.provider.families.chat.aliases["studio-fast"], "gpt-4o-mini");
        assert_eq!(config.provider.families.image.default_model, "gpt-image-1");
        assert_eq!(
            config.provider.workspaces["general"].system_prompt.as_deref(),
            Some("You are helpful.")
        );
        assert_eq!(config.ledger.costs.image, 3);
        assert_eq!(config.ledger.costs.chat, 1);
        assert_eq!(config.ledger.limits.free.chat, 10);
        assert_eq!(config.ledger.limits.free.image, 10);
        assert_eq!(config.sync.channel_capacity, 8);

        let telemetry = config.telemetry.unwrap();
        assert_eq!(telemetry.log_format, LogFormat::Json);
        assert_eq!(telemetry.exporter.unwrap().protocol, ExportProtocol::HttpProto);
    }

    #[test]
    fn empty_secret_rejected_when_auth_enabled() {
        let err = Config::from_toml("").unwrap_err();
        assert!(err.to_string().contains("jwt_secret"));
    }

    #[test]
    fn auth_can_be_disabled() {
        let config = Config::from_toml("[auth]\nenabled = false\n").unwrap();
        assert!(!config.auth.enabled);
    }

    #[test]
    fn unknown_fields_rejected() {
        let raw = format!("{MINIMAL}\n[ledger]\nbogus = 1\n");
        let err = Config::from_toml(&raw).unwrap_err();
        assert!(err.to_string().contains("failed to parse config"));
    }

    #[test]
    fn invalid_naming_pattern_rejected() {
        let raw = format!(
            "{MINIMAL}\n[provider.families.video]\nprefix = \"family-\"\ndefault_model = \"sora-2\"\nnaming_pattern = \"(unclosed\"\n"
        );
        let err = Config::from_toml(&raw).unwrap_err();
        assert!(err.to_string().contains("naming_pattern"));
    }

    #[test]
    fn zero_timeout_rejected() {
        let raw = format!("{MINIMAL}\n[provider.timeouts]\nimage = \"0s\"\n");
        let err = Config::from_toml(&raw).unwrap_err();
        assert!(err.to_string().contains("provider.timeouts.image"));
    }

    #[test]
    fn negative_cost_rejected() {
        let raw = format!("{MINIMAL}\n[ledger.costs]\nchat = -1\n");
        let err = Config::from_toml(&raw).unwrap_err();
        assert!(err.to_string().contains("ledger.costs"));
    }

    #[test]
    fn invalid_duration_rejected() {
        let raw = format!("{MINIMAL}\n[sync]\nheartbeat_interval = \"soon\"\n");
        let err = Config::from_toml(&raw).unwrap_err();
        assert!(err.to_string().contains("invalid duration"));
    }

    #[test]
    fn env_placeholders_expand_before_parsing() {
        temp_env::with_var("TOLLGATE_LOADER_SECRET", Some("from-env"), || {
            let raw = "[auth]\njwt_secret = \"{{ env.TOLLGATE_LOADER_SECRET }}\"\n";
            let config = Config::from_toml(raw).unwrap();
            assert_eq!(config.auth.jwt_secret.expose_secret(), "from-env");
        });
    }
}
