use std::time::Duration;

use indexmap::IndexMap;
use secrecy::SecretString;
use serde::Deserialize;
use url::Url;

/// Upstream generation provider (OpenAI-compatible API)
///
/// Leaving `api_key` unset puts the gateway in demo mode: every call returns a
/// synthetic output flagged `isDemo` instead of reaching the network.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    /// API key; absent means demo mode
    #[serde(default)]
    pub api_key: Option<SecretString>,
    /// Base URL override, defaults to `https://api.openai.com/v1`
    #[serde(default)]
    pub base_url: Option<Url>,
    /// Per-feature call ceilings
    #[serde(default)]
    pub timeouts: FeatureTimeouts,
    /// Replace failed calls with synthetic output
    #[serde(default)]
    pub demo_fallback: bool,
    /// How often the upstream model catalog is refreshed
    #[serde(default = "default_discovery_interval", deserialize_with = "crate::duration::deserialize")]
    pub discovery_interval: Duration,
    /// Model families per feature
    #[serde(default)]
    pub families: ModelFamilies,
    /// Named chat workspaces
    #[serde(default)]
    pub workspaces: IndexMap<String, WorkspaceConfig>,
    /// Workspace used when the hint is absent or unknown
    #[serde(default = "default_workspace")]
    pub default_workspace: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: None,
            timeouts: FeatureTimeouts::default(),
            demo_fallback: false,
            discovery_interval: default_discovery_interval(),
            families: ModelFamilies::default(),
            workspaces: IndexMap::new(),
            default_workspace: default_workspace(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeatureTimeouts {
    #[serde(default = "default_chat_timeout", deserialize_with = "crate::duration::deserialize")]
    pub chat: Duration,
    #[serde(default = "default_image_timeout", deserialize_with = "crate::duration::deserialize")]
    pub image: Duration,
    #[serde(default = "default_video_timeout", deserialize_with = "crate::duration::deserialize")]
    pub video: Duration,
}

impl Default for FeatureTimeouts {
    fn default() -> Self {
        Self {
            chat: default_chat_timeout(),
            image: default_image_timeout(),
            video: default_video_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelFamilies {
    #[serde(default = "FamilyConfig::chat")]
    pub chat: FamilyConfig,
    #[serde(default = "FamilyConfig::image")]
    pub image: FamilyConfig,
    #[serde(default = "FamilyConfig::video")]
    pub video: FamilyConfig,
}

impl Default for ModelFamilies {
    fn default() -> Self {
        Self {
            chat: FamilyConfig::chat(),
            image: FamilyConfig::image(),
            video: FamilyConfig::video(),
        }
    }
}

/// Mapping from client-visible model ids to concrete upstream models
///
/// Any id carrying `prefix` belongs to the family. It resolves through
/// `aliases` when listed there, otherwise to `default_model`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FamilyConfig {
    pub prefix: String,
    pub default_model: String,
    /// Logical id to upstream model; listed ids belong to the family even without the prefix
    #[serde(default)]
    pub aliases: IndexMap<String, String>,
    /// Known-good models tried in order when the canonical model is unavailable
    #[serde(default)]
    pub fallback_priority: Vec<String>,
    /// Regex an arbitrary catalog entry must match to be a last-resort fallback
    pub naming_pattern: String,
    /// Substrings that disqualify a last-resort fallback
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl FamilyConfig {
    pub fn chat() -> Self {
        Self {
            prefix: default_prefix(),
            default_model: "gpt-5.1".to_owned(),
            aliases: IndexMap::new(),
            fallback_priority: strings(&["gpt-4.1", "gpt-4o", "gpt-4o-mini"]),
            naming_pattern: "^(gpt-|o[0-9])".to_owned(),
            exclude: strings(&["embedding", "vision", "instruct"]),
        }
    }

    pub fn image() -> Self {
        Self {
            prefix: default_prefix(),
            default_model: "gpt-image-1".to_owned(),
            aliases: IndexMap::new(),
            fallback_priority: strings(&["gpt-image-1", "dall-e-3", "dall-e-2"]),
            naming_pattern: "^(gpt-image|dall-e)".to_owned(),
            exclude: Vec::new(),
        }
    }

    pub fn video() -> Self {
        Self {
            prefix: default_prefix(),
            default_model: "sora-2".to_owned(),
            aliases: IndexMap::new(),
            fallback_priority: strings(&["sora-2", "sora-2-pro"]),
            naming_pattern: "^sora".to_owned(),
            exclude: Vec::new(),
        }
    }
}

/// A chat workspace; its system prompt is prepended to every conversation
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkspaceConfig {
    #[serde(default)]
    pub system_prompt: Option<String>,
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|&v| v.to_owned()).collect()
}

fn default_prefix() -> String {
    "family-".to_owned()
}

fn default_workspace() -> String {
    "default".to_owned()
}

const fn default_discovery_interval() -> Duration {
    Duration::from_secs(300)
}

const fn default_chat_timeout() -> Duration {
    Duration::from_secs(30)
}

const fn default_image_timeout() -> Duration {
    Duration::from_secs(60)
}

const fn default_video_timeout() -> Duration {
    Duration::from_secs(120)
}
