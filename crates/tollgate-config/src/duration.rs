//! Serde helpers for human-readable durations such as `"30s"` or `"5m"`

use std::time::Duration;

use serde::{Deserialize, Deserializer};

pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    duration_str::parse(raw.as_str()).map_err(|e| serde::de::Error::custom(format!("invalid duration '{raw}': {e}")))
}
