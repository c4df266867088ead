use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A billable generation feature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Feature {
    /// Conversational text generation
    Chat,
    /// Image generation
    Image,
    /// Video generation
    Video,
}

impl Feature {
    /// Every feature, in display order
    pub const ALL: [Self; 3] = [Self::Chat, Self::Image, Self::Video];

    /// Lowercase wire name
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Image => "image",
            Self::Video => "video",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string names no known feature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseFeatureError(pub String);

impl fmt::Display for ParseFeatureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown feature: {}", self.0)
    }
}

impl std::error::Error for ParseFeatureError {}

impl FromStr for Feature {
    type Err = ParseFeatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "chat" => Ok(Self::Chat),
            "image" => Ok(Self::Image),
            "video" => Ok(Self::Video),
            other => Err(ParseFeatureError(other.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("Chat".parse::<Feature>().unwrap(), Feature::Chat);
        assert_eq!("VIDEO".parse::<Feature>().unwrap(), Feature::Video);
        assert!("audio".parse::<Feature>().is_err());
    }

    #[test]
    fn serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Feature::Image).unwrap(), "\"image\"");
    }
}
