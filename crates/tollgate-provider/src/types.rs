use serde::{Deserialize, Serialize};
use tollgate_core::Feature;

/// Speaker of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Conversation to continue
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ChatPayload {
    pub messages: Vec<ChatMessage>,
    /// Workspace whose system prompt frames the conversation
    #[serde(default)]
    pub workspace: Option<String>,
}

impl ChatPayload {
    pub fn validate(&self) -> Result<(), String> {
        if self.messages.is_empty() {
            return Err("messages must not be empty".to_owned());
        }
        if self.messages.iter().all(|m| m.content.trim().is_empty()) {
            return Err("messages must contain some text".to_owned());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ImagePayload {
    pub prompt: String,
    /// `WIDTHxHEIGHT`, provider default when absent
    #[serde(default)]
    pub size: Option<String>,
    /// Number of images
    #[serde(default)]
    pub n: Option<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct VideoPayload {
    pub prompt: String,
    /// Clip length in seconds
    #[serde(default)]
    pub seconds: Option<u32>,
    #[serde(default)]
    pub size: Option<String>,
}

/// Feature-specific input to one upstream call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Chat(ChatPayload),
    Image(ImagePayload),
    Video(VideoPayload),
}

impl Payload {
    pub const fn feature(&self) -> Feature {
        match self {
            Self::Chat(_) => Feature::Chat,
            Self::Image(_) => Feature::Image,
            Self::Video(_) => Feature::Video,
        }
    }

    /// Reject input no provider could act on
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::Chat(chat) => chat.validate()?,
            Self::Image(image) => {
                require_prompt(&image.prompt)?;
                if image.n.is_some_and(|n| n == 0 || n > 10) {
                    return Err("n must be between 1 and 10".to_owned());
                }
                if let Some(size) = &image.size {
                    check_size(size)?;
                }
            }
            Self::Video(video) => {
                require_prompt(&video.prompt)?;
                if video.seconds == Some(0) {
                    return Err("seconds must be positive".to_owned());
                }
                if let Some(size) = &video.size {
                    check_size(size)?;
                }
            }
        }
        Ok(())
    }
}

fn require_prompt(prompt: &str) -> Result<(), String> {
    if prompt.trim().is_empty() {
        return Err("prompt must not be empty".to_owned());
    }
    Ok(())
}

fn check_size(size: &str) -> Result<(), String> {
    let valid = size
        .split_once('x')
        .is_some_and(|(w, h)| w.parse::<u32>().is_ok_and(|w| w > 0) && h.parse::<u32>().is_ok_and(|h| h > 0));
    if valid {
        Ok(())
    } else {
        Err(format!("invalid size '{size}', expected WIDTHxHEIGHT"))
    }
}

/// A generated image, by URL or inline base64
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImageAsset {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub b64_json: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revised_prompt: Option<String>,
}

/// A video render job
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VideoJob {
    pub id: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Result of one successful call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Output {
    Chat {
        message: ChatMessage,
        #[serde(skip_serializing_if = "Option::is_none")]
        finish_reason: Option<String>,
    },
    Image {
        images: Vec<ImageAsset>,
    },
    Video {
        video: VideoJob,
    },
}

impl Output {
    /// Assistant reply assembled from streamed text
    pub fn chat(content: impl Into<String>, finish_reason: Option<String>) -> Self {
        Self::Chat {
            message: ChatMessage::new(Role::Assistant, content),
            finish_reason,
        }
    }

    /// Text of a chat reply
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Chat { message, .. } => Some(&message.content),
            _ => None,
        }
    }
}
