use serde::{Deserialize, Serialize};
use tollgate_core::Feature;

use crate::error::SyncError;

/// Server to client event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum SyncEvent {
    /// A chat reply produced on another device
    ChatMessage {
        request_id: String,
        workspace: String,
        content: String,
        is_demo: bool,
    },
    /// An image or video result produced on another device
    WorkspaceUpdate {
        request_id: String,
        feature: Feature,
        output: serde_json::Value,
        is_demo: bool,
    },
    Heartbeat {
        seq: u64,
    },
}

impl SyncEvent {
    pub fn to_json(&self) -> Result<String, SyncError> {
        serde_json::to_string(self).map_err(SyncError::Encode)
    }
}

/// Client to server message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    HeartbeatAck,
}

impl ClientMessage {
    pub fn parse(text: &str) -> Result<Self, SyncError> {
        serde_json::from_str(text).map_err(SyncError::Decode)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn events_are_type_tagged() {
        let event = SyncEvent::ChatMessage {
            request_id: "req-1".to_owned(),
            workspace: "default".to_owned(),
            content: "hello".to_owned(),
            is_demo: false,
        };

        let value: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "chat_message",
                "requestId": "req-1",
                "workspace": "default",
                "content": "hello",
                "isDemo": false,
            })
        );
    }

    #[test]
    fn workspace_update_carries_feature() {
        let event = SyncEvent::WorkspaceUpdate {
            request_id: "req-2".to_owned(),
            feature: Feature::Image,
            output: json!({"type": "image", "images": []}),
            is_demo: true,
        };

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "workspace_update");
        assert_eq!(value["feature"], "image");
        assert_eq!(value["output"]["type"], "image");
    }

    #[test]
    fn parses_heartbeat_ack() {
        assert_eq!(
            ClientMessage::parse(r#"{"type":"heartbeat_ack"}"#).unwrap(),
            ClientMessage::HeartbeatAck
        );
    }

    #[test]
    fn rejects_unknown_client_message() {
        let err = ClientMessage::parse(r#"{"type":"subscribe"}"#).unwrap_err();
        assert!(matches!(err, SyncError::Decode(_)));
    }
}
