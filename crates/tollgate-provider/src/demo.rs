//! Synthetic outputs served when no provider credential is configured

use crate::types::{ChatPayload, ImageAsset, ImagePayload, Output, Payload, Role, VideoJob, VideoPayload};

const PLACEHOLDER_HOST: &str = "https://placehold.co";

pub fn output(payload: &Payload) -> Output {
    match payload {
        Payload::Chat(chat) => Output::chat(reply(chat), Some("stop".to_owned())),
        Payload::Image(image) => image_output(image),
        Payload::Video(video) => video_output(video),
    }
}

/// Echo of the latest user turn
pub fn reply(chat: &ChatPayload) -> String {
    let last = chat
        .messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map_or("", |m| m.content.trim());

    format!("[demo] No provider is configured. You said: {last}")
}

/// The demo reply cut into word-sized stream chunks
pub fn reply_chunks(chat: &ChatPayload) -> Vec<String> {
    reply(chat).split_inclusive(' ').map(str::to_owned).collect()
}

fn image_output(image: &ImagePayload) -> Output {
    let size = image.size.as_deref().unwrap_or("1024x1024");
    let count = image.n.unwrap_or(1).max(1);

    let images = (0..count)
        .map(|_| ImageAsset {
            url: Some(format!("{PLACEHOLDER_HOST}/{size}?text=demo")),
            b64_json: None,
            revised_prompt: Some(image.prompt.clone()),
        })
        .collect();

    Output::Image { images }
}

fn video_output(video: &VideoPayload) -> Output {
    let size = video.size.as_deref().unwrap_or("1280x720");

    Output::Video {
        video: VideoJob {
            id: format!("demo_{}", uuid::Uuid::new_v4().simple()),
            status: "completed".to_owned(),
            url: Some(format!("{PLACEHOLDER_HOST}/{size}.mp4?text=demo")),
        },
    }
}
