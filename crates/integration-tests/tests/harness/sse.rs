//! Minimal server-sent events parser

/// One `event:`/`data:` block
#[derive(Debug)]
pub struct SseEvent {
    pub event: String,
    pub data: serde_json::Value,
}

pub fn parse(body: &str) -> Vec<SseEvent> {
    body.split("\n\n")
        .filter_map(|block| {
            let mut event = None;
            let mut data = String::new();

            for line in block.lines() {
                if let Some(name) = line.strip_prefix("event:") {
                    event = Some(name.trim().to_owned());
                } else if let Some(chunk) = line.strip_prefix("data:") {
                    data.push_str(chunk.strip_prefix(' ').unwrap_or(chunk));
                }
            }

            let event = event?;
            let data = serde_json::from_str(&data).ok()?;
            Some(SseEvent { event, data })
        })
        .collect()
}
