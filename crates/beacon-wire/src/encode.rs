// Per-format encoders used by the streaming subscriber connections.
use crate::{Event, Message};

/// Newline-delimited JSON: one object per line.
pub fn json_line(m: &Message) -> serde_json::Result<String> {
    Ok(format!("{}\n", serde_json::to_string(m)?))
}

/// Server-sent events frame. Default (`message`) events go out as a bare
/// `data:` line so browser `onmessage` handlers fire; other events carry an
/// explicit `event:` name.
pub fn sse_frame(m: &Message) -> serde_json::Result<String> {
    let json = serde_json::to_string(m)?;
    if m.event == Event::Message {
        Ok(format!("data: {json}\n\n"))
    } else {
        Ok(format!("event: {}\ndata: {json}\n\n", m.event))
    }
}

/// Raw text: the message body only, newlines flattened, one line per event.
/// Non-message events become an empty line.
pub fn raw_line(m: &Message) -> String {
    if m.event == Event::Message {
        format!("{}\n", m.message.replace('\n', " "))
    } else {
        "\n".to_string()
    }
}
