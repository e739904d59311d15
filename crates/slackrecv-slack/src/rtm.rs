//! RTM frame decoding

use anyhow::{Context, Result};
use serde_json::{Value, json};
use slackrecv_core::GatewayEvent;

/// A decoded RTM frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtmFrame {
    /// Handshake finished; the manager turns this into `Connected`
    Hello,
    /// The server is about to close the socket
    Goodbye,
    /// Everything else, already mapped to a gateway event
    Event(GatewayEvent),
}

/// Decode one RTM text frame
pub fn parse_frame(text: &str) -> Result<RtmFrame> {
    let value: Value = serde_json::from_str(text).context("Malformed RTM frame")?;

    // Replies to frames we sent (pings) carry no "type"
    if value.get("reply_to").is_some() && value.get("type").is_none() {
        if value.get("ok").and_then(|v| v.as_bool()) == Some(false) {
            return Ok(RtmFrame::Event(error_event(&value)));
        }
        return Ok(RtmFrame::Event(GatewayEvent::Other {
            kind: "reply".to_string(),
        }));
    }

    let kind = value.get("type").and_then(|v| v.as_str()).unwrap_or("");
    let frame = match kind {
        "hello" => RtmFrame::Hello,
        "goodbye" => RtmFrame::Goodbye,
        "message" => RtmFrame::Event(message_event(&value)),
        "error" => RtmFrame::Event(error_event(&value)),
        "" => RtmFrame::Event(GatewayEvent::Other {
            kind: "unknown".to_string(),
        }),
        other => RtmFrame::Event(GatewayEvent::Other {
            kind: other.to_string(),
        }),
    };
    Ok(frame)
}

/// Message subtypes that still carry a message someone posted. Every other
/// subtype (edits, deletions, joins, topic changes) is a channel notice.
const RELAYED_SUBTYPES: &[&str] = &["bot_message", "me_message", "thread_broadcast", "file_share"];

fn message_event(value: &Value) -> GatewayEvent {
    let str_of = |key: &str| value.get(key).and_then(|s| s.as_str()).map(String::from);

    if let Some(subtype) = str_of("subtype")
        && !RELAYED_SUBTYPES.contains(&subtype.as_str())
    {
        return GatewayEvent::Other { kind: subtype };
    }

    let text = str_of("text").unwrap_or_default();
    if text.is_empty() {
        return GatewayEvent::Other {
            kind: "empty_message".to_string(),
        };
    }

    GatewayEvent::Message {
        channel: str_of("channel").unwrap_or_default(),
        text,
        user: str_of("user"),
        ts: str_of("ts"),
    }
}

fn error_event(value: &Value) -> GatewayEvent {
    let error = value.get("error").unwrap_or(&Value::Null);
    GatewayEvent::Error {
        code: error.get("code").and_then(|v| v.as_i64()).unwrap_or(0),
        message: error
            .get("msg")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown RTM error")
            .to_string(),
    }
}

/// Keepalive frame with a caller-chosen id
pub fn ping_frame(id: u64) -> String {
    json!({"id": id, "type": "ping"}).to_string()
}
