//! Shared types for slackrecv-core

use serde::{Deserialize, Serialize};

/// A channel visible to a gateway credential
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub id: String,
    pub name: String,
}

impl ChannelInfo {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Event received from a chat gateway stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GatewayEvent {
    /// The gateway finished its handshake
    Connected {
        connection_count: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        team: Option<String>,
    },
    /// A chat message arrived in `channel`
    Message {
        channel: String,
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ts: Option<String>,
    },
    /// The credential was rejected. Nothing follows this event.
    InvalidAuth { reason: String },
    /// Transient gateway error
    Error { code: i64, message: String },
    /// Anything the relay does not act on
    Other { kind: String },
}

/// Discriminant of a [`GatewayEvent`], used for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    Message,
    InvalidAuth,
    Error,
    Other,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connected => write!(f, "connected"),
            Self::Message => write!(f, "message"),
            Self::InvalidAuth => write!(f, "invalid_auth"),
            Self::Error => write!(f, "error"),
            Self::Other => write!(f, "other"),
        }
    }
}

impl GatewayEvent {
    pub fn message(channel: impl Into<String>, text: impl Into<String>) -> Self {
        Self::Message {
            channel: channel.into(),
            text: text.into(),
            user: None,
            ts: None,
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Self::Connected { .. } => EventKind::Connected,
            Self::Message { .. } => EventKind::Message,
            Self::InvalidAuth { .. } => EventKind::InvalidAuth,
            Self::Error { .. } => EventKind::Error,
            Self::Other { .. } => EventKind::Other,
        }
    }

    pub fn is_message(&self) -> bool {
        matches!(self, Self::Message { .. })
    }

    /// True for events after which the stream must not be consumed further
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::InvalidAuth { .. })
    }

    /// True for events that are only worth a log line
    pub fn is_informational(&self) -> bool {
        matches!(self, Self::Connected { .. } | Self::Other { .. })
    }
}
