//! Channel-name resolution and the per-handler channel filter

use slackrecv_core::{ChannelInfo, GatewayConnection, RelayError};
use tracing::{debug, warn};

/// Return the id of the first channel named exactly `name`
pub fn find_channel_id<'a>(channels: &'a [ChannelInfo], name: &str) -> Option<&'a str> {
    channels
        .iter()
        .find(|ch| ch.name == name)
        .map(|ch| ch.id.as_str())
}

/// Resolve a channel name to its id through the gateway.
///
/// Returns an empty string when the listing fails or no channel matches.
/// A filter built from an empty id matches no message.
pub async fn resolve_channel_id(connection: &dyn GatewayConnection, name: &str) -> String {
    let channels = match connection.list_channels().await {
        Ok(channels) => channels,
        Err(e) => {
            let err = RelayError::ChannelResolution {
                channel: name.to_string(),
                reason: format!("{:#}", e),
            };
            warn!("{}", err);
            return String::new();
        }
    };

    match find_channel_id(&channels, name) {
        Some(id) => {
            debug!("Resolved channel '{}' to {}", name, id);
            id.to_string()
        }
        None => {
            let err = RelayError::ChannelResolution {
                channel: name.to_string(),
                reason: format!("no match among {} channels", channels.len()),
            };
            warn!("{}", err);
            String::new()
        }
    }
}

/// Which message channels a handler receives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelFilter {
    /// No filter configured
    Any,
    /// Only messages whose channel id equals `id`
    Only { name: String, id: String },
}

impl ChannelFilter {
    /// Build the filter for an optional channel name, resolving it once
    pub async fn resolve(connection: &dyn GatewayConnection, channel: Option<&str>) -> Self {
        match channel {
            None => Self::Any,
            Some(name) => Self::Only {
                name: name.to_string(),
                id: resolve_channel_id(connection, name).await,
            },
        }
    }

    pub fn matches(&self, channel_id: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Only { id, .. } => !id.is_empty() && id == channel_id,
        }
    }
}

impl std::fmt::Display for ChannelFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Any => write!(f, "any channel"),
            Self::Only { name, id } if id.is_empty() => write!(f, "#{} (unresolved)", name),
            Self::Only { name, id } => write!(f, "#{} ({})", name, id),
        }
    }
}
