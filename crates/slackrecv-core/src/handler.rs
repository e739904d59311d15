//! Host handler interface

use crate::error::RelayError;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

/// Setting key holding the gateway credential
pub const ACCESS_TOKEN_SETTING: &str = "accessToken";
/// Older spelling of [`ACCESS_TOKEN_SETTING`], still accepted
pub const LEGACY_ACCESS_TOKEN_SETTING: &str = "AccessToken";
/// Setting key holding the optional channel name filter
pub const CHANNEL_SETTING: &str = "channel";
/// The single key of every dispatched payload
pub const MESSAGE_KEY: &str = "message";

/// A host-registered workflow action
#[async_trait]
pub trait Handler: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Look up a configuration value for this handler
    fn setting(&self, name: &str) -> Option<String>;

    /// Run the action. The payload is always `{"message": <text>}`.
    async fn handle(&self, ctx: &DispatchContext, payload: Map<String, Value>) -> Result<Value>;
}

/// Per-dispatch context handed to [`Handler::handle`]
#[derive(Debug, Clone)]
pub struct DispatchContext {
    pub handler: String,
    pub channel: String,
    pub received_at: DateTime<Utc>,
    /// Cancelled when the relay is asked to stop
    pub cancel: CancellationToken,
}

/// Build the payload for a message dispatch
pub fn message_payload(text: &str) -> Map<String, Value> {
    let mut payload = Map::new();
    payload.insert(MESSAGE_KEY.to_string(), Value::String(text.to_string()));
    payload
}

/// Settings the relay reads from a handler
#[derive(Clone, PartialEq, Eq)]
pub struct HandlerSettings {
    pub access_token: String,
    /// Channel name to filter on. Empty strings count as unset.
    pub channel: Option<String>,
}

impl std::fmt::Debug for HandlerSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerSettings")
            .field("access_token", &"***")
            .field("channel", &self.channel)
            .finish()
    }
}

impl HandlerSettings {
    pub fn from_handler(handler: &dyn Handler) -> Result<Self, RelayError> {
        let access_token = handler
            .setting(ACCESS_TOKEN_SETTING)
            .or_else(|| handler.setting(LEGACY_ACCESS_TOKEN_SETTING))
            .ok_or_else(|| RelayError::MissingSetting {
                handler: handler.name().to_string(),
                setting: ACCESS_TOKEN_SETTING,
            })?;

        let channel = handler
            .setting(CHANNEL_SETTING)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());

        Ok(Self {
            access_token,
            channel,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct StaticHandler {
        settings: HashMap<String, String>,
    }

    impl StaticHandler {
        fn new(pairs: &[(&str, &str)]) -> Self {
            Self {
                settings: pairs
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            }
        }
    }

    #[async_trait]
    impl Handler for StaticHandler {
        fn name(&self) -> &str {
            "static"
        }

        fn setting(&self, name: &str) -> Option<String> {
            self.settings.get(name).cloned()
        }

        async fn handle(&self, _ctx: &DispatchContext, _payload: Map<String, Value>) -> Result<Value> {
            Ok(Value::Null)
        }
    }

    #[test]
    fn test_message_payload_single_key() {
        let payload = message_payload("deploy now");
        assert_eq!(payload.len(), 1);
        assert_eq!(payload["message"], "deploy now");
    }

    #[test]
    fn test_settings_with_channel() {
        let h = StaticHandler::new(&[("accessToken", "xoxb-1"), ("channel", "general")]);
        let settings = HandlerSettings::from_handler(&h).unwrap();
        assert_eq!(settings.access_token, "xoxb-1");
        assert_eq!(settings.channel.as_deref(), Some("general"));
    }

    #[test]
    fn test_settings_blank_channel_is_unset() {
        let h = StaticHandler::new(&[("accessToken", "xoxb-1"), ("channel", "  ")]);
        let settings = HandlerSettings::from_handler(&h).unwrap();
        assert!(settings.channel.is_none());
    }

    #[test]
    fn test_settings_legacy_token_key() {
        let h = StaticHandler::new(&[("AccessToken", "xoxb-legacy")]);
        let settings = HandlerSettings::from_handler(&h).unwrap();
        assert_eq!(settings.access_token, "xoxb-legacy");
    }

    #[test]
    fn test_settings_missing_token() {
        let h = StaticHandler::new(&[("channel", "general")]);
        let err = HandlerSettings::from_handler(&h).unwrap_err();
        assert!(matches!(err, RelayError::MissingSetting { .. }));
    }

    #[test]
    fn test_settings_debug_masks_token() {
        let h = StaticHandler::new(&[("accessToken", "xoxb-secret")]);
        let settings = HandlerSettings::from_handler(&h).unwrap();
        assert!(!format!("{:?}", settings).contains("xoxb-secret"));
    }
}
