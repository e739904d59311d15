//! Minimal Slack Web API client: `rtm.connect` and `conversations.list`

use anyhow::{Context, Result, anyhow};
use serde_json::Value;
use slackrecv_core::ChannelInfo;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

pub const DEFAULT_API_BASE: &str = "https://slack.com/api/";

/// Page size requested from `conversations.list`
const CHANNEL_PAGE_LIMIT: &str = "200";

/// Error codes that mean the token will never work
const AUTH_ERROR_CODES: &[&str] = &[
    "invalid_auth",
    "not_authed",
    "account_inactive",
    "token_revoked",
    "token_expired",
];

/// A Slack Web API call that returned `"ok": false`
#[derive(Debug, Clone, Error)]
#[error("Slack API error in {method}: {code}")]
pub struct ApiError {
    pub method: String,
    pub code: String,
}

impl ApiError {
    pub fn is_auth_failure(&self) -> bool {
        AUTH_ERROR_CODES.contains(&self.code.as_str())
    }
}

/// Result of `rtm.connect`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtmSession {
    pub url: String,
    pub user: Option<String>,
    pub team: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SlackApi {
    client: reqwest::Client,
    base: Url,
}

impl SlackApi {
    pub fn new() -> Result<Self> {
        Self::with_base(DEFAULT_API_BASE)
    }

    /// Use a different API root, e.g. an Enterprise Grid host or a test server
    pub fn with_base(base: &str) -> Result<Self> {
        let mut base = Url::parse(base).with_context(|| format!("Invalid Slack API base: {}", base))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self { client, base })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Call a Slack Web API method
    async fn call(&self, token: &str, method: &str, params: &[(&str, &str)]) -> Result<Value> {
        let url = self.base.join(method)?;
        debug!("Calling Slack API {}", method);

        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .query(params)
            .send()
            .await
            .with_context(|| format!("Slack API request {} failed", method))?;

        if !response.status().is_success() {
            return Err(anyhow!("Slack API HTTP error: {}", response.status()));
        }

        let body: Value = response.json().await?;

        if body.get("ok").and_then(|v| v.as_bool()) != Some(true) {
            let code = body
                .get("error")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown");
            return Err(ApiError {
                method: method.to_string(),
                code: code.to_string(),
            }
            .into());
        }

        Ok(body)
    }

    /// Ask Slack for a fresh RTM WebSocket URL
    pub async fn rtm_connect(&self, token: &str) -> Result<RtmSession> {
        let body = self.call(token, "rtm.connect", &[]).await?;
        parse_rtm_session(&body)
    }

    /// All non-archived public and private channels visible to `token`
    pub async fn list_channels(&self, token: &str) -> Result<Vec<ChannelInfo>> {
        let mut channels = Vec::new();
        let mut cursor = String::new();

        loop {
            let mut params = vec![
                ("types", "public_channel,private_channel"),
                ("exclude_archived", "true"),
                ("limit", CHANNEL_PAGE_LIMIT),
            ];
            if !cursor.is_empty() {
                params.push(("cursor", cursor.as_str()));
            }

            let body = self.call(token, "conversations.list", &params).await?;
            let (page, next) = parse_channel_page(&body);
            channels.extend(page);

            match next {
                Some(next) => cursor = next,
                None => break,
            }
        }

        debug!("Listed {} Slack channels", channels.len());
        Ok(channels)
    }
}

pub(crate) fn parse_rtm_session(body: &Value) -> Result<RtmSession> {
    let url = body
        .get("url")
        .and_then(|v| v.as_str())
        .filter(|u| !u.is_empty())
        .ok_or_else(|| anyhow!("rtm.connect response has no url"))?;

    let str_at = |pointer: &str| {
        body.pointer(pointer)
            .and_then(|v| v.as_str())
            .map(String::from)
    };

    Ok(RtmSession {
        url: url.to_string(),
        user: str_at("/self/name").or_else(|| str_at("/self/id")),
        team: str_at("/team/name").or_else(|| str_at("/team/id")),
    })
}

/// Parse one `conversations.list` page into channels and the next cursor
pub(crate) fn parse_channel_page(body: &Value) -> (Vec<ChannelInfo>, Option<String>) {
    let channels = body
        .get("channels")
        .and_then(|v| v.as_array())
        .map(|list| {
            list.iter()
                .filter_map(|ch| {
                    let id = ch.get("id").and_then(|v| v.as_str())?;
                    let name = ch.get("name").and_then(|v| v.as_str())?;
                    Some(ChannelInfo::new(id, name))
                })
                .collect()
        })
        .unwrap_or_default();

    let next = body
        .pointer("/response_metadata/next_cursor")
        .and_then(|v| v.as_str())
        .filter(|c| !c.is_empty())
        .map(String::from);

    (channels, next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_server::serve_http;
    use serde_json::json;

    #[test]
    fn test_auth_error_codes() {
        let err = ApiError {
            method: "rtm.connect".into(),
            code: "invalid_auth".into(),
        };
        assert!(err.is_auth_failure());

        let err = ApiError {
            method: "rtm.connect".into(),
            code: "ratelimited".into(),
        };
        assert!(!err.is_auth_failure());

        // A scope problem is not a dead token
        let err = ApiError {
            method: "rtm.connect".into(),
            code: "no_permission".into(),
        };
        assert!(!err.is_auth_failure());
    }

    #[test]
    fn test_base_gets_trailing_slash() {
        let api = SlackApi::with_base("http://localhost:9999/api").unwrap();
        assert_eq!(api.base().as_str(), "http://localhost:9999/api/");
        assert_eq!(
            api.base().join("rtm.connect").unwrap().as_str(),
            "http://localhost:9999/api/rtm.connect"
        );
    }

    #[test]
    fn test_parse_rtm_session() {
        let body = json!({
            "ok": true,
            "url": "wss://example.invalid/websocket/abc",
            "self": {"id": "U0BOT", "name": "relaybot"},
            "team": {"id": "T1", "name": "Acme"}
        });
        let session = parse_rtm_session(&body).unwrap();
        assert_eq!(session.url, "wss://example.invalid/websocket/abc");
        assert_eq!(session.user.as_deref(), Some("relaybot"));
        assert_eq!(session.team.as_deref(), Some("Acme"));

        assert!(parse_rtm_session(&json!({"ok": true})).is_err());
    }

    #[test]
    fn test_parse_channel_page() {
        let body = json!({
            "ok": true,
            "channels": [
                {"id": "C1", "name": "general"},
                {"id": "C2", "name": "dev"},
                {"id": "C3"}
            ],
            "response_metadata": {"next_cursor": "dGVhbTpDMDYx"}
        });
        let (channels, next) = parse_channel_page(&body);
        assert_eq!(
            channels,
            vec![ChannelInfo::new("C1", "general"), ChannelInfo::new("C2", "dev")]
        );
        assert_eq!(next.as_deref(), Some("dGVhbTpDMDYx"));

        let (_, last) = parse_channel_page(&json!({"ok": true, "channels": [],
            "response_metadata": {"next_cursor": ""}}));
        assert!(last.is_none());
    }

    #[tokio::test]
    async fn test_list_channels_follows_cursor() {
        let base = serve_http(|target| {
            if target.contains("cursor=page2") {
                json!({"ok": true, "channels": [{"id": "C2", "name": "dev"}],
                    "response_metadata": {"next_cursor": ""}})
            } else {
                json!({"ok": true, "channels": [{"id": "C1", "name": "general"}],
                    "response_metadata": {"next_cursor": "page2"}})
            }
        })
        .await;

        let api = SlackApi::with_base(&base).unwrap();
        let channels = api.list_channels("xoxb-test").await.unwrap();
        assert_eq!(
            channels,
            vec![ChannelInfo::new("C1", "general"), ChannelInfo::new("C2", "dev")]
        );
    }

    #[tokio::test]
    async fn test_rtm_connect_reports_api_error() {
        let base = serve_http(|_| json!({"ok": false, "error": "invalid_auth"})).await;

        let api = SlackApi::with_base(&base).unwrap();
        let err = api.rtm_connect("xoxb-bad").await.unwrap_err();
        let api_err = err.downcast_ref::<ApiError>().expect("should be an ApiError");
        assert_eq!(api_err.method, "rtm.connect");
        assert!(api_err.is_auth_failure());
    }
}
