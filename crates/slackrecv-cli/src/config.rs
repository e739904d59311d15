use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use slackrecv_relay::RelayOptions;
use slackrecv_slack::ReconnectPolicy;
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

const TOKEN_SETTINGS: &[&str] = &["accessToken", "AccessToken"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlackrecvConfig {
    #[serde(default)]
    pub relay: RelayOptions,
    #[serde(default)]
    pub slack: SlackConfig,
    #[serde(default)]
    pub handlers: Vec<HandlerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlackConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
    #[serde(default = "default_reconnect_initial_secs")]
    pub reconnect_initial_secs: u64,
    #[serde(default = "default_reconnect_max_secs")]
    pub reconnect_max_secs: u64,
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            ping_interval_secs: default_ping_interval_secs(),
            reconnect_initial_secs: default_reconnect_initial_secs(),
            reconnect_max_secs: default_reconnect_max_secs(),
        }
    }
}

impl SlackConfig {
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            initial_delay: Duration::from_secs(self.reconnect_initial_secs.max(1)),
            max_delay: Duration::from_secs(self.reconnect_max_secs.max(self.reconnect_initial_secs)),
        }
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs.max(1))
    }
}

fn default_api_base() -> String {
    slackrecv_slack::api::DEFAULT_API_BASE.to_string()
}
fn default_ping_interval_secs() -> u64 {
    30
}
fn default_reconnect_initial_secs() -> u64 {
    1
}
fn default_reconnect_max_secs() -> u64 {
    60
}

/// What a handler does with a dispatched message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ActionConfig {
    /// Write the message to the log
    Log,
    /// POST the payload as JSON to `url`
    Webhook { url: String },
}

#[derive(Clone, Serialize, Deserialize)]
pub struct HandlerConfig {
    pub name: String,
    #[serde(flatten)]
    pub action: ActionConfig,
    /// Settings exposed to the relay (`accessToken`, `channel`)
    #[serde(default)]
    pub settings: BTreeMap<String, String>,
}

impl std::fmt::Debug for HandlerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerConfig")
            .field("name", &self.name)
            .field("action", &self.action)
            .field("settings", &masked_settings(&self.settings))
            .finish()
    }
}

fn masked_settings(settings: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    settings
        .iter()
        .map(|(k, v)| {
            if TOKEN_SETTINGS.contains(&k.as_str()) {
                (k.clone(), mask_secret(v))
            } else {
                (k.clone(), v.clone())
            }
        })
        .collect()
}

pub fn mask_secret(s: &str) -> String {
    if s.is_empty() {
        return "(empty)".to_string();
    }
    let chars: Vec<char> = s.chars().collect();
    if chars.len() > 7 {
        let prefix: String = chars[..3].iter().collect();
        let suffix: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", prefix, suffix)
    } else {
        "***".to_string()
    }
}

pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".slackrecv")
}

impl SlackrecvConfig {
    pub fn load(custom_path: &Option<PathBuf>) -> Result<Self> {
        let path = custom_path
            .clone()
            .unwrap_or_else(|| config_dir().join("config.toml"));

        // The file holds tokens; refuse group/other-readable configs
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Ok(metadata) = std::fs::metadata(&path) {
                let mode = metadata.permissions().mode();
                if mode & 0o077 != 0 {
                    return Err(anyhow!(
                        "Config file {:?} has overly permissive permissions ({:o}). \
                         It may contain tokens. Fix with: chmod 600 {:?}",
                        path,
                        mode & 0o777,
                        path
                    ));
                }
            }
        }

        let content = std::fs::read_to_string(&path).with_context(|| {
            format!(
                "Failed to read config at {}. Run `slackrecv init` first.",
                path.display()
            )
        })?;

        Self::parse(&content).with_context(|| format!("Failed to parse config at {}", path.display()))
    }

    /// Expand allowed `${VAR}`s, parse TOML and validate
    pub fn parse(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        let config: Self = toml::from_str(&expanded)?;

        let mut names = HashSet::new();
        for handler in &config.handlers {
            if handler.name.trim().is_empty() {
                return Err(anyhow!("Handler names must not be empty"));
            }
            if !names.insert(handler.name.as_str()) {
                return Err(anyhow!("Duplicate handler name '{}'", handler.name));
            }
        }

        for handler in &config.handlers {
            for key in TOKEN_SETTINGS {
                if let Some(token) = handler.settings.get(*key)
                    && content_has_literal_token(content, token)
                {
                    warn!(
                        "Access token for handler '{}' is hardcoded in config file. For security, use environment variables: accessToken = \"${{SLACK_BOT_TOKEN}}\"",
                        handler.name
                    );
                }
            }
        }

        Ok(config)
    }

    pub fn handler(&self, name: &str) -> Option<&HandlerConfig> {
        self.handlers.iter().find(|h| h.name == name)
    }

    /// Copy with every token masked, for display
    pub fn masked(&self) -> Self {
        let mut cfg = self.clone();
        for handler in &mut cfg.handlers {
            handler.settings = masked_settings(&handler.settings);
        }
        cfg
    }
}

/// True if `token` appears verbatim in the unexpanded config text
fn content_has_literal_token(content: &str, token: &str) -> bool {
    !token.is_empty() && content.contains(token)
}

/// Allowlist of environment variable names that may be expanded in config files.
const ALLOWED_ENV_VARS: &[&str] = &[
    "SLACK_BOT_TOKEN",
    "SLACK_BOT_TOKEN_2",
    "SLACKRECV_WEBHOOK_URL",
    "HOME",
    "USER",
];

fn expand_env_vars(s: &str) -> String {
    let mut result = s.to_string();
    let mut pos = 0;
    while pos < result.len() {
        let Some(start) = result[pos..].find("${") else {
            break;
        };
        let abs_start = pos + start;
        let Some(end) = result[abs_start..].find('}') else {
            break;
        };
        let var_name = result[abs_start + 2..abs_start + end].to_string();

        if !ALLOWED_ENV_VARS.contains(&var_name.as_str()) {
            warn!(
                "Skipping expansion of unrecognized env var '{}' in config (not in allowlist)",
                var_name
            );
            // Leave the ${VAR} unexpanded so it's obvious
            pos = abs_start + end + 1;
            continue;
        }

        let value = std::env::var(&var_name).unwrap_or_default();
        let value_len = value.len();
        result = format!(
            "{}{}{}",
            &result[..abs_start],
            value,
            &result[abs_start + end + 1..]
        );
        pos = abs_start + value_len;
    }
    result
}
