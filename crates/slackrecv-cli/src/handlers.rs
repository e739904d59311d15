//! Built-in workflow handlers configured from TOML

use crate::config::{ActionConfig, HandlerConfig};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use slackrecv_core::{DispatchContext, Handler};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

enum Action {
    Log,
    Webhook { client: reqwest::Client, url: Url },
}

/// A handler built from one `[[handlers]]` entry
pub struct ConfiguredHandler {
    name: String,
    settings: BTreeMap<String, String>,
    action: Action,
}

impl ConfiguredHandler {
    pub fn from_config(cfg: &HandlerConfig) -> Result<Self> {
        let action = match &cfg.action {
            ActionConfig::Log => Action::Log,
            ActionConfig::Webhook { url } => {
                let url = Url::parse(url).with_context(|| {
                    format!("Handler '{}' has an invalid webhook url", cfg.name)
                })?;
                let client = reqwest::Client::builder()
                    .timeout(Duration::from_secs(30))
                    .build()?;
                Action::Webhook { client, url }
            }
        };

        Ok(Self {
            name: cfg.name.clone(),
            settings: cfg.settings.clone(),
            action,
        })
    }

    async fn post(client: &reqwest::Client, url: &Url, payload: &Map<String, Value>) -> Result<Value> {
        let response = client.post(url.clone()).json(payload).send().await?;

        if !response.status().is_success() {
            return Err(anyhow!("Webhook returned HTTP {}", response.status()));
        }

        let body = response.text().await?;
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        // Non-JSON replies are passed through as a string
        Ok(serde_json::from_str(&body).unwrap_or(Value::String(body)))
    }
}

#[async_trait]
impl Handler for ConfiguredHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn setting(&self, name: &str) -> Option<String> {
        self.settings.get(name).cloned()
    }

    async fn handle(&self, ctx: &DispatchContext, payload: Map<String, Value>) -> Result<Value> {
        match &self.action {
            Action::Log => {
                let message = payload.get("message").and_then(|v| v.as_str()).unwrap_or("");
                info!("[{}] #{}: {}", self.name, ctx.channel, message);
                Ok(json!({"logged": true}))
            }
            Action::Webhook { client, url } => {
                debug!("[{}] Posting message to {}", self.name, url);
                tokio::select! {
                    biased;
                    _ = ctx.cancel.cancelled() => Err(anyhow!("Relay stopped before the webhook completed")),
                    result = Self::post(client, url, &payload) => result,
                }
            }
        }
    }
}

pub fn build_handlers(configs: &[HandlerConfig]) -> Result<Vec<Arc<dyn Handler>>> {
    configs
        .iter()
        .map(|cfg| Ok(Arc::new(ConfiguredHandler::from_config(cfg)?) as Arc<dyn Handler>))
        .collect()
}
