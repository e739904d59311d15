//! In-memory gateway and handler doubles used by the relay tests

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use slackrecv_core::{
    ChannelInfo, DispatchContext, GatewayClient, GatewayConnection, GatewayEvent, Handler,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

pub struct MockConnection {
    events: VecDeque<GatewayEvent>,
    channels: Vec<ChannelInfo>,
    fail_listing: bool,
    hold_open: bool,
}

impl MockConnection {
    pub fn new(events: Vec<GatewayEvent>) -> Self {
        Self {
            events: events.into(),
            channels: Vec::new(),
            fail_listing: false,
            hold_open: false,
        }
    }

    pub fn with_channels(mut self, channels: Vec<ChannelInfo>) -> Self {
        self.channels = channels;
        self
    }

    pub fn failing_channel_list(mut self) -> Self {
        self.fail_listing = true;
        self
    }

    /// Block forever once the scripted events run out instead of closing
    pub fn held_open(mut self) -> Self {
        self.hold_open = true;
        self
    }

    pub fn remaining(&self) -> usize {
        self.events.len()
    }
}

#[async_trait]
impl GatewayConnection for MockConnection {
    async fn next_event(&mut self) -> Option<GatewayEvent> {
        match self.events.pop_front() {
            Some(event) => Some(event),
            None if self.hold_open => std::future::pending().await,
            None => None,
        }
    }

    async fn list_channels(&self) -> Result<Vec<ChannelInfo>> {
        if self.fail_listing {
            return Err(anyhow!("channel listing unavailable"));
        }
        Ok(self.channels.clone())
    }
}

/// Hands out scripted connections keyed by credential
#[derive(Default)]
pub struct MockGateway {
    scripts: Mutex<HashMap<String, MockConnection>>,
    pub connects: Mutex<Vec<String>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, credential: &str, connection: MockConnection) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(credential.to_string(), connection);
        self
    }
}

#[async_trait]
impl GatewayClient for MockGateway {
    async fn connect(&self, credential: &str) -> Result<Box<dyn GatewayConnection>> {
        self.connects.lock().unwrap().push(credential.to_string());
        let connection = self
            .scripts
            .lock()
            .unwrap()
            .remove(credential)
            .ok_or_else(|| anyhow!("no route to gateway for {}", credential))?;
        Ok(Box::new(connection))
    }
}

/// Handler that records every payload it receives
pub struct RecordingHandler {
    name: String,
    settings: HashMap<String, String>,
    fail: bool,
    pub received: Arc<Mutex<Vec<Map<String, Value>>>>,
}

impl RecordingHandler {
    pub fn new(name: &str, settings: &[(&str, &str)]) -> Self {
        Self {
            name: name.to_string(),
            settings: settings
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            fail: false,
            received: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn messages(&self) -> Vec<String> {
        self.received
            .lock()
            .unwrap()
            .iter()
            .filter_map(|p| p.get("message").and_then(|v| v.as_str()).map(String::from))
            .collect()
    }
}

#[async_trait]
impl Handler for RecordingHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn setting(&self, name: &str) -> Option<String> {
        self.settings.get(name).cloned()
    }

    async fn handle(&self, _ctx: &DispatchContext, payload: Map<String, Value>) -> Result<Value> {
        self.received.lock().unwrap().push(payload);
        if self.fail {
            return Err(anyhow!("action failed"));
        }
        Ok(json!({"ok": true}))
    }
}
