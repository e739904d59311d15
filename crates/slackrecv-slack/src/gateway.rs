//! Slack RTM gateway client
//!
//! `connect` spawns a connection manager task that owns the WebSocket,
//! reconnects with exponential backoff, and pushes decoded events into an
//! mpsc channel read by [`SlackConnection::next_event`].

use crate::api::{ApiError, RtmSession, SlackApi};
use crate::rtm::{RtmFrame, parse_frame, ping_frame};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::{Sink, SinkExt, StreamExt};
use slackrecv_core::{ChannelInfo, GatewayClient, GatewayConnection, GatewayEvent};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Interval;
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tokio_tungstenite::connect_async;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

/// Code used for errors raised on our side of the socket
pub const LOCAL_ERROR_CODE: i64 = -1;

const EVENT_BUFFER: usize = 64;

/// Delay schedule between reconnection attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (0-based), doubling up to `max_delay`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

/// [`GatewayClient`] backed by Slack's RTM API
#[derive(Debug, Clone)]
pub struct SlackGateway {
    api: SlackApi,
    reconnect: ReconnectPolicy,
    ping_interval: Duration,
}

impl SlackGateway {
    pub fn new() -> Result<Self> {
        Ok(Self::with_api(SlackApi::new()?))
    }

    pub fn with_api(api: SlackApi) -> Self {
        Self {
            api,
            reconnect: ReconnectPolicy::default(),
            ping_interval: Duration::from_secs(30),
        }
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_ping_interval(mut self, ping_interval: Duration) -> Self {
        self.ping_interval = ping_interval;
        self
    }

    pub fn api(&self) -> &SlackApi {
        &self.api
    }
}

#[async_trait]
impl GatewayClient for SlackGateway {
    async fn connect(&self, credential: &str) -> Result<Box<dyn GatewayConnection>> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let cancel = CancellationToken::new();

        let manager = ConnectionManager {
            api: self.api.clone(),
            token: credential.to_string(),
            reconnect: self.reconnect,
            ping_interval: self.ping_interval,
            events: tx,
            cancel: cancel.clone(),
        };
        tokio::spawn(manager.run());

        Ok(Box::new(SlackConnection {
            api: self.api.clone(),
            token: credential.to_string(),
            events: rx,
            _manager: cancel.drop_guard(),
        }))
    }
}

/// A live RTM connection. Dropping it stops the connection manager.
pub struct SlackConnection {
    api: SlackApi,
    token: String,
    events: mpsc::Receiver<GatewayEvent>,
    _manager: DropGuard,
}

impl std::fmt::Debug for SlackConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlackConnection")
            .field("api", &self.api.base().as_str())
            .field("token", &"***")
            .finish()
    }
}

#[async_trait]
impl GatewayConnection for SlackConnection {
    async fn next_event(&mut self) -> Option<GatewayEvent> {
        self.events.recv().await
    }

    async fn list_channels(&self) -> Result<Vec<ChannelInfo>> {
        self.api.list_channels(&self.token).await
    }
}

/// How an RTM socket session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    /// Server said goodbye or closed the socket; reconnect
    Closed { greeted: bool },
    /// Connection dropped by its owner; stop for good
    Shutdown,
}

struct ConnectionManager {
    api: SlackApi,
    token: String,
    reconnect: ReconnectPolicy,
    ping_interval: Duration,
    events: mpsc::Sender<GatewayEvent>,
    cancel: CancellationToken,
}

impl ConnectionManager {
    async fn run(self) {
        let mut attempt = 0u32;
        let mut connection_count = 0u32;

        loop {
            if self.cancel.is_cancelled() || self.events.is_closed() {
                break;
            }

            let session = match self.api.rtm_connect(&self.token).await {
                Ok(session) => session,
                Err(e) => {
                    if let Some(api_err) = e.downcast_ref::<ApiError>()
                        && api_err.is_auth_failure()
                    {
                        warn!("Slack rejected the token: {}", api_err.code);
                        self.emit(GatewayEvent::InvalidAuth {
                            reason: api_err.code.clone(),
                        })
                        .await;
                        break;
                    }
                    if !self.emit(local_error(&e)).await || !self.backoff(attempt).await {
                        break;
                    }
                    attempt = attempt.saturating_add(1);
                    continue;
                }
            };

            match self.run_session(&session, &mut connection_count).await {
                Ok(SessionEnd::Shutdown) => break,
                Ok(SessionEnd::Closed { greeted }) => {
                    if greeted {
                        attempt = 0;
                    }
                    info!("Slack RTM socket closed, reconnecting");
                }
                Err(e) => {
                    if !self.emit(local_error(&e)).await {
                        break;
                    }
                }
            }

            if !self.backoff(attempt).await {
                break;
            }
            attempt = attempt.saturating_add(1);
        }

        debug!("Slack connection manager exited");
    }

    async fn run_session(
        &self,
        session: &RtmSession,
        connection_count: &mut u32,
    ) -> Result<SessionEnd> {
        let (stream, _response) = connect_async(session.url.as_str())
            .await
            .context("Failed to connect Slack RTM websocket")?;
        let (mut sink, mut source) = stream.split();

        let mut ping = tokio::time::interval(self.ping_interval);
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ping.tick().await;
        let mut ping_id = 0u64;
        let mut greeted = false;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    let _ = sink.close().await;
                    return Ok(SessionEnd::Shutdown);
                }
                _ = self.events.closed() => {
                    let _ = sink.close().await;
                    return Ok(SessionEnd::Shutdown);
                }
                _ = ping.tick() => send_ping(&mut sink, &mut ping_id).await?,
                msg = source.next() => {
                    let text = match msg {
                        None | Some(Ok(WsMessage::Close(_))) => {
                            return Ok(SessionEnd::Closed { greeted });
                        }
                        Some(Err(e)) => return Err(e).context("Slack RTM websocket error"),
                        Some(Ok(WsMessage::Text(text))) => text.as_str().to_string(),
                        Some(Ok(WsMessage::Binary(bytes))) => {
                            String::from_utf8_lossy(&bytes).into_owned()
                        }
                        Some(Ok(_)) => continue,
                    };

                    let event = match parse_frame(&text) {
                        Ok(RtmFrame::Hello) => {
                            greeted = true;
                            *connection_count += 1;
                            GatewayEvent::Connected {
                                connection_count: *connection_count,
                                user: session.user.clone(),
                                team: session.team.clone(),
                            }
                        }
                        Ok(RtmFrame::Goodbye) => {
                            let _ = sink.close().await;
                            return Ok(SessionEnd::Closed { greeted });
                        }
                        Ok(RtmFrame::Event(event)) => event,
                        Err(e) => {
                            debug!("Skipping RTM frame: {:#}", e);
                            continue;
                        }
                    };

                    if !self.deliver(event, &mut sink, &mut ping, &mut ping_id).await? {
                        return Ok(SessionEnd::Shutdown);
                    }
                }
            }
        }
    }

    /// Hand a socket event to the connection, keeping pings going while the
    /// buffer is full. Returns false once nobody listens.
    async fn deliver<S>(
        &self,
        event: GatewayEvent,
        sink: &mut S,
        ping: &mut Interval,
        ping_id: &mut u64,
    ) -> Result<bool>
    where
        S: Sink<WsMessage, Error = tungstenite::Error> + Unpin,
    {
        let permit = loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(false),
                permit = self.events.reserve() => break permit,
                _ = ping.tick() => send_ping(sink, ping_id).await?,
            }
        };

        match permit {
            Ok(permit) => {
                permit.send(event);
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    /// Push an event to the connection. Returns false once nobody listens.
    async fn emit(&self, event: GatewayEvent) -> bool {
        self.events.send(event).await.is_ok()
    }

    /// Sleep before the next attempt. Returns false if shut down meanwhile.
    async fn backoff(&self, attempt: u32) -> bool {
        let delay = self.reconnect.delay_for(attempt);
        debug!("Reconnecting to Slack RTM in {:?}", delay);
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = self.events.closed() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}

async fn send_ping<S>(sink: &mut S, ping_id: &mut u64) -> Result<()>
where
    S: Sink<WsMessage, Error = tungstenite::Error> + Unpin,
{
    *ping_id += 1;
    sink.send(WsMessage::Text(ping_frame(*ping_id).into()))
        .await
        .context("Failed to send RTM ping")
}

fn local_error(err: &anyhow::Error) -> GatewayEvent {
    GatewayEvent::Error {
        code: LOCAL_ERROR_CODE,
        message: format!("{:#}", err),
    }
}
