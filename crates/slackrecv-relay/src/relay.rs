//! Event relay: one dispatch loop per registered handler
//!
//! Each handler gets its own gateway connection and its own tokio task. All
//! loops share one cancellation token so a single `stop()` reaches every
//! task, and `wait()` joins the whole group.

use crate::channel::ChannelFilter;
use anyhow::{Result, bail};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use slackrecv_core::{
    DispatchContext, GatewayClient, GatewayConnection, GatewayEvent, Handler, HandlerSettings,
    RelayError, message_payload,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Relay behaviour switches
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayOptions {
    /// Stop every handler loop, not just the affected one, when a
    /// credential is rejected
    #[serde(default)]
    pub halt_all_on_invalid_auth: bool,
}

/// Why a dispatch loop returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// The gateway closed the event stream
    StreamClosed,
    /// A stop was requested
    Stopped,
    /// The gateway rejected the credential
    InvalidAuth,
}

impl std::fmt::Display for LoopExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StreamClosed => write!(f, "stream closed"),
            Self::Stopped => write!(f, "stopped"),
            Self::InvalidAuth => write!(f, "invalid auth"),
        }
    }
}

/// Counters from one finished dispatch loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    pub exit: LoopExit,
    pub dispatched: usize,
    pub failed: usize,
}

/// Final state of one handler's loop, returned by [`EventRelay::wait`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerReport {
    pub handler: String,
    pub outcome: LoopOutcome,
}

/// Consume `connection` until it closes, `cancel` fires, or the credential
/// is rejected, dispatching matching message events to `handler`.
pub async fn dispatch_loop(
    handler: &dyn Handler,
    connection: &mut dyn GatewayConnection,
    filter: &ChannelFilter,
    cancel: &CancellationToken,
) -> LoopOutcome {
    let mut outcome = LoopOutcome {
        exit: LoopExit::StreamClosed,
        dispatched: 0,
        failed: 0,
    };

    loop {
        if cancel.is_cancelled() {
            outcome.exit = LoopExit::Stopped;
            break;
        }

        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                outcome.exit = LoopExit::Stopped;
                break;
            }
            event = connection.next_event() => event,
        };

        let Some(event) = event else {
            outcome.exit = LoopExit::StreamClosed;
            break;
        };

        match event {
            GatewayEvent::Connected {
                connection_count,
                user,
                team,
            } => {
                debug!(
                    "[{}] Gateway connected (count: {}, user: {}, team: {})",
                    handler.name(),
                    connection_count,
                    user.as_deref().unwrap_or("-"),
                    team.as_deref().unwrap_or("-"),
                );
            }
            GatewayEvent::Message { channel, text, .. } => {
                if !filter.matches(&channel) {
                    trace!(
                        "[{}] Skipping message from {} (filter: {})",
                        handler.name(),
                        channel,
                        filter
                    );
                    continue;
                }

                debug!("[{}] Message from {} ({} chars)", handler.name(), channel, text.len());

                let ctx = DispatchContext {
                    handler: handler.name().to_string(),
                    channel,
                    received_at: Utc::now(),
                    cancel: cancel.clone(),
                };

                match handler.handle(&ctx, message_payload(&text)).await {
                    Ok(_) => {
                        outcome.dispatched += 1;
                        debug!("[{}] Ran handler", handler.name());
                    }
                    Err(e) => {
                        outcome.failed += 1;
                        let err = RelayError::Handler {
                            handler: handler.name().to_string(),
                            source: e,
                        };
                        error!("{:#}", anyhow::Error::from(err));
                    }
                }
            }
            GatewayEvent::InvalidAuth { reason } => {
                let err = RelayError::InvalidAuth {
                    handler: handler.name().to_string(),
                    reason,
                };
                error!("{}", err);
                outcome.exit = LoopExit::InvalidAuth;
                break;
            }
            GatewayEvent::Error { code, message } => {
                let err = RelayError::Gateway { code, message };
                warn!("[{}] {}", handler.name(), err);
            }
            GatewayEvent::Other { kind } => {
                trace!("[{}] Ignoring {} event", handler.name(), kind);
            }
        }
    }

    outcome
}

/// Relays gateway message events into registered handlers
pub struct EventRelay {
    gateway: Arc<dyn GatewayClient>,
    handlers: Vec<Arc<dyn Handler>>,
    options: RelayOptions,
    cancel: CancellationToken,
    started: AtomicBool,
    tasks: Mutex<JoinSet<HandlerReport>>,
}

impl EventRelay {
    pub fn new(gateway: Arc<dyn GatewayClient>, handlers: Vec<Arc<dyn Handler>>) -> Self {
        Self::with_options(gateway, handlers, RelayOptions::default())
    }

    pub fn with_options(
        gateway: Arc<dyn GatewayClient>,
        handlers: Vec<Arc<dyn Handler>>,
        options: RelayOptions,
    ) -> Self {
        Self {
            gateway,
            handlers,
            options,
            cancel: CancellationToken::new(),
            started: AtomicBool::new(false),
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    /// Connect every handler and spawn its dispatch loop.
    ///
    /// Handlers that are misconfigured or fail to connect are logged and
    /// skipped. Returns the number of loops started. A relay starts once;
    /// later calls fail without opening new connections.
    pub async fn start(&self) -> Result<usize> {
        if self.started.swap(true, Ordering::SeqCst) {
            bail!("Event relay already started");
        }
        info!("Starting event relay for {} handlers", self.handlers.len());
        let mut started = 0;

        for handler in &self.handlers {
            let settings = match HandlerSettings::from_handler(handler.as_ref()) {
                Ok(settings) => settings,
                Err(e) => {
                    warn!("Skipping handler: {}", e);
                    continue;
                }
            };

            let mut connection = match self.gateway.connect(&settings.access_token).await {
                Ok(connection) => connection,
                Err(e) => {
                    let err = RelayError::Connect {
                        handler: handler.name().to_string(),
                        source: e,
                    };
                    error!("{:#}", anyhow::Error::from(err));
                    continue;
                }
            };

            let filter =
                ChannelFilter::resolve(connection.as_ref(), settings.channel.as_deref()).await;
            info!("Handler '{}' listening on {}", handler.name(), filter);

            let handler = Arc::clone(handler);
            let cancel = self.cancel.clone();
            let halt_all = self.options.halt_all_on_invalid_auth;

            self.tasks.lock().await.spawn(async move {
                let outcome =
                    dispatch_loop(handler.as_ref(), connection.as_mut(), &filter, &cancel).await;

                if outcome.exit == LoopExit::InvalidAuth && halt_all {
                    warn!("Stopping all handlers after credential rejection");
                    cancel.cancel();
                }

                info!(
                    "Handler '{}' loop ended: {} ({} dispatched, {} failed)",
                    handler.name(),
                    outcome.exit,
                    outcome.dispatched,
                    outcome.failed
                );

                HandlerReport {
                    handler: handler.name().to_string(),
                    outcome,
                }
            });
            started += 1;
        }

        info!("Event relay started {} dispatch loops", started);
        Ok(started)
    }

    /// Request every dispatch loop to stop.
    ///
    /// Loops observe this between events and while waiting for the next one;
    /// an in-flight handler call is allowed to finish.
    pub fn stop(&self) {
        info!("Stopping event relay");
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// A clone of the relay's stop token
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for all spawned loops to finish
    pub async fn wait(&self) -> Vec<HandlerReport> {
        let mut tasks = self.tasks.lock().await;
        let mut reports = Vec::with_capacity(tasks.len());

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(report) => reports.push(report),
                Err(e) => error!("Dispatch loop task failed: {}", e),
            }
        }

        reports
    }

    /// Start all loops and block until every one of them has exited
    pub async fn run(&self) -> Result<Vec<HandlerReport>> {
        self.start().await?;
        Ok(self.wait().await)
    }
}
