//! Gateway client traits
//!
//! A gateway client owns the socket, authentication and reconnection. The
//! relay only sees a typed event stream and a channel listing.

use crate::types::{ChannelInfo, GatewayEvent};
use anyhow::Result;
use async_trait::async_trait;

/// Opens credentialed connections to a chat gateway
#[async_trait]
pub trait GatewayClient: Send + Sync {
    /// Connect using `credential`. Any background connection management is
    /// started here and stops when the returned connection is dropped.
    async fn connect(&self, credential: &str) -> Result<Box<dyn GatewayConnection>>;
}

/// A live gateway connection
#[async_trait]
pub trait GatewayConnection: Send + Sync {
    /// Wait for the next event. `None` means the stream is closed.
    async fn next_event(&mut self) -> Option<GatewayEvent>;

    /// Channels visible to this connection's credential
    async fn list_channels(&self) -> Result<Vec<ChannelInfo>>;
}
