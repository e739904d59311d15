//! Slack RTM gateway client for slackrecv
//!
//! Implements [`slackrecv_core::GatewayClient`] on top of the Slack Web API
//! (`rtm.connect`, `conversations.list`) and the RTM WebSocket.

pub mod api;
pub mod gateway;
pub mod rtm;

#[cfg(test)]
mod test_server;

pub use api::{ApiError, SlackApi};
pub use gateway::{ReconnectPolicy, SlackConnection, SlackGateway};
