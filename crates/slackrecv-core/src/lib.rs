//! slackrecv-core — shared types for the slackrecv relay
//!
//! Defines the tagged gateway event stream, the gateway client and handler
//! traits the relay is written against, and the relay error policy.

pub mod error;
pub mod gateway;
pub mod handler;
pub mod types;

pub use error::{Disposition, RelayError};
pub use gateway::{GatewayClient, GatewayConnection};
pub use handler::{DispatchContext, Handler, HandlerSettings, message_payload};
pub use types::{ChannelInfo, EventKind, GatewayEvent};
