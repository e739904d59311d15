//! Event relay for slackrecv
//!
//! Consumes gateway event streams and dispatches message events, optionally
//! scoped to one channel, into registered workflow handlers.

pub mod channel;
pub mod relay;

#[cfg(test)]
mod mock;

pub use channel::{ChannelFilter, find_channel_id, resolve_channel_id};
pub use relay::{EventRelay, HandlerReport, LoopExit, LoopOutcome, RelayOptions, dispatch_loop};
