//! Relay error type and the policy applied to each error source

use thiserror::Error;

/// What the relay does when an error occurs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Stop the affected dispatch loop
    Terminate,
    /// Log it and keep consuming events
    LogAndContinue,
    /// Keep running in a reduced mode (e.g. a filter that matches nothing)
    Degrade,
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("handler '{handler}' is missing required setting '{setting}'")]
    MissingSetting {
        handler: String,
        setting: &'static str,
    },

    #[error("failed to connect handler '{handler}': {source}")]
    Connect {
        handler: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("credentials rejected for handler '{handler}': {reason}")]
    InvalidAuth { handler: String, reason: String },

    #[error("gateway error {code}: {message}")]
    Gateway { code: i64, message: String },

    #[error("could not resolve channel '{channel}': {reason}")]
    ChannelResolution { channel: String, reason: String },

    #[error("handler '{handler}' failed: {source}")]
    Handler {
        handler: String,
        #[source]
        source: anyhow::Error,
    },
}

impl RelayError {
    pub fn disposition(&self) -> Disposition {
        match self {
            Self::InvalidAuth { .. } => Disposition::Terminate,
            Self::ChannelResolution { .. } => Disposition::Degrade,
            Self::MissingSetting { .. }
            | Self::Connect { .. }
            | Self::Gateway { .. }
            | Self::Handler { .. } => Disposition::LogAndContinue,
        }
    }
}
