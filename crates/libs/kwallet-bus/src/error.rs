use serde::{Deserialize, Serialize};

use crate::value::BusValue;

/// Errors surfaced by calls to kwalletd.
///
/// Faults in the suppression set never show up here; they are reported as
/// "no result" by [`crate::CallHandler`].
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum BusError {
    #[error("remote fault {name}: {message}")]
    RemoteFault { name: String, message: String, payload: Vec<BusValue> },

    #[error("transport error: {message}")]
    Transport { message: String },

    #[error("unexpected reply to {method}: {message}")]
    UnexpectedReply { method: String, message: String },

    /// An argument could not be built, so the call was never sent.
    #[error("invalid argument for {method}: {message}")]
    InvalidArgument { method: String, message: String },
}

impl BusError {
    /// Builds a fault error. The message is the first string argument of the
    /// payload, which is where the bus puts the human-readable text.
    pub fn remote_fault(name: impl Into<String>, payload: Vec<BusValue>) -> Self {
        let message = payload.first().and_then(BusValue::as_str).unwrap_or_default().to_owned();
        Self::RemoteFault { name: name.into(), message, payload }
    }

    pub fn unexpected_reply(method: impl Into<String>, message: impl Into<String>) -> Self {
        Self::UnexpectedReply { method: method.into(), message: message.into() }
    }

    pub fn invalid_argument(method: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArgument { method: method.into(), message: message.into() }
    }

    /// Symbolic fault name, for remote faults.
    pub fn fault_name(&self) -> Option<&str> {
        match self {
            Self::RemoteFault { name, .. } => Some(name.as_str()),
            _ => None,
        }
    }

    /// Returns `true` for transient errors that may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}

/// Failures reported by a [`crate::BusTransport`] implementation.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum TransportError {
    #[error("not connected")]
    Disconnected,

    #[error("i/o error: {message}")]
    Io { message: String },

    #[error("rejected by bus: {message}")]
    Rejected { message: String },
}

impl From<TransportError> for BusError {
    fn from(err: TransportError) -> Self {
        Self::Transport { message: err.to_string() }
    }
}
