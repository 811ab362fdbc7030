//! Call and signal plumbing for talking to kwalletd over a message bus.
//!
//! The bus itself is an external collaborator, reached through the
//! [`BusTransport`] trait. On top of it this crate provides:
//!
//! - **[`CallHandler`]**: turns a send plus reply wait into a blocking call
//!   with a timeout, and sorts faults into "no result" and real errors
//! - **[`SignalRouter`]**: the one per-process subscriber for kwalletd's
//!   broadcast signals, with a bounded history, listeners and a blocking
//!   wait for the next matching signal
//! - **[`Signal`] / [`SignalKind`]**: the closed set of signals kwalletd
//!   emits
//!
//! The router is a shared resource: create it once, wrap it in an `Arc`
//! and hand it to every facade that needs signals.

pub mod call;
pub mod error;
mod history;
pub mod router;
pub mod signal;
pub mod transport;
pub mod value;

pub use call::{
    CallConfig, CallHandler, CallOutcome, CallStats, Target, DBUS_PROPERTIES,
    DEFAULT_CALL_TIMEOUT, SUPPRESSED_FAULTS,
};
pub use error::{BusError, TransportError};
pub use router::{
    Checkpoint, ListenerId, RouterConfig, SignalListener, SignalRouter, DEFAULT_AWAIT_TIMEOUT,
    DEFAULT_HISTORY_CAPACITY,
};
pub use signal::{ChangeRecord, Notification, Signal, SignalKind, KWALLET_INTERFACE};
pub use transport::{
    BusTransport, Correlation, Fault, MatchRule, MethodCall, RawSignal, ReplyStatus, SignalSink,
};
pub use value::BusValue;
