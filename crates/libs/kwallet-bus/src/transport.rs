use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::call::Target;
use crate::error::TransportError;
use crate::value::BusValue;

/// Transport-level handle tying a request to its eventual reply.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Correlation(pub u64);

/// A method call ready to be handed to the transport.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MethodCall {
    pub destination: String,
    pub path: String,
    pub interface: String,
    pub member: String,
    pub signature: String,
    pub args: Vec<BusValue>,
}

impl MethodCall {
    pub fn new(
        target: &Target,
        member: impl Into<String>,
        signature: impl Into<String>,
        args: Vec<BusValue>,
    ) -> Self {
        Self {
            destination: target.service.clone(),
            path: target.path.clone(),
            interface: target.interface.clone(),
            member: member.into(),
            signature: signature.into(),
            args,
        }
    }
}

/// A named error reply.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Fault {
    pub name: String,
    pub args: Vec<BusValue>,
}

impl Fault {
    pub fn new(name: impl Into<String>, args: Vec<BusValue>) -> Self {
        Self { name: name.into(), args }
    }
}

/// How a pending call resolved.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum ReplyStatus {
    Reply(Vec<BusValue>),
    Fault(Fault),
    TimedOut,
}

/// Selects the broadcast signals a sink wants delivered.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct MatchRule {
    pub interface: String,
    pub member: String,
}

impl MatchRule {
    pub fn new(interface: impl Into<String>, member: impl Into<String>) -> Self {
        Self { interface: interface.into(), member: member.into() }
    }

    pub fn matches(&self, signal: &RawSignal) -> bool {
        self.interface == signal.interface && self.member == signal.member
    }
}

/// A broadcast signal as the transport's dispatch thread received it.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RawSignal {
    pub path: String,
    pub interface: String,
    pub member: String,
    pub args: Vec<BusValue>,
}

impl RawSignal {
    pub fn new(
        path: impl Into<String>,
        interface: impl Into<String>,
        member: impl Into<String>,
        args: Vec<BusValue>,
    ) -> Self {
        Self { path: path.into(), interface: interface.into(), member: member.into(), args }
    }
}

/// Receives signals on the transport's dispatch thread, one at a time.
pub trait SignalSink: Send + Sync {
    fn handle(&self, signal: &RawSignal);
}

/// What the call helper and the signal router need from a bus connection.
///
/// Implementations own connection lifecycle and wire marshalling. Signals
/// must be delivered to sinks sequentially from a single dispatch context,
/// in the order they were received.
pub trait BusTransport: Send + Sync {
    /// Queues a method call and returns its correlation handle.
    fn send(&self, call: &MethodCall) -> Result<Correlation, TransportError>;

    /// Blocks until the call resolves or `timeout` elapses. A correlation
    /// resolves at most once.
    fn await_reply(
        &self,
        correlation: Correlation,
        timeout: Duration,
    ) -> Result<ReplyStatus, TransportError>;

    fn add_signal_sink(
        &self,
        rule: &MatchRule,
        sink: Arc<dyn SignalSink>,
    ) -> Result<(), TransportError>;

    fn remove_signal_sink(
        &self,
        rule: &MatchRule,
        sink: &Arc<dyn SignalSink>,
    ) -> Result<(), TransportError>;

    fn is_connected(&self) -> bool;
}
