//! Blocking request/response on top of the bus.
//!
//! A call is one `send` followed by one `await_reply`. The reply is sorted
//! into three outcomes: a result, "no result" (suppressed faults and
//! timeouts) or a [`BusError`]. Nothing is retried.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BusError, TransportError};
use crate::transport::{BusTransport, Fault, MethodCall, ReplyStatus};
use crate::value::BusValue;

pub const DBUS_PROPERTIES: &str = "org.freedesktop.DBus.Properties";

pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_millis(2000);

pub const FAULT_NO_REPLY: &str = "org.freedesktop.DBus.Error.NoReply";
pub const FAULT_UNKNOWN_METHOD: &str = "org.freedesktop.DBus.Error.UnknownMethod";
pub const FAULT_NOT_CONNECTED: &str = "org.freedesktop.dbus.exceptions.NotConnected";

/// Faults that mean "nobody answered" rather than "the call failed".
pub const SUPPRESSED_FAULTS: [&str; 3] = [FAULT_NO_REPLY, FAULT_UNKNOWN_METHOD, FAULT_NOT_CONNECTED];

/// Identity of a remote object: bus name, object path and interface.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Target {
    pub service: String,
    pub path: String,
    pub interface: String,
}

impl Target {
    pub fn new(
        service: impl Into<String>,
        path: impl Into<String>,
        interface: impl Into<String>,
    ) -> Self {
        Self { service: service.into(), path: path.into(), interface: interface.into() }
    }

    /// Same object, addressed through the standard properties interface.
    pub fn properties(&self) -> Self {
        Self {
            service: self.service.clone(),
            path: self.path.clone(),
            interface: DBUS_PROPERTIES.to_owned(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CallConfig {
    pub timeout: Duration,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self { timeout: DEFAULT_CALL_TIMEOUT }
    }
}

/// Detailed resolution of a call, for callers that need to tell a timeout
/// from a suppressed fault.
#[derive(Clone, Debug, PartialEq)]
pub enum CallOutcome {
    Reply(Vec<BusValue>),
    Suppressed { name: String },
    TimedOut,
}

impl CallOutcome {
    pub fn into_reply(self) -> Option<Vec<BusValue>> {
        match self {
            Self::Reply(values) => Some(values),
            Self::Suppressed { .. } | Self::TimedOut => None,
        }
    }
}

/// Running totals of how calls resolved.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CallStats {
    pub calls: u64,
    pub replies: u64,
    pub suppressed: u64,
    pub timeouts: u64,
    pub failures: u64,
}

#[derive(Default)]
struct CallCounters {
    calls: AtomicU64,
    replies: AtomicU64,
    suppressed: AtomicU64,
    timeouts: AtomicU64,
    failures: AtomicU64,
}

pub struct CallHandler {
    transport: Arc<dyn BusTransport>,
    config: CallConfig,
    counters: CallCounters,
}

impl CallHandler {
    pub fn new(transport: Arc<dyn BusTransport>, config: CallConfig) -> Self {
        Self { transport, config, counters: CallCounters::default() }
    }

    pub fn transport(&self) -> &Arc<dyn BusTransport> {
        &self.transport
    }

    pub fn config(&self) -> &CallConfig {
        &self.config
    }

    pub fn stats(&self) -> CallStats {
        CallStats {
            calls: self.counters.calls.load(Ordering::Relaxed),
            replies: self.counters.replies.load(Ordering::Relaxed),
            suppressed: self.counters.suppressed.load(Ordering::Relaxed),
            timeouts: self.counters.timeouts.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
        }
    }

    /// Calls `method` and returns its reply values, `None` when the daemon
    /// gave no result, or the fault as an error.
    pub fn call(
        &self,
        target: &Target,
        method: &str,
        signature: &str,
        args: Vec<BusValue>,
    ) -> Result<Option<Vec<BusValue>>, BusError> {
        self.call_detailed(target, method, signature, args).map(CallOutcome::into_reply)
    }

    pub fn call_detailed(
        &self,
        target: &Target,
        method: &str,
        signature: &str,
        args: Vec<BusValue>,
    ) -> Result<CallOutcome, BusError> {
        self.counters.calls.fetch_add(1, Ordering::Relaxed);
        let call = MethodCall::new(target, method, signature, args);
        log::trace!("{call:?}");

        let status = match self.exchange(&call) {
            Ok(status) => status,
            Err(TransportError::Disconnected) => ReplyStatus::Fault(Fault::new(
                FAULT_NOT_CONNECTED,
                vec![BusValue::from("transport is not connected")],
            )),
            Err(err) => {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                log::error!("{}.{} failed: {err}", call.interface, call.member);
                return Err(err.into());
            }
        };
        log::trace!("{status:?}");

        match status {
            ReplyStatus::Reply(values) => {
                self.counters.replies.fetch_add(1, Ordering::Relaxed);
                log::debug!("{}.{} -> {values:?}", call.interface, call.member);
                Ok(CallOutcome::Reply(values))
            }
            ReplyStatus::Fault(fault) if SUPPRESSED_FAULTS.contains(&fault.name.as_str()) => {
                self.counters.suppressed.fetch_add(1, Ordering::Relaxed);
                log::debug!("{}.{}: {}", call.interface, call.member, fault.name);
                Ok(CallOutcome::Suppressed { name: fault.name })
            }
            ReplyStatus::Fault(fault) => {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                let err = BusError::remote_fault(fault.name, fault.args);
                log::error!("unexpected bus response to {}.{}: {err}", call.interface, call.member);
                Err(err)
            }
            ReplyStatus::TimedOut => {
                self.counters.timeouts.fetch_add(1, Ordering::Relaxed);
                log::warn!(
                    "{}.{} timed out after {}ms",
                    call.interface,
                    call.member,
                    self.config.timeout.as_millis()
                );
                Ok(CallOutcome::TimedOut)
            }
        }
    }

    fn exchange(&self, call: &MethodCall) -> Result<ReplyStatus, TransportError> {
        let correlation = self.transport.send(call)?;
        self.transport.await_reply(correlation, self.config.timeout)
    }

    /// `org.freedesktop.DBus.Properties.Get` on the target's interface.
    pub fn get_property(
        &self,
        target: &Target,
        property: &str,
    ) -> Result<Option<BusValue>, BusError> {
        let reply = self.call(
            &target.properties(),
            "Get",
            "ss",
            vec![BusValue::from(target.interface.as_str()), BusValue::from(property)],
        )?;
        Ok(reply.and_then(|values| values.into_iter().next()))
    }

    /// `org.freedesktop.DBus.Properties.GetAll` on the target's interface.
    pub fn get_all_properties(&self, target: &Target) -> Result<Option<BusValue>, BusError> {
        let reply = self.call(
            &target.properties(),
            "GetAll",
            "s",
            vec![BusValue::from(target.interface.as_str())],
        )?;
        Ok(reply.and_then(|values| values.into_iter().next()))
    }

    /// `org.freedesktop.DBus.Properties.Set` on the target's interface.
    pub fn set_property(
        &self,
        target: &Target,
        property: &str,
        value: BusValue,
    ) -> Result<(), BusError> {
        self.call(
            &target.properties(),
            "Set",
            "ssv",
            vec![
                BusValue::from(target.interface.as_str()),
                BusValue::from(property),
                BusValue::Variant(Box::new(value)),
            ],
        )?;
        Ok(())
    }
}
