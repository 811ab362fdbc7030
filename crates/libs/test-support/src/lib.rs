//! Shared fixtures for the kwallet crates' integration tests.
//!
//! [`LoopbackBus`] stands in for a bus connection: replies are scripted per
//! method name, every call is recorded, and [`LoopbackBus::emit`] delivers a
//! signal to the registered sinks the way a dispatch thread would.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use kwallet_bus::call::FAULT_UNKNOWN_METHOD;
use kwallet_bus::{
    BusTransport, BusValue, Correlation, Fault, MatchRule, MethodCall, RawSignal, ReplyStatus,
    SignalSink, TransportError, KWALLET_INTERFACE,
};

/// Object path kwalletd5 signals originate from.
pub const DAEMON_PATH: &str = "/modules/kwalletd5";

static INIT: Once = Once::new();

/// Routes `log` output through the test harness. `RUST_LOG` overrides the
/// default `warn` filter.
pub fn init_logging() {
    INIT.call_once(|| {
        let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
            .is_test(true)
            .try_init();
    });
}

/// A kwalletd signal from [`DAEMON_PATH`].
pub fn kwallet_signal(member: &str, args: Vec<BusValue>) -> RawSignal {
    RawSignal::new(DAEMON_PATH, KWALLET_INTERFACE, member, args)
}

pub fn wallet_opened(wallet: &str) -> RawSignal {
    kwallet_signal("walletOpened", vec![wallet.into()])
}

pub fn wallet_async_opened(transaction_id: i32, handle: i32) -> RawSignal {
    kwallet_signal("walletAsyncOpened", vec![transaction_id.into(), handle.into()])
}

type Sinks = Vec<(MatchRule, Arc<dyn SignalSink>)>;

/// In-process [`BusTransport`] with scripted replies.
///
/// Methods without a script answer with an `UnknownMethod` fault, as a daemon
/// that does not implement them would.
pub struct LoopbackBus {
    connected: AtomicBool,
    next_correlation: AtomicU64,
    scripts: Mutex<HashMap<String, VecDeque<ReplyStatus>>>,
    triggers: Mutex<HashMap<String, Vec<RawSignal>>>,
    send_failures: Mutex<VecDeque<TransportError>>,
    pending: Mutex<HashMap<Correlation, ReplyStatus>>,
    calls: Mutex<Vec<MethodCall>>,
    sinks: Mutex<Sinks>,
}

impl LoopbackBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            connected: AtomicBool::new(true),
            next_correlation: AtomicU64::new(1),
            scripts: Mutex::new(HashMap::new()),
            triggers: Mutex::new(HashMap::new()),
            send_failures: Mutex::new(VecDeque::new()),
            pending: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            sinks: Mutex::new(Vec::new()),
        })
    }

    /// Queues `status` as the answer to the next unanswered `member` call.
    pub fn script(&self, member: &str, status: ReplyStatus) {
        self.scripts
            .lock()
            .expect("scripts mutex poisoned")
            .entry(member.to_owned())
            .or_default()
            .push_back(status);
    }

    pub fn reply(&self, member: &str, values: Vec<BusValue>) {
        self.script(member, ReplyStatus::Reply(values));
    }

    pub fn fault(&self, member: &str, name: &str) {
        self.script(member, ReplyStatus::Fault(Fault::new(name, vec![])));
    }

    pub fn time_out(&self, member: &str) {
        self.script(member, ReplyStatus::TimedOut);
    }

    /// Emits `signal` whenever `member` is called, before the reply resolves.
    pub fn emit_on_call(&self, member: &str, signal: RawSignal) {
        self.triggers
            .lock()
            .expect("triggers mutex poisoned")
            .entry(member.to_owned())
            .or_default()
            .push(signal);
    }

    pub fn fail_next_send(&self, err: TransportError) {
        self.send_failures.lock().expect("send failures mutex poisoned").push_back(err);
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<MethodCall> {
        self.calls.lock().expect("calls mutex poisoned").clone()
    }

    pub fn calls_to(&self, member: &str) -> Vec<MethodCall> {
        self.calls().into_iter().filter(|call| call.member == member).collect()
    }

    pub fn last_call(&self) -> Option<MethodCall> {
        self.calls.lock().expect("calls mutex poisoned").last().cloned()
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.lock().expect("sinks mutex poisoned").len()
    }

    pub fn subscribed_rules(&self) -> Vec<MatchRule> {
        let sinks = self.sinks.lock().expect("sinks mutex poisoned");
        sinks.iter().map(|(rule, _)| rule.clone()).collect()
    }

    /// Delivers `signal` to every sink whose rule matches it and returns how
    /// many received it.
    pub fn emit(&self, signal: &RawSignal) -> usize {
        let targets: Vec<Arc<dyn SignalSink>> = {
            let sinks = self.sinks.lock().expect("sinks mutex poisoned");
            sinks
                .iter()
                .filter(|(rule, _)| rule.matches(signal))
                .map(|(_, sink)| Arc::clone(sink))
                .collect()
        };
        for sink in &targets {
            sink.handle(signal);
        }
        targets.len()
    }
}

fn same_sink(a: &Arc<dyn SignalSink>, b: &Arc<dyn SignalSink>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

impl BusTransport for LoopbackBus {
    fn send(&self, call: &MethodCall) -> Result<Correlation, TransportError> {
        if let Some(err) = self.send_failures.lock().expect("send failures mutex poisoned").pop_front()
        {
            return Err(err);
        }
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::Disconnected);
        }
        self.calls.lock().expect("calls mutex poisoned").push(call.clone());

        let status = self
            .scripts
            .lock()
            .expect("scripts mutex poisoned")
            .get_mut(&call.member)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| {
                ReplyStatus::Fault(Fault::new(
                    FAULT_UNKNOWN_METHOD,
                    vec![format!("no such method '{}'", call.member).into()],
                ))
            });
        let correlation = Correlation(self.next_correlation.fetch_add(1, Ordering::SeqCst));
        self.pending.lock().expect("pending mutex poisoned").insert(correlation, status);

        let signals = self
            .triggers
            .lock()
            .expect("triggers mutex poisoned")
            .get(&call.member)
            .cloned()
            .unwrap_or_default();
        for signal in &signals {
            self.emit(signal);
        }
        Ok(correlation)
    }

    fn await_reply(
        &self,
        correlation: Correlation,
        _timeout: Duration,
    ) -> Result<ReplyStatus, TransportError> {
        self.pending.lock().expect("pending mutex poisoned").remove(&correlation).ok_or_else(|| {
            TransportError::Rejected { message: format!("unknown correlation {}", correlation.0) }
        })
    }

    fn add_signal_sink(
        &self,
        rule: &MatchRule,
        sink: Arc<dyn SignalSink>,
    ) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::Disconnected);
        }
        self.sinks.lock().expect("sinks mutex poisoned").push((rule.clone(), sink));
        Ok(())
    }

    fn remove_signal_sink(
        &self,
        rule: &MatchRule,
        sink: &Arc<dyn SignalSink>,
    ) -> Result<(), TransportError> {
        let mut sinks = self.sinks.lock().expect("sinks mutex poisoned");
        let before = sinks.len();
        sinks.retain(|(existing, candidate)| !(existing == rule && same_sink(candidate, sink)));
        if sinks.len() == before {
            return Err(TransportError::Rejected {
                message: format!("no sink registered for {}.{}", rule.interface, rule.member),
            });
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
