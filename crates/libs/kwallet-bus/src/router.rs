//! Process-wide routing of kwalletd signals.
//!
//! Bus signals are broadcast to every subscriber of their kind and are not
//! tied to any call, so a client that opened a wallet asynchronously can
//! only learn the resulting handle by watching for the matching signal.
//! [`SignalRouter`] is the single subscriber that records those signals and
//! fans them out:
//!
//! - a bounded, newest-first history that can be queried by kind and path
//! - listeners and a broadcast channel of [`ChangeRecord`]s for push-style
//!   consumers
//! - [`SignalRouter::await_next`], which blocks until the next matching
//!   signal arrives
//!
//! Subscriptions are a shared resource of the connection: create one router
//! per process and pass the `Arc` to every facade.

use std::fmt::Display;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock, Weak};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::history::HistoryRing;
use crate::signal::{ChangeRecord, Notification, Signal, SignalKind};
use crate::transport::{BusTransport, RawSignal, SignalSink};

pub const DEFAULT_HISTORY_CAPACITY: usize = 250;

pub const DEFAULT_AWAIT_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RouterConfig {
    pub history_capacity: usize,
    pub await_timeout: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self { history_capacity: DEFAULT_HISTORY_CAPACITY, await_timeout: DEFAULT_AWAIT_TIMEOUT }
    }
}

/// Receives a [`ChangeRecord`] for every routed signal, on the transport's
/// dispatch thread. Implementations must not block on further signals.
pub trait SignalListener: Send + Sync {
    fn signal_changed(&self, change: &ChangeRecord);
}

impl<F> SignalListener for F
where
    F: Fn(&ChangeRecord) + Send + Sync,
{
    fn signal_changed(&self, change: &ChangeRecord) {
        self(change)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// A position in the routed signal stream, see [`SignalRouter::checkpoint`].
///
/// While it is alive, every signal the router routes is queued for it, so a
/// later [`SignalRouter::await_from`] sees them even after they have left the
/// history. Dropping it discards the queue.
pub struct Checkpoint<'a> {
    router: &'a SignalRouter,
    id: u64,
    teardowns: u64,
}

impl Drop for Checkpoint<'_> {
    fn drop(&mut self) {
        let mut journal = self.router.journal.lock().expect("journal mutex poisoned");
        journal.inboxes.remove(&self.id);
    }
}

/// The sink registered with the transport. Holds the router weakly so the
/// transport never keeps it alive.
struct RouterSink {
    router: Weak<SignalRouter>,
}

impl SignalSink for RouterSink {
    fn handle(&self, signal: &RawSignal) {
        if let Some(router) = self.router.upgrade() {
            router.handle(signal);
        }
    }
}

struct Journal {
    ring: HistoryRing,
    teardowns: u64,
    inboxes: HashMap<u64, Vec<Notification>>,
    next_inbox: u64,
}

pub struct SignalRouter {
    config: RouterConfig,
    sink: Arc<dyn SignalSink>,
    transport: Mutex<Option<Arc<dyn BusTransport>>>,
    registered: Mutex<Vec<SignalKind>>,
    subscribed: AtomicU32,
    journal: Mutex<Journal>,
    arrived: Condvar,
    listeners: RwLock<Vec<(ListenerId, Arc<dyn SignalListener>)>>,
    next_listener_id: AtomicU64,
    changes: broadcast::Sender<ChangeRecord>,
}

impl SignalRouter {
    pub fn new(config: RouterConfig) -> Arc<Self> {
        let (changes, _) = broadcast::channel(config.history_capacity.max(1));
        let ring = HistoryRing::new(config.history_capacity);
        Arc::new_cyclic(|weak| Self {
            config,
            sink: Arc::new(RouterSink { router: weak.clone() }),
            transport: Mutex::new(None),
            registered: Mutex::new(Vec::new()),
            subscribed: AtomicU32::new(0),
            journal: Mutex::new(Journal {
                ring,
                teardowns: 0,
                inboxes: HashMap::new(),
                next_inbox: 0,
            }),
            arrived: Condvar::new(),
            listeners: RwLock::new(Vec::new()),
            next_listener_id: AtomicU64::new(1),
            changes,
        })
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn is_bound(&self) -> bool {
        self.transport.lock().expect("transport mutex poisoned").is_some()
    }

    pub fn subscribed_kinds(&self) -> Vec<SignalKind> {
        self.registered.lock().expect("registered mutex poisoned").clone()
    }

    /// Binds the router to `transport` (the first transport wins) and
    /// subscribes to every kind in `kinds` not already subscribed.
    ///
    /// Failed subscriptions are logged and skipped; a later `connect` retries
    /// them.
    pub fn connect(&self, transport: Arc<dyn BusTransport>, kinds: &[SignalKind]) {
        let bound = {
            let mut guard = self.transport.lock().expect("transport mutex poisoned");
            Arc::clone(guard.get_or_insert_with(|| Arc::clone(&transport)))
        };
        if Arc::as_ptr(&bound) as *const () != Arc::as_ptr(&transport) as *const () {
            log::debug!("signal router already bound; subscribing on the existing transport");
        }

        let mut registered = self.registered.lock().expect("registered mutex poisoned");
        for &kind in kinds {
            if registered.contains(&kind) {
                continue;
            }
            match bound.add_signal_sink(&kind.match_rule(), Arc::clone(&self.sink)) {
                Ok(()) => {
                    log::trace!("add signal handler: {kind}");
                    registered.push(kind);
                    self.subscribed.fetch_or(kind.bit(), Ordering::AcqRel);
                }
                Err(err) => log::error!("failed to subscribe to {kind}: {err}"),
            }
        }
    }

    /// Removes every subscription and unbinds from the transport. Pending
    /// [`Self::await_next`] calls return `None`.
    pub fn disconnect(&self) {
        let Some(transport) = self.transport.lock().expect("transport mutex poisoned").take() else {
            return;
        };
        let mut registered = self.registered.lock().expect("registered mutex poisoned");
        self.subscribed.store(0, Ordering::Release);
        log::debug!("remove signal handlers");
        for kind in registered.drain(..) {
            if !transport.is_connected() {
                continue;
            }
            log::trace!("remove signal handler: {kind}");
            if let Err(err) = transport.remove_signal_sink(&kind.match_rule(), &self.sink) {
                log::error!("failed to unsubscribe from {kind}: {err}");
            }
        }
        drop(registered);

        self.journal.lock().expect("journal mutex poisoned").teardowns += 1;
        self.arrived.notify_all();
    }

    /// Records one signal delivered by the transport and notifies waiters and
    /// listeners. Signals that cannot be decoded, or whose kind this router
    /// has not subscribed to, are logged and dropped.
    pub fn handle(&self, raw: &RawSignal) {
        let Some(signal) = Signal::from_raw(raw) else {
            log::warn!(
                "Received unknown signal: {}.{} {{path: {}, args: {:?}}}",
                raw.interface,
                raw.member,
                raw.path,
                raw.args
            );
            return;
        };
        let kind = signal.kind();
        if self.subscribed.load(Ordering::Acquire) & kind.bit() == 0 {
            log::debug!("ignoring unsubscribed signal {kind} from {}", raw.path);
            return;
        }

        let note = {
            let mut journal = self.journal.lock().expect("journal mutex poisoned");
            let note = journal.ring.push(&raw.path, signal);
            for inbox in journal.inboxes.values_mut() {
                inbox.push(note.clone());
            }
            note
        };
        self.arrived.notify_all();
        log_received(&note);

        let change = note.change_record();
        let listeners: Vec<Arc<dyn SignalListener>> = self
            .listeners
            .read()
            .expect("listeners rwlock poisoned")
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener.signal_changed(&change);
        }
        // Fails only when nobody is subscribed.
        let _ = self.changes.send(change);
    }

    // ── Listeners ─────────────────────────────────────────────────────────────

    pub fn add_listener(&self, listener: Arc<dyn SignalListener>) -> ListenerId {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().expect("listeners rwlock poisoned").push((id, listener));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write().expect("listeners rwlock poisoned");
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Change records for every signal routed after this call. Slow receivers
    /// lag rather than block the dispatch thread.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeRecord> {
        self.changes.subscribe()
    }

    // ── History ───────────────────────────────────────────────────────────────

    /// Total number of signals routed so far, including those the ring has
    /// since overwritten.
    pub fn count(&self) -> u64 {
        self.journal.lock().expect("journal mutex poisoned").ring.observed()
    }

    /// Empties the ring. Sequence numbers keep counting, so pending waits and
    /// checkpoints stay valid.
    pub fn clear_history(&self) {
        self.journal.lock().expect("journal mutex poisoned").ring.clear();
    }

    /// The whole ring, newest first.
    pub fn history(&self) -> Vec<Notification> {
        self.collect(|_| true)
    }

    pub fn history_of(&self, kind: SignalKind) -> Vec<Notification> {
        self.collect(|note| note.matches(kind, None))
    }

    pub fn history_at(&self, kind: SignalKind, path: &str) -> Vec<Notification> {
        self.collect(|note| note.matches(kind, Some(path)))
    }

    pub fn latest(&self) -> Option<Notification> {
        self.first(|_| true)
    }

    pub fn latest_of(&self, kind: SignalKind) -> Option<Notification> {
        self.first(|note| note.matches(kind, None))
    }

    pub fn latest_at(&self, kind: SignalKind, path: &str) -> Option<Notification> {
        self.first(|note| note.matches(kind, Some(path)))
    }

    fn collect(&self, filter: impl Fn(&Notification) -> bool) -> Vec<Notification> {
        let journal = self.journal.lock().expect("journal mutex poisoned");
        let matching: Vec<Notification> =
            journal.ring.iter().filter(|note| filter(note)).cloned().collect();
        matching
    }

    fn first(&self, filter: impl Fn(&Notification) -> bool) -> Option<Notification> {
        let journal = self.journal.lock().expect("journal mutex poisoned");
        let newest = journal.ring.iter().find(|note| filter(note)).cloned();
        newest
    }

    // ── Blocking wait ─────────────────────────────────────────────────────────

    /// Marks the current position in the signal stream. Pass it to
    /// [`Self::await_from`] to wait for signals routed after this point.
    pub fn checkpoint(&self) -> Checkpoint<'_> {
        let mut journal = self.journal.lock().expect("journal mutex poisoned");
        let id = journal.next_inbox;
        journal.next_inbox += 1;
        journal.inboxes.insert(id, Vec::new());
        Checkpoint { router: self, id, teardowns: journal.teardowns }
    }

    /// Runs `trigger`, then blocks until a `kind` signal from `path` arrives
    /// that was routed after `trigger` started, and returns the earliest such
    /// signal. Returns `None` after `timeout` or when the router is
    /// disconnected meanwhile.
    ///
    /// `trigger` usually issues the request whose signal is awaited. It must
    /// not itself wait for that signal. A failing trigger is logged and the
    /// wait proceeds.
    pub fn await_next<F, R, E>(
        &self,
        kind: SignalKind,
        path: &str,
        trigger: F,
        timeout: Duration,
    ) -> Option<Notification>
    where
        F: FnOnce() -> Result<R, E>,
        E: Display,
    {
        let checkpoint = self.checkpoint();
        if let Err(err) = trigger() {
            log::error!("trigger for {kind} failed: {err}");
        }
        log::info!("Await signal {kind} ({path}) within {} seconds.", timeout.as_secs());
        self.await_from(checkpoint, |note| note.matches(kind, Some(path)), timeout)
    }

    /// Blocks until a signal routed after `checkpoint` satisfies `accept` and
    /// returns the earliest one. Signals routed between the checkpoint and
    /// this call count, even if the history has since dropped them.
    pub fn await_from(
        &self,
        checkpoint: Checkpoint<'_>,
        accept: impl Fn(&Notification) -> bool,
        timeout: Duration,
    ) -> Option<Notification> {
        if !std::ptr::eq(checkpoint.router, self) {
            log::error!("checkpoint belongs to a different signal router");
            return None;
        }
        let deadline = Instant::now() + timeout;
        let mut journal = self.journal.lock().expect("journal mutex poisoned");
        let found = loop {
            let pending = journal.inboxes.get_mut(&checkpoint.id).map(std::mem::take);
            if let Some(found) = pending.into_iter().flatten().find(|note| accept(note)) {
                break Some(found);
            }
            if journal.teardowns != checkpoint.teardowns {
                log::warn!("signal router disconnected while awaiting a signal");
                break None;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                log::warn!("timed out awaiting a signal after {}ms", timeout.as_millis());
                break None;
            }
            journal = self
                .arrived
                .wait_timeout(journal, remaining)
                .expect("journal mutex poisoned")
                .0;
        };
        drop(journal);
        drop(checkpoint);
        found
    }

    /// [`Self::await_next`] with the configured default timeout.
    pub fn await_next_default<F, R, E>(
        &self,
        kind: SignalKind,
        path: &str,
        trigger: F,
    ) -> Option<Notification>
    where
        F: FnOnce() -> Result<R, E>,
        E: Display,
    {
        self.await_next(kind, path, trigger, self.config.await_timeout)
    }
}

impl Drop for SignalRouter {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn log_received(note: &Notification) {
    match &note.signal {
        Signal::WalletListDirty => {
            log::debug!("Received signal KWallet.walletListDirty: {}", note.path)
        }
        Signal::AllWalletsClosed => {
            log::info!("Received signal KWallet.allWalletsClosed: {}", note.path)
        }
        Signal::WalletAsyncOpened { transaction_id, handle } => log::info!(
            "Received signal KWallet.walletAsyncOpened: {{TransactionID: {transaction_id}, handle: {handle}}}"
        ),
        Signal::WalletClosedId { handle } => {
            log::info!("Received signal KWallet.walletClosedId: {handle}")
        }
        Signal::FolderUpdated { wallet, folder } => log::info!(
            "Received signal KWallet.folderUpdated: {{wallet: {wallet}, folder: {folder}}}"
        ),
        Signal::ApplicationDisconnected { wallet, application } => log::info!(
            "Received signal KWallet.applicationDisconnected: {{application: {application}, wallet: {wallet}}}"
        ),
        Signal::WalletCreated { wallet }
        | Signal::WalletOpened { wallet }
        | Signal::WalletDeleted { wallet }
        | Signal::WalletClosed { wallet }
        | Signal::FolderListUpdated { wallet } => {
            log::info!("Received signal {}: {wallet}", note.kind())
        }
    }
}
