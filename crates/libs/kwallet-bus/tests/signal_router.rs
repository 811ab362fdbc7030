use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use kwallet_bus::{
    BusValue, ChangeRecord, RouterConfig, Signal, SignalKind, SignalRouter, TransportError,
    DEFAULT_HISTORY_CAPACITY, KWALLET_INTERFACE,
};
use test_support::{
    init_logging, kwallet_signal, wallet_async_opened, wallet_opened, LoopbackBus, DAEMON_PATH,
};

fn bound_router(kinds: &[SignalKind]) -> (Arc<LoopbackBus>, Arc<SignalRouter>) {
    init_logging();
    let bus = LoopbackBus::new();
    let router = SignalRouter::new(RouterConfig::default());
    router.connect(bus.clone(), kinds);
    (bus, router)
}

#[test]
fn history_keeps_the_newest_entries_first() {
    let (bus, router) = bound_router(&[SignalKind::WalletOpened]);
    for i in 0..(DEFAULT_HISTORY_CAPACITY + 20) {
        bus.emit(&wallet_opened(&format!("wallet-{i}")));
    }

    let history = router.history();
    assert_eq!(history.len(), DEFAULT_HISTORY_CAPACITY);
    assert_eq!(router.count(), (DEFAULT_HISTORY_CAPACITY + 20) as u64);
    assert_eq!(
        history[0].signal,
        Signal::WalletOpened { wallet: format!("wallet-{}", DEFAULT_HISTORY_CAPACITY + 19) }
    );
    assert_eq!(
        history.last().map(|note| note.signal.clone()),
        Some(Signal::WalletOpened { wallet: "wallet-20".to_owned() })
    );
    assert!(history.windows(2).all(|pair| pair[0].seq > pair[1].seq));
}

#[test]
fn history_filters_by_kind_and_path() {
    let (bus, router) = bound_router(&[SignalKind::WalletOpened, SignalKind::WalletClosed]);
    bus.emit(&wallet_opened("kdewallet"));
    bus.emit(&kwallet_signal("walletClosed", vec!["kdewallet".into()]));
    bus.emit(&wallet_opened("work"));
    bus.emit(&signal_at("/modules/kwalletd6", "walletOpened", "other"));

    assert_eq!(router.history_of(SignalKind::WalletOpened).len(), 3);
    let at_daemon = router.history_at(SignalKind::WalletOpened, DAEMON_PATH);
    assert_eq!(
        at_daemon.iter().map(|note| note.signal.clone()).collect::<Vec<_>>(),
        vec![
            Signal::WalletOpened { wallet: "work".to_owned() },
            Signal::WalletOpened { wallet: "kdewallet".to_owned() },
        ]
    );
    assert_eq!(
        router.latest_of(SignalKind::WalletClosed).map(|note| note.signal),
        Some(Signal::WalletClosed { wallet: "kdewallet".to_owned() })
    );
    assert_eq!(router.latest().map(|note| note.path), Some("/modules/kwalletd6".to_owned()));
    assert_eq!(router.latest_at(SignalKind::WalletClosed, "/modules/kwalletd6"), None);
}

fn signal_at(path: &str, member: &str, wallet: &str) -> kwallet_bus::RawSignal {
    kwallet_bus::RawSignal::new(path, KWALLET_INTERFACE, member, vec![wallet.into()])
}

#[test]
fn only_subscribed_kinds_are_delivered() {
    let (bus, router) = bound_router(&[SignalKind::WalletOpened]);
    assert_eq!(bus.emit(&kwallet_signal("walletDeleted", vec!["kdewallet".into()])), 0);
    assert_eq!(bus.emit(&wallet_opened("kdewallet")), 1);

    assert_eq!(router.count(), 1);
    assert!(router.history_of(SignalKind::WalletDeleted).is_empty());
}

#[test]
fn handle_drops_kinds_the_router_did_not_subscribe_to() {
    let (_bus, router) = bound_router(&[SignalKind::WalletOpened]);
    for wallet in ["a", "b", "c"] {
        router.handle(&wallet_opened(wallet));
    }
    for wallet in ["a", "b"] {
        router.handle(&kwallet_signal("walletCreated", vec![wallet.into()]));
    }

    assert_eq!(router.history_of(SignalKind::WalletOpened).len(), 3);
    assert!(router.history_of(SignalKind::WalletCreated).is_empty());
    assert_eq!(router.history().len(), 3);
}

#[test]
fn connect_is_idempotent_per_kind() {
    let (bus, router) = bound_router(&[SignalKind::WalletOpened, SignalKind::WalletClosed]);
    router.connect(bus.clone(), &[SignalKind::WalletClosed, SignalKind::FolderUpdated]);

    assert_eq!(bus.sink_count(), 3);
    assert_eq!(bus.emit(&wallet_opened("kdewallet")), 1);
    assert_eq!(router.count(), 1);
}

#[test]
fn first_transport_stays_bound() {
    let (bus, router) = bound_router(&[SignalKind::WalletOpened]);
    let other = LoopbackBus::new();
    router.connect(other.clone(), &[SignalKind::WalletClosed]);

    assert_eq!(other.sink_count(), 0);
    assert_eq!(bus.sink_count(), 2);
}

#[test]
fn failed_subscription_is_retried_on_next_connect() {
    init_logging();
    let bus = LoopbackBus::new();
    bus.set_connected(false);
    let router = SignalRouter::new(RouterConfig::default());
    router.connect(bus.clone(), &[SignalKind::WalletOpened]);
    assert!(router.subscribed_kinds().is_empty());

    bus.set_connected(true);
    router.connect(bus.clone(), &[SignalKind::WalletOpened]);
    assert_eq!(router.subscribed_kinds(), vec![SignalKind::WalletOpened]);
}

#[test]
fn disconnect_removes_sinks_and_keeps_history() {
    let (bus, router) = bound_router(&[SignalKind::WalletOpened, SignalKind::FolderUpdated]);
    bus.emit(&wallet_opened("kdewallet"));
    router.disconnect();

    assert_eq!(bus.sink_count(), 0);
    assert!(!router.is_bound());
    assert_eq!(bus.emit(&wallet_opened("work")), 0);
    assert_eq!(router.history().len(), 1);
}

#[test]
fn disconnect_skips_removal_on_a_closed_transport() {
    let (bus, router) = bound_router(&[SignalKind::WalletOpened]);
    bus.set_connected(false);
    router.disconnect();

    assert_eq!(bus.sink_count(), 1);
    assert!(!router.is_bound());
}

#[test]
fn listeners_see_change_records() {
    let (bus, router) = bound_router(&[SignalKind::FolderUpdated, SignalKind::WalletAsyncOpened]);
    let seen: Arc<Mutex<Vec<ChangeRecord>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    router.add_listener(Arc::new(move |change: &ChangeRecord| {
        sink.lock().expect("seen mutex poisoned").push(change.clone());
    }));

    bus.emit(&kwallet_signal("folderUpdated", vec!["kdewallet".into(), "Passwords".into()]));
    bus.emit(&wallet_async_opened(7, 3));

    let seen = seen.lock().expect("seen mutex poisoned");
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].property, "KWallet.folderUpdated");
    assert_eq!(seen[0].new_value, BusValue::from("kdewallet/Passwords"));
    assert_eq!(seen[1].property, "KWallet.walletAsyncOpened");
    assert_eq!(seen[1].new_value, BusValue::Int32(3));
    assert_eq!(seen[1].seq, 2);
}

#[test]
fn broadcast_receivers_get_every_change() {
    let (bus, router) = bound_router(&[SignalKind::WalletOpened]);
    let mut changes = router.subscribe();
    bus.emit(&wallet_opened("kdewallet"));
    bus.emit(&wallet_opened("work"));

    assert_eq!(changes.try_recv().map(|change| change.new_value), Ok(BusValue::from("kdewallet")));
    assert_eq!(changes.try_recv().map(|change| change.new_value), Ok(BusValue::from("work")));
    assert!(changes.try_recv().is_err());
}

#[test]
fn await_returns_the_signal_caused_by_the_trigger() {
    let (bus, router) = bound_router(&[SignalKind::WalletAsyncOpened]);
    bus.emit(&wallet_async_opened(1, 10));

    let emitter = Arc::clone(&bus);
    let note = router
        .await_next(
            SignalKind::WalletAsyncOpened,
            DAEMON_PATH,
            move || {
                thread::spawn(move || {
                    thread::sleep(Duration::from_millis(50));
                    emitter.emit(&wallet_async_opened(2, 20));
                    emitter.emit(&wallet_async_opened(3, 30));
                });
                Ok::<(), TransportError>(())
            },
            Duration::from_secs(5),
        )
        .expect("signal within timeout");

    assert_eq!(note.signal, Signal::WalletAsyncOpened { transaction_id: 2, handle: 20 });
    assert_eq!(note.seq, 2);
}

#[test]
fn await_ignores_other_kinds_and_paths() {
    let (bus, router) = bound_router(&[SignalKind::WalletOpened, SignalKind::WalletClosed]);

    let note = router.await_next(
        SignalKind::WalletOpened,
        DAEMON_PATH,
        || {
            bus.emit(&kwallet_signal("walletClosed", vec!["kdewallet".into()]));
            bus.emit(&signal_at("/modules/kwalletd6", "walletOpened", "kdewallet"));
            bus.emit(&wallet_opened("kdewallet"));
            Ok::<(), TransportError>(())
        },
        Duration::from_secs(1),
    );

    assert_eq!(note.map(|note| note.seq), Some(3));
}

#[test]
fn await_times_out_without_a_match() {
    let (bus, router) = bound_router(&[SignalKind::WalletOpened]);
    bus.emit(&wallet_opened("kdewallet"));

    let note = router.await_next(
        SignalKind::WalletOpened,
        DAEMON_PATH,
        || Ok::<(), TransportError>(()),
        Duration::from_millis(100),
    );
    assert_eq!(note, None);
}

#[test]
fn await_survives_a_failing_trigger() {
    let (bus, router) = bound_router(&[SignalKind::WalletOpened]);

    let note = router.await_next(
        SignalKind::WalletOpened,
        DAEMON_PATH,
        || {
            bus.emit(&wallet_opened("kdewallet"));
            Err::<(), _>(TransportError::Disconnected)
        },
        Duration::from_secs(1),
    );
    assert!(note.is_some());
}

#[test]
fn await_from_sees_signals_routed_since_the_checkpoint() {
    let (bus, router) = bound_router(&[SignalKind::WalletAsyncOpened]);
    bus.emit(&wallet_async_opened(4, 40));
    let checkpoint = router.checkpoint();
    bus.emit(&wallet_async_opened(5, 50));
    bus.emit(&wallet_async_opened(6, 60));

    let note = router.await_from(
        checkpoint,
        |note| matches!(note.signal, Signal::WalletAsyncOpened { transaction_id: 6, .. }),
        Duration::from_millis(100),
    );
    assert_eq!(
        note.map(|note| note.signal),
        Some(Signal::WalletAsyncOpened { transaction_id: 6, handle: 60 })
    );
}

#[test]
fn await_from_ignores_signals_before_the_checkpoint() {
    let (bus, router) = bound_router(&[SignalKind::WalletAsyncOpened]);
    bus.emit(&wallet_async_opened(4, 40));
    let checkpoint = router.checkpoint();
    bus.emit(&wallet_async_opened(5, 50));

    let stale = router.await_from(
        checkpoint,
        |note| matches!(note.signal, Signal::WalletAsyncOpened { transaction_id: 4, .. }),
        Duration::from_millis(50),
    );
    assert_eq!(stale, None);
}

#[test]
fn await_keeps_a_match_pushed_out_of_a_small_history() {
    init_logging();
    let bus = LoopbackBus::new();
    let config = RouterConfig { history_capacity: 2, ..RouterConfig::default() };
    let router = SignalRouter::new(config);
    router.connect(bus.clone(), &[SignalKind::WalletOpened, SignalKind::WalletClosed]);

    let note = router.await_next(
        SignalKind::WalletOpened,
        DAEMON_PATH,
        || {
            bus.emit(&wallet_opened("kdewallet"));
            for _ in 0..3 {
                bus.emit(&kwallet_signal("walletClosed", vec!["kdewallet".into()]));
            }
            Ok::<(), TransportError>(())
        },
        Duration::from_millis(300),
    );

    assert_eq!(router.count(), 4);
    assert!(router.history_of(SignalKind::WalletOpened).is_empty());
    assert_eq!(
        note.map(|note| (note.seq, note.signal)),
        Some((1, Signal::WalletOpened { wallet: "kdewallet".to_owned() }))
    );
}

#[test]
fn await_keeps_a_match_across_clear_history() {
    let (bus, router) = bound_router(&[SignalKind::WalletOpened]);
    let checkpoint = router.checkpoint();
    bus.emit(&wallet_opened("kdewallet"));
    router.clear_history();

    let note = router.await_from(
        checkpoint,
        |note| note.matches(SignalKind::WalletOpened, Some(DAEMON_PATH)),
        Duration::from_millis(300),
    );
    assert_eq!(note.map(|note| note.seq), Some(1));
}

#[test]
fn checkpoint_from_another_router_is_refused() {
    let (_bus, router) = bound_router(&[SignalKind::WalletOpened]);
    let (other_bus, other) = bound_router(&[SignalKind::WalletOpened]);
    let checkpoint = other.checkpoint();
    other_bus.emit(&wallet_opened("kdewallet"));

    let note = router.await_from(checkpoint, |_| true, Duration::from_millis(50));
    assert_eq!(note, None);
}

#[test]
fn clearing_history_keeps_counting() {
    let (bus, router) = bound_router(&[SignalKind::WalletOpened]);
    bus.emit(&wallet_opened("kdewallet"));
    router.clear_history();
    assert!(router.history().is_empty());
    assert_eq!(router.count(), 1);

    bus.emit(&wallet_opened("work"));
    assert_eq!(router.latest().map(|note| note.seq), Some(2));
}
