use std::collections::BTreeMap;
use std::sync::Arc;

use kwallet::{
    BusError, BusValue, KdeWallet, MapEntries, SignalKind, SignalRouter, WalletConfig,
    DEFAULT_WALLET,
};
use kwallet_bus::{MatchRule, RouterConfig, KWALLET_INTERFACE};
use test_support::{init_logging, wallet_async_opened, LoopbackBus, DAEMON_PATH};

const APP: &str = "kwallet-tests";

fn wallet_with(config: WalletConfig) -> (Arc<LoopbackBus>, KdeWallet) {
    init_logging();
    let bus = LoopbackBus::new();
    let router = SignalRouter::new(config.router_config());
    let wallet = KdeWallet::new(bus.clone(), router, config).expect("valid config");
    (bus, wallet)
}

fn wallet() -> (Arc<LoopbackBus>, KdeWallet) {
    wallet_with(WalletConfig::kwalletd5())
}

#[test]
fn construction_subscribes_every_signal_once() {
    let (bus, wallet) = wallet();
    assert_eq!(bus.sink_count(), KdeWallet::SIGNALS.len());
    for kind in SignalKind::ALL {
        assert!(bus.subscribed_rules().contains(&MatchRule::new(KWALLET_INTERFACE, kind.member())));
    }

    let second = KdeWallet::new(
        bus.clone(),
        Arc::clone(wallet.signal_router()),
        WalletConfig::kwalletd5(),
    )
    .expect("valid config");
    assert_eq!(bus.sink_count(), KdeWallet::SIGNALS.len());
    assert!(Arc::ptr_eq(wallet.signal_router(), second.signal_router()));
}

#[test]
fn invalid_config_is_rejected() {
    let bus = LoopbackBus::new();
    let router = SignalRouter::new(RouterConfig::default());
    let config = WalletConfig { service: String::new(), ..WalletConfig::kwalletd5() };
    assert!(KdeWallet::new(bus.clone(), router, config).is_err());
    assert_eq!(bus.sink_count(), 0);
}

#[test]
fn open_sends_the_daemon_signature() {
    let (bus, wallet) = wallet();
    bus.reply("open", vec![BusValue::Int32(12)]);

    assert_eq!(wallet.open(DEFAULT_WALLET, 0, APP), Ok(12));
    let call = bus.last_call().expect("open call");
    assert_eq!(call.destination, "org.kde.kwalletd5");
    assert_eq!(call.path, DAEMON_PATH);
    assert_eq!(call.signature, "sxs");
    assert_eq!(
        call.args,
        vec![BusValue::from(DEFAULT_WALLET), BusValue::Int64(0), BusValue::from(APP)]
    );
}

#[test]
fn missing_results_fall_back_to_daemon_defaults() {
    let (_bus, wallet) = wallet();

    assert_eq!(wallet.open(DEFAULT_WALLET, 0, APP), Ok(-1));
    assert_eq!(wallet.open_path("/tmp/w.kwl", 0, APP), Ok(0));
    assert_eq!(wallet.open_async(DEFAULT_WALLET, 0, APP, false), Ok(-1));
    assert_eq!(wallet.close_handle(3, false, APP), Ok(-1));
    assert_eq!(wallet.delete_wallet("gone"), Ok(-1));
    assert_eq!(wallet.is_open(DEFAULT_WALLET), Ok(false));
    assert_eq!(wallet.is_open_handle(3), Ok(false));
    assert_eq!(wallet.wallets(), Ok(vec![]));
    assert_eq!(wallet.folder_list(3, APP), Ok(vec![]));
    assert_eq!(wallet.read_entry(3, "Passwords", "github", APP), Ok(vec![]));
    assert_eq!(wallet.read_password(3, "Passwords", "github", APP), Ok(String::new()));
    assert_eq!(wallet.entry_type(3, "Passwords", "github", APP), Ok(0));
    assert_eq!(wallet.remove_entry(3, "Passwords", "github", APP), Ok(-1));
    assert_eq!(wallet.password_list(3, "Passwords", APP), Ok(BTreeMap::new()));
    assert_eq!(wallet.network_wallet(), Ok(String::new()));
    assert_eq!(wallet.sync(3, APP), Ok(()));
    assert_eq!(wallet.stats().suppressed, 16);
}

#[test]
fn timed_out_call_falls_back() {
    let (bus, wallet) = wallet();
    bus.time_out("hasEntry");
    assert_eq!(wallet.has_entry(3, "Passwords", "github", APP), Ok(false));
    assert_eq!(wallet.stats().timeouts, 1);
}

#[test]
fn unsuppressed_fault_is_an_error() {
    let (bus, wallet) = wallet();
    bus.fault("writePassword", "org.kde.KWallet.Error.AccessDenied");

    let err = wallet
        .write_password(3, "Passwords", "github", "hunter2", APP)
        .expect_err("fault");
    assert_eq!(err.fault_name(), Some("org.kde.KWallet.Error.AccessDenied"));
}

#[test]
fn reply_of_the_wrong_shape_is_an_error() {
    let (bus, wallet) = wallet();
    bus.reply("isOpen", vec![BusValue::from("yes")]);
    bus.reply("wallets", vec![]);

    assert!(matches!(
        wallet.is_open(DEFAULT_WALLET),
        Err(BusError::UnexpectedReply { ref method, .. }) if method == "isOpen"
    ));
    assert!(matches!(wallet.wallets(), Err(BusError::UnexpectedReply { .. })));
}

#[test]
fn list_replies_are_converted() {
    let (bus, wallet) = wallet();
    bus.reply("wallets", vec![vec![DEFAULT_WALLET.to_owned(), "work".to_owned()].into()]);
    bus.reply(
        "readEntry",
        vec![BusValue::Array(vec![BusValue::Byte(1), BusValue::Byte(2), BusValue::Byte(3)])],
    );
    let mut passwords = BTreeMap::new();
    passwords.insert("github".to_owned(), BusValue::Variant(Box::new("hunter2".into())));
    passwords.insert("gitlab".to_owned(), BusValue::Variant(Box::new("swordfish".into())));
    bus.reply("passwordList", vec![BusValue::Dict(passwords)]);
    let mut maps = BTreeMap::new();
    maps.insert("login".to_owned(), BusValue::Variant(Box::new(BusValue::Bytes(vec![0, 0, 0, 0]))));
    bus.reply("mapList", vec![BusValue::Dict(maps)]);

    assert_eq!(wallet.wallets(), Ok(vec![DEFAULT_WALLET.to_owned(), "work".to_owned()]));
    assert_eq!(wallet.read_entry(3, "Passwords", "github", APP), Ok(vec![1, 2, 3]));

    let passwords = wallet.password_list(3, "Passwords", APP).expect("password list");
    assert_eq!(passwords.get("gitlab").map(String::as_str), Some("swordfish"));
    assert_eq!(passwords.len(), 2);

    let maps = wallet.map_list(3, "Form Data", APP).expect("map list");
    assert_eq!(maps.get("login"), Some(&vec![0, 0, 0, 0]));
}

#[test]
fn maps_are_encoded_and_decoded() {
    let (bus, wallet) = wallet();
    let mut entries = MapEntries::new();
    entries.store_entry("user", "alice");
    entries.store_entry("note", "");
    let blob = entries.encode().expect("encode");

    bus.reply("writeMap", vec![BusValue::Int32(0)]);
    assert_eq!(wallet.write_map_entries(3, "Form Data", "login", &entries, APP), Ok(0));
    let call = bus.last_call().expect("writeMap call");
    assert_eq!(call.signature, "issays");
    assert_eq!(call.args[3], BusValue::Bytes(blob.clone()));

    bus.reply("readMap", vec![BusValue::Bytes(blob)]);
    let read = wallet.read_map_entries(3, "Form Data", "login", APP).expect("read map");
    assert_eq!(read, entries);
    assert_eq!(read.value("user"), "alice");
}

#[test]
fn undecodable_map_reads_as_empty() {
    let (bus, wallet) = wallet();
    bus.reply("readMap", vec![BusValue::Bytes(vec![0, 0, 0, 2, 0, 0])]);
    let read = wallet.read_map_entries(3, "Form Data", "login", APP).expect("read map");
    assert!(read.is_empty());
}

#[test]
fn open_async_and_wait_returns_the_handle_of_its_transaction() {
    let (bus, wallet) = wallet();
    bus.reply("openAsync", vec![BusValue::Int32(7)]);
    bus.emit_on_call("openAsync", wallet_async_opened(6, 99));
    bus.emit_on_call("openAsync", wallet_async_opened(7, 42));

    assert_eq!(wallet.open_async_and_wait(DEFAULT_WALLET, 0, APP, true), Ok(Some(42)));
    let call = bus.last_call().expect("openAsync call");
    assert_eq!(call.signature, "sxsb");
    assert_eq!(call.args[3], BusValue::Bool(true));
}

#[test]
fn open_async_and_wait_times_out_without_a_signal() {
    let config = WalletConfig { await_timeout_ms: 100, ..WalletConfig::kwalletd5() };
    let (bus, wallet) = wallet_with(config);
    bus.reply("openAsync", vec![BusValue::Int32(7)]);
    bus.emit_on_call("openAsync", wallet_async_opened(8, 1));

    assert_eq!(wallet.open_async_and_wait(DEFAULT_WALLET, 0, APP, false), Ok(None));
}

#[test]
fn open_async_and_wait_skips_waiting_without_a_transaction() {
    let (_bus, wallet) = wallet();
    assert_eq!(wallet.open_async_and_wait(DEFAULT_WALLET, 0, APP, false), Ok(None));
}

#[test]
fn properties_go_through_the_properties_interface() {
    let (bus, wallet) = wallet();
    bus.reply("Get", vec![BusValue::Variant(Box::new(BusValue::Bool(true)))]);

    let value = wallet.get_property("Enabled").expect("get");
    assert_eq!(value.as_ref().and_then(BusValue::as_bool), Some(true));
    let call = bus.last_call().expect("Get call");
    assert_eq!(call.interface, "org.freedesktop.DBus.Properties");
    assert_eq!(call.args[0], BusValue::from(KWALLET_INTERFACE));
}

#[test]
fn shutdown_releases_subscriptions() {
    let (bus, wallet) = wallet();
    wallet.shutdown();
    assert_eq!(bus.sink_count(), 0);
    assert!(!wallet.signal_router().is_bound());
}
