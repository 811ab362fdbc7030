//! The typed kwalletd client.

use std::collections::BTreeMap;
use std::sync::Arc;

use kwallet_bus::{
    BusError, BusTransport, BusValue, CallHandler, CallStats, Notification, Signal, SignalKind,
    SignalRouter, Target,
};
use kwallet_map::{CodecError, MapEntries};
use serde::{Deserialize, Serialize};

use crate::config::WalletConfig;
use crate::error::ConfigError;

/// Wallet most desktop applications store their secrets in.
pub const DEFAULT_WALLET: &str = "kdewallet";

/// Storage type of a wallet entry, as reported by `entryType`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EntryType {
    Unknown,
    Password,
    Stream,
    Map,
}

impl EntryType {
    pub fn code(self) -> i32 {
        match self {
            Self::Unknown => 0,
            Self::Password => 1,
            Self::Stream => 2,
            Self::Map => 3,
        }
    }

    /// Codes outside the known range map to `Unknown`.
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => Self::Password,
            2 => Self::Stream,
            3 => Self::Map,
            _ => Self::Unknown,
        }
    }
}

/// Client for one kwalletd instance.
///
/// Every method is a single blocking call. When the daemon gives no result
/// (it is not running, does not know the method, or the call times out) the
/// method returns the fallback kwalletd itself uses for failure: `-1` for
/// handles and status codes, `false`, an empty string or an empty
/// collection. A reply of the wrong shape is a [`BusError::UnexpectedReply`].
pub struct KdeWallet {
    config: WalletConfig,
    target: Target,
    calls: CallHandler,
    router: Arc<SignalRouter>,
}

impl KdeWallet {
    /// Signals every facade subscribes the shared router to.
    pub const SIGNALS: [SignalKind; 11] = [
        SignalKind::ApplicationDisconnected,
        SignalKind::FolderUpdated,
        SignalKind::FolderListUpdated,
        SignalKind::AllWalletsClosed,
        SignalKind::WalletClosedId,
        SignalKind::WalletClosed,
        SignalKind::WalletDeleted,
        SignalKind::WalletAsyncOpened,
        SignalKind::WalletOpened,
        SignalKind::WalletCreated,
        SignalKind::WalletListDirty,
    ];

    /// Validates `config` and connects `router` to [`Self::SIGNALS`] on
    /// `transport`.
    pub fn new(
        transport: Arc<dyn BusTransport>,
        router: Arc<SignalRouter>,
        config: WalletConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        router.connect(Arc::clone(&transport), &Self::SIGNALS);
        log::debug!("kwallet client bound to {} at {}", config.service, config.object_path);
        Ok(Self {
            target: config.target(),
            calls: CallHandler::new(transport, config.call_config()),
            config,
            router,
        })
    }

    pub fn config(&self) -> &WalletConfig {
        &self.config
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn object_path(&self) -> &str {
        &self.config.object_path
    }

    pub fn signal_router(&self) -> &Arc<SignalRouter> {
        &self.router
    }

    pub fn stats(&self) -> CallStats {
        self.calls.stats()
    }

    /// Raw call on the kwalletd interface.
    pub fn send(
        &self,
        method: &str,
        signature: &str,
        args: Vec<BusValue>,
    ) -> Result<Option<Vec<BusValue>>, BusError> {
        self.calls.call(&self.target, method, signature, args)
    }

    pub fn get_property(&self, property: &str) -> Result<Option<BusValue>, BusError> {
        self.calls.get_property(&self.target, property)
    }

    pub fn get_all_properties(&self) -> Result<Option<BusValue>, BusError> {
        self.calls.get_all_properties(&self.target)
    }

    pub fn set_property(&self, property: &str, value: BusValue) -> Result<(), BusError> {
        self.calls.set_property(&self.target, property, value)
    }

    /// Releases the router's subscriptions. Call once at process teardown;
    /// the router is shared, so every other facade stops receiving signals
    /// too.
    pub fn shutdown(&self) {
        self.router.disconnect();
    }

    // ── Opening and closing ───────────────────────────────────────────────────

    /// Opens `wallet` and returns its handle.
    pub fn open(&self, wallet: &str, wid: i64, appid: &str) -> Result<i32, BusError> {
        self.int("open", "sxs", vec![wallet.into(), wid.into(), appid.into()], -1)
    }

    /// Opens the wallet stored at `path`. Yields `0` when there is no result.
    pub fn open_path(&self, path: &str, wid: i64, appid: &str) -> Result<i32, BusError> {
        self.int("openPath", "sxs", vec![path.into(), wid.into(), appid.into()], 0)
    }

    /// Starts opening `wallet` and returns the transaction id. The handle
    /// follows in a `walletAsyncOpened` signal carrying that id.
    pub fn open_async(
        &self,
        wallet: &str,
        wid: i64,
        appid: &str,
        handle_session: bool,
    ) -> Result<i32, BusError> {
        self.int(
            "openAsync",
            "sxsb",
            vec![wallet.into(), wid.into(), appid.into(), handle_session.into()],
            -1,
        )
    }

    pub fn open_path_async(
        &self,
        path: &str,
        wid: i64,
        appid: &str,
        handle_session: bool,
    ) -> Result<i32, BusError> {
        self.int(
            "openPathAsync",
            "sxsb",
            vec![path.into(), wid.into(), appid.into(), handle_session.into()],
            -1,
        )
    }

    /// [`Self::open_async`] followed by a wait for the `walletAsyncOpened`
    /// signal of the same transaction. Returns the wallet handle, or `None`
    /// if the daemon returned no transaction or the signal did not arrive
    /// within the configured await timeout.
    pub fn open_async_and_wait(
        &self,
        wallet: &str,
        wid: i64,
        appid: &str,
        handle_session: bool,
    ) -> Result<Option<i32>, BusError> {
        let checkpoint = self.router.checkpoint();
        let transaction = self.open_async(wallet, wid, appid, handle_session)?;
        if transaction < 0 {
            log::warn!("openAsync for {wallet} returned no transaction");
            return Ok(None);
        }
        log::info!(
            "Await signal {} ({}) within {} seconds.",
            SignalKind::WalletAsyncOpened,
            self.object_path(),
            self.config.await_timeout().as_secs()
        );
        let note = self.router.await_from(
            checkpoint,
            |note| {
                note.path == self.config.object_path
                    && matches!(
                        note.signal,
                        Signal::WalletAsyncOpened { transaction_id, .. }
                            if transaction_id == transaction
                    )
            },
            self.config.await_timeout(),
        );
        Ok(note.and_then(|note| async_handle(&note)))
    }

    pub fn close(&self, wallet: &str, force: bool) -> Result<i32, BusError> {
        self.int("close", "sb", vec![wallet.into(), force.into()], -1)
    }

    pub fn close_handle(&self, handle: i32, force: bool, appid: &str) -> Result<i32, BusError> {
        self.int("close", "ibs", vec![handle.into(), force.into(), appid.into()], -1)
    }

    pub fn close_all_wallets(&self) -> Result<(), BusError> {
        self.call("closeAllWallets", "", vec![])
    }

    pub fn sync(&self, handle: i32, appid: &str) -> Result<(), BusError> {
        self.call("sync", "is", vec![handle.into(), appid.into()])
    }

    pub fn is_open(&self, wallet: &str) -> Result<bool, BusError> {
        self.flag("isOpen", "s", vec![wallet.into()])
    }

    pub fn is_open_handle(&self, handle: i32) -> Result<bool, BusError> {
        self.flag("isOpen", "i", vec![handle.into()])
    }

    /// Opens `wallet` with a password hash from a PAM session.
    pub fn pam_open(
        &self,
        wallet: &str,
        password_hash: &[u8],
        session_timeout: i32,
    ) -> Result<(), BusError> {
        self.call(
            "pamOpen",
            "sayi",
            vec![wallet.into(), password_hash.to_vec().into(), session_timeout.into()],
        )
    }

    // ── Wallets ───────────────────────────────────────────────────────────────

    pub fn wallets(&self) -> Result<Vec<String>, BusError> {
        self.strings("wallets", "", vec![])
    }

    pub fn delete_wallet(&self, wallet: &str) -> Result<i32, BusError> {
        self.int("deleteWallet", "s", vec![wallet.into()], -1)
    }

    /// Applications currently using `wallet`.
    pub fn users(&self, wallet: &str) -> Result<Vec<String>, BusError> {
        self.strings("users", "s", vec![wallet.into()])
    }

    pub fn change_password(&self, wallet: &str, wid: i64, appid: &str) -> Result<(), BusError> {
        self.call("changePassword", "sxs", vec![wallet.into(), wid.into(), appid.into()])
    }

    pub fn disconnect_application(
        &self,
        wallet: &str,
        application: &str,
    ) -> Result<bool, BusError> {
        self.flag("disconnectApplication", "ss", vec![wallet.into(), application.into()])
    }

    pub fn network_wallet(&self) -> Result<String, BusError> {
        self.text("networkWallet", "", vec![])
    }

    pub fn local_wallet(&self) -> Result<String, BusError> {
        self.text("localWallet", "", vec![])
    }

    /// Asks the daemon to reload its settings.
    pub fn reconfigure(&self) -> Result<(), BusError> {
        self.call("reconfigure", "", vec![])
    }

    // ── Folders ───────────────────────────────────────────────────────────────

    pub fn folder_list(&self, handle: i32, appid: &str) -> Result<Vec<String>, BusError> {
        self.strings("folderList", "is", vec![handle.into(), appid.into()])
    }

    pub fn has_folder(&self, handle: i32, folder: &str, appid: &str) -> Result<bool, BusError> {
        self.flag("hasFolder", "iss", vec![handle.into(), folder.into(), appid.into()])
    }

    pub fn create_folder(
        &self,
        handle: i32,
        folder: &str,
        appid: &str,
    ) -> Result<bool, BusError> {
        self.flag("createFolder", "iss", vec![handle.into(), folder.into(), appid.into()])
    }

    pub fn remove_folder(
        &self,
        handle: i32,
        folder: &str,
        appid: &str,
    ) -> Result<bool, BusError> {
        self.flag("removeFolder", "iss", vec![handle.into(), folder.into(), appid.into()])
    }

    /// Works without opening the wallet.
    pub fn folder_does_not_exist(&self, wallet: &str, folder: &str) -> Result<bool, BusError> {
        self.flag("folderDoesNotExist", "ss", vec![wallet.into(), folder.into()])
    }

    // ── Entries ───────────────────────────────────────────────────────────────

    pub fn entry_list(
        &self,
        handle: i32,
        folder: &str,
        appid: &str,
    ) -> Result<Vec<String>, BusError> {
        self.strings("entryList", "iss", vec![handle.into(), folder.into(), appid.into()])
    }

    pub fn has_entry(
        &self,
        handle: i32,
        folder: &str,
        key: &str,
        appid: &str,
    ) -> Result<bool, BusError> {
        self.flag("hasEntry", "isss", entry_args(handle, folder, key, appid))
    }

    /// Raw [`EntryType`] code. Yields `0` (unknown) when there is no result.
    pub fn entry_type(
        &self,
        handle: i32,
        folder: &str,
        key: &str,
        appid: &str,
    ) -> Result<i32, BusError> {
        self.int("entryType", "isss", entry_args(handle, folder, key, appid), 0)
    }

    pub fn key_does_not_exist(
        &self,
        wallet: &str,
        folder: &str,
        key: &str,
    ) -> Result<bool, BusError> {
        self.flag("keyDoesNotExist", "sss", vec![wallet.into(), folder.into(), key.into()])
    }

    pub fn read_entry(
        &self,
        handle: i32,
        folder: &str,
        key: &str,
        appid: &str,
    ) -> Result<Vec<u8>, BusError> {
        self.bytes("readEntry", entry_args(handle, folder, key, appid))
    }

    /// The serialized map stored under `key`. See [`Self::read_map_entries`].
    pub fn read_map(
        &self,
        handle: i32,
        folder: &str,
        key: &str,
        appid: &str,
    ) -> Result<Vec<u8>, BusError> {
        self.bytes("readMap", entry_args(handle, folder, key, appid))
    }

    /// [`Self::read_map`] decoded. An undecodable blob is logged and read as
    /// an empty map.
    pub fn read_map_entries(
        &self,
        handle: i32,
        folder: &str,
        key: &str,
        appid: &str,
    ) -> Result<MapEntries, BusError> {
        let blob = self.read_map(handle, folder, key, appid)?;
        let mut entries = MapEntries::new();
        entries.set_byte_field(&blob);
        Ok(entries)
    }

    pub fn read_password(
        &self,
        handle: i32,
        folder: &str,
        key: &str,
        appid: &str,
    ) -> Result<String, BusError> {
        self.text("readPassword", "isss", entry_args(handle, folder, key, appid))
    }

    /// Every entry of `folder` with its raw contents.
    pub fn entries_list(
        &self,
        handle: i32,
        folder: &str,
        appid: &str,
    ) -> Result<BTreeMap<String, Vec<u8>>, BusError> {
        let args = vec![handle.into(), folder.into(), appid.into()];
        self.dict("entriesList", args, "bytes", BusValue::to_bytes)
    }

    /// Every map entry of `folder`, serialized.
    pub fn map_list(
        &self,
        handle: i32,
        folder: &str,
        appid: &str,
    ) -> Result<BTreeMap<String, Vec<u8>>, BusError> {
        let args = vec![handle.into(), folder.into(), appid.into()];
        self.dict("mapList", args, "bytes", BusValue::to_bytes)
    }

    pub fn password_list(
        &self,
        handle: i32,
        folder: &str,
        appid: &str,
    ) -> Result<BTreeMap<String, String>, BusError> {
        let args = vec![handle.into(), folder.into(), appid.into()];
        self.dict("passwordList", args, "string", |value| value.as_str().map(str::to_owned))
    }

    pub fn rename_entry(
        &self,
        handle: i32,
        folder: &str,
        old_name: &str,
        new_name: &str,
        appid: &str,
    ) -> Result<i32, BusError> {
        self.int(
            "renameEntry",
            "issss",
            vec![handle.into(), folder.into(), old_name.into(), new_name.into(), appid.into()],
            -1,
        )
    }

    pub fn write_entry(
        &self,
        handle: i32,
        folder: &str,
        key: &str,
        value: &[u8],
        appid: &str,
    ) -> Result<i32, BusError> {
        let args = write_args(handle, folder, key, value.to_vec().into(), appid);
        self.int("writeEntry", "issays", args, -1)
    }

    /// [`Self::write_entry`] with an explicit [`EntryType`] code.
    pub fn write_entry_typed(
        &self,
        handle: i32,
        folder: &str,
        key: &str,
        value: &[u8],
        entry_type: i32,
        appid: &str,
    ) -> Result<i32, BusError> {
        let args = vec![
            handle.into(),
            folder.into(),
            key.into(),
            value.to_vec().into(),
            entry_type.into(),
            appid.into(),
        ];
        self.int("writeEntry", "issayis", args, -1)
    }

    pub fn write_map(
        &self,
        handle: i32,
        folder: &str,
        key: &str,
        value: &[u8],
        appid: &str,
    ) -> Result<i32, BusError> {
        let args = write_args(handle, folder, key, value.to_vec().into(), appid);
        self.int("writeMap", "issays", args, -1)
    }

    /// Encodes `entries` and stores them with [`Self::write_map`].
    pub fn write_map_entries(
        &self,
        handle: i32,
        folder: &str,
        key: &str,
        entries: &MapEntries,
        appid: &str,
    ) -> Result<i32, BusError> {
        let blob = entries.encode().map_err(|err| encode_error("writeMap", &err))?;
        self.write_map(handle, folder, key, &blob, appid)
    }

    pub fn write_password(
        &self,
        handle: i32,
        folder: &str,
        key: &str,
        value: &str,
        appid: &str,
    ) -> Result<i32, BusError> {
        self.int("writePassword", "issss", write_args(handle, folder, key, value.into(), appid), -1)
    }

    pub fn remove_entry(
        &self,
        handle: i32,
        folder: &str,
        key: &str,
        appid: &str,
    ) -> Result<i32, BusError> {
        self.int("removeEntry", "isss", entry_args(handle, folder, key, appid), -1)
    }

    // ── Reply extraction ──────────────────────────────────────────────────────

    fn call(&self, method: &str, signature: &str, args: Vec<BusValue>) -> Result<(), BusError> {
        self.send(method, signature, args).map(|_| ())
    }

    fn extract<T>(
        &self,
        method: &str,
        signature: &str,
        args: Vec<BusValue>,
        fallback: T,
        expected: &str,
        convert: impl FnOnce(&BusValue) -> Option<T>,
    ) -> Result<T, BusError> {
        let Some(values) = self.send(method, signature, args)? else {
            return Ok(fallback);
        };
        let value =
            values.first().ok_or_else(|| BusError::unexpected_reply(method, "empty reply"))?;
        convert(value).ok_or_else(|| {
            BusError::unexpected_reply(method, format!("expected {expected}, got {value:?}"))
        })
    }

    fn int(
        &self,
        method: &str,
        signature: &str,
        args: Vec<BusValue>,
        fallback: i32,
    ) -> Result<i32, BusError> {
        self.extract(method, signature, args, fallback, "int32", BusValue::as_i32)
    }

    fn flag(&self, method: &str, signature: &str, args: Vec<BusValue>) -> Result<bool, BusError> {
        self.extract(method, signature, args, false, "boolean", BusValue::as_bool)
    }

    fn text(&self, method: &str, signature: &str, args: Vec<BusValue>) -> Result<String, BusError> {
        self.extract(method, signature, args, String::new(), "string", |value| {
            value.as_str().map(str::to_owned)
        })
    }

    fn strings(
        &self,
        method: &str,
        signature: &str,
        args: Vec<BusValue>,
    ) -> Result<Vec<String>, BusError> {
        self.extract(method, signature, args, Vec::new(), "string array", BusValue::to_string_list)
    }

    fn bytes(&self, method: &str, args: Vec<BusValue>) -> Result<Vec<u8>, BusError> {
        self.extract(method, "isss", args, Vec::new(), "byte array", BusValue::to_bytes)
    }

    fn dict<T>(
        &self,
        method: &str,
        args: Vec<BusValue>,
        expected: &str,
        convert: impl Fn(&BusValue) -> Option<T>,
    ) -> Result<BTreeMap<String, T>, BusError> {
        self.extract(method, "iss", args, BTreeMap::new(), "dictionary", |value| {
            value.as_dict().cloned()
        })?
        .into_iter()
        .map(|(key, value)| match convert(&value) {
            Some(converted) => Ok((key, converted)),
            None => Err(BusError::unexpected_reply(
                method,
                format!("expected {expected} for {key}, got {value:?}"),
            )),
        })
        .collect()
    }
}

fn entry_args(handle: i32, folder: &str, key: &str, appid: &str) -> Vec<BusValue> {
    vec![handle.into(), folder.into(), key.into(), appid.into()]
}

fn write_args(handle: i32, folder: &str, key: &str, value: BusValue, appid: &str) -> Vec<BusValue> {
    vec![handle.into(), folder.into(), key.into(), value, appid.into()]
}

fn encode_error(method: &str, err: &CodecError) -> BusError {
    log::error!("cannot encode map for {method}: {err}");
    BusError::invalid_argument(method, format!("cannot encode map: {err}"))
}

fn async_handle(note: &Notification) -> Option<i32> {
    match note.signal {
        Signal::WalletAsyncOpened { handle, .. } => Some(handle),
        _ => None,
    }
}
