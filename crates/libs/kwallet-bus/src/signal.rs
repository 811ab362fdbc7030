//! The signals kwalletd broadcasts.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::transport::{MatchRule, RawSignal};
use crate::value::BusValue;

pub const KWALLET_INTERFACE: &str = "org.kde.KWallet";

/// Tag of a kwalletd signal.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SignalKind {
    WalletListDirty,
    WalletCreated,
    WalletOpened,
    WalletAsyncOpened,
    WalletDeleted,
    WalletClosed,
    WalletClosedId,
    AllWalletsClosed,
    FolderListUpdated,
    FolderUpdated,
    ApplicationDisconnected,
}

impl SignalKind {
    pub const ALL: [SignalKind; 11] = [
        Self::WalletListDirty,
        Self::WalletCreated,
        Self::WalletOpened,
        Self::WalletAsyncOpened,
        Self::WalletDeleted,
        Self::WalletClosed,
        Self::WalletClosedId,
        Self::AllWalletsClosed,
        Self::FolderListUpdated,
        Self::FolderUpdated,
        Self::ApplicationDisconnected,
    ];

    /// Member name on the `org.kde.KWallet` interface.
    pub fn member(self) -> &'static str {
        match self {
            Self::WalletListDirty => "walletListDirty",
            Self::WalletCreated => "walletCreated",
            Self::WalletOpened => "walletOpened",
            Self::WalletAsyncOpened => "walletAsyncOpened",
            Self::WalletDeleted => "walletDeleted",
            Self::WalletClosed => "walletClosed",
            Self::WalletClosedId => "walletClosedId",
            Self::AllWalletsClosed => "allWalletsClosed",
            Self::FolderListUpdated => "folderListUpdated",
            Self::FolderUpdated => "folderUpdated",
            Self::ApplicationDisconnected => "applicationDisconnected",
        }
    }

    /// Name carried by change records, e.g. `KWallet.walletOpened`.
    pub fn property_name(self) -> &'static str {
        match self {
            Self::WalletListDirty => "KWallet.walletListDirty",
            Self::WalletCreated => "KWallet.walletCreated",
            Self::WalletOpened => "KWallet.walletOpened",
            Self::WalletAsyncOpened => "KWallet.walletAsyncOpened",
            Self::WalletDeleted => "KWallet.walletDeleted",
            Self::WalletClosed => "KWallet.walletClosed",
            Self::WalletClosedId => "KWallet.walletClosedId",
            Self::AllWalletsClosed => "KWallet.allWalletsClosed",
            Self::FolderListUpdated => "KWallet.folderListUpdated",
            Self::FolderUpdated => "KWallet.folderUpdated",
            Self::ApplicationDisconnected => "KWallet.applicationDisconnected",
        }
    }

    pub fn from_member(member: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.member() == member)
    }

    pub fn match_rule(self) -> MatchRule {
        MatchRule::new(KWALLET_INTERFACE, self.member())
    }

    pub(crate) fn bit(self) -> u32 {
        1 << (self as u32)
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.property_name())
    }
}

/// A decoded kwalletd signal with its payload.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum Signal {
    WalletListDirty,
    WalletCreated { wallet: String },
    WalletOpened { wallet: String },
    WalletAsyncOpened { transaction_id: i32, handle: i32 },
    WalletDeleted { wallet: String },
    WalletClosed { wallet: String },
    WalletClosedId { handle: i32 },
    AllWalletsClosed,
    FolderListUpdated { wallet: String },
    FolderUpdated { wallet: String, folder: String },
    ApplicationDisconnected { wallet: String, application: String },
}

impl Signal {
    pub fn kind(&self) -> SignalKind {
        match self {
            Self::WalletListDirty => SignalKind::WalletListDirty,
            Self::WalletCreated { .. } => SignalKind::WalletCreated,
            Self::WalletOpened { .. } => SignalKind::WalletOpened,
            Self::WalletAsyncOpened { .. } => SignalKind::WalletAsyncOpened,
            Self::WalletDeleted { .. } => SignalKind::WalletDeleted,
            Self::WalletClosed { .. } => SignalKind::WalletClosed,
            Self::WalletClosedId { .. } => SignalKind::WalletClosedId,
            Self::AllWalletsClosed => SignalKind::AllWalletsClosed,
            Self::FolderListUpdated { .. } => SignalKind::FolderListUpdated,
            Self::FolderUpdated { .. } => SignalKind::FolderUpdated,
            Self::ApplicationDisconnected { .. } => SignalKind::ApplicationDisconnected,
        }
    }

    /// Decodes a raw bus signal. Returns `None` for foreign interfaces,
    /// unknown members and argument lists that do not fit the member, which
    /// includes the legacy integer form of `walletClosed`.
    pub fn from_raw(raw: &RawSignal) -> Option<Self> {
        if raw.interface != KWALLET_INTERFACE {
            return None;
        }
        let kind = SignalKind::from_member(&raw.member)?;
        let text = |index: usize| raw.args.get(index).and_then(BusValue::as_str).map(str::to_owned);
        let int = |index: usize| raw.args.get(index).and_then(BusValue::as_i32);
        let signal = match kind {
            SignalKind::WalletListDirty => Self::WalletListDirty,
            SignalKind::WalletCreated => Self::WalletCreated { wallet: text(0)? },
            SignalKind::WalletOpened => Self::WalletOpened { wallet: text(0)? },
            SignalKind::WalletAsyncOpened => {
                Self::WalletAsyncOpened { transaction_id: int(0)?, handle: int(1)? }
            }
            SignalKind::WalletDeleted => Self::WalletDeleted { wallet: text(0)? },
            SignalKind::WalletClosed => Self::WalletClosed { wallet: text(0)? },
            SignalKind::WalletClosedId => Self::WalletClosedId { handle: int(0)? },
            SignalKind::AllWalletsClosed => Self::AllWalletsClosed,
            SignalKind::FolderListUpdated => Self::FolderListUpdated { wallet: text(0)? },
            SignalKind::FolderUpdated => Self::FolderUpdated { wallet: text(0)?, folder: text(1)? },
            SignalKind::ApplicationDisconnected => {
                Self::ApplicationDisconnected { wallet: text(0)?, application: text(1)? }
            }
        };
        Some(signal)
    }

    /// The value a change record reports for this signal. Signals without a
    /// payload report the origin path.
    fn change_value(&self, path: &str) -> BusValue {
        match self {
            Self::WalletListDirty | Self::AllWalletsClosed => BusValue::ObjectPath(path.to_owned()),
            Self::WalletCreated { wallet }
            | Self::WalletOpened { wallet }
            | Self::WalletDeleted { wallet }
            | Self::WalletClosed { wallet }
            | Self::FolderListUpdated { wallet } => BusValue::Str(wallet.clone()),
            Self::WalletAsyncOpened { handle, .. } | Self::WalletClosedId { handle } => {
                BusValue::Int32(*handle)
            }
            Self::FolderUpdated { wallet, folder } => BusValue::Str(format!("{wallet}/{folder}")),
            Self::ApplicationDisconnected { wallet, application } => {
                BusValue::Str(format!("{application}/{wallet}"))
            }
        }
    }
}

/// A signal as recorded by the router: payload, origin path and the
/// router-wide sequence number it was observed at (starting at 1).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub seq: u64,
    pub path: String,
    pub signal: Signal,
}

impl Notification {
    pub fn kind(&self) -> SignalKind {
        self.signal.kind()
    }

    pub fn matches(&self, kind: SignalKind, path: Option<&str>) -> bool {
        self.kind() == kind && path.map_or(true, |path| self.path == path)
    }

    pub fn change_record(&self) -> ChangeRecord {
        ChangeRecord {
            property: self.kind().property_name().to_owned(),
            old_value: None,
            new_value: self.signal.change_value(&self.path),
            seq: self.seq,
        }
    }
}

/// What listeners receive for every routed signal. `old_value` is always
/// `None`: signals are events, not state transitions.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ChangeRecord {
    pub property: String,
    pub old_value: Option<BusValue>,
    pub new_value: BusValue,
    pub seq: u64,
}
