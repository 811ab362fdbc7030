//! Typed client for the KDE Wallet daemon.
//!
//! ```text
//!  KdeWallet ──► CallHandler ──► BusTransport ──► kwalletd
//!      │                              │
//!      └──────► SignalRouter ◄────────┘ (walletOpened, folderUpdated, ...)
//! ```
//!
//! A process creates one [`SignalRouter`] and shares it between every
//! [`KdeWallet`] it builds. The transport is supplied by the caller; see
//! [`kwallet_bus::BusTransport`].
//!
//! Stored maps use kwalletd's binary map format, handled by
//! [`MapEntries`].

mod config;
mod error;
mod wallet;

pub use config::{
    WalletConfig, KWALLETD5_PATH, KWALLETD5_SERVICE, KWALLETD6_PATH, KWALLETD6_SERVICE,
};
pub use error::ConfigError;
pub use wallet::{EntryType, KdeWallet, DEFAULT_WALLET};

pub use kwallet_bus::{
    BusError, BusTransport, BusValue, ChangeRecord, Notification, Signal, SignalKind,
    SignalListener, SignalRouter,
};
pub use kwallet_map::MapEntries;
