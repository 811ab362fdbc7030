//! Map entries as stored by kwalletd.
//!
//! KWallet keeps three kinds of secrets: passwords, raw byte entries and
//! maps. A map is an ordered set of string pairs that the daemon treats as
//! an opaque byte blob, so clients have to produce and parse that blob
//! themselves. [`MapEntries`] is the in-memory table and the codec between
//! it and the blob layout:
//!
//! ```text
//! u32 count
//! count × ( FF FF FF FF FF FF FF FF                     -- key and value empty
//!         | u32 key_len  key_len bytes of UTF-16BE
//!           ( 00 00 00 00                               -- value empty
//!           | u32 value_len  value_len bytes of UTF-16BE ) )
//! ```
//!
//! All integers are big-endian and lengths are byte counts, i.e. twice the
//! number of UTF-16 code units.

mod codec;
mod entries;
mod error;

pub use codec::{decode, encode, EMPTY_ENTRY, EMPTY_VALUE};
pub use entries::MapEntries;
pub use error::CodecError;
