use std::fmt;

use serde::{Deserialize, Serialize};

use crate::codec;
use crate::error::CodecError;

/// Ordered key/value table backing a KWallet map entry.
///
/// Keys are unique; storing an existing key replaces its value in place.
///
/// Text must be valid UTF-16. A blob holding an unpaired surrogate is
/// rejected as a whole ([`CodecError::InvalidUtf16`]) rather than read with
/// the surrogate kept or replaced, so such a map cannot be loaded through
/// [`MapEntries::decode`] or [`MapEntries::set_byte_field`].
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MapEntries {
    entries: Vec<(String, String)>,
}

impl MapEntries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry or replaces the value of an existing key.
    pub fn store_entry(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == key) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Removes `key` only if it currently maps to `value`.
    pub fn remove_entry(&mut self, key: &str, value: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(k, v)| !(k == key && v == value));
        self.entries.len() != before
    }

    pub fn has_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    pub fn has_value(&self, key: &str, value: &str) -> bool {
        self.get(key) == Some(value)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    /// Value stored under `key`, or `""` when the key is absent.
    pub fn value(&self, key: &str) -> &str {
        self.get(key).unwrap_or("")
    }

    /// Replaces the value of an existing key. Returns `false` and leaves the
    /// table untouched when the key is absent.
    pub fn change_value(&mut self, key: &str, value: impl Into<String>) -> bool {
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => {
                slot.1 = value.into();
                true
            }
            None => false,
        }
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        codec::encode(&self.entries)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        codec::decode(bytes).map(|entries| Self { entries })
    }

    /// Blob for a `writeMap` call. Encoding failures are logged and yield an
    /// empty blob.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.encode().unwrap_or_else(|err| {
            log::error!("failed to encode map entries: {err}");
            Vec::new()
        })
    }

    /// Replaces the table with the contents of a `readMap` blob.
    ///
    /// Returns `false` and leaves the table empty when the blob is malformed,
    /// including when it contains an unpaired UTF-16 surrogate.
    pub fn set_byte_field(&mut self, bytes: &[u8]) -> bool {
        self.entries.clear();
        match codec::decode(bytes) {
            Ok(entries) => {
                self.entries = entries;
                true
            }
            Err(err) => {
                log::error!("failed to decode map entries: {err}");
                false
            }
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MapEntries {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut entries = Self::new();
        for (key, value) in iter {
            entries.store_entry(key, value);
        }
        entries
    }
}

impl fmt::Display for MapEntries {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn shown(text: &str) -> &str {
            if text.is_empty() {
                "''"
            } else {
                text
            }
        }
        for (index, (key, value)) in self.entries.iter().enumerate() {
            if index > 0 {
                writeln!(f)?;
            }
            write!(f, "MapEntries ({}) {{key: {}, value: {}}}", index + 1, shown(key), shown(value))?;
        }
        Ok(())
    }
}
