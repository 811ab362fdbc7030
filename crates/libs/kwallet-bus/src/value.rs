use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// An argument or return value as exchanged with the bus.
///
/// Only the shapes kwalletd uses are modelled; marshalling to the wire is
/// the transport's business.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum BusValue {
    Bool(bool),
    Byte(u8),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    Str(String),
    ObjectPath(String),
    Bytes(Vec<u8>),
    Array(Vec<BusValue>),
    Dict(BTreeMap<String, BusValue>),
    Variant(Box<BusValue>),
}

impl BusValue {
    /// Strips any number of variant wrappers.
    pub fn unwrap_variant(&self) -> &BusValue {
        let mut value = self;
        while let Self::Variant(inner) = value {
            value = inner;
        }
        value
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.unwrap_variant() {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self.unwrap_variant() {
            Self::Int32(value) => Some(*value),
            Self::Byte(value) => Some(i32::from(*value)),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self.unwrap_variant() {
            Self::Int64(value) => Some(*value),
            Self::Int32(value) => Some(i64::from(*value)),
            Self::UInt32(value) => Some(i64::from(*value)),
            Self::Byte(value) => Some(i64::from(*value)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self.unwrap_variant() {
            Self::Str(value) | Self::ObjectPath(value) => Some(value.as_str()),
            _ => None,
        }
    }

    /// Byte payloads arrive either packed or as an array of bytes, depending
    /// on the transport.
    pub fn to_bytes(&self) -> Option<Vec<u8>> {
        match self.unwrap_variant() {
            Self::Bytes(bytes) => Some(bytes.clone()),
            Self::Array(items) => items
                .iter()
                .map(|item| match item.unwrap_variant() {
                    Self::Byte(byte) => Some(*byte),
                    _ => None,
                })
                .collect(),
            _ => None,
        }
    }

    pub fn to_string_list(&self) -> Option<Vec<String>> {
        match self.unwrap_variant() {
            Self::Array(items) => items.iter().map(|item| item.as_str().map(str::to_owned)).collect(),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<String, BusValue>> {
        match self.unwrap_variant() {
            Self::Dict(entries) => Some(entries),
            _ => None,
        }
    }
}

impl From<bool> for BusValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for BusValue {
    fn from(value: i32) -> Self {
        Self::Int32(value)
    }
}

impl From<i64> for BusValue {
    fn from(value: i64) -> Self {
        Self::Int64(value)
    }
}

impl From<&str> for BusValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_owned())
    }
}

impl From<String> for BusValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<Vec<u8>> for BusValue {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

impl From<Vec<String>> for BusValue {
    fn from(value: Vec<String>) -> Self {
        Self::Array(value.into_iter().map(Self::Str).collect())
    }
}
