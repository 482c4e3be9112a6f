// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Core data types for kiln.
//!
//! This module provides the identifier newtypes, the dynamic symbol value
//! representation and the timestamped data point that flow through every
//! layer of the backbone.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::{self, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

// =============================================================================
// Identifiers
// =============================================================================

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier.
            #[inline]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier as a string slice.
            #[inline]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consumes the identifier and returns the inner string.
            #[inline]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id! {
    /// A unique identifier for one PLC-driven machine.
    ///
    /// Machine IDs are stable across restarts and unique within a single
    /// backbone instance.
    MachineId
}

string_id! {
    /// An identifier for a chamber, unique within its machine.
    ///
    /// A chamber groups the symbols belonging to one physical sub-unit of
    /// the manufacturing tool.
    ChamberId
}

string_id! {
    /// The full path of a symbol within a PLC's address space,
    /// e.g. `GVL.chamber1.temperature`.
    SymbolPath
}

// =============================================================================
// Data Type Tags
// =============================================================================

/// The declared data type of a PLC symbol.
///
/// The tag travels alongside the dynamic [`Value`] in a [`PlcValue`] so that
/// consumers can recover the symbol's native width even after the value has
/// passed through JSON, which only distinguishes integers from floats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlcType {
    /// Boolean flag.
    Bool,
    /// Signed 32-bit integer.
    Int32,
    /// Signed 64-bit integer.
    Int64,
    /// 32-bit IEEE float.
    Float32,
    /// 64-bit IEEE float.
    Float64,
    /// UTF-8 string.
    String,
    /// Raw byte payload.
    Bytes,
}

impl PlcType {
    /// Returns the tag name as used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            PlcType::Bool => "bool",
            PlcType::Int32 => "int32",
            PlcType::Int64 => "int64",
            PlcType::Float32 => "float32",
            PlcType::Float64 => "float64",
            PlcType::String => "string",
            PlcType::Bytes => "bytes",
        }
    }
}

impl fmt::Display for PlcType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Value
// =============================================================================

/// A dynamic symbol value.
///
/// PLC symbols span booleans, integers of various widths, floats, strings
/// and raw bytes; this enum is the tagged union over all of them.
///
/// # JSON encoding
///
/// Values serialize to their natural JSON form (`true`, `42`, `42.5`,
/// `"text"`, `[1, 2, 3]`) rather than an adjacently tagged object; the type
/// tag lives in [`PlcValue`], keeping the wire format compact. Decoding is
/// strict: JSON integers become [`Value::Int64`], floats become
/// [`Value::Float64`], and any shape outside the supported set is rejected
/// instead of defaulting to zero.
///
/// # Examples
///
/// ```
/// use kiln_core::types::Value;
///
/// let temp = Value::Float64(213.4);
/// assert_eq!(temp.as_f64(), Some(213.4));
/// assert_eq!(temp.type_name(), "float64");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Boolean value.
    Bool(bool),
    /// Signed 32-bit integer.
    Int32(i32),
    /// Signed 64-bit integer.
    Int64(i64),
    /// 32-bit floating point.
    Float32(f32),
    /// 64-bit floating point.
    Float64(f64),
    /// UTF-8 string.
    String(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
}

impl Value {
    /// Returns the type name of this value.
    #[inline]
    pub fn type_name(&self) -> &'static str {
        self.plc_type().as_str()
    }

    /// Returns the [`PlcType`] tag corresponding to this value.
    #[inline]
    pub fn plc_type(&self) -> PlcType {
        match self {
            Value::Bool(_) => PlcType::Bool,
            Value::Int32(_) => PlcType::Int32,
            Value::Int64(_) => PlcType::Int64,
            Value::Float32(_) => PlcType::Float32,
            Value::Float64(_) => PlcType::Float64,
            Value::String(_) => PlcType::String,
            Value::Bytes(_) => PlcType::Bytes,
        }
    }

    /// Returns `true` if this is a numeric value (integer or float).
    #[inline]
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Value::Int32(_) | Value::Int64(_) | Value::Float32(_) | Value::Float64(_)
        )
    }

    /// Attempts to convert this value to a boolean.
    #[inline]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Attempts to convert this value to an i64.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Bool(v) => Some(i64::from(*v)),
            Value::Int32(v) => Some(i64::from(*v)),
            Value::Int64(v) => Some(*v),
            Value::Float32(v) => Some(*v as i64),
            Value::Float64(v) => Some(*v as i64),
            _ => None,
        }
    }

    /// Attempts to convert this value to an f64.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            Value::Int32(v) => Some(f64::from(*v)),
            Value::Int64(v) => Some(*v as f64),
            Value::Float32(v) => Some(f64::from(*v)),
            Value::Float64(v) => Some(*v),
            _ => None,
        }
    }

    /// Attempts to get this value as a string reference.
    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(v) => Some(v),
            _ => None,
        }
    }

    /// Attempts to get this value as a byte slice.
    #[inline]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the canonical string form used for write verification.
    ///
    /// Two values compare equal under read-back verification iff their
    /// canonical forms are identical, so `Int32(42)` written and `Int64(42)`
    /// read back still verify.
    pub fn canonical(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int32(v) => write!(f, "{}", v),
            Value::Int64(v) => write!(f, "{}", v),
            Value::Float32(v) => write!(f, "{}", v),
            Value::Float64(v) => write!(f, "{}", v),
            Value::String(v) => write!(f, "{}", v),
            Value::Bytes(v) => write!(f, "<{} bytes>", v.len()),
        }
    }
}

macro_rules! impl_from_for_value {
    ($variant:ident, $type:ty) => {
        impl From<$type> for Value {
            fn from(v: $type) -> Self {
                Value::$variant(v)
            }
        }
    };
}

impl_from_for_value!(Bool, bool);
impl_from_for_value!(Int32, i32);
impl_from_for_value!(Int64, i64);
impl_from_for_value!(Float32, f32);
impl_from_for_value!(Float64, f64);
impl_from_for_value!(String, String);
impl_from_for_value!(Bytes, Vec<u8>);

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Value::Bool(v) => serializer.serialize_bool(*v),
            Value::Int32(v) => serializer.serialize_i32(*v),
            Value::Int64(v) => serializer.serialize_i64(*v),
            Value::Float32(v) => serializer.serialize_f32(*v),
            Value::Float64(v) => serializer.serialize_f64(*v),
            Value::String(v) => serializer.serialize_str(v),
            Value::Bytes(v) => serializer.collect_seq(v.iter()),
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ValueVisitor;

        impl<'de> Visitor<'de> for ValueVisitor {
            type Value = Value;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a bool, integer, float, string or byte array")
            }

            fn visit_bool<E: de::Error>(self, v: bool) -> Result<Value, E> {
                Ok(Value::Bool(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Value, E> {
                Ok(Value::Int64(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Value, E> {
                i64::try_from(v)
                    .map(Value::Int64)
                    .map_err(|_| E::custom(format!("integer {} out of range", v)))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Value, E> {
                Ok(Value::Float64(v))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Value, E> {
                Ok(Value::String(v.to_string()))
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Value, A::Error>
            where
                A: SeqAccess<'de>,
            {
                let mut bytes = Vec::with_capacity(seq.size_hint().unwrap_or(0));
                while let Some(b) = seq.next_element::<u8>()? {
                    bytes.push(b);
                }
                Ok(Value::Bytes(bytes))
            }
        }

        deserializer.deserialize_any(ValueVisitor)
    }
}

// =============================================================================
// PlcValue
// =============================================================================

/// A single timestamped datum read from a PLC.
///
/// Immutable once emitted. The timestamp is assigned when the enclosing
/// batch read returned, so every value of one batch carries the same
/// timestamp.
///
/// # Examples
///
/// ```
/// use kiln_core::types::{MachineId, PlcValue, SymbolPath, Value};
///
/// let v = PlcValue::now(
///     MachineId::new("etch-01"),
///     SymbolPath::new("GVL.ch1.pressure"),
///     Value::Float64(0.42),
/// );
/// assert_eq!(v.quality, 100);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlcValue {
    /// The symbol this value was read from.
    pub symbol: SymbolPath,

    /// The value itself.
    pub value: Value,

    /// Declared type of the symbol.
    #[serde(rename = "type")]
    pub data_type: PlcType,

    /// Quality of the reading in `[0, 100]`.
    pub quality: u8,

    /// When the batch containing this value returned.
    pub timestamp: DateTime<Utc>,

    /// The machine the value originated from.
    pub source: MachineId,
}

impl PlcValue {
    /// Creates a full-quality value stamped with the current time.
    pub fn now(source: MachineId, symbol: SymbolPath, value: Value) -> Self {
        let data_type = value.plc_type();
        Self {
            symbol,
            data_type,
            value,
            quality: 100,
            timestamp: Utc::now(),
            source,
        }
    }

    /// Creates a full-quality value with an explicit batch timestamp.
    pub fn at(
        source: MachineId,
        symbol: SymbolPath,
        value: Value,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let data_type = value.plc_type();
        Self {
            symbol,
            data_type,
            value,
            quality: 100,
            timestamp,
            source,
        }
    }
}

impl fmt::Display for PlcValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} = {} [{}] @ {}",
            self.source,
            self.symbol,
            self.value,
            self.quality,
            self.timestamp.format("%Y-%m-%d %H:%M:%S%.3f")
        )
    }
}

/// The raw result of a batch read, before values are stamped into
/// [`PlcValue`]s.
pub type SymbolValues = HashMap<SymbolPath, Value>;

// =============================================================================
// Connection State
// =============================================================================

/// The state of a PLC connection as driven by its handler task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No client handle exists yet.
    #[default]
    Disconnected,

    /// The client factory is being invoked.
    Connecting,

    /// A live client handle exists and requests are being served.
    Connected,

    /// The last connection attempt failed; the next health tick retries.
    Error,
}

impl ConnectionState {
    /// Returns `true` if requests can currently be dispatched.
    #[inline]
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Error => "error",
        };
        write!(f, "{}", s)
    }
}

// =============================================================================
// Connection Status
// =============================================================================

/// Health counters for one PLC connection.
///
/// Mutated only by the owning connection's handler task; read everywhere
/// through snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    /// The machine this connection serves.
    pub machine_id: MachineId,

    /// Whether a live client handle currently exists.
    pub connected: bool,

    /// Time of the last successful connect or request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,

    /// Cumulative transport and connect failures.
    pub error_count: u64,

    /// Cumulative successful (re)connects.
    pub reconnect_count: u64,
}

impl ConnectionStatus {
    /// Creates a fresh status for a machine that has never connected.
    pub fn new(machine_id: MachineId) -> Self {
        Self {
            machine_id,
            connected: false,
            last_seen: None,
            error_count: 0,
            reconnect_count: 0,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn machine_id_roundtrip() {
        let id = MachineId::new("etch-01");
        assert_eq!(id.as_str(), "etch-01");
        assert_eq!(format!("{}", id), "etch-01");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"etch-01\"");
    }

    #[test]
    fn value_type_names() {
        assert_eq!(Value::Bool(true).type_name(), "bool");
        assert_eq!(Value::Int32(7).type_name(), "int32");
        assert_eq!(Value::Float64(1.5).type_name(), "float64");
        assert_eq!(Value::Bytes(vec![1]).type_name(), "bytes");
    }

    #[test]
    fn value_conversions() {
        assert_eq!(Value::Int32(42).as_i64(), Some(42));
        assert_eq!(Value::Int64(42).as_f64(), Some(42.0));
        assert_eq!(Value::Bool(true).as_i64(), Some(1));
        assert_eq!(Value::String("x".into()).as_str(), Some("x"));
        assert_eq!(Value::String("x".into()).as_i64(), None);
    }

    #[test]
    fn value_natural_json() {
        assert_eq!(serde_json::to_string(&Value::Bool(true)).unwrap(), "true");
        assert_eq!(serde_json::to_string(&Value::Int64(9)).unwrap(), "9");
        assert_eq!(serde_json::to_string(&Value::Float64(2.5)).unwrap(), "2.5");
        assert_eq!(
            serde_json::to_string(&Value::String("hi".into())).unwrap(),
            "\"hi\""
        );
        assert_eq!(
            serde_json::to_string(&Value::Bytes(vec![1, 2, 3])).unwrap(),
            "[1,2,3]"
        );
    }

    #[test]
    fn value_strict_decoding() {
        assert_eq!(
            serde_json::from_str::<Value>("42").unwrap(),
            Value::Int64(42)
        );
        assert_eq!(
            serde_json::from_str::<Value>("42.5").unwrap(),
            Value::Float64(42.5)
        );
        assert_eq!(
            serde_json::from_str::<Value>("[1,2]").unwrap(),
            Value::Bytes(vec![1, 2])
        );

        // Unsupported shapes are rejected, never defaulted.
        assert!(serde_json::from_str::<Value>("null").is_err());
        assert!(serde_json::from_str::<Value>("{\"a\":1}").is_err());
        assert!(serde_json::from_str::<Value>("[1,300]").is_err());
    }

    #[test]
    fn canonical_form_ignores_width() {
        assert_eq!(Value::Int32(42).canonical(), Value::Int64(42).canonical());
        assert_ne!(Value::Int64(42).canonical(), Value::Int64(41).canonical());
    }

    #[test]
    fn plc_value_shares_batch_timestamp() {
        let ts = Utc::now();
        let a = PlcValue::at(
            MachineId::new("m1"),
            SymbolPath::new("s1"),
            Value::Int64(1),
            ts,
        );
        let b = PlcValue::at(
            MachineId::new("m1"),
            SymbolPath::new("s2"),
            Value::Int64(2),
            ts,
        );
        assert_eq!(a.timestamp, b.timestamp);
        assert_eq!(a.quality, 100);
    }

    #[test]
    fn connection_state() {
        assert!(!ConnectionState::Disconnected.is_connected());
        assert!(ConnectionState::Connected.is_connected());
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
    }

    #[test]
    fn plc_value_wire_format() {
        let v = PlcValue::at(
            MachineId::new("m1"),
            SymbolPath::new("GVL.temp"),
            Value::Float64(21.5),
            Utc::now(),
        );
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json["symbol"], "GVL.temp");
        assert_eq!(json["value"], 21.5);
        assert_eq!(json["type"], "float64");
        assert_eq!(json["quality"], 100);
        assert_eq!(json["source"], "m1");
    }
}
