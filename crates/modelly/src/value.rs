#![forbid(unsafe_code)]

//! Field values stored on observed records and channels.
//!
//! A [`Value`] is a closed set of variants. The observation pipeline
//! dispatches on the variant instead of inspecting types at runtime:
//!
//! | Variant   | Meaning                                   | Stored as        |
//! |-----------|-------------------------------------------|------------------|
//! | primitive | `Null`, `Bool`, `Number`, `String`        | as-is            |
//! | `Record`  | raw plain structure, not yet observed     | wrapped `Object` |
//! | `Object`  | observed plain structure                  | as-is            |
//! | `Channel` | nested observable model                   | as-is            |
//!
//! # Equality
//!
//! Two notions of equality exist:
//!
//! - [`Value::is_same`] is the identity check used by the write pipeline.
//!   Primitives compare by value (`NaN` is never the same as itself), handles
//!   compare by pointer, and a raw `Record` is never the same as anything.
//! - `PartialEq` is structural: handles compare by their current enumerable
//!   fields. Internal channel state never participates.

use std::collections::BTreeMap;
use std::collections::btree_map;
use std::fmt;

use crate::channel::Channel;
use crate::observer::Observed;

/// A single field value.
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    /// Raw plain structure. Wrapped into [`Value::Object`] when stored.
    Record(Record),
    /// Observed plain structure.
    Object(Observed),
    /// Nested observable model.
    Channel(Channel),
}

impl Value {
    /// Identity comparison used to decide whether a write is a change.
    #[must_use]
    pub fn is_same(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a.ptr_eq(b),
            (Self::Channel(a), Self::Channel(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// Whether this value is already observed (an observed record or a channel).
    #[must_use]
    pub fn is_observed(&self) -> bool {
        matches!(self, Self::Object(_) | Self::Channel(_))
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_object(&self) -> Option<&Observed> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_channel(&self) -> Option<&Channel> {
        match self {
            Self::Channel(c) => Some(c),
            _ => None,
        }
    }

    /// Deep copy of the enumerable data, with every handle replaced by a raw
    /// [`Record`] of its current fields.
    #[must_use]
    pub fn to_plain(&self) -> Value {
        match self {
            Self::Record(r) => Self::Record(r.to_plain()),
            Self::Object(o) => Self::Record(o.snapshot()),
            Self::Channel(c) => Self::Record(c.snapshot()),
            other => other.clone(),
        }
    }

    /// Channels reachable from this value without crossing another channel.
    ///
    /// A channel value yields itself; records and observed records are
    /// searched recursively.
    pub(crate) fn reachable_channels(&self) -> Vec<Channel> {
        let mut out = Vec::new();
        self.collect_channels(&mut out);
        out
    }

    fn collect_channels(&self, out: &mut Vec<Channel>) {
        match self {
            Self::Channel(c) => out.push(c.clone()),
            Self::Record(r) => r.values().for_each(|v| v.collect_channels(out)),
            Self::Object(o) => o.values().iter().for_each(|v| v.collect_channels(out)),
            _ => {}
        }
    }

    fn fields(&self) -> Option<Record> {
        match self {
            Self::Record(r) => Some(r.clone()),
            Self::Object(o) => Some(o.snapshot()),
            Self::Channel(c) => Some(c.snapshot()),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            _ if self.is_same(other) => true,
            _ => match (self.fields(), other.fields()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Record(r) => r.fmt(f),
            Self::Object(o) => o.fmt(f),
            Self::Channel(c) => c.fmt(f),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Number(f64::from(value))
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Self::Number(f64::from(value))
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<Record> for Value {
    fn from(value: Record) -> Self {
        Self::Record(value)
    }
}

impl From<Observed> for Value {
    fn from(value: Observed) -> Self {
        Self::Object(value)
    }
}

impl From<Channel> for Value {
    fn from(value: Channel) -> Self {
        Self::Channel(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Extraction of a typed value out of a [`Value`].
///
/// Returns `None` when the variant does not match.
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Option<Self>;
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Option<Self> {
        Some(value.clone())
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_bool()
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_f64()
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Option<Self> {
        let n = value.as_f64()?;
        // `i64::MAX as f64` rounds up to 2^63, which is out of range.
        (n.fract() == 0.0 && n >= i64::MIN as f64 && n < i64::MAX as f64).then_some(n as i64)
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_str().map(str::to_owned)
    }
}

impl FromValue for Observed {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_object().cloned()
    }
}

impl FromValue for Channel {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_channel().cloned()
    }
}

impl FromValue for Record {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Record(r) => Some(r.clone()),
            Value::Object(o) => Some(o.snapshot()),
            _ => None,
        }
    }
}

/// Raw plain structure: an ordered map from field name to [`Value`].
///
/// Records are what callers build and what snapshots return. They are not
/// observed; storing one on a channel wraps it.
#[derive(Clone, Default, PartialEq)]
pub struct Record {
    fields: BTreeMap<String, Value>,
}

impl Record {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields.remove(key)
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.fields.values()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, Value> {
        self.fields.iter()
    }

    /// Deep copy with every nested handle flattened to a record.
    #[must_use]
    pub fn to_plain(&self) -> Record {
        self.fields
            .iter()
            .map(|(k, v)| (k.clone(), v.to_plain()))
            .collect()
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.fields.iter()).finish()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl<K: Into<String>, V: Into<Value>, const N: usize> From<[(K, V); N]> for Record {
    fn from(entries: [(K, V); N]) -> Self {
        entries.into_iter().collect()
    }
}

impl IntoIterator for Record {
    type Item = (String, Value);
    type IntoIter = btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

impl<'a> IntoIterator for &'a Record {
    type Item = (&'a String, &'a Value);
    type IntoIter = btree_map::Iter<'a, String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitives_are_same_by_value() {
        assert!(Value::from(1).is_same(&Value::from(1.0)));
        assert!(Value::from("a").is_same(&Value::from("a".to_string())));
        assert!(Value::Null.is_same(&Value::Null));
        assert!(!Value::from(true).is_same(&Value::from(false)));
        assert!(!Value::from(1).is_same(&Value::from("1")));
    }

    #[test]
    fn nan_is_never_same() {
        let nan = Value::from(f64::NAN);
        assert!(!nan.is_same(&nan.clone()));
    }

    #[test]
    fn fresh_records_are_never_same() {
        let a = Value::from(Record::new());
        assert!(!a.is_same(&a.clone()));
        // Structurally they are equal.
        assert_eq!(a, Value::from(Record::new()));
    }

    #[test]
    fn record_builder_and_lookup() {
        let r = Record::new().with("b", 2).with("a", "x");
        assert_eq!(r.len(), 2);
        assert_eq!(r.get("a"), Some(&Value::from("x")));
        assert_eq!(r.keys().collect::<Vec<_>>(), vec!["a", "b"]);
        assert!(r.contains_key("b"));
        assert!(!r.contains_key("c"));
    }

    #[test]
    fn record_from_array() {
        let r = Record::from([("x", 1), ("y", 2)]);
        assert_eq!(r, Record::new().with("x", 1).with("y", 2));
    }

    #[test]
    fn option_converts_to_null() {
        assert_eq!(Value::from(None::<bool>), Value::Null);
        assert_eq!(Value::from(Some(true)), Value::Bool(true));
    }

    #[test]
    fn typed_extraction() {
        assert_eq!(bool::from_value(&Value::from(true)), Some(true));
        assert_eq!(i64::from_value(&Value::from(3)), Some(3));
        assert_eq!(i64::from_value(&Value::from(3.5)), None);
        assert_eq!(String::from_value(&Value::from("s")), Some("s".to_string()));
        assert_eq!(String::from_value(&Value::from(1)), None);
    }

    #[test]
    fn i64_extraction_rejects_out_of_range() {
        let two_pow_63 = 9_223_372_036_854_775_808.0_f64;
        assert_eq!(i64::from_value(&Value::from(two_pow_63)), None);
        assert_eq!(i64::from_value(&Value::from(f64::INFINITY)), None);
        assert_eq!(i64::from_value(&Value::from(-two_pow_63)), Some(i64::MIN));
        assert_eq!(i64::from_value(&Value::from(2_f64.powi(62))), Some(1 << 62));
    }

    #[test]
    fn reachable_channels_skips_primitives() {
        let v = Value::from(Record::new().with("a", 1).with("b", Record::new().with("c", "d")));
        assert!(v.reachable_channels().is_empty());
    }

    #[test]
    fn nested_record_to_plain_is_structurally_equal() {
        let r = Record::new().with("inner", Record::new().with("n", 1));
        assert_eq!(r.to_plain(), r);
    }
}
