//! Per-security auxiliary data.
//!
//! Two flavors: a typed slot per Rust type (one value of each type) and a
//! string-keyed bag of simple values for data whose shape is only known at
//! run time (config-driven fundamentals, tags).

use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Untagged: `true` is a flag, numbers are decimals, RFC 3339 strings are
/// times and any other string is text.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DataValue {
    Flag(bool),
    Decimal(Decimal),
    Time(DateTime<Utc>),
    Text(String),
}

impl DataValue {
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            DataValue::Decimal(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            DataValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            DataValue::Flag(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_time(&self) -> Option<DateTime<Utc>> {
        match self {
            DataValue::Time(t) => Some(*t),
            _ => None,
        }
    }
}

#[derive(Default)]
pub struct SecurityData {
    typed: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
    values: BTreeMap<String, DataValue>,
}

impl SecurityData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a typed value, returning the one it replaced.
    pub fn insert<T: Any + Send + Sync>(&mut self, value: T) -> Option<T> {
        self.typed
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|prev| prev.downcast::<T>().ok())
            .map(|b| *b)
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.typed
            .get(&TypeId::of::<T>())
            .and_then(|b| b.downcast_ref::<T>())
    }

    pub fn get_mut<T: Any + Send + Sync>(&mut self) -> Option<&mut T> {
        self.typed
            .get_mut(&TypeId::of::<T>())
            .and_then(|b| b.downcast_mut::<T>())
    }

    pub fn remove<T: Any + Send + Sync>(&mut self) -> Option<T> {
        self.typed
            .remove(&TypeId::of::<T>())
            .and_then(|b| b.downcast::<T>().ok())
            .map(|b| *b)
    }

    pub fn set_value<K: Into<String>>(&mut self, key: K, value: DataValue) {
        self.values.insert(key.into(), value);
    }

    pub fn value(&self, key: &str) -> Option<&DataValue> {
        self.values.get(key)
    }

    pub fn values(&self) -> &BTreeMap<String, DataValue> {
        &self.values
    }
}

impl fmt::Debug for SecurityData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityData")
            .field("typed_slots", &self.typed.len())
            .field("values", &self.values)
            .finish()
    }
}
