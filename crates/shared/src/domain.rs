use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::QueryParamsError;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        pub struct $name(pub u64);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(PageIndex);
id_newtype!(Epoch);
id_newtype!(AnchorId);
id_newtype!(WatchId);

impl PageIndex {
    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl Epoch {
    pub fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

/// Key/value record handed to every page fetch.
///
/// Keys are ordered so that two equal records always serialize identically,
/// which keeps log lines and test assertions stable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryParams(BTreeMap<String, Value>);

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Shallow merge: every key in `partial` replaces the existing value.
    pub fn merge(&mut self, partial: QueryParams) {
        self.0.extend(partial.0);
    }

    pub fn merged(&self, partial: QueryParams) -> Self {
        let mut next = self.clone();
        next.merge(partial);
        next
    }

    /// Parses `key=value` pairs. Values that read as JSON scalars keep their
    /// type, anything else is stored as a string.
    pub fn parse_pairs<I, S>(pairs: I) -> Result<Self, QueryParamsError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut params = Self::new();
        for pair in pairs {
            let pair = pair.as_ref();
            let (key, raw) = pair
                .split_once('=')
                .ok_or_else(|| QueryParamsError::MissingSeparator(pair.to_string()))?;
            let key = key.trim();
            if key.is_empty() {
                return Err(QueryParamsError::EmptyKey(pair.to_string()));
            }
            let raw = raw.trim();
            let value = match serde_json::from_str::<Value>(raw) {
                Ok(value @ (Value::Bool(_) | Value::Number(_) | Value::Null)) => value,
                _ => Value::String(raw.to_string()),
            };
            params.insert(key, value);
        }
        Ok(params)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for QueryParams {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }
}
