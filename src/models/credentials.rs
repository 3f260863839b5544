//! Typed credential storage.
//!
//! Credentials are stored per key as a [`CredentialValue`], a tagged union whose
//! variant records the declared type. Reads name the type they expect and only
//! succeed on an exact variant match; any other stored type reads as `None`.

use crate::error::{DbError, DbResult};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

/// A credential slot. Implemented by closed enums, one per database kind.
pub trait CredentialKey: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static {
    /// Stable name of the slot, used in messages and serialized stores.
    fn name(&self) -> &'static str;

    /// Secret slots are masked when a store is printed.
    fn is_secret(&self) -> bool {
        false
    }
}

/// Minimal credential set for a direct SQL connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BasicCredential {
    Url,
    Username,
    Password,
}

impl CredentialKey for BasicCredential {
    fn name(&self) -> &'static str {
        match self {
            Self::Url => "url",
            Self::Username => "username",
            Self::Password => "password",
        }
    }

    fn is_secret(&self) -> bool {
        matches!(self, Self::Password)
    }
}

/// Credential set for a pooled SQL connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PooledCredential {
    Url,
    Username,
    Password,
    /// Driver name: mysql, mariadb, postgres or sqlite
    Driver,
    Port,
    MaxPoolSize,
}

impl CredentialKey for PooledCredential {
    fn name(&self) -> &'static str {
        match self {
            Self::Url => "url",
            Self::Username => "username",
            Self::Password => "password",
            Self::Driver => "driver",
            Self::Port => "port",
            Self::MaxPoolSize => "max_pool_size",
        }
    }

    fn is_secret(&self) -> bool {
        matches!(self, Self::Password)
    }
}

/// Declared type of a stored credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKind {
    String,
    I64,
    U16,
    U32,
    Bool,
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::I64 => "i64",
            Self::U16 => "u16",
            Self::U32 => "u32",
            Self::Bool => "bool",
        };
        f.write_str(name)
    }
}

/// A credential value together with its declared type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialValue {
    String(String),
    I64(i64),
    U16(u16),
    U32(u32),
    Bool(bool),
}

impl CredentialValue {
    pub fn kind(&self) -> CredentialKind {
        match self {
            Self::String(_) => CredentialKind::String,
            Self::I64(_) => CredentialKind::I64,
            Self::U16(_) => CredentialKind::U16,
            Self::U32(_) => CredentialKind::U32,
            Self::Bool(_) => CredentialKind::Bool,
        }
    }

    /// Empty strings count as absent values.
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::String(s) if s.is_empty())
    }
}

/// Rust types that can be stored as a credential.
pub trait CredentialType: Sized {
    const KIND: CredentialKind;

    fn into_value(self) -> CredentialValue;

    /// Returns `None` unless `value` was stored as exactly this type.
    fn from_value(value: &CredentialValue) -> Option<Self>;
}

macro_rules! impl_credential_type {
    ($($ty:ty => $variant:ident),+ $(,)?) => {
        $(
            impl CredentialType for $ty {
                const KIND: CredentialKind = CredentialKind::$variant;

                fn into_value(self) -> CredentialValue {
                    CredentialValue::$variant(self)
                }

                fn from_value(value: &CredentialValue) -> Option<Self> {
                    match value {
                        CredentialValue::$variant(v) => Some(v.clone()),
                        _ => None,
                    }
                }
            }
        )+
    };
}

impl_credential_type!(
    String => String,
    i64 => I64,
    u16 => U16,
    u32 => U32,
    bool => Bool,
);

/// Mapping from credential keys to typed values.
#[derive(Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct CredentialStore<K: CredentialKey> {
    entries: HashMap<K, CredentialValue>,
}

impl<K: CredentialKey> CredentialStore<K> {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Store `value` under `key`, replacing any previous entry.
    pub fn add<T: CredentialType>(&mut self, key: K, value: T) -> DbResult<()> {
        self.insert(key, value.into_value())
    }

    /// Convenience for string credentials.
    pub fn add_text(&mut self, key: K, value: impl Into<String>) -> DbResult<()> {
        self.add(key, value.into())
    }

    /// Store an already tagged value.
    pub fn insert(&mut self, key: K, value: CredentialValue) -> DbResult<()> {
        if value.is_empty() {
            return Err(DbError::invalid_configuration(format!(
                "Credential '{}' cannot be empty",
                key.name()
            )));
        }
        self.entries.insert(key, value);
        Ok(())
    }

    /// Read `key` as `T`.
    ///
    /// Returns `Ok(None)` when the key is missing or was stored with a different
    /// type. Fails only when the store holds no credentials at all.
    pub fn get<T: CredentialType>(&self, key: K) -> DbResult<Option<T>> {
        if self.entries.is_empty() {
            return Err(DbError::invalid_configuration(
                "Database credentials cannot be empty",
            ));
        }
        Ok(self.entries.get(&key).and_then(T::from_value))
    }

    /// Read `key` as `T`, treating a soft miss as a configuration error.
    pub fn require<T: CredentialType>(&self, key: K) -> DbResult<T> {
        self.get(key)?.ok_or_else(|| {
            DbError::invalid_configuration(format!(
                "Missing required credential '{}' (expected {})",
                key.name(),
                T::KIND
            ))
        })
    }

    pub fn remove(&mut self, key: K) -> DbResult<CredentialValue> {
        self.entries.remove(&key).ok_or_else(|| {
            DbError::invalid_configuration(format!("Credential '{}' is not set", key.name()))
        })
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn contains(&self, key: K) -> bool {
        self.entries.contains_key(&key)
    }

    /// Declared type of the value stored under `key`.
    pub fn kind_of(&self, key: K) -> Option<CredentialKind> {
        self.entries.get(&key).map(CredentialValue::kind)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &CredentialValue)> {
        self.entries.iter()
    }
}

impl<K: CredentialKey> Default for CredentialStore<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Deserialization goes through [`CredentialStore::insert`] so empty values are rejected.
impl<'de, K> Deserialize<'de> for CredentialStore<K>
where
    K: CredentialKey + Deserialize<'de>,
{
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let entries = HashMap::<K, CredentialValue>::deserialize(deserializer)?;
        let mut store = Self::new();
        for (key, value) in entries {
            store.insert(key, value).map_err(serde::de::Error::custom)?;
        }
        Ok(store)
    }
}

/// Secret values are never printed.
impl<K: CredentialKey> fmt::Debug for CredentialStore<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (key, value) in &self.entries {
            if key.is_secret() {
                map.entry(&key.name(), &"****");
            } else {
                map.entry(&key.name(), value);
            }
        }
        map.finish()
    }
}
