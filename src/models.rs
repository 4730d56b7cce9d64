// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Datastore keys, model traits and property types.
//!
//! Entities are stored as JSON values in a [`Datastore`], keyed by [`Key`].
//! [`MemoryDatastore`] is an in-process implementation.

use crate::error::{Error, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chacha20poly1305::aead::generic_array::GenericArray;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::XChaCha20Poly1305;
use dashmap::DashMap;
use rand::RngCore;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;
use std::ops::{Add, AddAssign, Deref, DerefMut};

/// Id of one element of a key path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyId {
    Int(i64),
    Name(String),
}

impl From<&str> for KeyId {
    fn from(name: &str) -> Self {
        KeyId::Name(name.to_string())
    }
}

impl From<String> for KeyId {
    fn from(name: String) -> Self {
        KeyId::Name(name)
    }
}

impl From<i64> for KeyId {
    fn from(id: i64) -> Self {
        KeyId::Int(id)
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyId::Int(id) => write!(f, "{id}"),
            KeyId::Name(name) => f.write_str(name),
        }
    }
}

/// A datastore key: a path of `(kind, id)` pairs, optionally in a project.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Key {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    project: Option<String>,
    path: Vec<(String, KeyId)>,
}

impl Key {
    pub fn new(kind: &str, id: impl Into<KeyId>) -> Self {
        Self {
            project: None,
            path: vec![(kind.to_string(), id.into())],
        }
    }

    pub fn with_project(mut self, project: &str) -> Self {
        self.project = Some(project.to_string());
        self
    }

    /// A key for a child entity of this one.
    pub fn child(&self, kind: &str, id: impl Into<KeyId>) -> Self {
        let mut child = self.clone();
        child.path.push((kind.to_string(), id.into()));
        child
    }

    pub fn project(&self) -> Option<&str> {
        self.project.as_deref()
    }

    pub fn pairs(&self) -> &[(String, KeyId)] {
        &self.path
    }

    pub fn kind(&self) -> &str {
        self.path.last().map(|(kind, _)| kind.as_str()).unwrap_or_default()
    }

    pub fn id(&self) -> Option<&KeyId> {
        self.path.last().map(|(_, id)| id)
    }

    pub fn string_id(&self) -> Option<&str> {
        match self.id() {
            Some(KeyId::Name(name)) if !name.is_empty() => Some(name),
            _ => None,
        }
    }

    pub fn integer_id(&self) -> Option<i64> {
        match self.id() {
            Some(KeyId::Int(id)) => Some(*id),
            _ => None,
        }
    }

    /// URL-safe base64 encoding of the key.
    pub fn to_urlsafe(&self) -> String {
        // a Key always serializes
        let json = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    pub fn from_urlsafe(urlsafe: &str) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(urlsafe.trim_end_matches('='))
            .map_err(|e| Error::InvalidValue(format!("bad key {urlsafe}: {e}")))?;
        let key: Key = serde_json::from_slice(&bytes)?;
        if key.path.is_empty() {
            return Err(Error::InvalidValue(format!("empty key {urlsafe}")));
        }
        Ok(key)
    }
}

/// Entity storage.
pub trait Datastore: Send + Sync {
    fn put(&self, key: &Key, entity: Value) -> Result<()>;
    fn get(&self, key: &Key) -> Result<Option<Value>>;
    fn delete(&self, key: &Key) -> Result<()>;
}

/// In-memory [`Datastore`].
#[derive(Debug, Default)]
pub struct MemoryDatastore {
    entities: DashMap<Key, Value>,
}

impl MemoryDatastore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

impl Datastore for MemoryDatastore {
    fn put(&self, key: &Key, entity: Value) -> Result<()> {
        self.entities.insert(key.clone(), entity);
        Ok(())
    }

    fn get(&self, key: &Key) -> Result<Option<Value>> {
        Ok(self.entities.get(key).map(|e| e.value().clone()))
    }

    fn delete(&self, key: &Key) -> Result<()> {
        self.entities.remove(key);
        Ok(())
    }
}

/// A model whose key must have a string id.
pub trait StringIdModel: Serialize + DeserializeOwned {
    const KIND: &'static str;

    fn key(&self) -> Option<Key>;

    /// Stores this entity. Errors if its key doesn't have a string id.
    fn put(&self, store: &dyn Datastore) -> Result<Key> {
        let key = self
            .key()
            .filter(|k| k.string_id().is_some())
            .ok_or_else(|| Error::Datastore("string id required but not provided".to_string()))?;
        store.put(&key, serde_json::to_value(self)?)?;
        Ok(key)
    }

    fn get_by_id(store: &dyn Datastore, id: &str) -> Result<Option<Self>> {
        match store.get(&Key::new(Self::KIND, id))? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }
}

/// Serde helpers for a JSON object stored as a compact, ASCII-only string.
///
/// Use with `#[serde(with = "json_property")]` on a [`Value`] field.
pub mod json_property {
    use serde::de::Error as _;
    use serde::ser::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};
    use serde_json::Value;

    /// Compact JSON with non-ASCII characters escaped as `\uXXXX`.
    pub fn to_ascii_json(value: &Value) -> serde_json::Result<String> {
        let json = serde_json::to_string(value)?;
        let mut out = String::with_capacity(json.len());
        let mut units = [0u16; 2];
        for c in json.chars() {
            if c.is_ascii() {
                out.push(c);
            } else {
                for unit in c.encode_utf16(&mut units) {
                    out.push_str(&format!("\\u{unit:04x}"));
                }
            }
        }
        Ok(out)
    }

    pub fn serialize<S: Serializer>(value: &Value, serializer: S) -> Result<S::Ok, S::Error> {
        if !value.is_object() {
            return Err(S::Error::custom("JSON property must be an object"));
        }
        serializer.serialize_str(&to_ascii_json(value).map_err(S::Error::custom)?)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Value, D::Error> {
        let stored = String::deserialize(deserializer)?;
        let value: Value = serde_json::from_str(&stored).map_err(D::Error::custom)?;
        if !value.is_object() {
            return Err(D::Error::custom("JSON property must be an object"));
        }
        Ok(value)
    }
}

/// Size of the random nonce prefixed to each [`EncryptedProperty`] value.
pub const NONCE_LEN: usize = 24;

/// Encrypts byte values with XChaCha20-Poly1305.
///
/// Stored values are `nonce || ciphertext`, with a fresh random nonce each
/// time.
#[derive(Clone, Default)]
pub struct EncryptedProperty {
    cipher: Option<XChaCha20Poly1305>,
}

impl fmt::Debug for EncryptedProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedProperty")
            .field("has_key", &self.cipher.is_some())
            .finish()
    }
}

impl EncryptedProperty {
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: Some(XChaCha20Poly1305::new(GenericArray::from_slice(key))),
        }
    }

    /// Builds from a base64 key, e.g. `Config::encryption_key`. `None` gives
    /// a property that errors on use.
    pub fn from_base64(key: Option<&str>) -> Result<Self> {
        let Some(key) = key else {
            return Ok(Self::default());
        };
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(key.trim())
            .map_err(|e| Error::Crypto(format!("bad encryption key: {e}")))?;
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::Crypto("encryption key must be 32 bytes".to_string()))?;
        Ok(Self::new(&key))
    }

    fn cipher(&self) -> Result<&XChaCha20Poly1305> {
        self.cipher
            .as_ref()
            .ok_or_else(|| Error::Crypto("No encryption key found".to_string()))
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let cipher = self.cipher()?;
        let mut nonce = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce);
        let ciphertext = cipher
            .encrypt(GenericArray::from_slice(&nonce), plaintext)
            .map_err(|_| Error::Crypto("encryption failed".to_string()))?;

        let mut stored = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        stored.extend_from_slice(&nonce);
        stored.extend_from_slice(&ciphertext);
        Ok(stored)
    }

    pub fn decrypt(&self, stored: &[u8]) -> Result<Vec<u8>> {
        let cipher = self.cipher()?;
        if stored.len() < NONCE_LEN {
            return Err(Error::Crypto("encrypted value too short".to_string()));
        }
        let (nonce, ciphertext) = stored.split_at(NONCE_LEN);
        cipher
            .decrypt(GenericArray::from_slice(nonce), ciphertext)
            .map_err(|_| Error::Crypto("decryption failed".to_string()))
    }
}

/// An enum stored as its integer value.
pub trait EnumProperty: Sized {
    fn to_int(&self) -> i64;
    fn from_int(value: i64) -> Option<Self>;
}

/// Serde helpers for [`EnumProperty`] fields: `#[serde(with = "enum_property")]`.
pub mod enum_property {
    use super::EnumProperty;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<T: EnumProperty, S: Serializer>(value: &T, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(value.to_int())
    }

    pub fn deserialize<'de, T: EnumProperty, D: Deserializer<'de>>(deserializer: D) -> Result<T, D::Error> {
        let value = i64::deserialize(deserializer)?;
        T::from_int(value).ok_or_else(|| D::Error::custom(format!("unknown enum value {value}")))
    }
}

/// An order-preserving list that drops duplicates.
///
/// Uses linear scans, so it's only for short lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct UniqueList<T>(Vec<T>);

/// Repeated string property without duplicates.
pub type StringSetProperty = UniqueList<String>;

/// Repeated key property without duplicates.
pub type KeySetProperty = UniqueList<Key>;

impl<T: PartialEq> UniqueList<T> {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    fn dedupe(&mut self) {
        let mut deduped: Vec<T> = Vec::with_capacity(self.0.len());
        for elem in self.0.drain(..) {
            if !deduped.contains(&elem) {
                deduped.push(elem);
            }
        }
        self.0 = deduped;
    }

    pub fn append(&mut self, value: T) {
        if !self.0.contains(&value) {
            self.0.push(value);
        }
    }

    /// Same as [`append`](Self::append). `add` would be shadowed by
    /// [`Add::add`] on owned lists.
    pub fn push(&mut self, value: T) {
        self.append(value);
    }

    pub fn extend<I: IntoIterator<Item = T>>(&mut self, values: I) {
        for value in values {
            self.append(value);
        }
    }

    pub fn update<I: IntoIterator<Item = T>>(&mut self, values: I) {
        self.extend(values);
    }

    /// Inserts at `index`, then drops any later duplicate.
    pub fn insert(&mut self, index: usize, value: T) {
        self.0.insert(index.min(self.0.len()), value);
        self.dedupe();
    }

    /// Replaces the element at `index`, then drops any later duplicate.
    pub fn set(&mut self, index: usize, value: T) -> Result<()> {
        let len = self.0.len();
        let slot = self
            .0
            .get_mut(index)
            .ok_or_else(|| Error::InvalidValue(format!("index {index} out of range for length {len}")))?;
        *slot = value;
        self.dedupe();
        Ok(())
    }

    pub fn into_vec(self) -> Vec<T> {
        self.0
    }
}

impl<T: PartialEq> Default for UniqueList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: PartialEq> FromIterator<T> for UniqueList<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut list = Self::new();
        list.extend(iter);
        list
    }
}

impl<T: PartialEq> From<Vec<T>> for UniqueList<T> {
    fn from(values: Vec<T>) -> Self {
        values.into_iter().collect()
    }
}

impl<T> Deref for UniqueList<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.0
    }
}

impl<T> IntoIterator for UniqueList<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<T: PartialEq, I: IntoIterator<Item = T>> Add<I> for UniqueList<T> {
    type Output = UniqueList<T>;

    fn add(mut self, other: I) -> Self::Output {
        self.extend(other);
        self
    }
}

impl<T: PartialEq, I: IntoIterator<Item = T>> AddAssign<I> for UniqueList<T> {
    fn add_assign(&mut self, other: I) {
        self.extend(other);
    }
}

impl<'de, T: PartialEq + Deserialize<'de>> Deserialize<'de> for UniqueList<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        Ok(Vec::<T>::deserialize(deserializer)?.into())
    }
}

/// A set whose whole contents can be replaced at once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignableSet<T: Eq + Hash>(HashSet<T>);

impl<T: Eq + Hash> AssignableSet<T> {
    pub fn new() -> Self {
        Self(HashSet::new())
    }

    /// Replaces the contents with `values`.
    pub fn assign<I: IntoIterator<Item = T>>(&mut self, values: I) {
        let values: HashSet<T> = values.into_iter().collect();
        self.0 = values;
    }
}

impl<T: Eq + Hash> Default for AssignableSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Eq + Hash> FromIterator<T> for AssignableSet<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<T: Eq + Hash> Deref for AssignableSet<T> {
    type Target = HashSet<T>;

    fn deref(&self) -> &HashSet<T> {
        &self.0
    }
}

impl<T: Eq + Hash> DerefMut for AssignableSet<T> {
    fn deref_mut(&mut self) -> &mut HashSet<T> {
        &mut self.0
    }
}

impl<T: Eq + Hash + Serialize> Serialize for AssignableSet<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl<'de, T: Eq + Hash + Deserialize<'de>> Deserialize<'de> for AssignableSet<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        Ok(Self(HashSet::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Site {
        id: Option<KeyId>,
        #[serde(with = "json_property")]
        data: Value,
    }

    impl StringIdModel for Site {
        const KIND: &'static str = "Site";

        fn key(&self) -> Option<Key> {
            self.id.clone().map(|id| Key::new(Self::KIND, id))
        }
    }

    #[test]
    fn test_key() {
        let key = Key::new("Parent", 5).child("Child", "x").with_project("proj");
        assert_eq!(key.kind(), "Child");
        assert_eq!(key.string_id(), Some("x"));
        assert_eq!(key.integer_id(), None);
        assert_eq!(key.pairs().len(), 2);
        assert_eq!(Key::new("A", 3).integer_id(), Some(3));

        let urlsafe = key.to_urlsafe();
        assert!(urlsafe.len() >= 32);
        assert!(!urlsafe.contains(['+', '/', '=']));
        assert_eq!(Key::from_urlsafe(&urlsafe).unwrap(), key);
        assert!(Key::from_urlsafe("not a key!").is_err());
    }

    #[test]
    fn test_string_id_model_put() {
        let store = MemoryDatastore::new();
        let site = Site {
            id: Some("x".into()),
            data: json!({"a": 1}),
        };
        assert_eq!(site.put(&store).unwrap(), Key::new("Site", "x"));
        assert_eq!(Site::get_by_id(&store, "x").unwrap(), Some(site));
        assert_eq!(Site::get_by_id(&store, "y").unwrap(), None);

        for id in [None, Some(KeyId::Int(1)), Some("".into())] {
            let site = Site { id, data: json!({}) };
            match site.put(&store) {
                Err(Error::Datastore(msg)) => assert_eq!(msg, "string id required but not provided"),
                other => panic!("expected datastore error, got {other:?}"),
            }
        }
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_json_property() {
        let site = Site {
            id: None,
            data: json!({"b": "é", "a": [1, null]}),
        };
        let stored = serde_json::to_value(&site).unwrap();
        let data = stored["data"].as_str().unwrap();
        assert!(data.is_ascii());
        assert!(data.contains("\\u00e9"));
        assert!(!data.contains(' '));
        assert_eq!(serde_json::from_value::<Site>(stored).unwrap(), site);

        let bad = Site {
            id: None,
            data: json!([1]),
        };
        assert!(serde_json::to_value(&bad).is_err());
        assert!(serde_json::from_value::<Site>(json!({"id": null, "data": "[1]"})).is_err());
    }

    #[test]
    fn test_encrypted_property() {
        let prop = EncryptedProperty::new(b"test_key_32_bytes_for_xchacha___");
        let secret = "émojis 🔐".as_bytes();

        let first = prop.encrypt(secret).unwrap();
        let second = prop.encrypt(secret).unwrap();
        assert_ne!(first, second);
        assert!(first.len() > NONCE_LEN + secret.len());
        assert_eq!(prop.decrypt(&first).unwrap(), secret);
        assert_eq!(prop.decrypt(&second).unwrap(), secret);

        let mut tampered = first.clone();
        *tampered.last_mut().unwrap() ^= 1;
        assert!(prop.decrypt(&tampered).is_err());
        assert!(prop.decrypt(b"short").is_err());
    }

    #[test]
    fn test_encrypted_property_no_key() {
        let prop = EncryptedProperty::from_base64(None).unwrap();
        match prop.encrypt(b"x") {
            Err(Error::Crypto(msg)) => assert!(msg.contains("No encryption key found")),
            other => panic!("expected crypto error, got {other:?}"),
        }
        assert!(EncryptedProperty::from_base64(Some("c2hvcnQ=")).is_err());
    }

    #[derive(Debug, PartialEq)]
    enum Color {
        Red,
        Blue,
    }

    impl EnumProperty for Color {
        fn to_int(&self) -> i64 {
            match self {
                Color::Red => 1,
                Color::Blue => 2,
            }
        }

        fn from_int(value: i64) -> Option<Self> {
            match value {
                1 => Some(Color::Red),
                2 => Some(Color::Blue),
                _ => None,
            }
        }
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Painted {
        #[serde(with = "enum_property")]
        color: Color,
    }

    #[test]
    fn test_enum_property() {
        let painted = Painted { color: Color::Blue };
        assert_eq!(serde_json::to_value(&painted).unwrap(), json!({"color": 2}));
        assert_eq!(
            serde_json::from_value::<Painted>(json!({"color": 1})).unwrap(),
            Painted { color: Color::Red }
        );
        assert!(serde_json::from_value::<Painted>(json!({"color": 3})).is_err());
    }

    #[test]
    fn test_unique_list() {
        let mut list: StringSetProperty = vec!["a".to_string(), "b".into(), "a".into()].into();
        assert_eq!(&*list, ["a", "b"]);

        list.append("b".into());
        list.push("c".into());
        list.push("a".into());
        assert_eq!(&*list, ["a", "b", "c"]);

        list.insert(0, "c".into());
        assert_eq!(&*list, ["c", "a", "b"]);

        list.set(1, "b".into()).unwrap();
        assert_eq!(&*list, ["c", "b"]);
        assert!(list.set(5, "z".into()).is_err());

        list += vec!["d".to_string(), "c".into()];
        let list = list + vec!["e".to_string()];
        assert_eq!(&*list, ["c", "b", "d", "e"]);

        let parsed: UniqueList<i32> = serde_json::from_str("[3, 1, 3, 2, 1]").unwrap();
        assert_eq!(&*parsed, [3, 1, 2]);
    }

    #[test]
    fn test_assignable_set() {
        let mut set: AssignableSet<i32> = [1, 2].into_iter().collect();
        set.insert(3);
        set.assign([4, 4, 5]);
        assert_eq!(*set, HashSet::from([4, 5]));
    }
}
