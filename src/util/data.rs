// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Helpers for JSON-shaped data.

use crate::error::{Error, Result};
use crate::util::urls::{dedupe_urls, unquote_plus};
use crate::web::errors::HttpError;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use tracing::{debug, error};
use url::form_urlencoded;

fn is_null(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

/// Recursively removes object fields and array elements that are null or
/// empty.
///
/// Fields named in `ignore` are kept as is, including everything below them.
pub fn trim_nulls(value: Value, ignore: &[&str]) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter_map(|(k, v)| {
                    if ignore.contains(&k.as_str()) {
                        return Some((k, v));
                    }
                    let v = trim_nulls(v, ignore);
                    (!is_null(&v)).then_some((k, v))
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|v| trim_nulls(v, ignore))
                .filter(|v| !is_null(v))
                .collect(),
        ),
        other => other,
    }
}

/// Removes duplicates, preserving order.
pub fn uniquify<T, I>(input: I) -> Vec<T>
where
    T: Eq + Hash + Clone,
    I: IntoIterator<Item = T>,
{
    let mut seen = HashSet::new();
    input
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

/// Returns `obj[key]` as a list: arrays as is, other non-empty values
/// wrapped, missing or empty values as `[]`.
pub fn get_list(obj: &Value, key: &str) -> Vec<Value> {
    match obj.get(key) {
        Some(Value::Array(items)) => items.clone(),
        Some(v) if !is_null(v) && *v != Value::Bool(false) => vec![v.clone()],
        _ => Vec::new(),
    }
}

/// Like [`get_list`], but also removes the field.
pub fn pop_list(obj: &mut Value, key: &str) -> Vec<Value> {
    let list = get_list(obj, key);
    if let Value::Object(map) = obj {
        map.remove(key);
    }
    list
}

/// Returns the first element of `obj[key]` if it's an array, otherwise the
/// value itself. Missing or empty values give `None`.
pub fn get_first<'a>(obj: &'a Value, key: &str) -> Option<&'a Value> {
    match obj.get(key)? {
        Value::Array(items) => items.first(),
        v if is_null(v) => None,
        v => Some(v),
    }
}

/// Returns `val["url"]` if `val` is an object, otherwise `val`.
///
/// With `key`, looks in the first element of `val[key]` instead.
pub fn get_url<'a>(val: &'a Value, key: Option<&str>) -> Option<&'a Value> {
    let val = match key {
        Some(key) => get_first(val, key)?,
        None => val,
    };
    match val {
        Value::Object(_) => get_first(val, "url"),
        v => Some(v),
    }
}

/// Returns the de-duped URLs in `obj[key]`, reading `elem[inner_key].url`
/// when `inner_key` is set.
pub fn get_urls(obj: &Value, key: &str, inner_key: Option<&str>) -> Vec<String> {
    let list = get_list(obj, key);
    dedupe_urls(
        list.iter()
            .filter_map(|elem| get_url(elem, inner_key))
            .filter_map(|url| url.as_str()),
    )
}

/// Renders a JSON object as an XML snippet, with keys sorted.
pub fn to_xml(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            if map.is_empty() {
                return String::new();
            }
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();

            let mut elems = Vec::new();
            for key in keys {
                let vals = match &map[key] {
                    Value::Array(items) => items.iter().collect(),
                    v => vec![v],
                };
                for val in vals {
                    elems.push(format!("<{key}>{}</{key}>", to_xml(val)));
                }
            }
            format!("\n{}\n", elems.join("\n"))
        }
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Parses a string that is either JSON or form-encoded.
///
/// Form values that appear once become strings, repeated ones arrays.
pub fn sniff_json_or_form_encoded(value: &str) -> Result<Value> {
    if value.is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    if value.starts_with('{') || value.starts_with('[') || !value.contains('=') {
        return Ok(serde_json::from_str(value)?);
    }

    let mut grouped: Vec<(String, Vec<String>)> = Vec::new();
    for (k, v) in form_urlencoded::parse(value.as_bytes()).into_owned() {
        if v.is_empty() {
            continue;
        }
        match grouped.iter_mut().find(|(name, _)| *name == k) {
            Some((_, vals)) => vals.push(v),
            None => grouped.push((k, vec![v])),
        }
    }

    Ok(Value::Object(
        grouped
            .into_iter()
            .map(|(k, mut vals)| {
                let v = if vals.len() == 1 {
                    Value::String(vals.remove(0))
                } else {
                    Value::Array(vals.into_iter().map(Value::String).collect())
                };
                (k, v)
            })
            .collect(),
    ))
}

/// Rebuilds objects with their keys in sorted order, recursively.
pub fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(entries.into_iter().map(|(k, v)| (k, sort_keys(v))).collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

/// Encodes a JSON object so it can be passed as an OAuth `state` query
/// parameter. Keys are sorted and nulls trimmed.
pub fn encode_oauth_state(obj: &Map<String, Value>) -> Result<String> {
    debug!(state = ?obj, "encoding state");
    let trimmed = sort_keys(trim_nulls(Value::Object(obj.clone()), &[]));
    let json = serde_json::to_string(&trimmed)?;
    Ok(form_urlencoded::byte_serialize(json.as_bytes()).collect())
}

/// Decodes a state parameter from [`encode_oauth_state`].
///
/// Malformed JSON is an HTTP 400. Valid JSON that isn't an object decodes
/// to an empty object.
pub fn decode_oauth_state(state: Option<&str>) -> Result<Map<String, Value>> {
    debug!(?state, "decoding state");
    let Some(state) = state.filter(|s| !s.is_empty()) else {
        return Ok(Map::new());
    };

    match serde_json::from_str(&unquote_plus(state)) {
        Ok(Value::Object(obj)) => Ok(obj),
        Ok(_) => {
            error!(state, "got a non-object state parameter");
            Ok(Map::new())
        }
        Err(_) => {
            error!(state, "Invalid value for state parameter");
            Err(Error::Http(HttpError::bad_request(format!(
                "Invalid value for state parameter: {state}"
            ))))
        }
    }
}

/// Returns `value` if it differs from the cached value, otherwise `None`.
///
/// Empty values count as `None`. When they differ, `updates[key]` is set to
/// the new value, so changes can be written back in a batch. A `None` in
/// `updates` means the key should be deleted.
pub fn if_changed(
    cache: Option<&CacheDict<String, Value>>,
    updates: &mut HashMap<String, Option<Value>>,
    key: &str,
    value: Option<Value>,
) -> Option<Value> {
    let Some(cache) = cache else {
        return value;
    };
    let value = value.filter(|v| !is_null(v) && *v != Value::Bool(false));
    let cached = cache
        .get(key)
        .filter(|v| !is_null(v) && **v != Value::Bool(false))
        .cloned();

    if value == cached {
        return None;
    }
    updates.insert(key.to_string(), value.clone());
    value
}

/// In-memory stand-in for a memcache-style client.
#[derive(Debug, Clone, Default)]
pub struct CacheDict<K, V> {
    items: HashMap<K, V>,
}

impl<K: Eq + Hash + Clone, V: Clone> CacheDict<K, V> {
    pub fn new() -> Self {
        Self {
            items: HashMap::new(),
        }
    }

    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: std::borrow::Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.items.get(key)
    }

    pub fn set(&mut self, key: K, value: V) {
        self.items.insert(key, value);
    }

    pub fn get_multi<'a>(&self, keys: impl IntoIterator<Item = &'a K>) -> HashMap<K, V>
    where
        K: 'a,
    {
        keys.into_iter()
            .filter_map(|k| self.items.get(k).map(|v| (k.clone(), v.clone())))
            .collect()
    }

    pub fn set_multi(&mut self, updates: impl IntoIterator<Item = (K, V)>) {
        self.items.extend(updates);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
