//! In-memory key-value storage owned by the dispatcher.
//!
//! `Store` has no locking of its own. It is moved into the dispatcher task
//! at startup and only that task ever calls it, so every method takes plain
//! `&self` or `&mut self`.

use std::collections::BTreeMap;

use serde::{de::Error as _, Deserialize};
use serde_json::Value;

use crate::error::StoreError;

/// Deepest array/object nesting a payload may have.
///
/// Parsing, cloning, serializing and dropping a `Value` all recurse once per
/// level, so the cap keeps every one of them well inside a task's stack.
pub const MAX_PAYLOAD_DEPTH: usize = 512;

/// Snapshot of the whole map, as returned by `get_all` and `clear`.
pub type Entries = BTreeMap<String, Value>;

/// Parses a raw request body into a structured value.
///
/// The buffer must hold exactly one JSON document, nested at most
/// [`MAX_PAYLOAD_DEPTH`] levels. Object members keep the order they were
/// written in.
pub fn parse_payload(raw: &[u8]) -> Result<Value, StoreError> {
    let depth = nesting_depth(raw);
    if depth > MAX_PAYLOAD_DEPTH {
        return Err(StoreError::Parse(serde_json::Error::custom(format!(
            "nesting depth {depth} exceeds the limit of {MAX_PAYLOAD_DEPTH}"
        ))));
    }

    let mut de = serde_json::Deserializer::from_slice(raw);
    de.disable_recursion_limit();
    let value = Value::deserialize(&mut de)?;
    de.end()?;
    Ok(value)
}

/// Highest count of open `[`/`{` seen outside string literals.
fn nesting_depth(raw: &[u8]) -> usize {
    let (mut depth, mut deepest) = (0usize, 0usize);
    let (mut in_string, mut escaped) = (false, false);
    for &byte in raw {
        if in_string {
            match byte {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'[' | b'{' => {
                depth += 1;
                deepest = deepest.max(depth);
            }
            b']' | b'}' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    deepest
}

/// Unsynchronized map from string keys to JSON values.
///
/// Keys are compared byte for byte: no case folding and no trimming.
/// Iteration is in key order, so `get_all` output is stable.
#[derive(Debug, Default)]
pub struct Store {
    data: Entries,
}

impl Store {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            data: BTreeMap::new(),
        }
    }

    /// Returns the value stored under `key`.
    pub fn get(&self, key: &str) -> Result<Value, StoreError> {
        self.data
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    /// Inserts a new entry.
    ///
    /// The key is checked before the payload is parsed, so adding a
    /// malformed payload under an existing key reports `DuplicateKey`.
    pub fn add(&mut self, key: &str, raw: &[u8]) -> Result<Value, StoreError> {
        if self.data.contains_key(key) {
            return Err(StoreError::DuplicateKey(key.to_string()));
        }
        let value = parse_payload(raw)?;
        self.data.insert(key.to_string(), value.clone());
        Ok(value)
    }

    pub fn get_all(&self) -> &Entries {
        &self.data
    }

    /// Pure presence check; absence is `false`, never an error.
    pub fn exists(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub fn count(&self) -> usize {
        self.data.len()
    }

    /// Empties the map in place and returns the (now empty) view of it.
    pub fn clear(&mut self) -> &Entries {
        self.data.clear();
        &self.data
    }

    pub fn delete(&mut self, key: &str) -> Result<(), StoreError> {
        self.data
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    /// Overwrites an existing entry. Presence is checked before parsing.
    pub fn update(&mut self, key: &str, raw: &[u8]) -> Result<Value, StoreError> {
        let Some(slot) = self.data.get_mut(key) else {
            return Err(StoreError::NotFound(key.to_string()));
        };
        let value = parse_payload(raw)?;
        *slot = value.clone();
        Ok(value)
    }

    /// Inserts or overwrites unconditionally; only a malformed payload fails.
    pub fn upsert(&mut self, key: &str, raw: &[u8]) -> Result<Value, StoreError> {
        let value = parse_payload(raw)?;
        self.data.insert(key.to_string(), value.clone());
        Ok(value)
    }
}
