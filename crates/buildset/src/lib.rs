//! # BuildSet
//!
//! The staged input set for a PageKV build.
//!
//! A PageKV file is produced in one shot from a fully known input set, so
//! the builder needs the complete set of key/value pairs in hand before it
//! can size the file. The `BuildSet` is that staging area: it collects
//! pairs, rejects duplicate keys at insertion time (a duplicate is always
//! a caller bug, never something the format can represent), and tracks the
//! approximate payload size.
//!
//! ## Key properties
//! - **Unique keys**: inserting a key twice fails with [`DuplicateKey`].
//! - **Order independent**: iteration is in ascending key order, so the
//!   same set of pairs produces the same build no matter the insertion
//!   order.
//! - **Approximate size tracking**: key + value bytes, useful for choosing
//!   build configuration up front.
//!
//! ## Example
//! ```rust
//! use buildset::BuildSet;
//!
//! let mut set = BuildSet::new();
//! set.insert(b"hello".to_vec(), b"world".to_vec()).unwrap();
//! assert!(set.insert(b"hello".to_vec(), b"again".to_vec()).is_err());
//! assert_eq!(set.get(b"hello"), Some(&b"world"[..]));
//! ```

use std::collections::BTreeMap;
use thiserror::Error;

/// The input contained two pairs with equal key bytes.
///
/// Carries the offending key. Fatal for the build; the caller must
/// deduplicate before staging.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("duplicate key in build input ({} bytes)", .0.len())]
pub struct DuplicateKey(pub Vec<u8>);

/// A staged set of unique key/value pairs, ready to be built.
///
/// Backed by a `BTreeMap` so iteration order is a function of the keys
/// alone. Keys and values are opaque byte strings; both may be empty.
#[derive(Debug, Default)]
pub struct BuildSet {
    map: BTreeMap<Vec<u8>, Vec<u8>>,
    payload_bytes: u64,
}

impl BuildSet {
    /// Creates a new, empty set.
    pub fn new() -> Self {
        Self {
            map: BTreeMap::new(),
            payload_bytes: 0,
        }
    }

    /// Stages a key/value pair.
    ///
    /// # Errors
    ///
    /// Returns [`DuplicateKey`] if the key is already staged, leaving the
    /// existing pair untouched.
    pub fn insert(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<(), DuplicateKey> {
        if self.map.contains_key(&key) {
            return Err(DuplicateKey(key));
        }
        self.payload_bytes += (key.len() + value.len()) as u64;
        self.map.insert(key, value);
        Ok(())
    }

    /// Stages every pair from an iterator, failing on the first duplicate.
    pub fn from_pairs<I>(pairs: I) -> Result<Self, DuplicateKey>
    where
        I: IntoIterator<Item = (Vec<u8>, Vec<u8>)>,
    {
        let mut set = Self::new();
        for (key, value) in pairs {
            set.insert(key, value)?;
        }
        Ok(set)
    }

    /// Returns the staged value for `key`, if present.
    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.map.get(key).map(|v| v.as_slice())
    }

    /// Returns `true` if `key` is staged.
    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.map.contains_key(key)
    }

    /// Number of staged pairs.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns `true` if nothing is staged.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Approximate payload size: key bytes + value bytes, without any
    /// encoding overhead.
    pub fn payload_bytes(&self) -> u64 {
        self.payload_bytes
    }

    /// Iterates over all pairs in ascending key order.
    pub fn iter(&self) -> impl Iterator<Item = (&Vec<u8>, &Vec<u8>)> {
        self.map.iter()
    }
}
