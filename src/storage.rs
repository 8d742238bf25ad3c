/*!
 * In-Memory Storage
 *
 * The keyspace is a single `HMap<Entry>`; each entry owns its key and
 * value and is dropped when it is deleted or overwritten.
 */

use crate::hashtable::{str_hash, HMap};
use crate::zset::ZSet;
use bytes::Bytes;

/// Value types that can live under a key
pub enum Value {
    /// String/binary data
    Str(Bytes),
    /// Sorted set of scored members
    ZSet(Box<ZSet>),
}

/// A key together with its value
pub struct Entry {
    pub key: Bytes,
    pub value: Value,
}

/// The keyspace
#[derive(Default)]
pub struct Dict {
    inner: HMap<Entry>,
}

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys
    #[inline]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Get a value by key
    ///
    /// Takes `&mut self` because every lookup also advances an in-flight
    /// resize of the underlying map.
    #[inline]
    pub fn get(&mut self, k: &[u8]) -> Option<&Value> {
        self.get_mut(k).map(|v| &*v)
    }

    #[inline]
    pub fn get_mut(&mut self, k: &[u8]) -> Option<&mut Value> {
        self.inner
            .lookup(str_hash(k), |e| e.key == k)
            .map(|e| &mut e.value)
    }

    /// Set a key to a string value
    ///
    /// An existing entry is updated in place, whatever type it held.
    pub fn set(&mut self, k: Bytes, v: Bytes) {
        match self.get_mut(&k) {
            Some(slot) => *slot = Value::Str(v),
            None => self.inner.insert(
                str_hash(&k),
                Entry {
                    key: k,
                    value: Value::Str(v),
                },
            ),
        }
    }

    /// Delete a key
    ///
    /// # Returns
    /// * `true` if key existed and was deleted
    /// * `false` if key didn't exist
    #[inline]
    pub fn del(&mut self, k: &[u8]) -> bool {
        self.inner.pop(str_hash(k), |e| e.key == k).is_some()
    }

    /// Iterate over every key, in no particular order
    pub fn keys(&self) -> impl Iterator<Item = &Bytes> + '_ {
        self.inner.iter().map(|e| &e.key)
    }

    /// The sorted set stored at `k`, created empty if the key is absent
    ///
    /// # Returns
    /// * `Some(&mut ZSet)` for a new or existing sorted set
    /// * `None` if the key holds another type
    pub fn zset_or_create(&mut self, k: &Bytes) -> Option<&mut ZSet> {
        if self.get_mut(k).is_none() {
            self.inner.insert(
                str_hash(k),
                Entry {
                    key: k.clone(),
                    value: Value::ZSet(Box::default()),
                },
            );
        }
        match self.get_mut(k)? {
            Value::ZSet(z) => Some(z.as_mut()),
            Value::Str(_) => None,
        }
    }
}
