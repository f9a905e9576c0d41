//! # Bucket — DriftKV's In-Memory Tree
//!
//! The recursive bucket tree underlying both the committed state and a
//! transaction's pending overlay.
//!
//! A [`Bucket`] is a node with two collections: named sub-buckets and
//! string-keyed [`Value`] entries. The same type serves two roles:
//!
//! - **Committed tree**: the engine's live state. Never contains
//!   tombstones: every entry holds a real value, every sub-bucket slot a
//!   live node.
//! - **Changeset / overlay**: a transaction's pending writes. Here a nil
//!   [`Value`] marks an entry for deletion and a `None` sub-bucket slot
//!   marks a whole subtree for deletion.
//!
//! [`Bucket::apply`] folds a changeset into a destination tree, honoring
//! both tombstone forms. It is used verbatim for log replay at startup and
//! for merging a committed overlay.
//!
//! ## Wire shape
//!
//! Buckets serialize with two stable field tags:
//!
//! ```text
//! {"buckets": {"<name>": <bucket-or-null>, ...},
//!  "data":    {"<key>": <bytes-or-null>, ...}}
//! ```
//!
//! Empty maps are omitted on encode and defaulted on decode, so the empty
//! bucket is `{}`.

use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// An immutable byte payload with a distinguished nil state.
///
/// Clones share the underlying allocation, so a Value handed to concurrent
/// readers is cheap to copy around and cannot be mutated through any handle.
/// Use [`Value::deep_copy`] to detach a private copy.
///
/// Nil is not the same as empty: a nil Value acts as a deletion tombstone
/// inside a changeset, while an empty Value is a perfectly legal payload.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Value(Option<Arc<[u8]>>);

impl Value {
    /// The nil Value (also the `Default`).
    pub fn nil() -> Self {
        Value(None)
    }

    /// True for the nil Value; false for any payload, including the empty one.
    pub fn is_nil(&self) -> bool {
        self.0.is_none()
    }

    /// The raw bytes; empty for nil.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_deref().unwrap_or_default()
    }

    /// The payload decoded as UTF-8, lossily.
    pub fn as_str_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.as_bytes())
    }

    /// An independent copy backed by a fresh allocation.
    pub fn deep_copy(&self) -> Value {
        match &self.0 {
            None => Value(None),
            Some(bytes) => Value(Some(Arc::from(&bytes[..]))),
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            None => f.write_str("Value(nil)"),
            Some(_) => write!(f, "Value({:?})", self.as_str_lossy()),
        }
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Value(Some(Arc::from(bytes)))
    }
}

impl From<&[u8]> for Value {
    fn from(bytes: &[u8]) -> Self {
        Value(Some(Arc::from(bytes)))
    }
}

impl<const N: usize> From<&[u8; N]> for Value {
    fn from(bytes: &[u8; N]) -> Self {
        Value(Some(Arc::from(&bytes[..])))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value(Some(Arc::from(s.as_bytes())))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value(Some(Arc::from(s.into_bytes())))
    }
}

// Nil <-> JSON null, payload <-> byte sequence. Mirrors Option<Vec<u8>> on
// the wire so the framing stays self-describing.
impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match &self.0 {
            None => serializer.serialize_none(),
            Some(bytes) => serializer.serialize_some(&bytes[..]),
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes = Option::<Vec<u8>>::deserialize(deserializer)?;
        Ok(Value(bytes.map(Arc::from)))
    }
}

/// A node in the bucket tree: named sub-buckets plus keyed entries.
///
/// Fields are public: the transaction layer manipulates overlay slots
/// directly (tombstones included), and the helper methods cover the common
/// traversals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    /// Child buckets. A `None` slot is a subtree deletion tombstone and only
    /// ever appears in changesets.
    #[serde(rename = "buckets", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub buckets: BTreeMap<String, Option<Box<Bucket>>>,

    /// Entries. A nil [`Value`] is an entry tombstone and only ever appears
    /// in changesets.
    #[serde(rename = "data", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, Value>,
}

impl Bucket {
    pub fn new() -> Self {
        Self::default()
    }

    /// The stored entry for `key`, tombstones included. Absent keys yield
    /// `None`; callers that care about tombstones check [`Value::is_nil`].
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Stores `value` under `key`. Tombstone (nil) values are allowed here;
    /// rejecting them is the transaction surface's job.
    pub fn set(&mut self, key: &str, value: Value) {
        self.data.insert(key.to_owned(), value);
    }

    /// Removes the entry for `key`. No-op when absent.
    pub fn remove(&mut self, key: &str) {
        self.data.remove(key);
    }

    /// The live child named `name`. A tombstoned or missing child reads as
    /// absent.
    pub fn bucket(&self, name: &str) -> Option<&Bucket> {
        match self.buckets.get(name) {
            Some(Some(child)) => Some(child),
            _ => None,
        }
    }

    /// The child named `name`, created on demand. A tombstone slot is
    /// replaced by a fresh live node.
    pub fn bucket_mut(&mut self, name: &str) -> &mut Bucket {
        self.buckets
            .entry(name.to_owned())
            .or_insert(None)
            .get_or_insert_with(Box::default)
    }

    /// Removes the child subtree named `name`. No-op when absent.
    pub fn remove_bucket(&mut self, name: &str) {
        self.buckets.remove(name);
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty() && self.data.is_empty()
    }

    /// Empties both collections. The handle pool calls this between uses so
    /// a recycled overlay never re-exposes prior content.
    pub fn clear(&mut self) {
        self.buckets.clear();
        self.data.clear();
    }

    /// Applies a changeset to this tree, descending both in lockstep.
    ///
    /// Entry rules: a nil source value deletes the key; any other value is
    /// stored (deep-copied when `copy_on_set` is set, otherwise sharing the
    /// source allocation). Sub-bucket rules: a `None` source slot deletes the
    /// whole destination subtree; a live source child recurses into the
    /// destination child, creating it when absent.
    ///
    /// After `apply` the destination holds no tombstones, whatever the
    /// changeset contained.
    pub fn apply(&mut self, change: &Bucket, copy_on_set: bool) {
        for (key, value) in &change.data {
            if value.is_nil() {
                self.data.remove(key);
            } else if copy_on_set {
                self.data.insert(key.clone(), value.deep_copy());
            } else {
                self.data.insert(key.clone(), value.clone());
            }
        }

        for (name, slot) in &change.buckets {
            match slot {
                None => {
                    self.buckets.remove(name);
                }
                Some(child) => {
                    self.bucket_mut(name).apply(child, copy_on_set);
                }
            }
        }
    }
}
