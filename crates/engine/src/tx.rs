//! Transaction handles: the overlay-plus-committed view a callback works
//! through.
//!
//! A [`BucketTx`] walks two trees in parallel: the transaction's private
//! overlay (always present, created on demand as the callback navigates)
//! and the corresponding committed node (present only where the committed
//! tree has one). Reads consult the overlay first, where a pending write
//! or tombstone shadows the committed entry, and fall back to the
//! committed node. Writes only ever touch the overlay; the committed tree
//! changes at commit, never inside a callback.

use crate::{Error, Result};
use bucket::{Bucket, Value};
use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};

/// A transaction: the root-level [`BucketTx`], which it derefs to.
pub struct Tx<'a> {
    root: BucketTx<'a>,
}

impl<'a> Tx<'a> {
    pub(crate) fn new(overlay: &'a mut Bucket, real: Option<&'a Bucket>, rw: bool) -> Tx<'a> {
        Tx {
            root: BucketTx { tmp: overlay, real, rw },
        }
    }

    /// The handle for an explicit bucket path; the empty path is this
    /// transaction's root.
    pub fn bucket_at(&mut self, path: &[&str]) -> BucketTx<'_> {
        let mut handle = self.root.reborrow();
        for name in path {
            handle = handle.into_bucket(name);
        }
        handle
    }
}

impl<'a> Deref for Tx<'a> {
    type Target = BucketTx<'a>;

    fn deref(&self) -> &BucketTx<'a> {
        &self.root
    }
}

impl<'a> DerefMut for Tx<'a> {
    fn deref_mut(&mut self) -> &mut BucketTx<'a> {
        &mut self.root
    }
}

/// A per-path transaction handle: the overlay node, the co-positioned
/// committed node (if any), and the transaction's read-write flag.
pub struct BucketTx<'a> {
    tmp: &'a mut Bucket,
    real: Option<&'a Bucket>,
    rw: bool,
}

impl<'a> BucketTx<'a> {
    /// True when writes through this handle are rejected.
    pub fn read_only(&self) -> bool {
        !self.rw
    }

    /// Reads `key`: the overlay entry wins (a tombstone reads as absent),
    /// then the committed entry, then absent.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self.tmp.get(key) {
            Some(value) if value.is_nil() => None,
            Some(value) => Some(value),
            None => self.real.and_then(|real| real.get(key)),
        }
    }

    /// Stages `value` under `key`.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        if value.is_nil() {
            return Err(Error::NilValue);
        }
        if !self.rw {
            return Err(Error::ReadOnly);
        }
        if key.is_empty() {
            return Err(Error::EmptyName);
        }
        self.tmp.set(key, value);
        Ok(())
    }

    /// Stages a deletion tombstone for `key`.
    pub fn delete(&mut self, key: &str) -> Result<()> {
        if !self.rw {
            return Err(Error::ReadOnly);
        }
        if key.is_empty() {
            return Err(Error::EmptyName);
        }
        self.tmp.set(key, Value::nil());
        Ok(())
    }

    /// Stages a whole-subtree deletion tombstone for the child `name`.
    pub fn delete_bucket(&mut self, name: &str) -> Result<()> {
        if !self.rw {
            return Err(Error::ReadOnly);
        }
        if name.is_empty() {
            return Err(Error::EmptyName);
        }
        self.tmp.buckets.insert(name.to_owned(), None);
        Ok(())
    }

    /// The child handle for `name`. The overlay child is created on demand;
    /// the committed child is looked up, never created. This is the only way
    /// to reach deeper paths.
    pub fn bucket(&mut self, name: &str) -> BucketTx<'_> {
        let real = self.real.and_then(|real| real.bucket(name));
        BucketTx {
            tmp: self.tmp.bucket_mut(name),
            real,
            rw: self.rw,
        }
    }

    /// Like [`BucketTx::bucket`] but consuming, so a handle can be threaded
    /// through a loop over path segments.
    pub fn into_bucket(self, name: &str) -> BucketTx<'a> {
        let BucketTx { tmp, real, rw } = self;
        BucketTx {
            tmp: tmp.bucket_mut(name),
            real: real.and_then(|real| real.bucket(name)),
            rw,
        }
    }

    fn reborrow(&mut self) -> BucketTx<'_> {
        BucketTx {
            tmp: &mut *self.tmp,
            real: self.real,
            rw: self.rw,
        }
    }

    /// Visits every live entry in this bucket: first every non-tombstone
    /// overlay entry, then every committed entry whose key the overlay does
    /// not mention at all (any overlay entry, tombstone included, shadows
    /// the committed one). Order within each layer is unspecified. An error
    /// from `f` stops the walk and is returned.
    pub fn for_each(&self, mut f: impl FnMut(&str, &Value) -> Result<()>) -> Result<()> {
        for (key, value) in &self.tmp.data {
            if value.is_nil() {
                continue;
            }
            f(key, value)?;
        }
        let Some(real) = self.real else {
            return Ok(());
        };
        for (key, value) in &real.data {
            if self.tmp.data.contains_key(key) {
                continue;
            }
            f(key, value)?;
        }
        Ok(())
    }

    /// The names of this bucket's live sub-buckets, under the same
    /// overlay-shadows-committed rule as [`BucketTx::for_each`].
    pub fn buckets(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .tmp
            .buckets
            .iter()
            .filter(|(_, slot)| slot.is_some())
            .map(|(name, _)| name.clone())
            .collect();
        if let Some(real) = self.real {
            out.extend(
                real.buckets
                    .keys()
                    .filter(|name| !self.tmp.buckets.contains_key(*name))
                    .cloned(),
            );
        }
        out
    }

    /// Every live entry in this bucket, materialized. Values share storage
    /// with the tree.
    pub fn get_all(&self) -> BTreeMap<String, Value> {
        let mut out = BTreeMap::new();
        // infallible closure, so the walk never stops early
        let _ = self.for_each(|key, value| {
            out.insert(key.to_owned(), value.clone());
            Ok(())
        });
        out
    }
}
