//! Store Module
//!
//! Capacity-bounded ordered sequence of objects with a transposition
//! heuristic standing in for full LRU bookkeeping.
//!
//! ## Ordering Policy
//! Index 0 is the least-recently-used element (the eviction tail); the
//! highest index is the most-recently-used (the hot head). A successful
//! data-path lookup promotes the hit exactly one position toward the hot
//! head. New keys are appended at the hot head.
//!
//! ## Key Comparison
//! Length gate first, then direct byte equality for short keys; keys
//! longer than 16 bytes compare xxh3 fingerprints before falling back to
//! byte equality.
//!
//! ## Capacity
//! `cap_remaining` tracks the byte budget left. Both directions of the
//! ledger are checked; an operation that would cross zero fails with
//! `ExceededSpaceLimit` and leaves the store unchanged. Same-type string
//! updates intentionally skip the ledger (see DESIGN.md).

use crate::error::{RaptoError, Result};
use crate::mem::MEM;
use crate::object::{Field, Object, MAX_KEY_LEN};
use xxhash_rust::xxh3::xxh3_64;

/// Keys at or below this length skip the hash gate
const HASH_GATE_LEN: usize = 16;

/// Length-gated, hash-gated byte equality ("advanced compare").
///
/// Also used by the resolver for command-name matching.
pub fn keys_equal(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    if a.len() <= HASH_GATE_LEN {
        return a == b;
    }
    xxh3_64(a) == xxh3_64(b) && a == b
}

/// Capacity-bounded object sequence with transposition promotion
pub struct Store {
    /// Objects, cold end at index 0, hot end at the back
    objects: Vec<Object>,

    /// Initial capacity budget in bytes
    capacity: u64,

    /// Bytes of budget left
    cap_remaining: u64,
}

impl Store {
    /// Create an empty store with the given byte capacity
    pub fn new(capacity: u64) -> Self {
        Store {
            objects: Vec::new(),
            capacity,
            cap_remaining: capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Initial capacity in bytes
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Unused capacity in bytes
    pub fn cap_remaining(&self) -> u64 {
        self.cap_remaining
    }

    pub fn object_at(&self, index: usize) -> Option<&Object> {
        self.objects.get(index)
    }

    pub fn object_at_mut(&mut self, index: usize) -> Option<&mut Object> {
        self.objects.get_mut(index)
    }

    /// Iterate cold end to hot end
    pub fn iter(&self) -> impl Iterator<Item = &Object> {
        self.objects.iter()
    }

    // -------------------------------------------------------------------------
    // Lookup
    // -------------------------------------------------------------------------

    /// Locate a key without side effects.
    ///
    /// Scans from the hot end toward the cold end; first hit wins.
    pub fn find(&self, key: &[u8]) -> Option<usize> {
        (0..self.objects.len())
            .rev()
            .find(|&i| keys_equal(&self.objects[i].key, key))
    }

    /// Data-path lookup: locate, promote one position, touch metadata.
    ///
    /// Returns the post-promotion index.
    pub fn search(&mut self, key: &[u8]) -> Option<usize> {
        let i = self.find(key)?;
        let i = self.promote(i);
        self.objects[i].metadata.bump();
        Some(i)
    }

    /// Data-path read. Promotes and touches like `search`.
    pub fn get(&mut self, key: &[u8]) -> Option<&Object> {
        let i = self.search(key)?;
        Some(&self.objects[i])
    }

    /// Side-effect-free read for introspection commands
    pub fn peek(&self, key: &[u8]) -> Option<&Object> {
        self.find(key).map(|i| &self.objects[i])
    }

    /// Transposition heuristic: swap the hit one step toward the hot end.
    /// The hot-most element stays where it is.
    fn promote(&mut self, i: usize) -> usize {
        if i + 1 < self.objects.len() {
            self.objects.swap(i, i + 1);
            i + 1
        } else {
            i
        }
    }

    // -------------------------------------------------------------------------
    // Mutation
    // -------------------------------------------------------------------------

    /// Insert or update a key.
    ///
    /// A missing key is appended at the hot end after a checked capacity
    /// debit. An existing key is updated in place: same-type writes
    /// overwrite the value, cross-type writes rebuild the object while
    /// preserving its metadata. Either way the object is touched exactly
    /// once, and only after the update has succeeded, so a failed
    /// capacity check leaves position and metadata untouched. Returns
    /// the object's index after the operation.
    pub fn put(&mut self, key: &[u8], field: Field) -> Result<usize> {
        match self.find(key) {
            Some(i) => {
                self.update_at(i, field)?;
                let i = self.promote(i);
                self.objects[i].metadata.bump();
                Ok(i)
            }
            None => {
                let obj = Object::new(key.to_vec(), field)?;
                self.insert_raw(obj)
            }
        }
    }

    /// Append an object as-is (metadata untouched) after a capacity debit.
    ///
    /// Used by `put` for new keys and by the snapshot loader, which must
    /// preserve on-disk metadata.
    pub fn insert_raw(&mut self, obj: Object) -> Result<usize> {
        let size = obj.size();
        self.cap_remaining = self
            .cap_remaining
            .checked_sub(size)
            .ok_or(RaptoError::ExceededSpaceLimit)?;
        MEM.on_alloc(size);
        self.objects.push(obj);
        Ok(self.objects.len() - 1)
    }

    /// Replace or create a key from a deserialized object (`RESTORE`/`COPY`).
    ///
    /// If the incoming object does not fit, the prior object (when one
    /// was displaced) is put back and the store is unchanged.
    pub fn restore(&mut self, obj: Object) -> Result<usize> {
        let prior = match self.find(&obj.key) {
            Some(i) => self.remove_at(i),
            None => None,
        };
        match self.insert_raw(obj) {
            Ok(i) => Ok(i),
            Err(e) => {
                if let Some(prior) = prior {
                    // Re-inserting what was just removed cannot fail.
                    let _ = self.insert_raw(prior);
                }
                Err(e)
            }
        }
    }

    fn update_at(&mut self, i: usize, field: Field) -> Result<()> {
        let same_type = self.objects[i].field.tag() == field.tag();
        if same_type {
            match (&mut self.objects[i].field, field) {
                (Field::Int(old), Field::Int(new)) => *old = new,
                (Field::Dec(old), Field::Dec(new)) => *old = new,
                (Field::Str(old), Field::Str(new)) => {
                    // Reuse the buffer when the length matches; the
                    // capacity ledger is not adjusted on this path.
                    if old.len() == new.len() {
                        old.copy_from_slice(&new);
                    } else {
                        *old = new;
                    }
                }
                _ => unreachable!("tag equality checked above"),
            }
            Ok(())
        } else {
            let old_size = self.objects[i].size();
            let metadata = self.objects[i].metadata;
            let replacement = Object {
                key: self.objects[i].key.clone(),
                field,
                metadata,
            };
            let new_size = replacement.size();

            // Credit the old object, debit the new one; fail before
            // mutating if the budget cannot cover the swap.
            let credited = self
                .cap_remaining
                .checked_add(old_size)
                .ok_or(RaptoError::ExceededSpaceLimit)?;
            let remaining = credited
                .checked_sub(new_size)
                .ok_or(RaptoError::ExceededSpaceLimit)?;

            self.cap_remaining = remaining;
            MEM.on_free(old_size);
            MEM.on_alloc(new_size);
            self.objects[i] = replacement;
            Ok(())
        }
    }

    /// Remove the object at `index`, crediting its size back
    pub fn remove_at(&mut self, index: usize) -> Option<Object> {
        if index >= self.objects.len() {
            return None;
        }
        let obj = self.objects.remove(index);
        let size = obj.size();
        self.cap_remaining = self.cap_remaining.saturating_add(size).min(self.capacity);
        MEM.on_free(size);
        Some(obj)
    }

    /// Remove a key, crediting its size back
    pub fn remove(&mut self, key: &[u8]) -> Result<Object> {
        let i = self.find(key).ok_or(RaptoError::KeyNotFound)?;
        self.remove_at(i).ok_or(RaptoError::KeyNotFound)
    }

    /// Rename a key in place.
    ///
    /// Fails if the new key already exists or is out of range. The
    /// capacity ledger follows the key-length delta.
    pub fn rename(&mut self, old: &[u8], new: &[u8]) -> Result<()> {
        if new.is_empty() || new.len() > MAX_KEY_LEN {
            return Err(RaptoError::TypeOverflow);
        }
        if self.find(new).is_some() {
            return Err(RaptoError::KeyReplacementExist);
        }
        let i = self.find(old).ok_or(RaptoError::KeyNotFound)?;

        if new.len() > old.len() {
            let grow = (new.len() - old.len()) as u64;
            self.cap_remaining = self
                .cap_remaining
                .checked_sub(grow)
                .ok_or(RaptoError::ExceededSpaceLimit)?;
        } else {
            let shrink = (old.len() - new.len()) as u64;
            self.cap_remaining = self.cap_remaining.saturating_add(shrink).min(self.capacity);
        }
        self.objects[i].key = new.to_vec();
        Ok(())
    }

    /// Drop every object and restore the full budget
    pub fn clear(&mut self) {
        for obj in self.objects.drain(..) {
            MEM.on_free(obj.size());
        }
        self.cap_remaining = self.capacity;
    }

    // -------------------------------------------------------------------------
    // Ordering Operations
    // -------------------------------------------------------------------------

    /// Keys from the hot end to the cold end
    pub fn list_keys(&self) -> Vec<Vec<u8>> {
        self.objects.iter().rev().map(|o| o.key.clone()).collect()
    }

    /// Swap the target with the hot-end element. O(1), breaks global order.
    pub fn swap_with_head(&mut self, key: &[u8]) -> Result<()> {
        let i = self.find(key).ok_or(RaptoError::KeyNotFound)?;
        let last = self.objects.len() - 1;
        self.objects.swap(i, last);
        Ok(())
    }

    /// Swap the target with the cold-end element. O(1), breaks global order.
    pub fn swap_with_tail(&mut self, key: &[u8]) -> Result<()> {
        let i = self.find(key).ok_or(RaptoError::KeyNotFound)?;
        self.objects.swap(i, 0);
        Ok(())
    }

    /// Remove the target and re-insert it at the hot end, preserving the
    /// relative order of everything else.
    pub fn move_to_head(&mut self, key: &[u8]) -> Result<()> {
        let i = self.find(key).ok_or(RaptoError::KeyNotFound)?;
        let obj = self.objects.remove(i);
        self.objects.push(obj);
        Ok(())
    }

    /// Remove the target and re-insert it at the cold end, preserving the
    /// relative order of everything else.
    pub fn move_to_tail(&mut self, key: &[u8]) -> Result<()> {
        let i = self.find(key).ok_or(RaptoError::KeyNotFound)?;
        let obj = self.objects.remove(i);
        self.objects.insert(0, obj);
        Ok(())
    }

    /// Stable insertion sort by `last_access` ascending: least-recent at
    /// the cold end, most-recent at the hot end. Equal timestamps keep
    /// their current relative order. Used after snapshot load and by the
    /// `SORT` command.
    pub fn prefetch(&mut self) {
        for i in 1..self.objects.len() {
            let mut j = i;
            while j > 0
                && self.objects[j - 1].metadata.last_access
                    > self.objects[j].metadata.last_access
            {
                self.objects.swap(j - 1, j);
                j -= 1;
            }
        }
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        self.clear();
    }
}
