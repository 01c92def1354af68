//! Single hash-table slot: the EMPTY / OCCUPIED / TOMBSTONE state machine.
//!
//! Each bucket exposes a lock-free `state()` read for probe-chain control
//! flow (stop on EMPTY, skip over TOMBSTONE, compare on OCCUPIED) and a
//! small set of lock-guarded compound operations that make the
//! check-then-mutate step atomic with respect to other threads touching
//! the same slot. No operation here ever iterates a table; a bucket only
//! knows about itself.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Mutex;

/// The three states a slot can be in. Numeric values are chosen so the
/// atomic tag can be stored directly without a fallible conversion in the
/// hot read path.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(u8)]
pub enum BucketState {
    Empty = 0,
    Occupied = 1,
    Tombstone = 2,
}

impl BucketState {
    fn from_tag(tag: u8) -> Self {
        match tag {
            0 => BucketState::Empty,
            1 => BucketState::Occupied,
            2 => BucketState::Tombstone,
            other => unreachable!("bucket state tag out of range: {other}"),
        }
    }
}

#[derive(Debug, Default)]
struct Payload {
    key: Vec<u8>,
    value: Vec<u8>,
}

/// Outcome of [`Bucket::try_place`]: the terminal write of an insertion
/// probe, attempted at either the first tombstone seen along the chain or
/// the empty slot that closes it.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PlaceOutcome {
    /// The slot was EMPTY or TOMBSTONE; it now holds `key`/`value`.
    Inserted,
    /// The slot was already OCCUPIED with a matching key; its value was
    /// overwritten in place. Carries the length of the value it held.
    Updated(usize),
    /// The slot was OCCUPIED with a different key. A racing insert beat
    /// us to this exact slot; the caller must keep probing.
    Occupied,
}

/// A single table slot: a relaxed/acquire atomic tag guarding the common
/// read path, plus a mutex over the owned key/value bytes for every
/// operation that actually touches the payload.
#[derive(Debug)]
pub struct Bucket {
    tag: AtomicU8,
    payload: Mutex<Payload>,
}

impl Default for Bucket {
    fn default() -> Self {
        Self::new()
    }
}

impl Bucket {
    /// Constructs an EMPTY bucket with no payload allocated.
    pub fn new() -> Self {
        Bucket {
            tag: AtomicU8::new(BucketState::Empty as u8),
            payload: Mutex::new(Payload::default()),
        }
    }

    /// Lock-free read of the slot's current state. Cheap enough to call
    /// once per probe step; the caller uses it to decide whether the
    /// slower, lock-guarded operations below are worth attempting.
    pub fn state(&self) -> BucketState {
        BucketState::from_tag(self.tag.load(Ordering::Acquire))
    }

    pub fn is_empty(&self) -> bool {
        self.state() == BucketState::Empty
    }

    pub fn is_tombstone(&self) -> bool {
        self.state() == BucketState::Tombstone
    }

    pub fn is_occupied(&self) -> bool {
        self.state() == BucketState::Occupied
    }

    /// Poisoned-mutex handling: a panicked lock holder turns every future
    /// lock attempt into a poison error. There is no way to repair the
    /// payload from outside, so every call site treats this the same way
    /// the engine treats any other internal invariant violation.
    fn lock(&self) -> std::sync::MutexGuard<'_, Payload> {
        match self.payload.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Reads the value behind a matching key, cloning it out. Returns
    /// `None` if the slot is not OCCUPIED or the key does not match.
    /// Leaves the slot unchanged either way.
    pub fn get_if_match(&self, key: &[u8]) -> Option<Vec<u8>> {
        let guard = self.lock();
        if self.state() == BucketState::Occupied && guard.key == key {
            Some(guard.value.clone())
        } else {
            None
        }
    }

    /// Attempts the terminal write of an insertion probe: claim an EMPTY
    /// or TOMBSTONE slot for `key`/`value`, or update `value` in place if
    /// the slot turns out to already hold `key`. Returns
    /// [`PlaceOutcome::Occupied`] without mutating anything if the slot
    /// holds a different key (the caller must keep probing past it).
    pub fn try_place(&self, key: &[u8], value: &[u8]) -> PlaceOutcome {
        let mut guard = self.lock();
        match self.state() {
            BucketState::Empty | BucketState::Tombstone => {
                guard.key = key.to_vec();
                guard.value = value.to_vec();
                self.tag.store(BucketState::Occupied as u8, Ordering::Release);
                PlaceOutcome::Inserted
            }
            BucketState::Occupied if guard.key == key => {
                let old_len = guard.value.len();
                guard.value = value.to_vec();
                PlaceOutcome::Updated(old_len)
            }
            BucketState::Occupied => PlaceOutcome::Occupied,
        }
    }

    /// Updates the value in place if the slot is OCCUPIED with a matching
    /// key. Used while scanning past occupied slots that are not the
    /// insertion's terminal target. Returns the old value's length on a
    /// match, `None` otherwise (slot left untouched).
    pub fn try_update_if_match(&self, key: &[u8], value: &[u8]) -> Option<usize> {
        let mut guard = self.lock();
        if self.state() == BucketState::Occupied && guard.key == key {
            let old_len = guard.value.len();
            guard.value = value.to_vec();
            Some(old_len)
        } else {
            None
        }
    }

    /// Converts an OCCUPIED slot with a matching key into a TOMBSTONE,
    /// freeing its key/value bytes and returning their lengths. Returns
    /// `None` (slot untouched) if the key does not match or the slot is
    /// not OCCUPIED.
    pub fn try_tombstone_if_match(&self, key: &[u8]) -> Option<(usize, usize)> {
        let mut guard = self.lock();
        if self.state() == BucketState::Occupied && guard.key == key {
            let freed = (guard.key.len(), guard.value.len());
            guard.key = Vec::new();
            guard.value = Vec::new();
            self.tag.store(BucketState::Tombstone as u8, Ordering::Release);
            Some(freed)
        } else {
            None
        }
    }

    /// Migration step: if OCCUPIED, holds the slot lock across the entire
    /// move — `insert` is called with the resident key/value and must
    /// attempt to place them into the new table while the lock is still
    /// held, exactly the critical-section shape the original `migrate_bucket`
    /// uses (lock, insert into the new table, tombstone, unlock). The slot
    /// is tombstoned only if `insert` reports success; if it returns
    /// `false` (the new table had no room), the slot is left OCCUPIED so
    /// the entry is never lost and a later operation can retry the move.
    ///
    /// Returns `None` if the slot was not OCCUPIED to begin with.
    pub fn migrate_with<F>(&self, insert: F) -> Option<bool>
    where
        F: FnOnce(&[u8], &[u8]) -> bool,
    {
        let mut guard = self.lock();
        if self.state() != BucketState::Occupied {
            return None;
        }
        let placed = insert(&guard.key, &guard.value);
        if placed {
            guard.key = Vec::new();
            guard.value = Vec::new();
            self.tag.store(BucketState::Tombstone as u8, Ordering::Release);
        }
        Some(placed)
    }

    /// Resets the slot to EMPTY with no payload. Used when reclaiming an
    /// old array after an epoch finishes; never called on a live array
    /// that readers might still be probing.
    pub fn reset(&self) {
        let mut guard = self.lock();
        guard.key = Vec::new();
        guard.value = Vec::new();
        self.tag.store(BucketState::Empty as u8, Ordering::Release);
    }
}
