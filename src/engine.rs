//! The concurrent hash table: bucket arrays, counters, and the
//! incremental dual-table migration protocol.
//!
//! An [`Engine`] owns a "current" bucket array and, while a resize is
//! draining, an "old" one. Every public operation does a small bounded
//! amount of migration work before its own action, so no single call
//! ever rehashes the whole table.

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::bucket::{Bucket, BucketState, PlaceOutcome};
use crate::error::{ErrorKind, Result};
use crate::siphash::hash_with_global_key;

type Table = Arc<Vec<Bucket>>;

fn lock_ignore_poison<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn new_table(bucket_count: usize) -> Table {
    Arc::new((0..bucket_count).map(|_| Bucket::new()).collect())
}

/// `SipHash(key) mod bucket_count`, implemented as a mask since every
/// table length is a power of two.
fn index_for(key: &[u8], bucket_count: usize) -> usize {
    debug_assert!(bucket_count.is_power_of_two());
    (hash_with_global_key(key) as usize) & (bucket_count - 1)
}

enum ProbeResult {
    Inserted,
    Updated(usize),
    Full,
}

/// Single-table insertion probe. Tracks the first tombstone seen so
/// reused slots land where a lookup's chain will actually find them.
fn probe_insert(table: &[Bucket], start: usize, key: &[u8], value: &[u8]) -> ProbeResult {
    let bucket_count = table.len();
    let mut tombstone_candidate: Option<usize> = None;

    for step in 0..bucket_count {
        let idx = (start + step) % bucket_count;
        match table[idx].state() {
            BucketState::Occupied => {
                if let Some(old_len) = table[idx].try_update_if_match(key, value) {
                    return ProbeResult::Updated(old_len);
                }
            }
            BucketState::Tombstone => {
                if tombstone_candidate.is_none() {
                    tombstone_candidate = Some(idx);
                }
            }
            BucketState::Empty => {
                if let Some(ts_idx) = tombstone_candidate {
                    match table[ts_idx].try_place(key, value) {
                        PlaceOutcome::Inserted => return ProbeResult::Inserted,
                        PlaceOutcome::Updated(old_len) => return ProbeResult::Updated(old_len),
                        // Lost the race for the tombstone slot to a
                        // concurrent insert; the empty slot found here is
                        // still worth a direct attempt below.
                        PlaceOutcome::Occupied => {}
                    }
                }
                match table[idx].try_place(key, value) {
                    PlaceOutcome::Inserted => return ProbeResult::Inserted,
                    PlaceOutcome::Updated(old_len) => return ProbeResult::Updated(old_len),
                    PlaceOutcome::Occupied => continue,
                }
            }
        }
    }
    ProbeResult::Full
}

fn probe_lookup(table: &[Bucket], start: usize, key: &[u8]) -> Option<Vec<u8>> {
    let bucket_count = table.len();
    for step in 0..bucket_count {
        let idx = (start + step) % bucket_count;
        match table[idx].state() {
            BucketState::Empty => return None,
            BucketState::Tombstone => continue,
            BucketState::Occupied => {
                if let Some(value) = table[idx].get_if_match(key) {
                    return Some(value);
                }
            }
        }
    }
    None
}

/// Returns the freed `(key_len, value_len)` on a match.
fn probe_delete(table: &[Bucket], start: usize, key: &[u8]) -> Option<(usize, usize)> {
    let bucket_count = table.len();
    for step in 0..bucket_count {
        let idx = (start + step) % bucket_count;
        match table[idx].state() {
            BucketState::Empty => return None,
            BucketState::Tombstone => continue,
            BucketState::Occupied => {
                if let Some(freed) = table[idx].try_tombstone_if_match(key) {
                    return Some(freed);
                }
            }
        }
    }
    None
}

/// Approximate snapshot of engine counters, read without locking the
/// table. `total_payload_bytes` mirrors the source's own treatment of
/// that figure as approximate rather than an exact recomputation.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Stats {
    pub item_count: usize,
    pub bucket_count: usize,
    pub total_payload_bytes: usize,
}

/// The concurrent key-value engine.
///
/// Any number of threads may call [`put`](Engine::put), [`get`](Engine::get),
/// and [`delete`](Engine::delete) on a shared `&Engine` concurrently.
/// [`destroy`](Engine::destroy) requires the caller to guarantee no
/// concurrent operations are in flight.
pub struct Engine {
    current: Mutex<Table>,
    old: Mutex<Option<Table>>,
    migration_cursor: AtomicUsize,
    active_worker_count: AtomicUsize,
    item_count: AtomicUsize,
    total_payload_bytes: AtomicI64,
    engine_lock: Mutex<()>,
}

impl Engine {
    pub const MIN_BUCKETS: usize = 16;
    pub const MAX_BUCKETS: usize = 1 << 20;
    pub const MAX_LOAD_FACTOR: f64 = 0.75;
    pub const MIN_LOAD_FACTOR: f64 = 0.20;
    pub const MIGRATE_BATCH: usize = 2;

    // 1 + number of doublings from MIN_BUCKETS to MAX_BUCKETS; a bound on
    // how many times `put` can be forced to grow-and-retry in one call.
    const MAX_RESIZE_RETRIES: usize = 24;

    /// Allocates a new engine with at least `requested_bucket_count`
    /// buckets, rounded up to a power of two within
    /// `[MIN_BUCKETS, MAX_BUCKETS]`.
    pub fn initialize(requested_bucket_count: usize) -> Result<Self> {
        if requested_bucket_count == 0 {
            return Err((ErrorKind::InvalidArgument, "bucket count must be positive").into());
        }
        let bucket_count = requested_bucket_count
            .max(Self::MIN_BUCKETS)
            .next_power_of_two()
            .min(Self::MAX_BUCKETS);

        Ok(Engine {
            current: Mutex::new(new_table(bucket_count)),
            old: Mutex::new(None),
            migration_cursor: AtomicUsize::new(0),
            active_worker_count: AtomicUsize::new(0),
            item_count: AtomicUsize::new(0),
            total_payload_bytes: AtomicI64::new(0),
            engine_lock: Mutex::new(()),
        })
    }

    fn needs_grow(item_count: usize, bucket_count: usize) -> bool {
        bucket_count < Self::MAX_BUCKETS
            && (item_count as f64) >= (bucket_count as f64) * Self::MAX_LOAD_FACTOR
    }

    fn needs_shrink(item_count: usize, bucket_count: usize) -> bool {
        bucket_count > Self::MIN_BUCKETS
            && (item_count as f64) < (bucket_count as f64) * Self::MIN_LOAD_FACTOR
    }

    fn adjust_payload_bytes(&self, delta: i64) {
        if delta >= 0 {
            self.total_payload_bytes.fetch_add(delta, Ordering::Relaxed);
        } else {
            self.total_payload_bytes.fetch_sub(-delta, Ordering::Relaxed);
        }
    }

    /// Checked at the start of every public operation. A no-op if a
    /// migration is already draining, if the load factor hasn't crossed
    /// a threshold, or if another thread wins the race to start one.
    fn maybe_start_resize(&self) {
        let bucket_count = { lock_ignore_poison(&self.current).len() };
        let item_count = self.item_count.load(Ordering::Relaxed);

        let target = if Self::needs_grow(item_count, bucket_count) {
            (bucket_count * 2).min(Self::MAX_BUCKETS)
        } else if Self::needs_shrink(item_count, bucket_count) {
            (bucket_count / 2).max(Self::MIN_BUCKETS)
        } else {
            return;
        };
        if target == bucket_count {
            return;
        }

        let Ok(engine_guard) = self.engine_lock.try_lock() else {
            return;
        };

        if lock_ignore_poison(&self.old).is_some() {
            return;
        }

        self.start_epoch(target);
        drop(engine_guard);
    }

    /// Forced grow after a probe chain found the table pathologically
    /// full. Unlike `maybe_start_resize`, this always doubles (up to
    /// `MAX_BUCKETS`) regardless of the load-factor thresholds, since a
    /// full chain means there is no EMPTY or TOMBSTONE slot left at all.
    fn force_grow_for_fullness(&self, observed_bucket_count: usize) -> Result<()> {
        if observed_bucket_count >= Self::MAX_BUCKETS {
            return Err((ErrorKind::NoSpace, "probe chain exhausted at MAX_BUCKETS").into());
        }

        let engine_guard = lock_ignore_poison(&self.engine_lock);

        if lock_ignore_poison(&self.old).is_some() {
            // A migration is already draining; we can't open a second
            // one. The caller's retry loop will re-probe once it
            // progresses further.
            return Ok(());
        }

        let current_len = { lock_ignore_poison(&self.current).len() };
        if current_len != observed_bucket_count {
            // Someone already resized since the caller observed Full.
            return Ok(());
        }

        let target = (current_len * 2).min(Self::MAX_BUCKETS);
        self.start_epoch(target);
        drop(engine_guard);
        Ok(())
    }

    /// Installs a freshly allocated `target`-sized array as current,
    /// demotes the previous array to draining, and resets the cursor.
    /// Caller holds `engine_lock`.
    fn start_epoch(&self, target: usize) {
        let new_table = new_table(target);
        let previous = {
            let mut current_guard = lock_ignore_poison(&self.current);
            std::mem::replace(&mut *current_guard, new_table)
        };
        {
            let mut old_guard = lock_ignore_poison(&self.old);
            *old_guard = Some(previous);
        }
        self.migration_cursor.store(0, Ordering::Release);
    }

    /// Moves the entry at `old_table[idx]` into the current table, if any
    /// is resident. Holds the old slot's lock across both the new-table
    /// insert and the tombstone step (via `Bucket::migrate_with`) so the
    /// entry is never reachable in neither table, and so a concurrent
    /// `put` for the same key can never race a half-moved entry: either it
    /// observes the old slot still OCCUPIED and updates it directly, or it
    /// observes the tombstone only after the moved value is already live
    /// in `current`.
    ///
    /// If the new table reports `Full`, first tries to grow it exactly as
    /// `put`'s own retry loop does, then retries the move; the old slot is
    /// only left OCCUPIED (the move abandoned for a later retry) once
    /// `MAX_RESIZE_RETRIES` is exhausted or the table is pinned at
    /// `MAX_BUCKETS`. The old slot is never tombstoned without the entry
    /// having been placed into `current` first.
    fn migrate_one_slot(&self, old_table: &Table, idx: usize) {
        if !old_table[idx].is_occupied() {
            return;
        }

        for _ in 0..Self::MAX_RESIZE_RETRIES {
            let current_table = { lock_ignore_poison(&self.current).clone() };
            let bucket_count = current_table.len();

            let outcome = old_table[idx].migrate_with(|key, value| {
                let start = index_for(key, bucket_count);
                !matches!(probe_insert(&current_table, start, key, value), ProbeResult::Full)
            });

            match outcome {
                None => return,
                Some(true) => return,
                Some(false) => {
                    if self.force_grow_for_fullness(bucket_count).is_err() {
                        log::warn!(
                            "hashkv: migration step could not place a moved entry; \
                             the new table is pinned at MAX_BUCKETS, leaving the \
                             slot occupied for a later retry"
                        );
                        return;
                    }
                }
            }
        }

        log::warn!(
            "hashkv: migration step repeatedly failed to place a moved entry; \
             leaving it occupied for a later retry"
        );
    }

    /// Finalizes a migration epoch once the cursor has been exhausted.
    /// Before reclaiming the old array, sweeps it for any bucket left
    /// OCCUPIED by a `migrate_one_slot` call that ran out of retries —
    /// this is how "migration retries on a subsequent operation" is
    /// actually implemented, since the cursor itself never revisits an
    /// index once consumed. `Arc::ptr_eq` (rather than a length
    /// comparison) confirms `self.old` still refers to this exact epoch
    /// before clearing it.
    fn try_finish_migration(&self, old_table: &Table) {
        let old_bucket_count = old_table.len();
        if self.migration_cursor.load(Ordering::Acquire) < old_bucket_count {
            return;
        }

        for idx in 0..old_bucket_count {
            if old_table[idx].is_occupied() {
                self.migrate_one_slot(old_table, idx);
            }
        }

        let Ok(_engine_guard) = self.engine_lock.try_lock() else {
            return;
        };
        if self.active_worker_count.load(Ordering::Acquire) != 0 {
            return;
        }

        let mut old_guard = lock_ignore_poison(&self.old);
        match old_guard.as_ref() {
            Some(current_old) if Arc::ptr_eq(current_old, old_table) => {
                if current_old.iter().any(|bucket| bucket.is_occupied()) {
                    return;
                }
                *old_guard = None;
            }
            _ => {}
        }
    }

    /// Runs a small bounded batch of migration work, if a migration is
    /// currently draining. Called at the top of every public operation.
    fn run_migration_batch(&self) {
        let old_table = { lock_ignore_poison(&self.old).clone() };
        let Some(old_table) = old_table else {
            return;
        };
        let bucket_count = old_table.len();

        self.active_worker_count.fetch_add(1, Ordering::AcqRel);
        for _ in 0..Self::MIGRATE_BATCH {
            let idx = self.migration_cursor.fetch_add(1, Ordering::AcqRel);
            if idx >= bucket_count {
                break;
            }
            self.migrate_one_slot(&old_table, idx);
        }
        self.active_worker_count.fetch_sub(1, Ordering::AcqRel);

        self.try_finish_migration(&old_table);
    }

    fn before_op(&self) {
        self.maybe_start_resize();
        self.run_migration_batch();
    }

    /// Inserts `value` under `key`, or overwrites the value if `key`
    /// already exists. Empty keys and empty values are rejected.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err((ErrorKind::InvalidArgument, "key must not be empty").into());
        }
        if value.is_empty() {
            return Err((ErrorKind::InvalidArgument, "value must not be empty").into());
        }

        self.before_op();

        // Collapse a key that exists in both the draining old table and
        // the current one into a single authoritative copy in current,
        // so item_count is never incremented for a key that already
        // existed somewhere in the engine.
        let removed_from_old = {
            let old_table = { lock_ignore_poison(&self.old).clone() };
            old_table.and_then(|old_table| {
                let start = index_for(key, old_table.len());
                probe_delete(&old_table, start, key)
            })
        };

        for _ in 0..Self::MAX_RESIZE_RETRIES {
            let current_table = { lock_ignore_poison(&self.current).clone() };
            let bucket_count = current_table.len();
            let start = index_for(key, bucket_count);

            match probe_insert(&current_table, start, key, value) {
                ProbeResult::Inserted => {
                    let mut delta = (key.len() + value.len()) as i64;
                    match removed_from_old {
                        Some((old_key_len, old_value_len)) => {
                            delta -= (old_key_len + old_value_len) as i64;
                        }
                        None => {
                            self.item_count.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                    self.adjust_payload_bytes(delta);
                    return Ok(());
                }
                ProbeResult::Updated(old_value_len_in_current) => {
                    let mut delta = value.len() as i64 - old_value_len_in_current as i64;
                    if let Some((old_key_len, old_value_len)) = removed_from_old {
                        delta -= (old_key_len + old_value_len) as i64;
                    }
                    self.adjust_payload_bytes(delta);
                    return Ok(());
                }
                ProbeResult::Full => {
                    self.force_grow_for_fullness(bucket_count)?;
                }
            }
        }

        Err((
            ErrorKind::NoSpace,
            "probe chain exhausted after repeated grow attempts",
        )
            .into())
    }

    /// Looks up `key`, checking the current table first and falling
    /// back to the draining old table if a migration is in progress.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        if key.is_empty() {
            return Err((ErrorKind::InvalidArgument, "key must not be empty").into());
        }

        self.before_op();

        let current_table = { lock_ignore_poison(&self.current).clone() };
        let start = index_for(key, current_table.len());
        if let Some(value) = probe_lookup(&current_table, start, key) {
            return Ok(value);
        }

        let old_table = { lock_ignore_poison(&self.old).clone() };
        if let Some(old_table) = old_table {
            let start = index_for(key, old_table.len());
            if let Some(value) = probe_lookup(&old_table, start, key) {
                return Ok(value);
            }
        }

        Err(ErrorKind::NotFound.into())
    }

    /// Removes `key`, checking both the current and draining tables so a
    /// migration in progress cannot hide a live entry from delete.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err((ErrorKind::InvalidArgument, "key must not be empty").into());
        }

        self.before_op();

        let current_table = { lock_ignore_poison(&self.current).clone() };
        let start = index_for(key, current_table.len());
        let freed_current = probe_delete(&current_table, start, key);

        let old_table = { lock_ignore_poison(&self.old).clone() };
        let freed_old = old_table.and_then(|old_table| {
            let start = index_for(key, old_table.len());
            probe_delete(&old_table, start, key)
        });

        if freed_current.is_none() && freed_old.is_none() {
            return Err(ErrorKind::NotFound.into());
        }

        self.item_count.fetch_sub(1, Ordering::Relaxed);
        let mut freed_bytes: i64 = 0;
        if let Some((k, v)) = freed_current {
            freed_bytes += (k + v) as i64;
        }
        if let Some((k, v)) = freed_old {
            freed_bytes += (k + v) as i64;
        }
        self.adjust_payload_bytes(-freed_bytes);
        Ok(())
    }

    /// Reads `(item_count, bucket_count, total_payload_bytes)` without
    /// locking the table; may reflect either side of a concurrent
    /// mutation.
    pub fn stats(&self) -> Stats {
        let bucket_count = { lock_ignore_poison(&self.current).len() };
        Stats {
            item_count: self.item_count.load(Ordering::Relaxed),
            bucket_count,
            total_payload_bytes: self.total_payload_bytes.load(Ordering::Relaxed).max(0) as usize,
        }
    }

    /// Tears down the engine. The caller guarantees no concurrent
    /// operation is in flight.
    pub fn destroy(&self) {
        {
            let current_guard = lock_ignore_poison(&self.current);
            for bucket in current_guard.iter() {
                bucket.reset();
            }
        }
        {
            let mut old_guard = lock_ignore_poison(&self.old);
            if let Some(old_table) = old_guard.take() {
                for bucket in old_table.iter() {
                    bucket.reset();
                }
            }
        }
        self.item_count.store(0, Ordering::Relaxed);
        self.total_payload_bytes.store(0, Ordering::Relaxed);
        self.migration_cursor.store(0, Ordering::Relaxed);
        self.active_worker_count.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let engine = Engine::initialize(16).unwrap();
        engine.put(b"k", b"v").unwrap();
        assert_eq!(engine.get(b"k").unwrap(), b"v");
        assert_eq!(engine.stats().item_count, 1);
    }

    #[test]
    fn empty_key_or_value_is_rejected() {
        let engine = Engine::initialize(16).unwrap();
        assert_eq!(engine.put(b"", b"v").unwrap_err().kind(), ErrorKind::InvalidArgument);
        assert_eq!(engine.put(b"k", b"").unwrap_err().kind(), ErrorKind::InvalidArgument);
        assert_eq!(engine.get(b"").unwrap_err().kind(), ErrorKind::InvalidArgument);
        assert_eq!(engine.delete(b"").unwrap_err().kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn overwrite_keeps_item_count() {
        let engine = Engine::initialize(16).unwrap();
        engine.put(b"a", b"1").unwrap();
        engine.put(b"a", b"22").unwrap();
        engine.put(b"a", b"333").unwrap();
        assert_eq!(engine.get(b"a").unwrap(), b"333");
        assert_eq!(engine.stats().item_count, 1);
    }

    #[test]
    fn idempotent_delete_reports_not_found() {
        let engine = Engine::initialize(16).unwrap();
        engine.put(b"a", b"1").unwrap();
        engine.delete(b"a").unwrap();
        assert_eq!(engine.delete(b"a").unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(engine.stats().item_count, 0);
    }

    #[test]
    fn tombstone_slot_is_reused() {
        let engine = Engine::initialize(16).unwrap();
        engine.put(b"a", b"1").unwrap();
        engine.delete(b"a").unwrap();
        engine.put(b"a", b"2").unwrap();
        assert_eq!(engine.get(b"a").unwrap(), b"2");
        assert_eq!(engine.stats().item_count, 1);
    }

    #[test]
    fn grow_preserves_all_entries() {
        let engine = Engine::initialize(16).unwrap();
        for i in 0..13u32 {
            let key = format!("k{i}");
            engine.put(key.as_bytes(), b"v").unwrap();
        }
        assert!(engine.stats().bucket_count >= 32);
        for i in 0..13u32 {
            let key = format!("k{i}");
            assert_eq!(engine.get(key.as_bytes()).unwrap(), b"v");
        }
    }

    #[test]
    fn shrink_preserves_remaining_entries() {
        let engine = Engine::initialize(64).unwrap();
        for i in 0..64u32 {
            let key = format!("k{i}");
            engine.put(key.as_bytes(), b"v").unwrap();
        }
        for i in 0..60u32 {
            let key = format!("k{i}");
            engine.delete(key.as_bytes()).unwrap();
        }
        for i in 60..64u32 {
            let key = format!("k{i}");
            assert_eq!(engine.get(key.as_bytes()).unwrap(), b"v");
        }
        assert!(engine.stats().bucket_count <= 64);
    }

    #[test]
    fn binary_safe_key_with_embedded_zeros() {
        let engine = Engine::initialize(16).unwrap();
        let key: Vec<u8> = (0u8..=0x0f).collect();
        engine.put(&key, b"x").unwrap();
        assert_eq!(engine.get(&key).unwrap(), b"x");
    }

    #[test]
    fn destroy_resets_counters() {
        let engine = Engine::initialize(16).unwrap();
        engine.put(b"a", b"1").unwrap();
        engine.destroy();
        assert_eq!(engine.stats().item_count, 0);
        assert_eq!(engine.stats().total_payload_bytes, 0);
    }
}
