//! Bounded-Memory LRU Cache with TTL Support
//!
//! This module implements the core keyspace for cinderkv: a byte-budgeted
//! map from keys to string or hash values, with least-recently-used
//! eviction and millisecond-resolution expiration.
//!
//! ## Design Decisions
//!
//! 1. **Arena + handles**: Entries live in a slot arena (`Vec<Option<Entry>>`
//!    with a free list). The LRU list is intrusive over slot ids, the index
//!    map resolves keys to slots, and a flat sampling array supports the
//!    probabilistic expiry sweep. No pointers, no `unsafe`.
//! 2. **One mutex**: All four structures (arena, list, index, sampling
//!    array) plus the size counter mutate together, so a single lock
//!    guards them as a unit. Operations are short and never held across
//!    an await point.
//! 3. **Byte-accurate accounting**: `size` is maintained incrementally on
//!    every mutation, making the eviction decision O(1).
//! 4. **Lazy + active expiry**: Reads reclaim expired entries on touch;
//!    the background sweep in [`crate::storage::gc`] reclaims the rest.
//!
//! ## Data Layout
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                           Cache                              │
//! │                                                              │
//! │  index: {key → slot}        sample: [slot, slot, ...]        │
//! │          │                            │                      │
//! │          ▼                            ▼                      │
//! │  slots: [Entry│Entry│free│Entry│ ... ]   (arena)             │
//! │           ▲ ▲            │ │                                 │
//! │   head ───┘ └── prev/next┘ └─── tail    (intrusive LRU)      │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every live entry appears exactly once in the index, once in the LRU
//! list, and once in the sampling array; each entry records its own
//! position in the sampling array so removal is O(1) by swap-with-last.
//!
//! ## Size Accounting
//!
//! The tracked cost of an entry is `len(key)` plus its payload: the byte
//! length of a string value, or the sum of field and field-value lengths
//! for a hash. Link and allocator overhead are not counted; the budget is
//! a user-visible approximation, not a precise footprint.

use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Sentinel slot id meaning "no link".
const NIL: usize = usize::MAX;

/// Error returned when a command is used against a key holding the wrong
/// kind of value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WrongType;

impl fmt::Display for WrongType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "WRONGTYPE Operation against a key holding the wrong kind of value"
        )
    }
}

impl std::error::Error for WrongType {}

/// A value in the keyspace: an opaque byte string, or a map from field
/// to byte string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    String(Bytes),
    Hash(HashMap<Bytes, Bytes>),
}

impl Value {
    /// Payload bytes charged against the size budget; the key is charged
    /// separately.
    fn cost(&self) -> usize {
        match self {
            Value::String(data) => data.len(),
            Value::Hash(map) => map.iter().map(|(f, v)| f.len() + v.len()).sum(),
        }
    }
}

/// A keyed record in the arena.
#[derive(Debug)]
struct Entry {
    key: Bytes,
    value: Value,
    /// Absolute expiration instant; `None` means the entry never expires.
    expires_at: Option<Instant>,
    /// Intrusive LRU links (slot ids).
    prev: usize,
    next: usize,
    /// This entry's index in the sampling array.
    pos: usize,
}

impl Entry {
    #[inline]
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

/// Counts from one probabilistic expiry sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Entries examined this sweep.
    pub sampled: usize,
    /// Entries found expired and removed.
    pub removed: usize,
}

/// Everything the cache mutex protects, mutated as a unit.
#[derive(Debug)]
struct Inner {
    /// Byte budget; `0` disables eviction.
    size_limit: usize,
    /// Tracked bytes across all live entries.
    size: usize,
    /// Slot arena; freed slots are recycled through `free`.
    slots: Vec<Option<Entry>>,
    free: Vec<usize>,
    /// LRU list ends: `head` is most recently used, `tail` least.
    head: usize,
    tail: usize,
    /// Key → slot id.
    index: HashMap<Bytes, usize>,
    /// Live slot ids in arbitrary order, for uniform random sampling.
    sample: Vec<usize>,
}

impl Inner {
    fn new(size_limit: usize) -> Self {
        Self {
            size_limit,
            size: 0,
            slots: Vec::new(),
            free: Vec::new(),
            head: NIL,
            tail: NIL,
            index: HashMap::new(),
            sample: Vec::new(),
        }
    }

    #[inline]
    fn node(&self, id: usize) -> &Entry {
        self.slots[id].as_ref().expect("slot is live")
    }

    #[inline]
    fn node_mut(&mut self, id: usize) -> &mut Entry {
        self.slots[id].as_mut().expect("slot is live")
    }

    fn push_front(&mut self, id: usize) {
        let old_head = self.head;
        {
            let node = self.node_mut(id);
            node.prev = NIL;
            node.next = old_head;
        }
        if old_head != NIL {
            self.node_mut(old_head).prev = id;
        } else {
            self.tail = id;
        }
        self.head = id;
    }

    fn unlink(&mut self, id: usize) {
        let (prev, next) = {
            let node = self.node(id);
            (node.prev, node.next)
        };
        if prev != NIL {
            self.node_mut(prev).next = next;
        } else {
            self.head = next;
        }
        if next != NIL {
            self.node_mut(next).prev = prev;
        } else {
            self.tail = prev;
        }
    }

    /// Moves a live entry to the LRU front.
    fn touch(&mut self, id: usize) {
        if self.head == id {
            return;
        }
        self.unlink(id);
        self.push_front(id);
    }

    /// Inserts a fresh entry at the LRU front with no expiration.
    fn insert(&mut self, key: Bytes, value: Value) -> usize {
        let cost = key.len() + value.cost();
        let entry = Entry {
            key: key.clone(),
            value,
            expires_at: None,
            prev: NIL,
            next: NIL,
            pos: self.sample.len(),
        };
        let id = match self.free.pop() {
            Some(id) => {
                self.slots[id] = Some(entry);
                id
            }
            None => {
                self.slots.push(Some(entry));
                self.slots.len() - 1
            }
        };
        self.index.insert(key, id);
        self.sample.push(id);
        self.push_front(id);
        self.size += cost;
        id
    }

    /// Removes an entry: unlink, erase from the index, subtract its cost,
    /// compact the sampling array, recycle the slot.
    fn remove(&mut self, id: usize) {
        self.unlink(id);
        let entry = self.slots[id].take().expect("slot is live");
        self.index.remove(&entry.key);
        self.size -= entry.key.len() + entry.value.cost();

        // swap-with-last, then fix the moved entry's recorded position
        let pos = entry.pos;
        self.sample.swap_remove(pos);
        if pos < self.sample.len() {
            let moved = self.sample[pos];
            self.node_mut(moved).pos = pos;
        }

        self.free.push(id);
    }

    /// Removes `id` if it has expired. Returns whether it was removed.
    fn remove_if_expired(&mut self, id: usize, now: Instant) -> bool {
        if self.node(id).is_expired(now) {
            self.remove(id);
            true
        } else {
            false
        }
    }

    /// Evicts from the LRU back until the budget is respected or the
    /// keyspace is empty.
    fn evict(&mut self) {
        while self.size_limit > 0 && self.size > self.size_limit {
            let tail = self.tail;
            if tail == NIL {
                break;
            }
            self.remove(tail);
        }
    }
}

/// The shared in-memory keyspace.
///
/// All operations are atomic with respect to each other: a single mutex
/// guards the index, the LRU list, the sampling array and the size
/// counter. Designed to be wrapped in an `Arc` and shared across all
/// connection tasks plus the GC task.
///
/// # Example
///
/// ```
/// use cinderkv::storage::Cache;
/// use bytes::Bytes;
///
/// let cache = Cache::new(0); // unbounded
/// cache.set(Bytes::from("name"), Bytes::from("Ariz")).unwrap();
/// let value = cache.get(b"name").unwrap();
/// assert_eq!(value, Some(Bytes::from("Ariz")));
/// ```
#[derive(Debug)]
pub struct Cache {
    inner: Mutex<Inner>,
}

impl Cache {
    /// Creates a cache with the given byte budget; `0` means unbounded.
    pub fn new(size_limit: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::new(size_limit)),
        }
    }

    /// Stores a string value.
    ///
    /// Updating an existing string adjusts the size delta, clears any
    /// TTL, and refreshes recency. A new key is inserted at the LRU
    /// front with no TTL. Fails without mutating if the key holds a
    /// hash.
    pub fn set(&self, key: Bytes, value: Bytes) -> Result<(), WrongType> {
        let mut inner = self.inner.lock().unwrap();
        match inner.index.get(&key).copied() {
            Some(id) => {
                let old_len = match &inner.node(id).value {
                    Value::String(old) => old.len(),
                    Value::Hash(_) => return Err(WrongType),
                };
                inner.size = inner.size + value.len() - old_len;
                {
                    let node = inner.node_mut(id);
                    node.value = Value::String(value);
                    node.expires_at = None;
                }
                inner.touch(id);
            }
            None => {
                inner.insert(key, Value::String(value));
            }
        }
        inner.evict();
        Ok(())
    }

    /// Returns a string value, refreshing its recency.
    ///
    /// Missing and expired keys report `None`; expired entries are
    /// reclaimed on the way out.
    pub fn get(&self, key: &[u8]) -> Result<Option<Bytes>, WrongType> {
        let mut inner = self.inner.lock().unwrap();
        let id = match inner.index.get(key).copied() {
            Some(id) => id,
            None => return Ok(None),
        };
        if inner.remove_if_expired(id, Instant::now()) {
            return Ok(None);
        }
        let value = match &inner.node(id).value {
            Value::String(data) => data.clone(),
            Value::Hash(_) => return Err(WrongType),
        };
        inner.touch(id);
        Ok(Some(value))
    }

    /// Stores one hash field.
    ///
    /// Updating or extending an existing hash adjusts the size delta,
    /// clears any TTL, and refreshes recency. A new key becomes a
    /// single-field hash at the LRU front. Fails without mutating if the
    /// key holds a string.
    pub fn hset(&self, key: Bytes, field: Bytes, value: Bytes) -> Result<(), WrongType> {
        let mut inner = self.inner.lock().unwrap();
        match inner.index.get(&key).copied() {
            Some(id) => {
                let old_field_len = match &inner.node(id).value {
                    Value::String(_) => return Err(WrongType),
                    Value::Hash(map) => map.get(&field).map(|v| v.len()),
                };
                let field_len = field.len();
                let value_len = value.len();
                {
                    let node = inner.node_mut(id);
                    if let Value::Hash(map) = &mut node.value {
                        map.insert(field, value);
                    }
                    node.expires_at = None;
                }
                match old_field_len {
                    Some(old_len) => inner.size = inner.size + value_len - old_len,
                    None => inner.size += field_len + value_len,
                }
                inner.touch(id);
            }
            None => {
                let mut map = HashMap::new();
                map.insert(field, value);
                inner.insert(key, Value::Hash(map));
            }
        }
        inner.evict();
        Ok(())
    }

    /// Returns one hash field, refreshing the hash's recency.
    ///
    /// A present hash with an absent field reports `None`, as does a
    /// missing or expired key.
    pub fn hget(&self, key: &[u8], field: &[u8]) -> Result<Option<Bytes>, WrongType> {
        let mut inner = self.inner.lock().unwrap();
        let id = match inner.index.get(key).copied() {
            Some(id) => id,
            None => return Ok(None),
        };
        if inner.remove_if_expired(id, Instant::now()) {
            return Ok(None);
        }
        let value = match &inner.node(id).value {
            Value::String(_) => return Err(WrongType),
            Value::Hash(map) => map.get(field).cloned(),
        };
        inner.touch(id);
        Ok(value)
    }

    /// Returns all field/value pairs of a hash, refreshing its recency.
    /// Pair order is unspecified. Missing keys report `None`.
    pub fn hgetall(&self, key: &[u8]) -> Result<Option<Vec<(Bytes, Bytes)>>, WrongType> {
        let mut inner = self.inner.lock().unwrap();
        let id = match inner.index.get(key).copied() {
            Some(id) => id,
            None => return Ok(None),
        };
        if inner.remove_if_expired(id, Instant::now()) {
            return Ok(None);
        }
        let pairs = match &inner.node(id).value {
            Value::String(_) => return Err(WrongType),
            Value::Hash(map) => map.iter().map(|(f, v)| (f.clone(), v.clone())).collect(),
        };
        inner.touch(id);
        Ok(Some(pairs))
    }

    /// Deletes the given fields from a hash and returns how many were
    /// present. A hash emptied by this call stays in the keyspace.
    pub fn hdel(&self, key: &[u8], fields: &[Bytes]) -> Result<usize, WrongType> {
        let mut inner = self.inner.lock().unwrap();
        let id = match inner.index.get(key).copied() {
            Some(id) => id,
            None => return Ok(0),
        };
        if inner.remove_if_expired(id, Instant::now()) {
            return Ok(0);
        }
        let mut removed = 0;
        let mut freed = 0;
        {
            let node = inner.node_mut(id);
            let map = match &mut node.value {
                Value::String(_) => return Err(WrongType),
                Value::Hash(map) => map,
            };
            for field in fields {
                if let Some(value) = map.remove(field.as_ref()) {
                    removed += 1;
                    freed += field.len() + value.len();
                }
            }
        }
        inner.size -= freed;
        if removed > 0 {
            inner.touch(id);
        }
        Ok(removed)
    }

    /// Reports whether a hash contains the given field. Does not affect
    /// LRU order.
    pub fn hexists(&self, key: &[u8], field: &[u8]) -> Result<bool, WrongType> {
        let mut inner = self.inner.lock().unwrap();
        let id = match inner.index.get(key).copied() {
            Some(id) => id,
            None => return Ok(false),
        };
        if inner.remove_if_expired(id, Instant::now()) {
            return Ok(false);
        }
        match &inner.node(id).value {
            Value::String(_) => Err(WrongType),
            Value::Hash(map) => Ok(map.contains_key(field)),
        }
    }

    /// Reports whether a key is present (and not expired). Does not
    /// affect LRU order.
    pub fn exists(&self, key: &[u8]) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let id = match inner.index.get(key).copied() {
            Some(id) => id,
            None => return false,
        };
        !inner.remove_if_expired(id, Instant::now())
    }

    /// Sets or clears a key's expiration.
    ///
    /// A positive `ttl_ms` schedules expiry `ttl_ms` milliseconds from
    /// now; zero or negative clears any expiration. Returns whether the
    /// key was present. LRU order is unchanged.
    pub fn expire(&self, key: &[u8], ttl_ms: i64) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let id = match inner.index.get(key).copied() {
            Some(id) => id,
            None => return false,
        };
        inner.node_mut(id).expires_at = if ttl_ms > 0 {
            // an instant past the representable range never expires
            Instant::now().checked_add(Duration::from_millis(ttl_ms as u64))
        } else {
            None
        };
        true
    }

    /// Deletes each present key and returns the count removed.
    pub fn remove(&self, keys: &[Bytes]) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let mut removed = 0;
        for key in keys {
            if let Some(id) = inner.index.get(key).copied() {
                inner.remove(id);
                removed += 1;
            }
        }
        removed
    }

    /// Drops the entire keyspace and resets the size counter.
    pub fn flush(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.slots.clear();
        inner.free.clear();
        inner.index.clear();
        inner.sample.clear();
        inner.head = NIL;
        inner.tail = NIL;
        inner.size = 0;
    }

    /// Current tracked size in bytes.
    pub fn size(&self) -> usize {
        self.inner.lock().unwrap().size
    }

    /// The byte budget; `0` means unbounded.
    pub fn size_limit(&self) -> usize {
        self.inner.lock().unwrap().size_limit
    }

    /// Replaces the byte budget. Shrinking does not evict immediately;
    /// eviction happens on the next mutation.
    pub fn set_size_limit(&self, size_limit: usize) {
        self.inner.lock().unwrap().size_limit = size_limit;
    }

    /// Number of live keys (expired-but-unreclaimed entries included).
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().index.len()
    }

    /// Returns true when the keyspace holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Samples up to `max` distinct entries uniformly at random and
    /// removes the expired ones. Called by the background GC; the repeat
    /// policy lives there.
    pub fn sweep_expired_sample(&self, max: usize) -> SweepStats {
        let mut inner = self.inner.lock().unwrap();
        let live = inner.sample.len();
        if live == 0 || max == 0 {
            return SweepStats::default();
        }

        let now = Instant::now();
        let mut rng = rand::rng();
        let picked = rand::seq::index::sample(&mut rng, live, max.min(live));
        let sampled = picked.len();

        // collect slot ids first: removals reshuffle the sampling array,
        // but slot ids stay stable until the entry itself is removed
        let expired: Vec<usize> = picked
            .iter()
            .map(|i| inner.sample[i])
            .filter(|&id| inner.node(id).is_expired(now))
            .collect();
        let removed = expired.len();
        for id in expired {
            inner.remove(id);
        }

        SweepStats { sampled, removed }
    }

    /// Reports raw index residency, expired entries included. Lets tests
    /// observe what the sweeper reclaimed without triggering lazy expiry.
    #[cfg(test)]
    pub(crate) fn resident(&self, key: &[u8]) -> bool {
        self.inner.lock().unwrap().index.contains_key(key)
    }
}
