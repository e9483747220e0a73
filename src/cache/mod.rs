//! Sharded LRU block cache.
//!
//! Hot data blocks are cached under `(file_number, block_offset)` keys.
//! The cache is split into a power-of-two number of shards selected by
//! the upper bits of the key hash; each shard runs strict LRU over byte
//! charges under its own mutex. There is no cross-shard rebalance.
//!
//! Values are handed out as clones (the block cache stores `Arc<Block>`),
//! so eviction never invalidates a reader that is still pinning a block —
//! the pin is the clone itself, held across a single block read.

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::sync::Mutex;

use crate::sstable::block::Block;

/// Cache key: `(file_number, block_offset)`.
pub type CacheKey = (u64, u64);

/// The engine's block cache instantiation.
pub type BlockCache = ShardedLruCache<std::sync::Arc<Block>>;

const NIL: usize = usize::MAX;

struct Node<V> {
    key: CacheKey,
    value: Option<V>,
    charge: usize,
    prev: usize,
    next: usize,
}

/// One shard: a hash table plus an intrusive LRU list over a slab.
struct LruShard<V> {
    map: HashMap<CacheKey, usize>,
    slab: Vec<Node<V>>,
    free: Vec<usize>,
    /// Most-recently-used end.
    head: usize,
    /// Least-recently-used end.
    tail: usize,
    usage: usize,
    capacity: usize,
}

impl<V: Clone> LruShard<V> {
    fn new(capacity: usize) -> Self {
        Self {
            map: HashMap::new(),
            slab: Vec::new(),
            free: Vec::new(),
            head: NIL,
            tail: NIL,
            usage: 0,
            capacity,
        }
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = (self.slab[idx].prev, self.slab[idx].next);
        if prev != NIL {
            self.slab[prev].next = next;
        } else {
            self.head = next;
        }
        if next != NIL {
            self.slab[next].prev = prev;
        } else {
            self.tail = prev;
        }
        self.slab[idx].prev = NIL;
        self.slab[idx].next = NIL;
    }

    fn push_front(&mut self, idx: usize) {
        self.slab[idx].prev = NIL;
        self.slab[idx].next = self.head;
        if self.head != NIL {
            self.slab[self.head].prev = idx;
        }
        self.head = idx;
        if self.tail == NIL {
            self.tail = idx;
        }
    }

    fn alloc(&mut self, key: CacheKey, value: V, charge: usize) -> usize {
        if let Some(idx) = self.free.pop() {
            self.slab[idx] = Node {
                key,
                value: Some(value),
                charge,
                prev: NIL,
                next: NIL,
            };
            idx
        } else {
            self.slab.push(Node {
                key,
                value: Some(value),
                charge,
                prev: NIL,
                next: NIL,
            });
            self.slab.len() - 1
        }
    }

    fn remove(&mut self, idx: usize) {
        self.unlink(idx);
        self.usage -= self.slab[idx].charge;
        let key = self.slab[idx].key;
        self.map.remove(&key);
        self.slab[idx].value = None;
        self.free.push(idx);
    }

    fn evict_to_fit(&mut self) {
        while self.usage > self.capacity && self.tail != NIL {
            let victim = self.tail;
            self.remove(victim);
        }
    }

    fn insert(&mut self, key: CacheKey, value: V, charge: usize) {
        if let Some(&idx) = self.map.get(&key) {
            self.usage -= self.slab[idx].charge;
            self.slab[idx].value = Some(value);
            self.slab[idx].charge = charge;
            self.usage += charge;
            self.unlink(idx);
            self.push_front(idx);
        } else {
            let idx = self.alloc(key, value, charge);
            self.map.insert(key, idx);
            self.usage += charge;
            self.push_front(idx);
        }
        self.evict_to_fit();
    }

    fn lookup(&mut self, key: &CacheKey) -> Option<V> {
        let idx = *self.map.get(key)?;
        self.unlink(idx);
        self.push_front(idx);
        self.slab[idx].value.clone()
    }

    fn erase(&mut self, key: &CacheKey) {
        if let Some(&idx) = self.map.get(key) {
            self.remove(idx);
        }
    }
}

/// LRU cache split into `1 << shard_bits` independent shards.
pub struct ShardedLruCache<V> {
    shards: Vec<Mutex<LruShard<V>>>,
    shard_mask: u64,
}

impl<V: Clone> ShardedLruCache<V> {
    /// Cache holding `capacity` bytes split over `1 << shard_bits`
    /// shards.
    pub fn new(capacity: usize, shard_bits: u32) -> Self {
        let num_shards = 1usize << shard_bits;
        let per_shard = capacity.div_ceil(num_shards);
        Self {
            shards: (0..num_shards)
                .map(|_| Mutex::new(LruShard::new(per_shard)))
                .collect(),
            shard_mask: (num_shards - 1) as u64,
        }
    }

    fn shard(&self, key: &CacheKey) -> &Mutex<LruShard<V>> {
        // Spread file number and offset; upper bits pick the shard.
        let h = key
            .0
            .wrapping_mul(0x9e37_79b9_7f4a_7c15)
            .rotate_left(17)
            .wrapping_add(key.1.wrapping_mul(0xc2b2_ae3d_27d4_eb4f));
        &self.shards[((h >> 32) & self.shard_mask) as usize]
    }

    /// Insert (or replace) an entry, charging `charge` bytes.
    pub fn insert(&self, key: CacheKey, value: V, charge: usize) {
        if let Ok(mut shard) = self.shard(&key).lock() {
            shard.insert(key, value, charge);
        }
    }

    /// Fetch an entry and mark it most-recently-used.
    pub fn lookup(&self, key: &CacheKey) -> Option<V> {
        self.shard(key).lock().ok()?.lookup(key)
    }

    /// Drop an entry if present.
    pub fn erase(&self, key: &CacheKey) {
        if let Ok(mut shard) = self.shard(key).lock() {
            shard.erase(key);
        }
    }

    /// Total bytes currently charged across all shards.
    pub fn total_charge(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.lock().map(|g| g.usage).unwrap_or(0))
            .sum()
    }
}
