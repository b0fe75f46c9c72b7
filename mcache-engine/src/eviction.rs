//! # Eviction Policies
//!
//! Select a victim key when the engine is full. All policies share one
//! contract: `on_access`, `on_insert`, `on_remove`, `select_victim`, and the
//! policy's tracked key set must equal the engine's key set at all times.
//!
//! ## Structure Overview
//!
//! LRU keeps an index-linked recency list so moves are O(1) without heap
//! pointers:
//!
//! ```text
//! LruState
//!   ├── index: HashMap<key, usize>
//!   ├── nodes: Vec<Option<LruNode { key, prev, next }>>
//!   ├── free:  Vec<usize>
//!   └── head (oldest) / tail (most recent)
//! ```

use hashbrown::HashMap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Policy selector used by engine configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionKind {
    Lru,
    Lfu,
    Random,
}

impl Default for EvictionKind {
    fn default() -> Self {
        EvictionKind::Lru
    }
}

/// A victim-selection policy over the engine's key set.
///
/// A closed sum rather than a trait object: the policy set is fixed and the
/// engine mutates it under its own write section, so no synchronization
/// lives here.
#[derive(Debug)]
pub enum EvictionPolicy {
    Lru(LruState),
    Lfu(LfuState),
    Random(RandomState),
}

impl EvictionPolicy {
    pub fn new(kind: EvictionKind) -> Self {
        match kind {
            EvictionKind::Lru => EvictionPolicy::Lru(LruState::new()),
            EvictionKind::Lfu => EvictionPolicy::Lfu(LfuState::new()),
            EvictionKind::Random => EvictionPolicy::Random(RandomState::from_entropy()),
        }
    }

    /// Random policy with a fixed seed, for deterministic tests.
    pub fn random_seeded(seed: u64) -> Self {
        EvictionPolicy::Random(RandomState::with_seed(seed))
    }

    /// Records a read or update of an existing key.
    pub fn on_access(&mut self, key: &str) {
        match self {
            EvictionPolicy::Lru(state) => state.touch(key),
            EvictionPolicy::Lfu(state) => state.bump(key),
            EvictionPolicy::Random(_) => {}
        }
    }

    /// Records insertion of a new key.
    pub fn on_insert(&mut self, key: &str) {
        match self {
            EvictionPolicy::Lru(state) => state.insert(key),
            EvictionPolicy::Lfu(state) => state.insert(key),
            EvictionPolicy::Random(state) => state.insert(key),
        }
    }

    /// Records removal of a key (delete, expiry, or eviction).
    pub fn on_remove(&mut self, key: &str) {
        match self {
            EvictionPolicy::Lru(state) => state.remove(key),
            EvictionPolicy::Lfu(state) => state.remove(key),
            EvictionPolicy::Random(state) => state.remove(key),
        }
    }

    /// Picks the key to evict. Does not remove it; the engine deletes the
    /// entry, which reaches `on_remove`.
    pub fn select_victim(&mut self) -> Option<String> {
        match self {
            EvictionPolicy::Lru(state) => state.oldest(),
            EvictionPolicy::Lfu(state) => state.least_frequent(),
            EvictionPolicy::Random(state) => state.pick(),
        }
    }

    /// Number of tracked keys; equals the engine's size by invariant.
    pub fn len(&self) -> usize {
        match self {
            EvictionPolicy::Lru(state) => state.index.len(),
            EvictionPolicy::Lfu(state) => state.counts.len(),
            EvictionPolicy::Random(state) => state.keys.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        match self {
            EvictionPolicy::Lru(state) => *state = LruState::new(),
            EvictionPolicy::Lfu(state) => state.clear(),
            EvictionPolicy::Random(state) => state.clear(),
        }
    }
}

/// Recency list node. Links are slot indices to keep the arena packed.
#[derive(Debug)]
struct LruNode {
    key: String,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Doubly linked recency list over a slot arena.
#[derive(Debug)]
pub struct LruState {
    index: HashMap<String, usize>,
    nodes: Vec<Option<LruNode>>,
    free: Vec<usize>,
    /// Oldest access.
    head: Option<usize>,
    /// Most recent access.
    tail: Option<usize>,
}

impl LruState {
    fn new() -> Self {
        LruState {
            index: HashMap::new(),
            nodes: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
        }
    }

    fn insert(&mut self, key: &str) {
        if self.index.contains_key(key) {
            self.touch(key);
            return;
        }
        let idx = self.free.pop().unwrap_or_else(|| {
            self.nodes.push(None);
            self.nodes.len() - 1
        });
        self.nodes[idx] = Some(LruNode {
            key: key.to_string(),
            prev: None,
            next: None,
        });
        self.push_back(idx);
        self.index.insert(key.to_string(), idx);
    }

    fn touch(&mut self, key: &str) {
        let idx = match self.index.get(key) {
            Some(&idx) => idx,
            None => return,
        };
        if self.tail == Some(idx) {
            return;
        }
        self.unlink(idx);
        self.push_back(idx);
    }

    fn remove(&mut self, key: &str) {
        let idx = match self.index.remove(key) {
            Some(idx) => idx,
            None => return,
        };
        self.unlink(idx);
        self.nodes[idx] = None;
        self.free.push(idx);
    }

    fn oldest(&self) -> Option<String> {
        let idx = self.head?;
        self.nodes[idx].as_ref().map(|node| node.key.clone())
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = {
            let node = self.nodes[idx].as_ref().expect("node exists");
            (node.prev, node.next)
        };

        if let Some(prev_idx) = prev {
            if let Some(prev_node) = self.nodes[prev_idx].as_mut() {
                prev_node.next = next;
            }
        } else {
            self.head = next;
        }

        if let Some(next_idx) = next {
            if let Some(next_node) = self.nodes[next_idx].as_mut() {
                next_node.prev = prev;
            }
        } else {
            self.tail = prev;
        }

        if let Some(node) = self.nodes[idx].as_mut() {
            node.prev = None;
            node.next = None;
        }
    }

    fn push_back(&mut self, idx: usize) {
        let tail = self.tail;
        if let Some(node) = self.nodes[idx].as_mut() {
            node.prev = tail;
            node.next = None;
        }
        if let Some(tail_idx) = tail {
            if let Some(tail_node) = self.nodes[tail_idx].as_mut() {
                tail_node.next = Some(idx);
            }
        } else {
            self.head = Some(idx);
        }
        self.tail = Some(idx);
    }
}

/// Frequency counters with insertion-order tie breaking.
#[derive(Debug)]
pub struct LfuState {
    /// key -> (access frequency, insertion sequence)
    counts: HashMap<String, (u64, u64)>,
    next_seq: u64,
}

impl LfuState {
    fn new() -> Self {
        LfuState {
            counts: HashMap::new(),
            next_seq: 0,
        }
    }

    fn insert(&mut self, key: &str) {
        if self.counts.contains_key(key) {
            self.bump(key);
            return;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.counts.insert(key.to_string(), (0, seq));
    }

    fn bump(&mut self, key: &str) {
        if let Some((freq, _)) = self.counts.get_mut(key) {
            *freq += 1;
        }
    }

    fn remove(&mut self, key: &str) {
        self.counts.remove(key);
    }

    /// Lowest frequency wins; ties go to the earliest insertion.
    fn least_frequent(&self) -> Option<String> {
        self.counts
            .iter()
            .min_by_key(|(_, &(freq, seq))| (freq, seq))
            .map(|(key, _)| key.clone())
    }

    fn clear(&mut self) {
        self.counts.clear();
        self.next_seq = 0;
    }
}

/// Uniform random choice over the tracked keys.
///
/// Keys live in a dense vector with a position index so removal is O(1) via
/// swap-remove.
#[derive(Debug)]
pub struct RandomState {
    keys: Vec<String>,
    positions: HashMap<String, usize>,
    rng: StdRng,
}

impl RandomState {
    fn from_entropy() -> Self {
        RandomState {
            keys: Vec::new(),
            positions: HashMap::new(),
            rng: StdRng::from_entropy(),
        }
    }

    fn with_seed(seed: u64) -> Self {
        RandomState {
            keys: Vec::new(),
            positions: HashMap::new(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn insert(&mut self, key: &str) {
        if self.positions.contains_key(key) {
            return;
        }
        self.positions.insert(key.to_string(), self.keys.len());
        self.keys.push(key.to_string());
    }

    fn remove(&mut self, key: &str) {
        let pos = match self.positions.remove(key) {
            Some(pos) => pos,
            None => return,
        };
        self.keys.swap_remove(pos);
        if pos < self.keys.len() {
            let moved = self.keys[pos].clone();
            self.positions.insert(moved, pos);
        }
    }

    fn pick(&mut self) -> Option<String> {
        if self.keys.is_empty() {
            return None;
        }
        let idx = self.rng.gen_range(0..self.keys.len());
        Some(self.keys[idx].clone())
    }

    fn clear(&mut self) {
        self.keys.clear();
        self.positions.clear();
    }
}
