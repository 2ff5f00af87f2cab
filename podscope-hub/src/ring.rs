//! Bounded, id-indexed flow history.
//!
//! Insertion order is the public ordering; flow timestamps are
//! informational. A re-added id overwrites its slot in place without moving
//! it, and eviction always takes the entry at `head`, oldest first.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use podscope_common::flow::Flow;

pub struct FlowRing {
    inner: RwLock<RingInner>,
}

struct RingInner {
    buf: Vec<Option<Flow>>,
    index: HashMap<String, usize>,
    head: usize,
    size: usize,
    capacity: usize,
}

impl FlowRing {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: RwLock::new(RingInner {
                buf: vec![None; capacity],
                index: HashMap::new(),
                head: 0,
                size: 0,
                capacity,
            }),
        }
    }

    /// Inserts a flow, or updates it in place when the id is already known.
    /// Returns `true` on insertion, `false` on update. A full ring evicts
    /// exactly one entry, the one at `head`.
    pub fn add(&self, flow: Flow) -> bool {
        let mut r = self.write();
        if let Some(&slot) = r.index.get(&flow.id) {
            r.buf[slot] = Some(flow);
            return false;
        }
        if r.size == r.capacity {
            let head = r.head;
            if let Some(evicted) = r.buf[head].take() {
                r.index.remove(&evicted.id);
            }
            r.size -= 1;
        }
        let head = r.head;
        r.index.insert(flow.id.clone(), head);
        r.buf[head] = Some(flow);
        r.head = (head + 1) % r.capacity;
        r.size += 1;
        true
    }

    pub fn get(&self, id: &str) -> Option<Flow> {
        let r = self.read();
        r.index.get(id).and_then(|&slot| r.buf[slot].clone())
    }

    /// All retained flows, oldest first by insertion order.
    pub fn get_all(&self) -> Vec<Flow> {
        let r = self.read();
        let start = (r.head + r.capacity - r.size) % r.capacity;
        (0..r.size)
            .filter_map(|i| r.buf[(start + i) % r.capacity].clone())
            .collect()
    }

    /// Up to `n` flows, newest first.
    pub fn get_recent(&self, n: usize) -> Vec<Flow> {
        let r = self.read();
        let take = n.min(r.size);
        (1..=take)
            .filter_map(|i| r.buf[(r.head + r.capacity - i) % r.capacity].clone())
            .collect()
    }

    pub fn size(&self) -> usize {
        self.read().size
    }

    pub fn capacity(&self) -> usize {
        self.read().capacity
    }

    pub fn clear(&self) {
        let mut r = self.write();
        let capacity = r.capacity;
        r.buf = vec![None; capacity];
        r.index.clear();
        r.head = 0;
        r.size = 0;
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, RingInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, RingInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}
