//! Bounded least-recently-used map over a slab of doubly linked entries.

use std::hash::Hash;

use rustc_hash::FxHashMap;

struct Entry<K, V> {
    key: K,
    value: V,
    prev: Option<usize>,
    next: Option<usize>,
}

pub struct RangeLru<K, V> {
    index: FxHashMap<K, usize>,
    slots: Vec<Option<Entry<K, V>>>,
    free: Vec<usize>,
    /// Most recently used.
    head: Option<usize>,
    /// Least recently used; evicted first.
    tail: Option<usize>,
    capacity: usize,
}

impl<K: Hash + Eq + Clone, V> RangeLru<K, V> {
    /// A capacity of zero stores nothing.
    pub fn new(capacity: usize) -> Self {
        Self {
            index: FxHashMap::default(),
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Membership test that does not refresh recency.
    pub fn contains(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    /// Look up `key` and mark it most recently used.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let slot = *self.index.get(key)?;
        self.touch(slot);
        self.slots[slot].as_ref().map(|e| &e.value)
    }

    /// Insert or replace `key`, returning the entry evicted to make room.
    pub fn insert(&mut self, key: K, value: V) -> Option<(K, V)> {
        if self.capacity == 0 {
            return None;
        }
        if let Some(&slot) = self.index.get(&key) {
            if let Some(entry) = self.slots[slot].as_mut() {
                entry.value = value;
            }
            self.touch(slot);
            return None;
        }

        let evicted = if self.index.len() >= self.capacity {
            self.pop_lru()
        } else {
            None
        };

        let entry = Entry {
            key: key.clone(),
            value,
            prev: None,
            next: None,
        };
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(entry);
                slot
            }
            None => {
                self.slots.push(Some(entry));
                self.slots.len() - 1
            }
        };
        self.index.insert(key, slot);
        self.push_front(slot);
        evicted
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let slot = self.index.remove(key)?;
        self.unlink(slot);
        self.free.push(slot);
        self.slots[slot].take().map(|e| e.value)
    }

    /// Drop every entry for which `keep` returns false. Returns the number
    /// of entries removed.
    pub fn retain(&mut self, mut keep: impl FnMut(&K) -> bool) -> usize {
        let doomed: Vec<K> = self
            .index
            .keys()
            .filter(|k| !keep(k))
            .cloned()
            .collect();
        for key in &doomed {
            self.remove(key);
        }
        doomed.len()
    }

    pub fn clear(&mut self) {
        self.index.clear();
        self.slots.clear();
        self.free.clear();
        self.head = None;
        self.tail = None;
    }

    /// Keys from least to most recently used.
    pub fn keys_by_recency(&self) -> Vec<K> {
        let mut out = Vec::with_capacity(self.len());
        let mut cur = self.tail;
        while let Some(slot) = cur {
            let Some(entry) = self.slots[slot].as_ref() else {
                break;
            };
            out.push(entry.key.clone());
            cur = entry.prev;
        }
        out
    }

    fn pop_lru(&mut self) -> Option<(K, V)> {
        let slot = self.tail?;
        self.unlink(slot);
        self.free.push(slot);
        let entry = self.slots[slot].take()?;
        self.index.remove(&entry.key);
        Some((entry.key, entry.value))
    }

    fn touch(&mut self, slot: usize) {
        if self.head == Some(slot) {
            return;
        }
        self.unlink(slot);
        self.push_front(slot);
    }

    fn push_front(&mut self, slot: usize) {
        let old_head = self.head;
        if let Some(entry) = self.slots[slot].as_mut() {
            entry.prev = None;
            entry.next = old_head;
        }
        if let Some(h) = old_head
            && let Some(e) = self.slots[h].as_mut()
        {
            e.prev = Some(slot);
        }
        self.head = Some(slot);
        if self.tail.is_none() {
            self.tail = Some(slot);
        }
    }

    fn unlink(&mut self, slot: usize) {
        let (prev, next) = match self.slots[slot].as_mut() {
            Some(e) => (e.prev.take(), e.next.take()),
            None => return,
        };
        match prev {
            Some(p) => {
                if let Some(e) = self.slots[p].as_mut() {
                    e.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(n) => {
                if let Some(e) = self.slots[n].as_mut() {
                    e.prev = prev;
                }
            }
            None => self.tail = prev,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_least_recently_inserted() {
        let mut lru = RangeLru::new(3);
        assert!(lru.insert("a", 1).is_none());
        assert!(lru.insert("b", 2).is_none());
        assert!(lru.insert("c", 3).is_none());
        assert_eq!(lru.insert("d", 4), Some(("a", 1)));
        assert_eq!(lru.len(), 3);
        assert!(!lru.contains(&"a"));
    }

    #[test]
    fn access_protects_from_eviction() {
        let mut lru = RangeLru::new(3);
        lru.insert("a", 1);
        lru.insert("b", 2);
        lru.insert("c", 3);
        assert_eq!(lru.get(&"a"), Some(&1));
        assert_eq!(lru.insert("d", 4), Some(("b", 2)));
        assert_eq!(lru.keys_by_recency(), vec!["c", "a", "d"]);
    }

    #[test]
    fn replace_refreshes_without_growing() {
        let mut lru = RangeLru::new(2);
        lru.insert("a", 1);
        lru.insert("b", 2);
        assert!(lru.insert("a", 10).is_none());
        assert_eq!(lru.insert("c", 3), Some(("b", 2)));
        assert_eq!(lru.get(&"a"), Some(&10));
    }

    #[test]
    fn remove_and_retain_reuse_slots() {
        let mut lru = RangeLru::new(4);
        for (i, k) in ["a", "b", "c", "d"].into_iter().enumerate() {
            lru.insert(k, i);
        }
        assert_eq!(lru.remove(&"b"), Some(1));
        assert_eq!(lru.retain(|k| *k != "c"), 1);
        assert_eq!(lru.keys_by_recency(), vec!["a", "d"]);
        lru.insert("e", 9);
        lru.insert("f", 9);
        assert_eq!(lru.len(), 4);
        assert_eq!(lru.insert("g", 9), Some(("a", 0)));
    }

    #[test]
    fn zero_capacity_stores_nothing() {
        let mut lru: RangeLru<&str, i32> = RangeLru::new(0);
        assert!(lru.insert("a", 1).is_none());
        assert!(lru.is_empty());
    }
}
