use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::Arc;

/// Bounded least-recently-used map from reference date to loaded data.
pub struct ReportCache<K, V> {
    capacity: usize,
    entries: HashMap<K, Arc<V>>,
    order: VecDeque<K>,
}

impl<K: Eq + Hash + Clone, V> ReportCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn get(&mut self, key: &K) -> Option<Arc<V>> {
        let value = self.entries.get(key).cloned()?;
        self.touch(key);
        Some(value)
    }

    pub fn insert(&mut self, key: K, value: V) -> Arc<V> {
        let value = Arc::new(value);
        if self.entries.insert(key.clone(), value.clone()).is_some() {
            self.touch(&key);
        } else {
            self.order.push_back(key);
        }
        while self.entries.len() > self.capacity {
            let Some(oldest) = self.order.pop_front() else { break };
            self.entries.remove(&oldest);
        }
        value
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    fn touch(&mut self, key: &K) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            if let Some(k) = self.order.remove(pos) {
                self.order.push_back(k);
            }
        }
    }
}
