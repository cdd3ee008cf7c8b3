// Copyright 2025 OPPO.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use linked_hash_map::LinkedHashMap;

/// Bounded set of processed message ids. When full, the oldest inserted id is evicted.
pub struct SeenCache {
    capacity: usize,
    ids: LinkedHashMap<String, u64>,
}

impl SeenCache {
    pub const DEFAULT_CAPACITY: usize = 1000;

    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            ids: LinkedHashMap::new(),
        }
    }

    /// Records `id`, returns false when it was already present.
    /// A hit does not refresh the position of the id.
    pub fn insert(&mut self, id: &str, now: u64) -> bool {
        if self.ids.contains_key(id) {
            return false;
        }

        self.ids.insert(id.to_string(), now);
        while self.ids.len() > self.capacity {
            self.ids.pop_front();
        }
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains_key(id)
    }

    /// Time the id was first recorded.
    pub fn seen_at(&self, id: &str) -> Option<u64> {
        self.ids.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for SeenCache {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut cache = SeenCache::default();
        assert!(cache.insert("m1", 1));
        assert!(!cache.insert("m1", 2));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.seen_at("m1"), Some(1));
    }

    #[test]
    fn oldest_inserted_id_is_evicted() {
        let mut cache = SeenCache::new(3);
        for id in ["a", "b", "c"] {
            assert!(cache.insert(id, 0));
        }
        // A hit on "a" must not protect it from eviction.
        assert!(!cache.insert("a", 0));
        assert!(cache.insert("d", 0));

        assert!(!cache.contains("a"));
        assert!(cache.contains("b"));
        assert!(cache.contains("d"));
        assert_eq!(cache.len(), 3);
    }
}
