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

use peerlake_common::state::{RouteAdvert, RoutingEntry};
use std::collections::HashMap;

/// Remote node -> next hop. Direct peers are stored with themselves as next hop.
#[derive(Default)]
pub struct RoutingTable {
    entries: HashMap<String, RoutingEntry>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_direct(&mut self, peer: &str, now: u64) {
        self.entries.insert(
            peer.to_string(),
            RoutingEntry {
                destination: peer.to_string(),
                next_hop: peer.to_string(),
                hop_count: 1,
                last_updated_at: now,
            },
        );
    }

    /// Stores a learned route. An older entry never overwrites a newer one and a live
    /// direct entry is never replaced by an indirect one.
    pub fn upsert(&mut self, entry: RoutingEntry) -> bool {
        if let Some(existing) = self.entries.get(&entry.destination) {
            if existing.is_direct() && !entry.is_direct() {
                return false;
            }
            if existing.last_updated_at > entry.last_updated_at {
                return false;
            }
        }
        self.entries.insert(entry.destination.clone(), entry);
        true
    }

    pub fn get(&self, destination: &str) -> Option<&RoutingEntry> {
        self.entries.get(destination)
    }

    pub fn next_hop(&self, destination: &str) -> Option<&str> {
        self.entries.get(destination).map(|v| v.next_hop.as_str())
    }

    /// Drops the entry for `peer` and every entry reached through it.
    pub fn remove_via(&mut self, peer: &str) -> Vec<String> {
        let removed: Vec<String> = self
            .entries
            .values()
            .filter(|v| v.destination == peer || v.next_hop == peer)
            .map(|v| v.destination.clone())
            .collect();
        for destination in &removed {
            self.entries.remove(destination);
        }
        removed
    }

    /// Routes advertised to `peer`, hop counts as seen from `peer`. Routes that go through
    /// `peer` are left out.
    pub fn adverts_for(&self, peer: &str) -> Vec<RouteAdvert> {
        let mut adverts: Vec<RouteAdvert> = self
            .entries
            .values()
            .filter(|v| v.destination != peer && v.next_hop != peer)
            .map(|v| RouteAdvert {
                node_id: v.destination.clone(),
                hop_count: v.hop_count + 1,
            })
            .collect();
        adverts.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        adverts
    }

    pub fn entries(&self) -> Vec<RoutingEntry> {
        let mut entries: Vec<RoutingEntry> = self.entries.values().cloned().collect();
        entries.sort_by(|a, b| a.destination.cmp(&b.destination));
        entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(dest: &str, hop: &str, count: u32, at: u64) -> RoutingEntry {
        RoutingEntry {
            destination: dest.to_string(),
            next_hop: hop.to_string(),
            hop_count: count,
            last_updated_at: at,
        }
    }

    #[test]
    fn newer_entry_wins() {
        let mut table = RoutingTable::new();
        assert!(table.upsert(route("d", "b", 3, 10)));
        assert!(!table.upsert(route("d", "c", 2, 5)));
        assert_eq!(table.next_hop("d"), Some("b"));
        assert!(table.upsert(route("d", "c", 2, 11)));
        assert_eq!(table.next_hop("d"), Some("c"));
    }

    #[test]
    fn direct_entry_is_kept() {
        let mut table = RoutingTable::new();
        table.set_direct("b", 1);
        assert!(!table.upsert(route("b", "c", 2, 100)));
        assert!(table.get("b").unwrap().is_direct());
    }

    #[test]
    fn remove_via_drops_dependent_routes() {
        let mut table = RoutingTable::new();
        table.set_direct("b", 1);
        table.set_direct("c", 1);
        table.upsert(route("d", "b", 2, 1));
        table.upsert(route("e", "c", 2, 1));

        let mut removed = table.remove_via("b");
        removed.sort();
        assert_eq!(removed, vec!["b".to_string(), "d".to_string()]);
        assert_eq!(table.len(), 2);
        assert!(table.entries().iter().all(|v| v.next_hop != "b"));
    }

    #[test]
    fn adverts_increment_hops_and_skip_peer() {
        let mut table = RoutingTable::new();
        table.set_direct("b", 1);
        table.set_direct("c", 1);
        table.upsert(route("d", "c", 2, 1));
        table.upsert(route("e", "b", 2, 1));

        let adverts = table.adverts_for("b");
        assert_eq!(
            adverts,
            vec![
                RouteAdvert {
                    node_id: "c".to_string(),
                    hop_count: 2
                },
                RouteAdvert {
                    node_id: "d".to_string(),
                    hop_count: 3
                },
            ]
        );
    }
}
