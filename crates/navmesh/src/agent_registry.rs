//! Crowd registry of a navigation mesh and the links agents hold back into it
//!
//! A registered agent does not own a reference to its navigation mesh's crowd slot.
//! It holds an [`AgentLink`] the registry writes on insertion and clears on removal.
//! Either side can observe staleness without taking the other's lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::crowd_agent::CrowdAgent;

/// Where a registered agent lives: navigation mesh id and crowd slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AgentIndex {
    pub nav_mesh: u32,
    pub slot: usize,
}

impl AgentIndex {
    fn pack(self) -> u64 {
        ((self.nav_mesh as u64) << 32) | (self.slot as u64 + 1)
    }

    fn unpack(packed: u64) -> Option<Self> {
        if packed == 0 {
            return None;
        }
        Some(Self {
            nav_mesh: (packed >> 32) as u32,
            slot: ((packed & 0xffff_ffff) - 1) as usize,
        })
    }
}

/// Atomic back-reference from an agent to its registration
#[derive(Debug, Default)]
pub struct AgentLink {
    /// Zero when unlinked
    packed: AtomicU64,
    removing: AtomicBool,
}

impl AgentLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<AgentIndex> {
        AgentIndex::unpack(self.packed.load(Ordering::Acquire))
    }

    pub fn is_linked(&self) -> bool {
        self.packed.load(Ordering::Acquire) != 0
    }

    /// Links an unlinked agent; fails if it is already linked somewhere
    pub(crate) fn set(&self, index: AgentIndex) -> bool {
        self.packed
            .compare_exchange(0, index.pack(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Unlinks unconditionally, returning the previous index
    pub(crate) fn invalidate(&self) -> Option<AgentIndex> {
        AgentIndex::unpack(self.packed.swap(0, Ordering::AcqRel))
    }

    /// Unlinks only if still pointing at `index`
    pub(crate) fn invalidate_if(&self, index: AgentIndex) -> bool {
        self.packed
            .compare_exchange(index.pack(), 0, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Marks a removal in flight; false if one already is
    pub(crate) fn begin_removal(&self) -> bool {
        !self.removing.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn end_removal(&self) {
        self.removing.store(false, Ordering::Release);
    }
}

#[derive(Debug, Clone)]
pub(crate) struct RegisteredAgent {
    pub link: Arc<AgentLink>,
    pub agent: Weak<Mutex<CrowdAgent>>,
}

/// Crowd slot to agent map of one navigation mesh
#[derive(Debug, Default)]
pub(crate) struct AgentRegistry {
    entries: HashMap<usize, RegisteredAgent>,
}

impl AgentRegistry {
    pub fn insert(&mut self, slot: usize, link: Arc<AgentLink>, agent: Weak<Mutex<CrowdAgent>>) {
        self.entries.insert(slot, RegisteredAgent { link, agent });
    }

    pub fn remove(&mut self, slot: usize) -> Option<RegisteredAgent> {
        self.entries.remove(&slot)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &RegisteredAgent)> {
        self.entries.iter().map(|(slot, entry)| (*slot, entry))
    }

    /// Slots whose agent was dropped or whose link no longer points here
    pub fn stale_slots(&self, nav_mesh: u32) -> Vec<usize> {
        self.entries
            .iter()
            .filter(|(slot, entry)| {
                let expected = AgentIndex {
                    nav_mesh,
                    slot: **slot,
                };
                entry.agent.strong_count() == 0 || entry.link.get() != Some(expected)
            })
            .map(|(slot, _)| *slot)
            .collect()
    }

    /// Unlinks every agent still pointing at this registry and empties it
    pub fn invalidate_all(&mut self, nav_mesh: u32) -> Vec<usize> {
        self.entries
            .drain()
            .map(|(slot, entry)| {
                entry.link.invalidate_if(AgentIndex { nav_mesh, slot });
                slot
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_packs_slot_zero() {
        let link = AgentLink::new();
        assert_eq!(link.get(), None);
        let index = AgentIndex { nav_mesh: 7, slot: 0 };
        assert!(link.set(index));
        assert_eq!(link.get(), Some(index));
        assert!(!link.set(AgentIndex { nav_mesh: 8, slot: 1 }));
        assert_eq!(link.invalidate(), Some(index));
        assert!(!link.is_linked());
    }

    #[test]
    fn test_invalidate_if_ignores_other_links() {
        let link = AgentLink::new();
        let index = AgentIndex { nav_mesh: 1, slot: 3 };
        link.set(index);
        assert!(!link.invalidate_if(AgentIndex { nav_mesh: 2, slot: 3 }));
        assert!(link.invalidate_if(index));
        assert!(!link.is_linked());
    }

    #[test]
    fn test_removal_guard() {
        let link = AgentLink::new();
        assert!(link.begin_removal());
        assert!(!link.begin_removal());
        link.end_removal();
        assert!(link.begin_removal());
    }

    #[test]
    fn test_stale_slots() {
        let agent = Arc::new(Mutex::new(CrowdAgent::new("a", glam::Vec3::ZERO)));
        let link = lock_link(&agent);
        let mut registry = AgentRegistry::default();
        link.set(AgentIndex { nav_mesh: 1, slot: 0 });
        registry.insert(0, link.clone(), Arc::downgrade(&agent));
        assert!(registry.stale_slots(1).is_empty());

        link.invalidate();
        assert_eq!(registry.stale_slots(1), vec![0]);

        link.set(AgentIndex { nav_mesh: 1, slot: 0 });
        drop(agent);
        assert_eq!(registry.stale_slots(1), vec![0]);
        assert_eq!(registry.invalidate_all(1), vec![0]);
        assert_eq!(registry.len(), 0);
    }

    fn lock_link(agent: &Arc<Mutex<CrowdAgent>>) -> Arc<AgentLink> {
        agent.lock().unwrap().link().clone()
    }
}
