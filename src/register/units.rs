// src/register/units.rs

//! Slot table owning the joint-subsystem engines.
//!
//! Shards reference engines through copyable [`UnitId`] handles; the table
//! owns the boxes. Handle equality is engine identity. A slot is freed as
//! soon as no shard references it, which is how the register guarantees it
//! never leaks an engine past its last detach.

use crate::engine::EngineBackend;

/// Handle to one engine slot. Only meaningful within the owning register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UnitId(pub(crate) usize);

/// Owning table of engine instances.
pub struct UnitTable {
    slots: Vec<Option<Box<dyn EngineBackend>>>,
    free: Vec<usize>,
}

impl std::fmt::Debug for UnitTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let live = self.slots.iter().filter(|s| s.is_some()).count();
        write!(f, "UnitTable({live} live / {} slots)", self.slots.len())
    }
}

impl Default for UnitTable {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for UnitTable {
    fn clone(&self) -> Self {
        Self {
            slots: self
                .slots
                .iter()
                .map(|s| s.as_ref().map(|b| b.clone_box()))
                .collect(),
            free: self.free.clone(),
        }
    }
}

impl UnitTable {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    pub fn insert(&mut self, engine: Box<dyn EngineBackend>) -> UnitId {
        match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(engine);
                UnitId(slot)
            }
            None => {
                self.slots.push(Some(engine));
                UnitId(self.slots.len() - 1)
            }
        }
    }

    pub fn contains(&self, id: UnitId) -> bool {
        self.slots.get(id.0).map(|s| s.is_some()).unwrap_or(false)
    }

    pub fn get(&self, id: UnitId) -> &dyn EngineBackend {
        self.slots[id.0]
            .as_deref()
            .expect("unit handle must reference a live engine")
    }

    pub fn get_mut(&mut self, id: UnitId) -> &mut dyn EngineBackend {
        self.slots[id.0]
            .as_deref_mut()
            .expect("unit handle must reference a live engine")
    }

    pub fn remove(&mut self, id: UnitId) -> Box<dyn EngineBackend> {
        let engine = self.slots[id.0]
            .take()
            .expect("unit handle must reference a live engine");
        self.free.push(id.0);
        engine
    }

    pub fn clear(&mut self) {
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if slot.take().is_some() {
                self.free.push(i);
            }
        }
    }

    /// Identifiers of every live engine.
    pub fn ids(&self) -> Vec<UnitId> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|_| UnitId(i)))
            .collect()
    }
}
