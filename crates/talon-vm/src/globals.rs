//! Per-module global namespaces.
//!
//! spec.md §3's function entity carries "the bound globals dict"; §4.4's
//! runtime tables carry a modules dict keyed by name. Routing global
//! variable storage through `talon_core::layout`'s hidden-layout DAG (as
//! regular instance attributes do) would work, but that model exists for
//! user-instance shapes sharing structure across many instances — a
//! module's globals are a singleton namespace, never shared, so a plain
//! `HashMap<String, RawObject>` per module is the simpler, equally
//! spec-faithful choice. Grounded on `talon_core::tables::ModulesTable`'s
//! own `HashMap`-registry shape.
//!
//! A module is addressed by a `SmallInt` id rather than a heap reference,
//! the same indirection `code::CodeTable` uses for code objects: nothing
//! in this table's values ever needs to be an independently-allocated heap
//! object, so there is no reason to pay for one.

use std::collections::HashMap;
use talon_core::RawObject;

#[derive(Debug, Default)]
pub struct GlobalsTable {
    modules: Vec<HashMap<String, RawObject>>,
}

impl GlobalsTable {
    pub fn new() -> Self {
        GlobalsTable::default()
    }

    /// Create a fresh, empty global namespace and return its id.
    pub fn create_module(&mut self) -> u32 {
        let id = self.modules.len() as u32;
        self.modules.push(HashMap::new());
        id
    }

    pub fn get(&self, module_id: u32, name: &str) -> Option<RawObject> {
        self.modules[module_id as usize].get(name).copied()
    }

    pub fn set(&mut self, module_id: u32, name: &str, value: RawObject) {
        self.modules[module_id as usize].insert(name.to_string(), value);
    }

    pub fn contains(&self, module_id: u32, name: &str) -> bool {
        self.modules[module_id as usize].contains_key(name)
    }

    /// Roots for a scavenge: every global value in every module.
    pub fn roots_mut(&mut self) -> impl Iterator<Item = &mut RawObject> {
        self.modules.iter_mut().flat_map(|m| m.values_mut())
    }
}
