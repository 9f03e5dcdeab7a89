//! Runtime-wide tables the garbage collector must treat as roots:
//! the layout table, the interned-string set, and the symbols table.
//!
//! Grounded structurally on
//! `examples/navicore-cem3/crates/core/src/memory_stats.rs`'s
//! `MemoryStatsRegistry` (a single struct owning a handful of named
//! collections, reached through narrow accessor methods rather than
//! threaded everywhere by hand) — adapted here to be owned per-`Heap`
//! rather than a single process-wide `OnceLock`, since in this design a
//! runtime is scoped to one heap, not to the whole process.

use crate::layout::LayoutTable;
use crate::raw::RawObject;
use std::collections::HashMap;

/// The set of interned small/large strings, keyed by their byte content so
/// that `a is b` holds whenever `a == b` for interned strings (spec.md
/// §4.4's identity-equals-equality guarantee for interned names).
#[derive(Debug, Default)]
pub struct InternedSet {
    entries: HashMap<Vec<u8>, RawObject>,
}

impl InternedSet {
    pub fn new() -> Self {
        InternedSet::default()
    }

    pub fn get(&self, bytes: &[u8]) -> Option<RawObject> {
        self.entries.get(bytes).copied()
    }

    /// Record `bytes -> obj` if not already interned; returns the entry
    /// that is canonical going forward (the new one, or the pre-existing
    /// one if `bytes` was already present).
    pub fn intern(&mut self, bytes: &[u8], obj: RawObject) -> RawObject {
        *self.entries.entry(bytes.to_vec()).or_insert(obj)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Roots for a scavenge: every interned reference, plus a rewritable
    /// slot so the caller can update it after a forwarding copy. Since
    /// `HashMap` keys here are plain byte vectors (not references), only
    /// the values need rewriting.
    pub fn roots_mut(&mut self) -> impl Iterator<Item = &mut RawObject> {
        self.entries.values_mut()
    }
}

/// Interned symbol table: a small, fixed vocabulary of dunder/keyword
/// names the interpreter refers to by index rather than by name lookup
/// (`__init__`, `__add__`, ...), mirroring the reference implementation's
/// `SymbolId` enum.
#[derive(Debug, Default)]
pub struct SymbolsTable {
    by_id: Vec<RawObject>,
    ids_by_name: HashMap<&'static str, u32>,
}

impl SymbolsTable {
    pub fn new() -> Self {
        SymbolsTable::default()
    }

    /// Register a fixed symbol under `name`, returning its id. Call order
    /// at runtime start-up determines ids, so callers that need a stable
    /// id across runs must register symbols in a fixed order.
    pub fn register(&mut self, name: &'static str, obj: RawObject) -> u32 {
        let id = self.by_id.len() as u32;
        self.by_id.push(obj);
        self.ids_by_name.insert(name, id);
        id
    }

    pub fn id_for(&self, name: &str) -> Option<u32> {
        self.ids_by_name.get(name).copied()
    }

    pub fn get(&self, id: u32) -> RawObject {
        self.by_id[id as usize]
    }

    pub fn roots_mut(&mut self) -> impl Iterator<Item = &mut RawObject> {
        self.by_id.iter_mut()
    }
}

/// The dict of loaded modules, keyed by qualified name. Scanned as a root
/// so an imported module stays alive for the life of the runtime even if
/// nothing else references it (spec.md §4.13's import-lock scenario
/// depends on modules staying resident once initialized).
#[derive(Debug, Default)]
pub struct ModulesTable {
    modules: HashMap<String, RawObject>,
}

impl ModulesTable {
    pub fn new() -> Self {
        ModulesTable::default()
    }

    pub fn get(&self, name: &str) -> Option<RawObject> {
        self.modules.get(name).copied()
    }

    pub fn insert(&mut self, name: String, module: RawObject) {
        self.modules.insert(name, module);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    pub fn roots_mut(&mut self) -> impl Iterator<Item = &mut RawObject> {
        self.modules.values_mut()
    }
}

/// Bundles the tables a `Heap::collect` call needs alongside the layout
/// table, so callers in `talon-vm` can scan everything in one place.
#[derive(Debug, Default)]
pub struct RuntimeTables {
    pub layouts: LayoutTable,
    pub interned: InternedSet,
    pub symbols: SymbolsTable,
    pub modules: ModulesTable,
}

impl RuntimeTables {
    pub fn new() -> Self {
        RuntimeTables {
            layouts: LayoutTable::new(),
            interned: InternedSet::new(),
            symbols: SymbolsTable::new(),
            modules: ModulesTable::new(),
        }
    }
}
