//! Executable memory for an assembled handler table.
//!
//! No file in `examples/` maps memory executable (the pack's only
//! `memmap2` users, `examples/gimli-rs-object`'s binutils-style tools, map
//! object files read-only), so this leans on `memmap2`'s own documented
//! `MmapMut::make_exec` rather than a pattern lifted from the corpus: write
//! into a private anonymous mapping, then downgrade it to read+execute
//! before anything jumps into it. `memmap2` is already a workspace
//! dependency (pulled in for this exact purpose; see `DESIGN.md`).

use memmap2::{Mmap, MmapMut};

/// A block of code, pinned in memory and non-writable once built. Dropping
/// it unmaps the pages, same as `memmap2::Mmap`'s own `Drop`.
pub struct ExecutableBuffer {
    map: Mmap,
}

impl ExecutableBuffer {
    /// Copies `code` into a fresh anonymous mapping and marks it
    /// read+execute. `code` must not be empty — an empty mapping has
    /// nothing to jump into.
    pub fn build(code: &[u8]) -> std::io::Result<Self> {
        assert!(!code.is_empty(), "cannot execute an empty handler table");
        let mut writable = MmapMut::map_anon(code.len())?;
        writable.copy_from_slice(code);
        let map = writable.make_exec()?;
        Ok(ExecutableBuffer { map })
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.map.as_ptr()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
