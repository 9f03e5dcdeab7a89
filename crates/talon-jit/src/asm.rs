//! A relocatable byte-emission buffer: labels, fixups, growth on demand.
//!
//! Grounded on `examples/original_source/runtime/assembler-utils.h`'s
//! `Label` / `AssemblerFixup` / `AssemblerBuffer` trio. That header's own
//! contract is "emit bytes, patch labels, fix up branches" — the mnemonics
//! live one layer up, in `x64.rs`, and are not ported from the reference
//! implementation. `Label`'s bound/linked/unused tri-state and its `kBias`
//! trick (so an unused label's internal position never collides with a
//! legitimately bound offset of zero) are kept; the reference's
//! linked-list-through-the-instruction-stream chaining for repeated
//! forward references to the same unbound label is replaced with a plain
//! `Vec` of pending fixups per label, which is the same contract (one
//! patch per unresolved reference, applied when the label binds) without
//! needing raw pointer games.

const BIAS: i64 = 4;

#[derive(Debug, Default)]
pub struct Label {
    position: i64,
}

impl Label {
    pub fn new() -> Self {
        Label { position: 0 }
    }

    pub fn is_unused(&self) -> bool {
        self.position == 0
    }

    pub fn is_bound(&self) -> bool {
        self.position < 0
    }

    /// The byte offset this label refers to. Panics if it was never bound.
    pub fn position(&self) -> usize {
        assert!(self.is_bound(), "position() on an unbound label");
        (-self.position - BIAS) as usize
    }

    fn bind_to(&mut self, position: usize) {
        assert!(!self.is_bound(), "label already bound");
        self.position = -(position as i64) - BIAS;
    }
}

/// A relocation recorded against a not-yet-bound label: `site` is the byte
/// offset of the 4-byte rel32 field to patch, `instruction_end` is the
/// offset one past that field (rel32 is relative to the address of the
/// *next* instruction, the x86-64 convention `x64.rs` relies on).
struct PendingFixup {
    site: usize,
    instruction_end: usize,
}

/// Emits machine code into a growable `Vec<u8>`, tracking unresolved
/// branches to labels that have not bound yet.
pub struct AssemblerBuffer {
    bytes: Vec<u8>,
    pending: std::collections::HashMap<*const Label, Vec<PendingFixup>>,
}

impl AssemblerBuffer {
    pub fn new() -> Self {
        AssemblerBuffer { bytes: Vec::with_capacity(4096), pending: std::collections::HashMap::new() }
    }

    pub fn offset(&self) -> usize {
        self.bytes.len()
    }

    pub fn emit_u8(&mut self, value: u8) {
        self.bytes.push(value);
    }

    pub fn emit_bytes(&mut self, values: &[u8]) {
        self.bytes.extend_from_slice(values);
    }

    pub fn emit_u32_le(&mut self, value: u32) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    pub fn emit_i32_le(&mut self, value: i32) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    pub fn emit_u64_le(&mut self, value: u64) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    /// Bind `label` to the current offset, patching every rel32 reference
    /// recorded against it so far.
    pub fn bind(&mut self, label: &mut Label) {
        let here = self.offset();
        label.bind_to(here);
        if let Some(fixups) = self.pending.remove(&(label as *const Label)) {
            for fixup in fixups {
                let rel = here as i64 - fixup.instruction_end as i64;
                let rel = i32::try_from(rel).expect("branch target out of rel32 range");
                self.bytes[fixup.site..fixup.site + 4].copy_from_slice(&rel.to_le_bytes());
            }
        }
    }

    /// Emit a 4-byte rel32 field for a branch to `label`. If `label` is
    /// already bound this computes the real displacement immediately;
    /// otherwise it emits a zero placeholder and records a fixup that
    /// `bind` will patch in later.
    pub fn emit_rel32_to(&mut self, label: &mut Label) {
        if label.is_bound() {
            let target = label.position();
            let instruction_end = self.offset() + 4;
            let rel = target as i64 - instruction_end as i64;
            let rel = i32::try_from(rel).expect("branch target out of rel32 range");
            self.emit_i32_le(rel);
        } else {
            let site = self.offset();
            self.emit_i32_le(0);
            let instruction_end = self.offset();
            self.pending.entry(label as *const Label).or_default().push(PendingFixup { site, instruction_end });
        }
    }

    pub fn finish(self) -> Vec<u8> {
        assert!(self.pending.is_empty(), "unresolved branches remain at finish()");
        self.bytes
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }
}

impl Default for AssemblerBuffer {
    fn default() -> Self {
        Self::new()
    }
}
