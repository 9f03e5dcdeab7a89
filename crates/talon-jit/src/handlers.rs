//! Layout constants for the assembled handler table: a fixed-size slot per
//! opcode, plus three pseudo-handlers at negative offsets, per spec.md
//! §4.8. Grounded on `examples/original_source/runtime/interpreter-gen-x64.cpp`'s
//! handler-table shape (a single flat table indexed by `handlers_base +
//! opcode * kHandlerSize`, with `kUnwindHandler`/`kReturnHandler`/
//! `kYieldHandler` living just before it).

/// One table slot per possible opcode byte.
pub const SLOT_COUNT: usize = 256;

/// Bytes reserved per opcode handler. Every handler built by this crate is
/// well under this bound (the largest, the counting variant's, comes in
/// under 20 bytes); `ThreadedInterpreter::build` asserts the bound rather
/// than relying on it silently, the way the reference implementation's
/// `static_assert` on `kHandlerSize` does at compile time — Rust has no
/// equivalent compile-time check for variable-length encoded machine code,
/// so this is a build-time `assert!` instead.
pub const HANDLER_SIZE: usize = 256;

/// Pseudo-handler slot indices, expressed as a negative offset in *slots*
/// from `handlers_base` (spec.md §4.8: "three pseudo-handlers at negative
/// offsets... UNWIND (-3), RETURN (-2), YIELD (-1)").
pub const UNWIND_SLOT: isize = -3;
pub const RETURN_SLOT: isize = -2;
pub const YIELD_SLOT: isize = -1;

/// Total bytes in the table, including the three pseudo-handler slots
/// that precede `handlers_base`.
pub const TABLE_BYTES: usize = (SLOT_COUNT + 3) * HANDLER_SIZE;

/// Byte offset of `handlers_base` (opcode 0's slot) within the mapping
/// returned by `ExecutableBuffer::build`.
pub const HANDLERS_BASE_OFFSET: usize = 3 * HANDLER_SIZE;

pub fn slot_offset(opcode: u8) -> usize {
    HANDLERS_BASE_OFFSET + opcode as usize * HANDLER_SIZE
}

pub fn pseudo_slot_offset(slot: isize) -> usize {
    (HANDLERS_BASE_OFFSET as isize + slot * HANDLER_SIZE as isize) as usize
}
