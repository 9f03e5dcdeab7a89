//! The assembled x86-64 handler-threaded interpreter: an alternate,
//! equally-correct way to run the frames and code objects `talon-vm`
//! defines, reached through a table of machine-code opcode handlers
//! instead of a Rust `match` (spec.md §4.8).
//!
//! `talon-core`/`talon-vm` have no notion of machine code at all; this
//! crate is the only one in the workspace aware that the target is
//! x86-64, and only runs under the System V calling convention this
//! crate's hand-encoded entry/helper call sites assume.

#[cfg(not(all(target_arch = "x86_64", unix)))]
compile_error!(
    "talon-jit assembles raw x86-64 under the System V calling convention \
     (first two integer args in rdi/rsi); this is not portable to \
     non-x86-64 targets or to Windows' rcx/rdx convention."
);

pub mod asm;
pub mod exec;
pub mod handlers;
pub mod threaded;
pub mod x64;

pub use exec::ExecutableBuffer;
pub use threaded::ThreadedInterpreter;
