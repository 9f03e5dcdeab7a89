//! Frame/thread model, bytecode + inline caches, the reference
//! interpreter, marshal reader, and bytecode cache for the Talon execution
//! engine — everything `talon-core`'s tagged objects and moving heap are
//! built up into a running program. `talon-jit`'s assembled interpreter
//! sits beside `interp::Interpreter` as an alternate execution strategy
//! over the same frames, threads, and code objects defined here.

pub mod bccache;
pub mod builtins;
pub mod bytecode;
pub mod cache;
pub mod code;
pub mod config;
pub mod diagnostics;
pub mod exception;
pub mod frame;
pub mod globals;
pub mod interp;
pub mod marshal;
pub mod thread;

pub use bccache::{cache_key, BytecodeCache};
pub use bytecode::{decode, Instruction, Opcode};
pub use cache::{CacheEntry, InlineCache};
pub use code::{CodeObject, CodeTable, Function};
pub use config::RuntimeConfig;
pub use exception::{ExceptionState, TracebackEntry};
pub use frame::{BlockEntry, Frame, ValueStack};
pub use globals::GlobalsTable;
pub use interp::{CacheTable, Continuation, Interpreter};
pub use thread::{ImportGuard, ImportLock, Thread};
