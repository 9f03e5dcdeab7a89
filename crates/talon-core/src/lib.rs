//! Tagged-reference object encoding, moving heap, hidden-layout model, and
//! the runtime-wide tables the two of them share.
//!
//! This crate has no notion of bytecode, frames, or a thread: it is the
//! foundation `talon-vm` builds the interpreter on top of, the way
//! `seq-core` underlies `seq-runtime` in the workspace this one is
//! patterned after.

pub mod error;
pub mod heap;
pub mod layout;
pub mod object;
pub mod raw;
pub mod siphash;
pub mod tables;

pub use error::{CoreError, HeapError, LayoutError};
pub use heap::{HashSeed, Heap};
pub use layout::{AttributeFlags, AttributeInfo, Layout, LayoutTable};
pub use raw::{builtin_layout, Header, HeapObject, ObjectFormat, RawBool, RawObject, SmallInt, SmallStr, Tag};
pub use tables::{InternedSet, ModulesTable, RuntimeTables, SymbolsTable};
