//! Code objects and function entities: the static, immutable description
//! of a compiled chunk of bytecode, and the runtime object that pairs one
//! with a closure environment.

use std::sync::Arc;
use talon_core::RawObject;

bitflags::bitflags! {
    /// Code-object flags. `SIMPLE_CALL` is the one the runtime sets itself
    /// rather than the compiler: once `talon-vm::builtins` loads a code
    /// object it checks whether its argument shape (no defaults, no
    /// `*args`/`**kwargs`, no cell/free variables) permits the
    /// simple-interpreted-N call entry point described in spec.md §4.8's
    /// call protocol, and sets the bit so `CALL_FUNCTION` doesn't have to
    /// re-derive that on every call.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CodeFlags: u32 {
        const NONE = 0;
        const OPTIMIZED = 1 << 0;
        const NEW_LOCALS = 1 << 1;
        const VARARGS = 1 << 2;
        const VARKEYARGS = 1 << 3;
        const GENERATOR = 1 << 4;
        const COROUTINE = 1 << 5;
        const NOFREE = 1 << 6;
        const SIMPLE_CALL = 1 << 7;
    }
}

/// An entry in the line-number table: `(bytecode offset, source line)`
/// pairs, consulted only on exception/traceback construction, never on
/// the hot path (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineTableEntry {
    pub bytecode_offset: u32,
    pub line: u32,
}

/// The immutable, shareable half of a compiled function: bytecode, the
/// constant pool, names used by `LOAD_GLOBAL`/`LOAD_ATTR`/`IMPORT_NAME`,
/// and enough metadata to build a frame.
#[derive(Debug)]
pub struct CodeObject {
    pub name: String,
    pub bytecode: Vec<u8>,
    pub constants: Vec<RawObject>,
    pub names: Vec<String>,
    /// Local variable names, positional/keyword arguments first, in the
    /// order `LOAD_FAST`/`STORE_FAST` index by.
    pub varnames: Vec<String>,
    /// Names of variables this code object closes over from an enclosing
    /// scope, and those an inner scope closes over from this one.
    pub freevars: Vec<String>,
    pub cellvars: Vec<String>,
    pub argument_count: u32,
    pub keyword_only_count: u32,
    pub local_count: u32,
    pub stack_size: u32,
    pub flags: CodeFlags,
    pub line_table: Vec<LineTableEntry>,
    pub first_line_number: u32,
    pub filename: String,
}

impl CodeObject {
    pub fn line_for_offset(&self, offset: u32) -> Option<u32> {
        self.line_table
            .iter()
            .rev()
            .find(|e| e.bytecode_offset <= offset)
            .map(|e| e.line)
    }
}

/// A callable value: a `CodeObject` closed over its free-variable
/// environment. Cheap to clone (an `Arc` around the immutable code plus a
/// small captured-cell vector) because the same code object is shared by
/// every closure created from the same `def`/lambda.
#[derive(Debug, Clone)]
pub struct Function {
    pub code: Arc<CodeObject>,
    pub defaults: Vec<RawObject>,
    pub closure_cells: Vec<RawObject>,
    pub globals_module: RawObject,
}

impl Function {
    pub fn new(code: Arc<CodeObject>, globals_module: RawObject) -> Self {
        Function {
            code,
            defaults: Vec::new(),
            closure_cells: Vec::new(),
            globals_module,
        }
    }
}

/// Every code object reachable from a loaded module, addressed by a
/// `SmallInt` index a `FunctionObject`'s first slot carries (spec.md §3's
/// function entity holds its code object directly; this crate's `RawObject`
/// cannot embed an `Arc<CodeObject>` inline, so `MAKE_FUNCTION` stores an
/// index into this table instead — the same indirection `builtins::materialize`
/// already uses for nested-`def` constants).
#[derive(Debug, Default)]
pub struct CodeTable {
    codes: Vec<Arc<CodeObject>>,
}

impl CodeTable {
    pub fn new() -> Self {
        CodeTable::default()
    }

    pub fn push(&mut self, code: Arc<CodeObject>) -> u32 {
        let index = self.codes.len() as u32;
        self.codes.push(code);
        index
    }

    pub fn get(&self, index: u32) -> Option<Arc<CodeObject>> {
        self.codes.get(index as usize).cloned()
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

#[cfg(test)]
mod code_table_tests {
    use super::*;

    #[test]
    fn push_then_get_round_trips_by_index() {
        let mut table = CodeTable::new();
        let code = Arc::new(CodeObject {
            name: "f".to_string(),
            bytecode: vec![],
            constants: vec![],
            names: vec![],
            varnames: vec![],
            freevars: vec![],
            cellvars: vec![],
            argument_count: 0,
            keyword_only_count: 0,
            local_count: 0,
            stack_size: 0,
            flags: CodeFlags::NONE,
            line_table: vec![],
            first_line_number: 1,
            filename: "f.talon".to_string(),
        });
        let idx = table.push(code.clone());
        assert!(Arc::ptr_eq(&table.get(idx).unwrap(), &code));
        assert_eq!(table.len(), 1);
    }
}
