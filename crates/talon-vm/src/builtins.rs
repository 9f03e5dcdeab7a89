//! The minimal embedding surface: turning a decoded marshal stream into
//! heap-resident code objects, and loading a module under the import lock
//! (spec.md §4.13 supplement, scenario F).

use crate::code::{CodeFlags, CodeObject, CodeTable, LineTableEntry};
use crate::marshal::{self, CodeValue, Value};
use crate::thread::ImportLock;
use std::sync::Arc;
use talon_core::heap::Heap;
use talon_core::object::Tuple;
use talon_core::raw::{builtin_layout, ObjectFormat};
use talon_core::tables::RuntimeTables;
use talon_core::RawObject;

#[derive(Debug)]
pub enum LoadError {
    Marshal(anyhow::Error),
    Heap(talon_core::HeapError),
    CircularImport(String),
}

impl std::fmt::Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadError::Marshal(e) => write!(f, "marshal error: {e}"),
            LoadError::Heap(e) => write!(f, "heap error: {e}"),
            LoadError::CircularImport(name) => write!(f, "circular import of module {name:?}"),
        }
    }
}

impl std::error::Error for LoadError {}

impl From<talon_core::HeapError> for LoadError {
    fn from(e: talon_core::HeapError) -> Self {
        LoadError::Heap(e)
    }
}

/// The actual cache an `import_module` hit is served from. `RuntimeTables`'s
/// `ModulesTable` only tracks presence (so the GC can root loaded modules);
/// it can't hold an `Arc<CodeObject>` since `CodeObject` is a `talon-vm`
/// type, above `talon-core`. This is the other half of that cache, owned by
/// whatever embeds the interpreter and kept alive across imports.
#[derive(Debug, Default)]
pub struct ModuleCodeCache {
    entries: std::collections::HashMap<String, Arc<CodeObject>>,
}

impl ModuleCodeCache {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Materialize one decoded marshal [`Value`] as a heap-resident
/// `RawObject`, allocating into `heap` and interning strings via
/// `tables.interned` so equal string constants across code objects share
/// one allocation.
fn materialize(
    value: &Value,
    heap: &mut Heap,
    tables: &mut RuntimeTables,
    codes: &mut CodeTable,
) -> Result<RawObject, LoadError> {
    match value {
        Value::Null => Ok(RawObject::error()),
        Value::None => Ok(RawObject::none()),
        Value::Bool(b) => Ok(talon_core::RawBool::from_bool(*b).raw()),
        Value::SmallInt(n) if talon_core::SmallInt::is_valid(*n) => {
            Ok(talon_core::SmallInt::from_i64(*n).raw())
        }
        Value::SmallInt(n) => {
            let negative = *n < 0;
            let magnitude = n.unsigned_abs();
            let digits = [(magnitude & 0xFFFF_FFFF) as u32, (magnitude >> 32) as u32];
            let large = talon_core::object::LargeInt::allocate(heap, negative, &digits)?;
            Ok(large.raw())
        }
        Value::BigInt { negative, digits } => {
            let large = talon_core::object::LargeInt::allocate(heap, *negative, digits)?;
            Ok(large.raw())
        }
        Value::Bytes(bytes) => {
            if let Some(small) = talon_core::SmallStr::try_from_bytes(bytes) {
                return Ok(small.raw());
            }
            let obj = heap.allocate(ObjectFormat::DataArray8, builtin_layout::BYTE_ARRAY, bytes.len() as u32)?;
            let view = talon_core::object::ByteArray::cast(obj).unwrap();
            for (i, b) in bytes.iter().enumerate() {
                view.set(i, *b);
            }
            Ok(view.raw())
        }
        Value::Str(s) => {
            if let Some(existing) = tables.interned.get(s.as_bytes()) {
                return Ok(existing);
            }
            let bytes = s.as_bytes();
            let obj = if let Some(small) = talon_core::SmallStr::try_from_bytes(bytes) {
                small.raw()
            } else {
                let heap_obj = heap.allocate(ObjectFormat::DataArray8, builtin_layout::LARGE_STR, bytes.len() as u32)?;
                let view = talon_core::object::ByteArray::cast(heap_obj).unwrap();
                for (i, b) in bytes.iter().enumerate() {
                    view.set(i, *b);
                }
                view.raw()
            };
            Ok(tables.interned.intern(bytes, obj))
        }
        Value::Tuple(items) => {
            let heap_obj = heap.allocate(ObjectFormat::ReferenceArray, builtin_layout::TUPLE, items.len() as u32)?;
            let tuple = Tuple::cast(heap_obj).unwrap();
            for (i, item) in items.iter().enumerate() {
                let materialized = materialize(item, heap, tables, codes)?;
                tuple.set(i, materialized);
            }
            Ok(tuple.raw())
        }
        Value::Code(inner) => {
            // A nested code object (a `def`/lambda body) appears in its
            // enclosing code object's constant pool. Build its `CodeObject`
            // eagerly and record it in `codes`; `MAKE_FUNCTION` reads this
            // same index back out of the `SmallInt` this constant
            // materializes to, the way `code::CodeTable`'s doc comment
            // describes. A real code object (not a user-visible integer)
            // never reaches bytecode that treats constants as plain
            // values — only `LOAD_CONST` immediately followed by
            // `MAKE_FUNCTION` ever consumes one.
            let nested = build_code_object(inner, heap, tables, codes)?;
            let index = codes.push(nested);
            Ok(talon_core::SmallInt::from_i64(index as i64).raw())
        }
    }
}

/// Build the immutable `CodeObject` for one decoded `CodeValue`,
/// materializing its constant pool into heap objects. Nested `def`/lambda
/// bodies found in the constant pool are recorded into `codes` (spec.md
/// §3's function entity; see `code::CodeTable`'s doc comment).
pub fn build_code_object(
    value: &CodeValue,
    heap: &mut Heap,
    tables: &mut RuntimeTables,
    codes: &mut CodeTable,
) -> Result<Arc<CodeObject>, LoadError> {
    let mut constants = Vec::with_capacity(value.constants.len());
    for c in &value.constants {
        constants.push(materialize(c, heap, tables, codes)?);
    }
    let line_table = value
        .line_table
        .iter()
        .map(|&(bytecode_offset, line)| LineTableEntry { bytecode_offset, line })
        .collect();

    Ok(Arc::new(CodeObject {
        name: value.name.clone(),
        bytecode: value.bytecode.clone(),
        constants,
        names: value.names.clone(),
        varnames: value.varnames.clone(),
        freevars: value.freevars.clone(),
        cellvars: value.cellvars.clone(),
        argument_count: value.argument_count,
        keyword_only_count: value.keyword_only_count,
        local_count: value.local_count,
        stack_size: value.stack_size,
        flags: CodeFlags::from_bits_truncate(value.flags),
        line_table,
        first_line_number: value.first_line_number,
        filename: value.filename.clone(),
    }))
}

/// Load `module_name` from a marshaled byte stream, guarded by the import
/// lock: a module whose own top-level execution tries to import itself
/// again sees `LoadError::CircularImport` instead of deadlocking or
/// silently re-running (spec.md §4.13 supplement, scenario F).
pub fn import_module(
    module_name: &str,
    marshaled_bytes: &[u8],
    heap: &mut Heap,
    tables: &mut RuntimeTables,
    import_lock: &ImportLock,
    codes: &mut CodeTable,
    module_codes: &mut ModuleCodeCache,
) -> Result<Arc<CodeObject>, LoadError> {
    if let Some(existing) = module_codes.entries.get(module_name) {
        // Already fully initialized: the initializer runs exactly once
        // and every caller observes the same code object.
        return Ok(existing.clone());
    }

    let _guard = import_lock
        .begin_import(module_name)
        .map_err(LoadError::CircularImport)?;

    let decoded = marshal::load_module(marshaled_bytes).map_err(LoadError::Marshal)?;
    let code = build_code_object(&decoded, heap, tables, codes)?;
    tables.modules.insert(module_name.to_string(), RawObject::none());
    module_codes.entries.insert(module_name.to_string(), code.clone());
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use talon_core::heap::HashSeed;

    fn sample_module_bytes() -> Vec<u8> {
        let mut body = vec![b'c']; // CODE tag
        body.extend_from_slice(&0u32.to_le_bytes()); // argument_count
        body.extend_from_slice(&0u32.to_le_bytes()); // keyword_only_count
        body.extend_from_slice(&0u32.to_le_bytes()); // local_count
        body.extend_from_slice(&4u32.to_le_bytes()); // stack_size
        body.extend_from_slice(&0u32.to_le_bytes()); // flags
        body.extend_from_slice(&2u32.to_le_bytes()); // bytecode length
        body.extend_from_slice(&[18, 0]); // RETURN_VALUE
        body.push(b')');
        body.push(0); // constants: ()
        body.push(b')');
        body.push(0); // names: ()
        body.push(b')');
        body.push(0); // varnames: ()
        body.push(b')');
        body.push(0); // freevars: ()
        body.push(b')');
        body.push(0); // cellvars: ()
        body.push(b'z');
        body.push(1);
        body.push(b'm'); // filename
        body.push(b'z');
        body.push(4);
        body.extend_from_slice(b"main"); // name
        body.extend_from_slice(&1u32.to_le_bytes()); // first_line_number
        body.extend_from_slice(&0u32.to_le_bytes()); // lnotab length

        let mut stream = marshal::EXPECTED_MAGIC.to_le_bytes().to_vec();
        stream.extend_from_slice(&0u32.to_le_bytes()); // timestamp
        stream.extend_from_slice(&0u32.to_le_bytes()); // source_size
        stream.extend_from_slice(&body);
        stream
    }

    #[test]
    fn import_module_succeeds_once() {
        let mut heap = Heap::new(4096, HashSeed::Fixed(1));
        let mut tables = RuntimeTables::new();
        let lock = ImportLock::new();
        let mut codes = CodeTable::new();
        let mut module_codes = ModuleCodeCache::new();
        let bytes = sample_module_bytes();
        let code = import_module(
            "mymodule", &bytes, &mut heap, &mut tables, &lock, &mut codes, &mut module_codes,
        )
        .unwrap();
        assert_eq!(code.name, "main");
        assert!(tables.modules.contains("mymodule"));
    }

    #[test]
    fn reimporting_a_loaded_module_does_not_rerun_the_initializer() {
        let mut heap = Heap::new(4096, HashSeed::Fixed(1));
        let mut tables = RuntimeTables::new();
        let lock = ImportLock::new();
        let mut codes = CodeTable::new();
        let mut module_codes = ModuleCodeCache::new();
        let bytes = sample_module_bytes();
        let first = import_module(
            "mymodule", &bytes, &mut heap, &mut tables, &lock, &mut codes, &mut module_codes,
        )
        .unwrap();
        let codes_len_after_first = codes.len();

        // A second import with garbage bytes would fail if it actually
        // re-ran the decoder; it must not even try.
        let second = import_module(
            "mymodule", &[], &mut heap, &mut tables, &lock, &mut codes, &mut module_codes,
        )
        .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(codes.len(), codes_len_after_first);
    }

    #[test]
    fn string_constants_are_interned_across_code_objects() {
        let mut heap = Heap::new(4096, HashSeed::Fixed(1));
        let mut tables = RuntimeTables::new();
        let mut codes = CodeTable::new();
        let a = materialize(&Value::Str("shared".to_string()), &mut heap, &mut tables, &mut codes).unwrap();
        let b = materialize(&Value::Str("shared".to_string()), &mut heap, &mut tables, &mut codes).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn nested_code_constant_materializes_to_a_code_table_index() {
        let mut heap = Heap::new(4096, HashSeed::Fixed(1));
        let mut tables = RuntimeTables::new();
        let mut codes = CodeTable::new();
        let nested = CodeValue {
            argument_count: 0,
            keyword_only_count: 0,
            local_count: 0,
            stack_size: 4,
            flags: 0,
            bytecode: vec![18, 0],
            constants: vec![],
            names: vec![],
            varnames: vec![],
            freevars: vec![],
            cellvars: vec![],
            filename: "m.talon".to_string(),
            name: "inner".to_string(),
            first_line_number: 1,
            line_table: vec![],
        };
        let result = materialize(&Value::Code(nested), &mut heap, &mut tables, &mut codes).unwrap();
        assert!(result.is_small_int());
        let index = result.as_small_int().value() as u32;
        assert_eq!(codes.get(index).unwrap().name, "inner");
    }
}
