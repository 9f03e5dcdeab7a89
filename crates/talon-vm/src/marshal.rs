//! The marshal reader: decodes the external, versioned byte-stream format
//! bytecode is distributed in (spec.md §6). Consumed only — there is no
//! writer in this workspace; a compiler front end outside this repo
//! produces the format.
//!
//! Grounded on `examples/Vector35-idb-rs/src/ida_reader.rs`'s byte-cursor
//! extension-trait idiom over `Read`/`BufRead`, and on its use of
//! `anyhow::Result`/`anyhow!`/`ensure!` for the many small fallible decodes
//! a binary format like this produces — the one place in this workspace
//! `anyhow` earns its keep, since nothing else here decodes an externally
//! produced byte stream.

use anyhow::{anyhow, bail, ensure, Result};
use std::io::Read;
use talon_core::RawObject;

/// Tag bytes, following spec.md §6's table exactly. The high bit of a tag
/// (`FLAG_REF`) marks "record this value for a later back-reference",
/// independent of which of the base tags it decorates.
mod tag {
    pub const NULL: u8 = b'0';
    pub const NONE: u8 = b'N';
    pub const FALSE: u8 = b'F';
    pub const TRUE: u8 = b'T';
    pub const SMALL_INT: u8 = b'i';
    pub const BINARY_FLOAT: u8 = b'g';
    pub const BINARY_COMPLEX: u8 = b'y';
    pub const LONG: u8 = b'l';
    pub const STRING: u8 = b's';
    pub const ASCII: u8 = b'a';
    pub const ASCII_INTERNED: u8 = b'A';
    pub const SHORT_ASCII: u8 = b'z';
    pub const SHORT_ASCII_INTERNED: u8 = b'Z';
    pub const UNICODE: u8 = b'u';
    pub const TUPLE_SMALL: u8 = b')';
    pub const TUPLE: u8 = b'(';
    pub const CODE: u8 = b'c';
    pub const BACKREF: u8 = b'r';

    pub const FLAG_REF: u8 = 0x80;
    pub const BASE_MASK: u8 = 0x7f;
}

/// A decoded marshal value. Tuples and code objects nest other `Value`s;
/// everything else is a leaf. The interpreter's loader is responsible for
/// turning this tree into heap objects (tuples, code objects, interned
/// strings) via `talon_core`/`crate::code` — this module's job stops at
/// producing a faithful, host-independent decode.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    None,
    Bool(bool),
    SmallInt(i64),
    BigInt { negative: bool, digits: Vec<u32> },
    Float(f64),
    Complex(f64, f64),
    Bytes(Vec<u8>),
    Str(String),
    Tuple(Vec<Value>),
    Code(CodeValue),
}

/// The fields of a marshaled code object, decoded in the fixed order the
/// format defines them (spec.md §6: "argcount, kwonlyargcount, nlocals,
/// stacksize, flags, code bytes, consts, names, varnames, freevars,
/// cellvars, filename, name, firstlineno, lnotab").
#[derive(Debug, Clone, PartialEq)]
pub struct CodeValue {
    pub argument_count: u32,
    pub keyword_only_count: u32,
    pub local_count: u32,
    pub stack_size: u32,
    pub flags: u32,
    pub bytecode: Vec<u8>,
    pub constants: Vec<Value>,
    pub names: Vec<String>,
    pub varnames: Vec<String>,
    pub freevars: Vec<String>,
    pub cellvars: Vec<String>,
    pub filename: String,
    pub name: String,
    pub first_line_number: u32,
    /// Decoded `(bytecode offset, line)` pairs, expanded from the wire
    /// format's `(pc-delta, line-delta)` byte pairs (spec.md §6).
    pub line_table: Vec<(u32, u32)>,
}

pub struct MarshalReader<R> {
    input: R,
    /// Values tagged with `FLAG_REF` are appended here in decode order, so
    /// a later `BACKREF` index can retrieve them (spec.md §6's
    /// back-reference table).
    refs: Vec<Value>,
}

impl<R: Read> MarshalReader<R> {
    pub fn new(input: R) -> Self {
        MarshalReader { input, refs: Vec::new() }
    }

    fn read_u8(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.input.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    fn read_u32_le(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.input.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn read_i32_le(&mut self) -> Result<i32> {
        Ok(self.read_u32_le()? as i32)
    }

    fn read_u16_le(&mut self) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.input.read_exact(&mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    fn read_f64_le(&mut self) -> Result<f64> {
        let mut buf = [0u8; 8];
        self.input.read_exact(&mut buf)?;
        Ok(f64::from_le_bytes(buf))
    }

    fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.input.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn read_length_prefixed_bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.read_u32_le()? as usize;
        self.read_bytes(len)
    }

    fn read_string(&mut self, long: bool) -> Result<String> {
        let len = if long {
            self.read_u32_le()? as usize
        } else {
            self.read_u8()? as usize
        };
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes).map_err(|e| anyhow!("invalid utf-8 in marshal string: {e}"))
    }

    /// Decode one value, following a `FLAG_REF`-decorated tag byte if
    /// present.
    pub fn read_value(&mut self) -> Result<Value> {
        let raw_tag = self.read_u8()?;
        let is_ref = raw_tag & tag::FLAG_REF != 0;
        let base = raw_tag & tag::BASE_MASK;

        let value = match base {
            tag::NULL => Value::Null,
            tag::NONE => Value::None,
            tag::FALSE => Value::Bool(false),
            tag::TRUE => Value::Bool(true),
            tag::SMALL_INT => Value::SmallInt(self.read_i32_le()? as i64),
            tag::BINARY_FLOAT => Value::Float(self.read_f64_le()?),
            tag::BINARY_COMPLEX => {
                let real = self.read_f64_le()?;
                let imag = self.read_f64_le()?;
                Value::Complex(real, imag)
            }
            // `l`: int32 digit count (sign carried in its own sign bit,
            // magnitude in `abs`), then that many 16-bit digits,
            // little-endian base-2^16 — spec.md §6's arbitrary-precision
            // integer encoding.
            tag::LONG => {
                let raw_count = self.read_i32_le()?;
                let negative = raw_count < 0;
                let digit_count = raw_count.unsigned_abs() as usize;
                let mut digits = Vec::with_capacity(digit_count);
                for _ in 0..digit_count {
                    digits.push(self.read_u16_le()? as u32);
                }
                Value::BigInt { negative, digits }
            }
            tag::STRING => Value::Bytes(self.read_length_prefixed_bytes()?),
            tag::ASCII | tag::ASCII_INTERNED => Value::Str(self.read_string(true)?),
            tag::SHORT_ASCII | tag::SHORT_ASCII_INTERNED => Value::Str(self.read_string(false)?),
            tag::UNICODE => Value::Str(self.read_string(true)?),
            tag::TUPLE_SMALL => {
                let count = self.read_u8()? as usize;
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(self.read_value()?);
                }
                Value::Tuple(items)
            }
            tag::TUPLE => {
                let count = self.read_u32_le()? as usize;
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(self.read_value()?);
                }
                Value::Tuple(items)
            }
            tag::CODE => Value::Code(self.read_code_body()?),
            tag::BACKREF => {
                let index = self.read_u32_le()? as usize;
                return self
                    .refs
                    .get(index)
                    .cloned()
                    .ok_or_else(|| anyhow!("marshal back-reference {index} out of range"));
            }
            other => bail!("unrecognized marshal tag byte 0x{other:02x}"),
        };

        if is_ref {
            self.refs.push(value.clone());
        }
        Ok(value)
    }

    fn read_string_tuple(&mut self, field: &str) -> Result<Vec<String>> {
        match self.read_value()? {
            Value::Tuple(items) => items
                .into_iter()
                .map(|v| match v {
                    Value::Str(s) => Ok(s),
                    other => bail!("code object {field} entry must be a string, found {other:?}"),
                })
                .collect(),
            other => bail!("code object {field} field must be a tuple, found {other:?}"),
        }
    }

    fn read_str_field(&mut self, field: &str) -> Result<String> {
        match self.read_value()? {
            Value::Str(s) => Ok(s),
            other => bail!("code object {field} field must be a string, found {other:?}"),
        }
    }

    /// Expands the wire format's `(pc-delta, line-delta)` byte pairs into
    /// absolute `(bytecode offset, line)` entries, starting from
    /// `first_line_number` (spec.md §6).
    fn decode_line_table(lnotab: &[u8], first_line_number: u32) -> Vec<(u32, u32)> {
        let mut entries = Vec::with_capacity(lnotab.len() / 2);
        let mut offset = 0u32;
        let mut line = first_line_number as i64;
        entries.push((offset, line as u32));
        for pair in lnotab.chunks_exact(2) {
            let pc_delta = pair[0] as u32;
            let line_delta = pair[1] as i8 as i64;
            offset += pc_delta;
            line += line_delta;
            entries.push((offset, line as u32));
        }
        entries
    }

    fn read_code_body(&mut self) -> Result<CodeValue> {
        let argument_count = self.read_u32_le()?;
        let keyword_only_count = self.read_u32_le()?;
        let local_count = self.read_u32_le()?;
        let stack_size = self.read_u32_le()?;
        let flags = self.read_u32_le()?;
        let bytecode = self.read_length_prefixed_bytes()?;

        let constants = match self.read_value()? {
            Value::Tuple(items) => items,
            other => bail!("code object constants field must be a tuple, found {other:?}"),
        };
        let names = self.read_string_tuple("names")?;
        let varnames = self.read_string_tuple("varnames")?;
        let freevars = self.read_string_tuple("freevars")?;
        let cellvars = self.read_string_tuple("cellvars")?;
        let filename = self.read_str_field("filename")?;
        let name = self.read_str_field("name")?;
        let first_line_number = self.read_u32_le()?;
        let lnotab = self.read_length_prefixed_bytes()?;
        let line_table = Self::decode_line_table(&lnotab, first_line_number);

        Ok(CodeValue {
            argument_count,
            keyword_only_count,
            local_count,
            stack_size,
            flags,
            bytecode,
            constants,
            names,
            varnames,
            freevars,
            cellvars,
            filename,
            name,
            first_line_number,
            line_table,
        })
    }
}

/// The three little-endian 32-bit fields spec.md §6 says precede every
/// marshaled module's code object: magic, source timestamp, source size.
/// Neither `timestamp` nor `source_size` gates decoding here (the cache
/// key in `talon-vm::bccache` is a content hash of the source bytes, not
/// this timestamp), but both must still be consumed off the stream or
/// every subsequent tag byte reads eight bytes short.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleHeader {
    pub magic: u32,
    pub timestamp: u32,
    pub source_size: u32,
}

/// Decode the 12-byte magic/timestamp/source-size header that precedes a
/// marshaled module (spec.md §6), ensuring the magic matches the one
/// version this engine understands (a mismatch invalidates the bytecode
/// cache entry rather than being silently accepted).
pub fn read_module_header<R: Read>(input: &mut R) -> Result<ModuleHeader> {
    let mut buf = [0u8; 4];
    input.read_exact(&mut buf)?;
    let magic = u32::from_le_bytes(buf);
    input.read_exact(&mut buf)?;
    let timestamp = u32::from_le_bytes(buf);
    input.read_exact(&mut buf)?;
    let source_size = u32::from_le_bytes(buf);
    Ok(ModuleHeader { magic, timestamp, source_size })
}

pub const EXPECTED_MAGIC: u32 = 0x5441_4C4E; // "TALN" little-endian

pub fn load_module<R: Read>(mut input: R) -> Result<CodeValue> {
    let header = read_module_header(&mut input)?;
    ensure!(
        header.magic == EXPECTED_MAGIC,
        "marshal stream has wrong magic: 0x{:08x}",
        header.magic
    );
    let mut reader = MarshalReader::new(input);
    match reader.read_value()? {
        Value::Code(code) => Ok(code),
        other => bail!("top-level marshal value must be a code object, found {other:?}"),
    }
}

/// Rewrites heap-independent constant values into tagged `RawObject`s the
/// heap can store, for the leaf kinds that fit in a single word (small
/// ints, bools, none). Larger/compound constants (strings, tuples, nested
/// code) are the loader's job in `talon-vm::builtins`, which has access to
/// a `Heap` to allocate into; this module only produces the intermediate
/// tree.
pub fn small_int_constant(value: &Value) -> Option<RawObject> {
    match value {
        Value::SmallInt(n) if talon_core::SmallInt::is_valid(*n) => {
            Some(talon_core::SmallInt::from_i64(*n).raw())
        }
        Value::None => Some(RawObject::none()),
        Value::Bool(b) => Some(talon_core::RawBool::from_bool(*b).raw()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_stream(body: &[u8]) -> Vec<u8> {
        let mut out = EXPECTED_MAGIC.to_le_bytes().to_vec();
        out.extend_from_slice(&0u32.to_le_bytes()); // timestamp
        out.extend_from_slice(&0u32.to_le_bytes()); // source_size
        out.extend_from_slice(body);
        out
    }

    #[test]
    fn decodes_small_int() {
        let mut body = vec![tag::SMALL_INT];
        body.extend_from_slice(&42i32.to_le_bytes());
        let mut reader = MarshalReader::new(&body[..]);
        assert_eq!(reader.read_value().unwrap(), Value::SmallInt(42));
    }

    #[test]
    fn decodes_binary_float() {
        let mut body = vec![tag::BINARY_FLOAT];
        body.extend_from_slice(&1.5f64.to_le_bytes());
        let mut reader = MarshalReader::new(&body[..]);
        assert_eq!(reader.read_value().unwrap(), Value::Float(1.5));
    }

    #[test]
    fn decodes_binary_complex() {
        let mut body = vec![tag::BINARY_COMPLEX];
        body.extend_from_slice(&2.0f64.to_le_bytes());
        body.extend_from_slice(&3.0f64.to_le_bytes());
        let mut reader = MarshalReader::new(&body[..]);
        assert_eq!(reader.read_value().unwrap(), Value::Complex(2.0, 3.0));
    }

    #[test]
    fn decodes_arbitrary_precision_long() {
        // -(2 * 2^16 + 5): negative two-digit long, digits little-endian base 2^16.
        let mut body = vec![tag::LONG];
        body.extend_from_slice(&(-2i32).to_le_bytes());
        body.extend_from_slice(&5u16.to_le_bytes());
        body.extend_from_slice(&2u16.to_le_bytes());
        let mut reader = MarshalReader::new(&body[..]);
        assert_eq!(
            reader.read_value().unwrap(),
            Value::BigInt { negative: true, digits: vec![5, 2] }
        );
    }

    #[test]
    fn decodes_short_ascii_string() {
        let mut body = vec![tag::SHORT_ASCII, 5];
        body.extend_from_slice(b"hello");
        let mut reader = MarshalReader::new(&body[..]);
        assert_eq!(reader.read_value().unwrap(), Value::Str("hello".to_string()));
    }

    #[test]
    fn decodes_raw_bytes_string_tag() {
        let mut body = vec![tag::STRING];
        body.extend_from_slice(&3u32.to_le_bytes());
        body.extend_from_slice(b"abc");
        let mut reader = MarshalReader::new(&body[..]);
        assert_eq!(reader.read_value().unwrap(), Value::Bytes(b"abc".to_vec()));
    }

    #[test]
    fn decodes_small_tuple_of_mixed_values() {
        let mut body = vec![tag::TUPLE_SMALL, 3, tag::NONE, tag::TRUE, tag::SMALL_INT];
        body.extend_from_slice(&7i32.to_le_bytes());
        let mut reader = MarshalReader::new(&body[..]);
        assert_eq!(
            reader.read_value().unwrap(),
            Value::Tuple(vec![Value::None, Value::Bool(true), Value::SmallInt(7)])
        );
    }

    #[test]
    fn back_reference_resolves_to_earlier_flagged_value() {
        let mut body = vec![tag::SHORT_ASCII | tag::FLAG_REF, 3];
        body.extend_from_slice(b"abc");
        body.push(tag::BACKREF);
        body.extend_from_slice(&0u32.to_le_bytes());
        let mut reader = MarshalReader::new(&body[..]);
        assert_eq!(reader.read_value().unwrap(), Value::Str("abc".to_string()));
        assert_eq!(reader.read_value().unwrap(), Value::Str("abc".to_string()));
    }

    #[test]
    fn rejects_unknown_tag_byte() {
        let body = vec![0xEEu8];
        let mut reader = MarshalReader::new(&body[..]);
        assert!(reader.read_value().is_err());
    }

    #[test]
    fn load_module_checks_magic() {
        let stream = build_stream(&[tag::NONE]);
        // Truncated before the full 12-byte header: an io error, not a panic.
        assert!(load_module(&stream[..4]).is_err());
        let mut bad_magic = vec![0, 0, 0, 0]; // wrong magic
        bad_magic.extend_from_slice(&0u32.to_le_bytes()); // timestamp
        bad_magic.extend_from_slice(&0u32.to_le_bytes()); // source_size
        bad_magic.push(tag::NONE);
        assert!(load_module(&bad_magic[..]).is_err());
    }

    #[test]
    fn load_module_decodes_a_minimal_code_object() {
        let mut body = vec![tag::CODE];
        body.extend_from_slice(&0u32.to_le_bytes()); // argument_count
        body.extend_from_slice(&0u32.to_le_bytes()); // keyword_only_count
        body.extend_from_slice(&0u32.to_le_bytes()); // local_count
        body.extend_from_slice(&4u32.to_le_bytes()); // stack_size
        body.extend_from_slice(&0u32.to_le_bytes()); // flags
        body.extend_from_slice(&2u32.to_le_bytes()); // bytecode length
        body.extend_from_slice(&[18, 0]); // RETURN_VALUE, 0
        body.push(tag::TUPLE_SMALL);
        body.push(0); // constants: empty tuple
        body.push(tag::TUPLE_SMALL);
        body.push(0); // names: empty tuple
        body.push(tag::TUPLE_SMALL);
        body.push(0); // varnames: empty tuple
        body.push(tag::TUPLE_SMALL);
        body.push(0); // freevars: empty tuple
        body.push(tag::TUPLE_SMALL);
        body.push(0); // cellvars: empty tuple
        body.push(tag::SHORT_ASCII);
        body.push(1);
        body.push(b'f'); // filename
        body.push(tag::SHORT_ASCII);
        body.push(4);
        body.extend_from_slice(b"main"); // name
        body.extend_from_slice(&1u32.to_le_bytes()); // first_line_number
        body.extend_from_slice(&0u32.to_le_bytes()); // lnotab length

        let stream = build_stream(&body);
        let code = load_module(&stream[..]).unwrap();
        assert_eq!(code.name, "main");
        assert_eq!(code.filename, "f");
        assert_eq!(code.stack_size, 4);
        assert_eq!(code.line_table, vec![(0, 1)]);
    }

    #[test]
    fn decodes_line_table_from_pc_and_line_deltas() {
        let mut body = vec![tag::CODE];
        body.extend_from_slice(&0u32.to_le_bytes());
        body.extend_from_slice(&0u32.to_le_bytes());
        body.extend_from_slice(&0u32.to_le_bytes());
        body.extend_from_slice(&4u32.to_le_bytes());
        body.extend_from_slice(&0u32.to_le_bytes());
        body.extend_from_slice(&2u32.to_le_bytes());
        body.extend_from_slice(&[18, 0]);
        for _ in 0..5 {
            body.push(tag::TUPLE_SMALL);
            body.push(0);
        }
        body.push(tag::SHORT_ASCII);
        body.push(0);
        body.push(tag::SHORT_ASCII);
        body.push(0);
        body.extend_from_slice(&10u32.to_le_bytes()); // first_line_number
        let lnotab = [6u8, 1, 4, 2]; // pc+6 -> line 11; pc+4 -> line 13
        body.extend_from_slice(&(lnotab.len() as u32).to_le_bytes());
        body.extend_from_slice(&lnotab);

        let stream = build_stream(&body);
        let code = load_module(&stream[..]).unwrap();
        assert_eq!(code.line_table, vec![(0, 10), (6, 11), (10, 13)]);
    }
}
