//! Tagged-reference object encoding.
//!
//! Every value the interpreter manipulates is a word-sized `RawObject`. The
//! low bits of the word discriminate between representations:
//!
//! ```text
//! xxxx...xxxx0   small integer   (tag size 1, low bit clear)
//! xxxx...xx01    heap object     (tag size 2, pointer in high bits)
//! xxxx...x011    header word     (tag size 3, only inside heap objects)
//! xxxx...00111   bool            (tag size 5)
//! xxxx...01111   none            (tag size 5)
//! xxxx...10111   error sentinel  (tag size 5)
//! xxxx...11111   small string    (tag size 5, up to 7 bytes inline)
//! ```
//!
//! This module models the word as a plain `u64` newtype (`RawObject`) plus a
//! family of zero-cost "view" newtypes (`SmallInt`, `HeapObject`, `Header`,
//! ...) the way a sum type's variants would be modeled, but without paying
//! for an enum discriminant: the tag bits above a `RawObject` double as both
//! representation and discriminant.

use std::fmt;

pub const WORD_BITS: u32 = 64;

/// A tagged reference: either an immediate value or a pointer to a heap
/// object preceded by a header word. Copy, 8 bytes, no drop glue — heap
/// references are handles into the GC-managed heap, not owning pointers.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct RawObject(u64);

impl fmt::Debug for RawObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_small_int() {
            write!(f, "SmallInt({})", self.as_small_int().value())
        } else if self.is_heap_object() {
            write!(f, "HeapObject(0x{:x})", self.as_heap_object().address())
        } else if self.is_bool() {
            write!(f, "Bool({})", self.as_bool().value())
        } else if self.is_none() {
            write!(f, "None")
        } else if self.is_error() {
            write!(f, "Error")
        } else if self.is_small_str() {
            write!(f, "SmallStr({:?})", self.as_small_str().as_str())
        } else {
            write!(f, "RawObject(0x{:016x})", self.0)
        }
    }
}

// ===========================================================================
// Tags
// ===========================================================================

pub(crate) const SMALL_INT_TAG: u64 = 0;
pub(crate) const SMALL_INT_TAG_BITS: u32 = 1;
pub(crate) const SMALL_INT_TAG_MASK: u64 = (1 << SMALL_INT_TAG_BITS) - 1;

pub(crate) const HEAP_OBJECT_TAG: u64 = 0b01;
pub(crate) const HEAP_OBJECT_TAG_BITS: u32 = 2;
pub(crate) const HEAP_OBJECT_TAG_MASK: u64 = (1 << HEAP_OBJECT_TAG_BITS) - 1;

pub(crate) const HEADER_TAG: u64 = 0b011;
pub(crate) const HEADER_TAG_BITS: u32 = 3;
pub(crate) const HEADER_TAG_MASK: u64 = (1 << HEADER_TAG_BITS) - 1;

pub(crate) const BOOL_TAG: u64 = 0b00111;
pub(crate) const NONE_TAG: u64 = 0b01111;
pub(crate) const ERROR_TAG: u64 = 0b10111;
pub(crate) const SMALL_STR_TAG: u64 = 0b11111;
pub(crate) const IMMEDIATE_TAG_BITS: u32 = 5;
pub(crate) const IMMEDIATE_TAG_MASK: u64 = (1 << IMMEDIATE_TAG_BITS) - 1;

/// The 31 reserved layout ids for immediates and built-in "pristine" types
/// (§4.4: "the first 31 ids are reserved ... in a fixed order"). Only the
/// handful the interpreter itself must name are enumerated; the rest are
/// reserved slots a future built-in type registry would claim.
pub mod builtin_layout {
    pub const SMALL_INT: u32 = 0;
    pub const BOOL: u32 = 1;
    pub const NONE: u32 = 2;
    pub const ERROR: u32 = 3;
    pub const SMALL_STR: u32 = 4;
    pub const LARGE_STR: u32 = 5;
    pub const LARGE_INT: u32 = 6;
    pub const TUPLE: u32 = 7;
    pub const BYTE_ARRAY: u32 = 8;
    /// A `Function` value built by `MAKE_FUNCTION` (spec.md §3's function
    /// entity, narrowed to what `CALL_FUNCTION`'s simple-interpreted path
    /// needs): a `ReferenceArray` of four slots, `(code index, globals
    /// module id, closure, defaults)`. Distinguished from a plain user
    /// `Tuple` by this reserved layout id rather than by a different
    /// `ObjectFormat`, the same way `LARGE_INT` is a `DataArray32` under a
    /// reserved id rather than a format of its own.
    pub const FUNCTION: u32 = 9;
    pub const FIRST_USER_LAYOUT: u32 = 31;
}

/// Discriminant returned by [`RawObject::tag`]; mirrors spec.md §4.1's
/// `tag(ref)` contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    SmallInt,
    Heap,
    Header,
    Bool,
    None,
    Error,
    SmallStr,
}

impl RawObject {
    #[inline]
    pub const fn from_bits(bits: u64) -> Self {
        RawObject(bits)
    }

    #[inline]
    pub const fn bits(self) -> u64 {
        self.0
    }

    /// `tag(ref)`: classify this reference. Checked from narrowest mask
    /// outward so that e.g. a small-int's zero low bit is tested first.
    #[inline]
    pub fn tag(self) -> Tag {
        if self.0 & SMALL_INT_TAG_MASK == SMALL_INT_TAG {
            return Tag::SmallInt;
        }
        if self.0 & HEAP_OBJECT_TAG_MASK == HEAP_OBJECT_TAG {
            return Tag::Heap;
        }
        match self.0 & IMMEDIATE_TAG_MASK {
            BOOL_TAG => Tag::Bool,
            NONE_TAG => Tag::None,
            ERROR_TAG => Tag::Error,
            SMALL_STR_TAG => Tag::SmallStr,
            _ => {
                if self.0 & HEADER_TAG_MASK == HEADER_TAG {
                    Tag::Header
                } else {
                    unreachable!("no tag matches bit pattern 0x{:016x}", self.0)
                }
            }
        }
    }

    #[inline]
    pub fn is_small_int(self) -> bool {
        matches!(self.tag(), Tag::SmallInt)
    }
    #[inline]
    pub fn is_heap_object(self) -> bool {
        matches!(self.tag(), Tag::Heap)
    }
    #[inline]
    pub fn is_header(self) -> bool {
        matches!(self.tag(), Tag::Header)
    }
    #[inline]
    pub fn is_bool(self) -> bool {
        matches!(self.tag(), Tag::Bool)
    }
    #[inline]
    pub fn is_none(self) -> bool {
        matches!(self.tag(), Tag::None)
    }
    #[inline]
    pub fn is_error(self) -> bool {
        matches!(self.tag(), Tag::Error)
    }
    #[inline]
    pub fn is_small_str(self) -> bool {
        matches!(self.tag(), Tag::SmallStr)
    }

    /// `layout-id(ref)`. For heap objects this reads the header; the other
    /// tags map to the fixed, reserved ids in [`builtin_layout`].
    pub fn layout_id(self) -> u32 {
        match self.tag() {
            Tag::SmallInt => builtin_layout::SMALL_INT,
            Tag::Bool => builtin_layout::BOOL,
            Tag::None => builtin_layout::NONE,
            Tag::Error => builtin_layout::ERROR,
            Tag::SmallStr => builtin_layout::SMALL_STR,
            Tag::Heap => self.as_heap_object().header().layout_id(),
            Tag::Header => panic!("layout_id: header words are not user-visible"),
        }
    }

    #[inline]
    pub fn as_small_int(self) -> SmallInt {
        debug_assert!(self.is_small_int());
        SmallInt(self)
    }
    #[inline]
    pub fn as_heap_object(self) -> HeapObject {
        debug_assert!(self.is_heap_object());
        HeapObject(self)
    }
    #[inline]
    pub fn as_header(self) -> Header {
        debug_assert!(self.is_header());
        Header(self)
    }
    #[inline]
    pub fn as_bool(self) -> RawBool {
        debug_assert!(self.is_bool());
        RawBool(self)
    }
    #[inline]
    pub fn as_small_str(self) -> SmallStr {
        debug_assert!(self.is_small_str());
        SmallStr(self)
    }

    pub fn none() -> Self {
        RawObject(NONE_TAG)
    }
    pub fn error() -> Self {
        RawObject(ERROR_TAG)
    }
}

impl Default for RawObject {
    /// An all-zero word is the small integer zero — §3's "accepted, safe
    /// value" for uninitialized storage.
    fn default() -> Self {
        RawObject(0)
    }
}

// ===========================================================================
// SmallInt
// ===========================================================================

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SmallInt(RawObject);

impl SmallInt {
    pub const TAG_BITS: u32 = SMALL_INT_TAG_BITS;
    pub const MIN_VALUE: i64 = -(1i64 << (WORD_BITS - (Self::TAG_BITS + 1)));
    pub const MAX_VALUE: i64 = (1i64 << (WORD_BITS - (Self::TAG_BITS + 1))) - 1;

    #[inline]
    pub fn is_valid(value: i64) -> bool {
        (Self::MIN_VALUE..=Self::MAX_VALUE).contains(&value)
    }

    /// Build a small integer, panicking if `value` does not fit. Callers on
    /// the hot path (`BINARY_ADD_SMALLINT`) should check overflow themselves
    /// and promote to `LargeInt` instead of calling this unchecked.
    pub fn from_i64(value: i64) -> Self {
        assert!(Self::is_valid(value), "SmallInt overflow: {value}");
        SmallInt(RawObject(((value as u64) << Self::TAG_BITS) | SMALL_INT_TAG))
    }

    pub fn try_from_i64(value: i64) -> Option<Self> {
        Self::is_valid(value).then(|| Self::from_i64(value))
    }

    #[inline]
    pub fn value(self) -> i64 {
        (self.0.0 as i64) >> Self::TAG_BITS
    }

    pub fn raw(self) -> RawObject {
        self.0
    }
}

impl fmt::Debug for SmallInt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SmallInt({})", self.value())
    }
}

// ===========================================================================
// Bool / None / Error singletons
// ===========================================================================

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct RawBool(RawObject);

impl RawBool {
    pub fn from_bool(value: bool) -> Self {
        RawBool(RawObject(BOOL_TAG | ((value as u64) << IMMEDIATE_TAG_BITS)))
    }
    pub fn value(self) -> bool {
        (self.0.0 >> IMMEDIATE_TAG_BITS) != 0
    }
    pub fn raw(self) -> RawObject {
        self.0
    }
}

// ===========================================================================
// SmallStr: up to 7 bytes inline.
// ===========================================================================

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SmallStr(RawObject);

impl SmallStr {
    pub const MAX_LENGTH: usize = 7; // one word minus one tag byte

    /// Returns `None` if `bytes` does not fit inline; the caller should fall
    /// back to a heap-allocated long string.
    pub fn try_from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() > Self::MAX_LENGTH {
            return None;
        }
        let mut word: u64 = SMALL_STR_TAG | ((bytes.len() as u64) << IMMEDIATE_TAG_BITS);
        for (i, b) in bytes.iter().enumerate() {
            word |= (*b as u64) << (8 * (i + 1));
        }
        Some(SmallStr(RawObject(word)))
    }

    pub fn len(self) -> usize {
        ((self.0.0 >> IMMEDIATE_TAG_BITS) & (Self::MAX_LENGTH as u64)) as usize
    }

    pub fn is_empty(self) -> bool {
        self.len() == 0
    }

    pub fn byte_at(self, index: usize) -> u8 {
        debug_assert!(index < self.len());
        (self.0.0 >> (8 * (index + 1))) as u8
    }

    pub fn to_bytes(self) -> [u8; Self::MAX_LENGTH] {
        let mut out = [0u8; Self::MAX_LENGTH];
        for (i, slot) in out.iter_mut().enumerate().take(self.len()) {
            *slot = self.byte_at(i);
        }
        out
    }

    pub fn as_str(self) -> &'static str {
        // Leak a tiny, fixed-size buffer's worth of text for Debug/Display
        // purposes only; small strings are re-decoded from bits on demand so
        // there is no persistent allocation to leak in practice (at most 7
        // bytes, and call sites are debug/test paths).
        let bytes = self.to_bytes();
        let s = std::str::from_utf8(&bytes[..self.len()]).unwrap_or("<invalid utf8>");
        Box::leak(s.to_string().into_boxed_str())
    }

    pub fn raw(self) -> RawObject {
        self.0
    }
}

// ===========================================================================
// Header word
// ===========================================================================

/// `ObjectFormat`: the three-bit field in a header distinguishing how the
/// scavenger must walk the object's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ObjectFormat {
    DataArray8 = 0,
    DataArray16 = 1,
    DataArray32 = 2,
    DataArray64 = 3,
    DataArray128 = 4,
    ReferenceArray = 5,
    DataInstance = 6,
    ReferenceInstance = 7,
}

impl ObjectFormat {
    pub fn from_bits(bits: u64) -> Self {
        match bits {
            0 => ObjectFormat::DataArray8,
            1 => ObjectFormat::DataArray16,
            2 => ObjectFormat::DataArray32,
            3 => ObjectFormat::DataArray64,
            4 => ObjectFormat::DataArray128,
            5 => ObjectFormat::ReferenceArray,
            6 => ObjectFormat::DataInstance,
            7 => ObjectFormat::ReferenceInstance,
            other => panic!("invalid object format bits: {other}"),
        }
    }

    /// True for the two formats whose payload words are themselves
    /// `RawObject` references the scavenger must follow.
    pub fn contains_references(self) -> bool {
        matches!(
            self,
            ObjectFormat::ReferenceArray | ObjectFormat::ReferenceInstance
        )
    }
}

const HEADER_FORMAT_OFFSET: u32 = 3;
const HEADER_FORMAT_SIZE: u32 = 3;
const HEADER_FORMAT_MASK: u64 = (1 << HEADER_FORMAT_SIZE) - 1;

const HEADER_LAYOUT_ID_OFFSET: u32 = 6;
const HEADER_LAYOUT_ID_SIZE: u32 = 20;
const HEADER_LAYOUT_ID_MASK: u64 = (1 << HEADER_LAYOUT_ID_SIZE) - 1;

const HEADER_HASH_OFFSET: u32 = 26;
const HEADER_HASH_SIZE: u32 = 30;
const HEADER_HASH_MASK: u64 = (1 << HEADER_HASH_SIZE) - 1;

const HEADER_COUNT_OFFSET: u32 = 56;
const HEADER_COUNT_SIZE: u32 = 8;
const HEADER_COUNT_MASK: u64 = (1 << HEADER_COUNT_SIZE) - 1;

/// Sentinel count value meaning "the real count overflows into the word
/// preceding the header" (spec.md §3).
pub const COUNT_OVERFLOW_FLAG: u8 = (1 << HEADER_COUNT_SIZE) - 1;
pub const COUNT_MAX: u32 = COUNT_OVERFLOW_FLAG as u32 - 1;
pub const MAX_LAYOUT_ID: u32 = (1 << HEADER_LAYOUT_ID_SIZE) - 1;

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Header(RawObject);

impl Header {
    pub fn from_parts(count: u32, hash: u32, layout_id: u32, format: ObjectFormat) -> Self {
        assert!(layout_id <= MAX_LAYOUT_ID, "layout id overflow: {layout_id}");
        let count_field = if count > COUNT_MAX {
            COUNT_OVERFLOW_FLAG as u64
        } else {
            count as u64
        };
        let word = HEADER_TAG
            | ((format as u64) << HEADER_FORMAT_OFFSET)
            | ((layout_id as u64) << HEADER_LAYOUT_ID_OFFSET)
            | (((hash as u64) & HEADER_HASH_MASK) << HEADER_HASH_OFFSET)
            | (count_field << HEADER_COUNT_OFFSET);
        Header(RawObject(word))
    }

    pub fn format(self) -> ObjectFormat {
        ObjectFormat::from_bits((self.0.0 >> HEADER_FORMAT_OFFSET) & HEADER_FORMAT_MASK)
    }

    pub fn layout_id(self) -> u32 {
        ((self.0.0 >> HEADER_LAYOUT_ID_OFFSET) & HEADER_LAYOUT_ID_MASK) as u32
    }

    pub fn with_layout_id(self, layout_id: u32) -> Self {
        assert!(layout_id <= MAX_LAYOUT_ID);
        let cleared = self.0.0 & !(HEADER_LAYOUT_ID_MASK << HEADER_LAYOUT_ID_OFFSET);
        Header(RawObject(
            cleared | ((layout_id as u64) << HEADER_LAYOUT_ID_OFFSET),
        ))
    }

    pub fn hash_code(self) -> u32 {
        ((self.0.0 >> HEADER_HASH_OFFSET) & HEADER_HASH_MASK) as u32
    }

    pub fn with_hash_code(self, hash: u32) -> Self {
        let cleared = self.0.0 & !(HEADER_HASH_MASK << HEADER_HASH_OFFSET);
        Header(RawObject(
            cleared | (((hash as u64) & HEADER_HASH_MASK) << HEADER_HASH_OFFSET),
        ))
    }

    pub fn count_or_overflow(self) -> u8 {
        ((self.0.0 >> HEADER_COUNT_OFFSET) & HEADER_COUNT_MASK) as u8
    }

    pub fn has_overflow_count(self) -> bool {
        self.count_or_overflow() == COUNT_OVERFLOW_FLAG
    }

    pub fn raw(self) -> RawObject {
        self.0
    }

    pub fn from_raw(raw: RawObject) -> Self {
        debug_assert!(raw.is_header());
        Header(raw)
    }
}

impl fmt::Debug for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Header")
            .field("format", &self.format())
            .field("layout_id", &self.layout_id())
            .field("hash_code", &self.hash_code())
            .field("count_or_overflow", &self.count_or_overflow())
            .finish()
    }
}

// ===========================================================================
// HeapObject: a tagged pointer to a header-prefixed allocation.
// ===========================================================================

/// `kIsForwarded`-equivalent: a forwarding marker written over a from-space
/// object's header word during a scavenge (spec.md §4.2).
const FORWARDED_MARKER: u64 = u64::MAX - 2;

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct HeapObject(RawObject);

impl HeapObject {
    /// Build a tagged reference from the address of the object's first
    /// payload word (i.e. one word past the header).
    ///
    /// # Safety
    /// `address` must point at a live, header-prefixed allocation for as
    /// long as the returned reference is used.
    pub unsafe fn from_address(address: usize) -> Self {
        debug_assert_eq!(address & HEAP_OBJECT_TAG_MASK as usize, 0);
        HeapObject(RawObject(address as u64 | HEAP_OBJECT_TAG))
    }

    #[inline]
    pub fn address(self) -> usize {
        (self.0.0 & !HEAP_OBJECT_TAG_MASK) as usize
    }

    /// # Safety
    /// The header word must be readable (object not concurrently moved).
    pub unsafe fn header(self) -> Header {
        let ptr = (self.address() - 8) as *const u64;
        Header::from_raw(RawObject(unsafe { *ptr }))
    }

    /// # Safety
    /// The header word must be writable.
    pub unsafe fn set_header(self, header: Header) {
        let ptr = (self.address() - 8) as *mut u64;
        unsafe { *ptr = header.raw().bits() };
    }

    /// # Safety
    /// The header-overflow word (two words before the payload) must be
    /// readable; only valid when `header().has_overflow_count()`.
    pub unsafe fn header_overflow(self) -> usize {
        let ptr = (self.address() - 16) as *const u64;
        unsafe { *ptr as usize }
    }

    /// True if this object's header was overwritten with a forwarding
    /// marker by an in-progress or completed scavenge.
    ///
    /// # Safety
    /// The header word must be readable.
    pub unsafe fn is_forwarded(self) -> bool {
        let ptr = (self.address() - 8) as *const u64;
        unsafe { *ptr == FORWARDED_MARKER }
    }

    /// # Safety
    /// Caller must have already checked `is_forwarded`; the word following
    /// the marker holds the new tagged reference.
    pub unsafe fn forwarding_address(self) -> RawObject {
        let ptr = self.address() as *const u64;
        RawObject(unsafe { *ptr })
    }

    /// Mark this (from-space) object as forwarded to `new_location`.
    ///
    /// # Safety
    /// Only valid on a from-space object not yet scanned by the same
    /// scavenge; overwrites the header word and the first payload word.
    pub unsafe fn forward_to(self, new_location: RawObject) {
        let header_ptr = (self.address() - 8) as *mut u64;
        let payload_ptr = self.address() as *mut u64;
        unsafe {
            *payload_ptr = new_location.bits();
            *header_ptr = FORWARDED_MARKER;
        }
    }

    pub fn raw(self) -> RawObject {
        self.0
    }
}

impl fmt::Debug for HeapObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HeapObject(0x{:x})", self.address())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_int_round_trip() {
        for n in [-5i64, -1, 0, 1, 5, SmallInt::MAX_VALUE, SmallInt::MIN_VALUE] {
            let si = SmallInt::from_i64(n);
            assert!(si.raw().is_small_int());
            assert_eq!(si.value(), n);
        }
    }

    #[test]
    fn small_int_range_rejects_overflow() {
        assert!(!SmallInt::is_valid(SmallInt::MAX_VALUE + 1));
        assert!(!SmallInt::is_valid(SmallInt::MIN_VALUE - 1));
        assert!(SmallInt::try_from_i64(i64::MAX).is_none());
    }

    #[test]
    fn zero_word_is_small_int_zero() {
        let zero = RawObject::from_bits(0);
        assert!(zero.is_small_int());
        assert_eq!(zero.as_small_int().value(), 0);
    }

    #[test]
    fn tag_discrimination_is_exclusive() {
        let values = [
            SmallInt::from_i64(42).raw(),
            RawBool::from_bool(true).raw(),
            RawBool::from_bool(false).raw(),
            RawObject::none(),
            RawObject::error(),
            SmallStr::try_from_bytes(b"hi").unwrap().raw(),
        ];
        for v in values {
            let mut matches = 0;
            matches += v.is_small_int() as u32;
            matches += v.is_heap_object() as u32;
            matches += v.is_bool() as u32;
            matches += v.is_none() as u32;
            matches += v.is_error() as u32;
            matches += v.is_small_str() as u32;
            assert_eq!(matches, 1, "{v:?} matched {matches} tag predicates");
        }
    }

    #[test]
    fn bool_and_none_and_error_are_singletons() {
        assert_eq!(RawBool::from_bool(true).raw(), RawBool::from_bool(true).raw());
        assert_eq!(RawObject::none(), RawObject::none());
        assert_eq!(RawObject::error(), RawObject::error());
        assert_ne!(RawBool::from_bool(true).raw(), RawBool::from_bool(false).raw());
    }

    #[test]
    fn small_str_round_trip() {
        for s in ["", "a", "hello12"] {
            let ss = SmallStr::try_from_bytes(s.as_bytes()).unwrap();
            assert_eq!(ss.len(), s.len());
            assert_eq!(&ss.to_bytes()[..ss.len()], s.as_bytes());
        }
        assert!(SmallStr::try_from_bytes(b"too-long-string").is_none());
    }

    #[test]
    fn header_round_trip() {
        for (format, layout_id, hash, count) in [
            (ObjectFormat::ReferenceInstance, 0u32, 0u32, 0u32),
            (ObjectFormat::DataArray8, 12345, 987654321, 7),
            (ObjectFormat::ReferenceArray, MAX_LAYOUT_ID, (1 << 30) - 1, 254),
        ] {
            let h = Header::from_parts(count, hash, layout_id, format);
            assert_eq!(h.format(), format);
            assert_eq!(h.layout_id(), layout_id);
            assert_eq!(h.hash_code(), hash);
            assert_eq!(h.count_or_overflow() as u32, count);
            assert!(h.raw().is_header());
        }
    }

    #[test]
    fn header_overflow_sentinel() {
        let h = Header::from_parts(COUNT_MAX + 1, 0, 0, ObjectFormat::DataInstance);
        assert!(h.has_overflow_count());
    }
}
