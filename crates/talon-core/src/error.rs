//! Hand-rolled error types for `talon-core`.
//!
//! No `anyhow`/`thiserror`: each failing subsystem gets its own enum with a
//! manual `Display` impl, the way `seq_runtime::serialize::SerializeError`
//! is written in the teacher crate.

use std::fmt;

/// Errors raised by the layout DAG (`crate::layout`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayoutError {
    /// `add_attribute` was asked to add a name the layout already has.
    AttributeAlreadyExists(String),
    /// `delete_attribute`/`find_attribute` was asked about a name the
    /// layout does not have.
    NoSuchAttribute(String),
    /// The runtime-wide layout table is full (20-bit layout id space
    /// exhausted).
    LayoutIdSpaceExhausted,
}

impl fmt::Display for LayoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayoutError::AttributeAlreadyExists(name) => {
                write!(f, "attribute already exists: {name}")
            }
            LayoutError::NoSuchAttribute(name) => write!(f, "no such attribute: {name}"),
            LayoutError::LayoutIdSpaceExhausted => write!(f, "layout id space exhausted"),
        }
    }
}

impl std::error::Error for LayoutError {}

/// Errors raised by the heap (`crate::heap`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeapError {
    /// Both semispaces are full after a scavenge; the heap cannot grow
    /// further under the configured size.
    OutOfMemory { requested_bytes: usize },
    /// An allocation request exceeded the maximum single-object size.
    AllocationTooLarge { requested_bytes: usize, max_bytes: usize },
}

impl fmt::Display for HeapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeapError::OutOfMemory { requested_bytes } => {
                write!(f, "out of memory: could not satisfy {requested_bytes} byte allocation")
            }
            HeapError::AllocationTooLarge { requested_bytes, max_bytes } => write!(
                f,
                "allocation of {requested_bytes} bytes exceeds maximum object size {max_bytes}"
            ),
        }
    }
}

impl std::error::Error for HeapError {}

/// Umbrella error for `talon-core` public APIs that can fail for more than
/// one subsystem-specific reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    Layout(LayoutError),
    Heap(HeapError),
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::Layout(e) => write!(f, "{e}"),
            CoreError::Heap(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for CoreError {}

impl From<LayoutError> for CoreError {
    fn from(e: LayoutError) -> Self {
        CoreError::Layout(e)
    }
}

impl From<HeapError> for CoreError {
    fn from(e: HeapError) -> Self {
        CoreError::Heap(e)
    }
}
