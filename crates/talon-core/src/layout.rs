//! Hidden layouts: the attribute-name-to-offset DAG shared structurally by
//! instances with the same insertion history.
//!
//! Grounded on `AttributeInfo`/`AttributeFlags` from the reference
//! implementation's `layout.h`: each attribute is either stored directly
//! in the instance's fixed slots (`IN_OBJECT`) or in its overflow tuple,
//! and can be marked `DELETED` (a tombstone kept so later transitions
//! still see consistent offsets) or `READ_ONLY`.

use crate::error::LayoutError;
use std::collections::HashMap;

/// In-object attribute slots an instance reserves directly in its own
/// storage before `add_attribute` starts assigning overflow-tuple offsets
/// instead (spec.md §3/§4.3's overflow attribute table). Kept small and
/// fixed so an instance's physical size never depends on how many
/// attributes its layout has grown to carry.
pub const MAX_IN_OBJECT_SLOTS: u32 = 4;

bitflags::bitflags! {
    /// `AttributeFlags` from the reference layout model.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AttributeFlags: u8 {
        const NONE = 0;
        const IN_OBJECT = 1 << 0;
        const DELETED = 1 << 1;
        const FIXED_OFFSET = 1 << 2;
        const READ_ONLY = 1 << 3;
    }
}

/// One entry in a layout's attribute table: where the value lives and how
/// it may be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeInfo {
    offset: u32,
    flags: AttributeFlags,
}

impl AttributeInfo {
    pub fn new(offset: u32, flags: AttributeFlags) -> Self {
        AttributeInfo { offset, flags }
    }

    pub fn offset(self) -> u32 {
        self.offset
    }

    pub fn flags(self) -> AttributeFlags {
        self.flags
    }

    pub fn is_in_object(self) -> bool {
        self.flags.contains(AttributeFlags::IN_OBJECT)
    }

    pub fn is_deleted(self) -> bool {
        self.flags.contains(AttributeFlags::DELETED)
    }

    pub fn is_read_only(self) -> bool {
        self.flags.contains(AttributeFlags::READ_ONLY)
    }

    fn tombstoned(self) -> Self {
        AttributeInfo {
            offset: self.offset,
            flags: self.flags | AttributeFlags::DELETED,
        }
    }
}

/// A transition edge out of a layout: adding or deleting `name` moves an
/// instance to `target`. Cached so that two instances which add the same
/// attributes in the same order converge on one layout id rather than
/// minting a fresh layout per instance (spec.md invariant #3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Edge {
    AddAttribute,
    DeleteAttribute,
}

/// A single node in the layout DAG: a fixed mapping from attribute name to
/// slot plus the set of transitions already taken out of it.
#[derive(Debug, Clone)]
pub struct Layout {
    id: u32,
    attributes: HashMap<String, AttributeInfo>,
    /// Number of `IN_OBJECT` slots this layout's instances reserve inline.
    in_object_count: u32,
    /// Number of attributes pushed into the overflow tuple once
    /// `in_object_count` hit `MAX_IN_OBJECT_SLOTS`.
    overflow_count: u32,
    transitions: HashMap<(String, Edge), u32>,
}

impl Layout {
    fn empty(id: u32) -> Self {
        Layout {
            id,
            attributes: HashMap::new(),
            in_object_count: 0,
            overflow_count: 0,
            transitions: HashMap::new(),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn attribute_count(&self) -> usize {
        self.attributes.values().filter(|a| !a.is_deleted()).count()
    }

    pub fn in_object_count(&self) -> u32 {
        self.in_object_count
    }

    pub fn overflow_count(&self) -> u32 {
        self.overflow_count
    }

    pub fn find_attribute(&self, name: &str) -> Option<AttributeInfo> {
        self.attributes
            .get(name)
            .copied()
            .filter(|a| !a.is_deleted())
    }
}

/// The runtime-wide table of layouts, addressable by id, with the
/// transition cache that makes layout ids a function of insertion history
/// rather than of allocation order.
#[derive(Debug, Clone)]
pub struct LayoutTable {
    layouts: Vec<Layout>,
}

impl Default for LayoutTable {
    fn default() -> Self {
        Self::new()
    }
}

impl LayoutTable {
    pub fn new() -> Self {
        LayoutTable {
            layouts: vec![Layout::empty(0)],
        }
    }

    /// The empty root layout every fresh instance starts from.
    pub fn root_layout_id(&self) -> u32 {
        0
    }

    pub fn get(&self, id: u32) -> &Layout {
        &self.layouts[id as usize]
    }

    fn alloc_layout(&mut self, from: &Layout) -> Result<u32, LayoutError> {
        let id = self.layouts.len();
        if id > crate::raw::MAX_LAYOUT_ID as usize {
            return Err(LayoutError::LayoutIdSpaceExhausted);
        }
        let mut next = from.clone();
        next.id = id as u32;
        self.layouts.push(next);
        Ok(id as u32)
    }

    /// `add_attribute(layout, name) -> layout'`. If this exact transition
    /// has been taken before from `layout`, returns the cached target
    /// layout id instead of minting a new one. Once `in_object_count`
    /// reaches `MAX_IN_OBJECT_SLOTS`, new attributes go to the overflow
    /// tuple instead (`AttributeInfo::offset` then indexes into it, not
    /// into the instance's own in-object slots).
    pub fn add_attribute(&mut self, layout_id: u32, name: &str) -> Result<u32, LayoutError> {
        let key = (name.to_string(), Edge::AddAttribute);
        if let Some(&cached) = self.get(layout_id).transitions.get(&key) {
            return Ok(cached);
        }
        let from = self.get(layout_id).clone();
        if from.attributes.get(name).is_some_and(|a| !a.is_deleted()) {
            return Err(LayoutError::AttributeAlreadyExists(name.to_string()));
        }
        let (offset, flags) = if from.in_object_count < MAX_IN_OBJECT_SLOTS {
            (from.in_object_count, AttributeFlags::IN_OBJECT)
        } else {
            (from.overflow_count, AttributeFlags::NONE)
        };
        let new_id = self.alloc_layout(&from)?;
        let new_layout = &mut self.layouts[new_id as usize];
        new_layout
            .attributes
            .insert(name.to_string(), AttributeInfo::new(offset, flags));
        if flags.contains(AttributeFlags::IN_OBJECT) {
            new_layout.in_object_count += 1;
        } else {
            new_layout.overflow_count += 1;
        }
        self.layouts[layout_id as usize]
            .transitions
            .insert(key, new_id);
        Ok(new_id)
    }

    /// `delete_attribute(layout, name) -> layout'`. Tombstones the
    /// attribute rather than compacting offsets, so sibling layouts that
    /// never took the deletion still see the same slot numbering.
    pub fn delete_attribute(&mut self, layout_id: u32, name: &str) -> Result<u32, LayoutError> {
        let key = (name.to_string(), Edge::DeleteAttribute);
        if let Some(&cached) = self.get(layout_id).transitions.get(&key) {
            return Ok(cached);
        }
        let from = self.get(layout_id).clone();
        let info = from
            .attributes
            .get(name)
            .copied()
            .filter(|a| !a.is_deleted())
            .ok_or_else(|| LayoutError::NoSuchAttribute(name.to_string()))?;
        let new_id = self.alloc_layout(&from)?;
        let new_layout = &mut self.layouts[new_id as usize];
        new_layout
            .attributes
            .insert(name.to_string(), info.tombstoned());
        self.layouts[layout_id as usize]
            .transitions
            .insert(key, new_id);
        Ok(new_id)
    }

    /// `transition_type(layout, target_layout)`: used when an instance's
    /// class is reassigned outright rather than gaining/losing one
    /// attribute (e.g. `__class__` assignment). No caching: this is rare
    /// enough not to warrant a transition edge.
    pub fn transition_type(&mut self, from_layout_id: u32, new_base: u32) -> Result<u32, LayoutError> {
        let from = self.get(new_base).clone();
        self.alloc_layout(&from).map(|id| {
            let _ = from_layout_id;
            id
        })
    }
}
