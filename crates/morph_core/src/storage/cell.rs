// cell.rs - Per-slot storage records
//
// One cell per slot, one cell array per object. A cell is either vacant,
// live (its component is constructed), or relocating (its component is being
// handed from one cell array or buffer to another).

use crate::object::ObjectId;
use bytemuck::{Pod, Zeroable};
use std::mem::size_of;
use std::ptr::{self, NonNull};

/// Back-reference written in front of every component: owning object id in
/// the upper 48 bits, slot index in the lower 16.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct OwnerTag(u64);

/// Bytes reserved in front of component data for the owner tag.
pub const OWNER_TAG_SIZE: usize = size_of::<OwnerTag>();

impl OwnerTag {
    const SLOT_BITS: u32 = 16;
    const SLOT_MASK: u64 = (1 << Self::SLOT_BITS) - 1;

    /// Tag of a cell that was never bound.
    pub const NONE: OwnerTag = OwnerTag(0);

    pub fn new(object: ObjectId, slot: usize) -> Self {
        debug_assert!(slot as u64 <= Self::SLOT_MASK, "slot {slot} does not fit an owner tag");
        Self((object.to_bits() << Self::SLOT_BITS) | (slot as u64 & Self::SLOT_MASK))
    }

    pub fn object(&self) -> ObjectId {
        ObjectId::from_bits(self.0 >> Self::SLOT_BITS)
    }

    pub fn slot(&self) -> usize {
        (self.0 & Self::SLOT_MASK) as usize
    }

    pub fn is_none(&self) -> bool {
        *self == Self::NONE
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CellState {
    #[default]
    Vacant,
    Live,
    Relocating,
}

/// Storage record for one slot: buffer, data offset inside it, and the cached owner tag.
///
/// Invariant: the buffer is set iff the state is not `Vacant`.
#[derive(Debug, Default)]
pub struct StorageCell {
    buffer: Option<NonNull<u8>>,
    offset: usize,
    owner: OwnerTag,
    state: CellState,
}

impl StorageCell {
    pub const fn vacant() -> Self {
        Self {
            buffer: None,
            offset: 0,
            owner: OwnerTag::NONE,
            state: CellState::Vacant,
        }
    }

    /// Point the cell at `buffer`, with component data starting `offset` bytes in.
    /// Leaves the state alone; callers mark the cell live once data is constructed.
    ///
    /// # Safety
    /// `buffer` must stay valid for as long as the cell refers to it and span at
    /// least `offset` bytes, of which the last [`OWNER_TAG_SIZE`] are writable.
    pub unsafe fn set(&mut self, buffer: NonNull<u8>, offset: usize) -> NonNull<u8> {
        debug_assert!(offset >= OWNER_TAG_SIZE, "no room for an owner tag before offset {offset}");
        self.buffer = Some(buffer);
        self.offset = offset;
        NonNull::new_unchecked(buffer.as_ptr().add(offset))
    }

    /// Forget the storage. Does not destroy or free anything.
    pub fn clear(&mut self) {
        *self = Self::vacant();
    }

    /// Pointer to the component data, or `None` when vacant.
    pub fn data(&self) -> Option<NonNull<u8>> {
        self.buffer.map(|buffer| unsafe {
            // SAFETY: `set` guarantees the buffer spans at least `offset` bytes.
            NonNull::new_unchecked(buffer.as_ptr().add(self.offset))
        })
    }

    #[inline]
    pub fn buffer(&self) -> Option<NonNull<u8>> {
        self.buffer
    }

    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Cached owner tag, as last written by `bind_owner`.
    #[inline]
    pub fn owner(&self) -> OwnerTag {
        self.owner
    }

    #[inline]
    pub fn state(&self) -> CellState {
        self.state
    }

    #[inline]
    pub fn is_vacant(&self) -> bool {
        self.state == CellState::Vacant
    }

    /// Write `tag` into the bytes preceding the data and cache it.
    pub fn bind_owner(&mut self, tag: OwnerTag) {
        self.owner = tag;
        if let Some(data) = self.data() {
            unsafe {
                // SAFETY: `set` reserved OWNER_TAG_SIZE writable bytes before the data.
                ptr::copy_nonoverlapping(
                    bytemuck::bytes_of(&tag).as_ptr(),
                    data.as_ptr().sub(OWNER_TAG_SIZE),
                    OWNER_TAG_SIZE,
                );
            }
        }
    }

    pub(crate) fn mark_live(&mut self) {
        debug_assert!(self.buffer.is_some(), "marking a cell without storage live");
        self.state = CellState::Live;
    }

    pub(crate) fn mark_relocating(&mut self) {
        debug_assert!(self.buffer.is_some(), "relocating a cell without storage");
        self.state = CellState::Relocating;
    }

    /// Move the record out, leaving this cell vacant.
    pub(crate) fn take(&mut self) -> StorageCell {
        std::mem::take(self)
    }
}

/// Recover the owner tag stored in front of a component's data.
///
/// # Safety
/// `data` must be the data pointer of a cell that has been bound with `bind_owner`
/// and whose storage is still allocated.
pub unsafe fn owner_of(data: NonNull<u8>) -> OwnerTag {
    let header = std::slice::from_raw_parts(data.as_ptr().sub(OWNER_TAG_SIZE), OWNER_TAG_SIZE);
    bytemuck::pod_read_unaligned(header)
}

/// Cell array of `len` vacant cells.
pub(crate) fn vacant_cells(len: usize) -> Box<[StorageCell]> {
    (0..len).map(|_| StorageCell::vacant()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_tag_packs_object_and_slot() {
        let object = ObjectId::from_bits(0xABCDE);
        let tag = OwnerTag::new(object, 7);
        assert_eq!(tag.object(), object);
        assert_eq!(tag.slot(), 7);
        assert!(!tag.is_none());
        assert!(OwnerTag::default().is_none());
    }

    #[test]
    fn vacant_cell_has_no_data() {
        let cell = StorageCell::vacant();
        assert!(cell.is_vacant());
        assert!(cell.data().is_none());
        assert!(cell.buffer().is_none());
        assert!(cell.owner().is_none());
    }

    #[test]
    fn bind_owner_writes_header_bytes() {
        let mut block = [0u64; 4];
        let buffer = NonNull::from(&mut block).cast::<u8>();
        let mut cell = StorageCell::vacant();
        let data = unsafe { cell.set(buffer, 2 * OWNER_TAG_SIZE) };
        assert_eq!(cell.data(), Some(data));
        assert_eq!(cell.offset(), 2 * OWNER_TAG_SIZE);

        let tag = OwnerTag::new(ObjectId::from_bits(42), 3);
        cell.bind_owner(tag);
        cell.mark_live();
        assert_eq!(cell.state(), CellState::Live);
        assert_eq!(cell.owner(), tag);
        assert_eq!(unsafe { owner_of(data) }, tag);

        let moved = cell.take();
        assert!(cell.is_vacant());
        assert_eq!(moved.owner(), tag);
        assert_eq!(moved.state(), CellState::Live);
    }

    #[test]
    fn vacant_cells_builds_requested_length() {
        let cells = vacant_cells(4);
        assert_eq!(cells.len(), 4);
        assert!(cells.iter().all(StorageCell::is_vacant));
        assert!(vacant_cells(0).is_empty());
    }
}
