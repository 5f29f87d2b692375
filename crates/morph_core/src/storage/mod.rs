//! Component storage: per-slot cells and the allocators that back them.
//!
//! Every component instance lives in an allocator-supplied block. The bytes
//! just before the component's data hold an [`OwnerTag`] naming the owning
//! object and slot, so a component can find its object from its own address.

mod allocator;
mod cell;
mod tracking;

pub use allocator::{
    block_layout, AllocatorHandle, ComponentAllocator, HeapAllocator, ObjectAllocator, Transfer,
    HEAP,
};
pub use cell::{owner_of, CellState, OwnerTag, StorageCell, OWNER_TAG_SIZE};
pub use tracking::TrackingAllocator;

pub(crate) use cell::vacant_cells;
