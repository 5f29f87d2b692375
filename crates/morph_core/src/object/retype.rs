// retype.rs - Transition an object between two compositions
//
// Components present in both compositions keep their storage and value.
// Components only in the old composition are destroyed, components only in
// the new one are constructed, either by default or by copy from a source
// object of the target composition.

use crate::mixin::{Capability, ComponentDescriptor, CompositionDescriptor, DEFAULT_DISPATCH_SLOT};
use crate::object::{Object, ObjectId};
use crate::storage::{
    vacant_cells, AllocatorHandle, CellState, ComponentAllocator, OwnerTag, StorageCell,
    OWNER_TAG_SIZE,
};
use std::mem;
use std::ptr::{self, NonNull};
use tracing::{debug, trace, warn};

/// Outcome of a retype. Never an error by itself: callers decide whether a
/// degraded copy must be surfaced as a failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetypeStatus {
    Success,
    /// A shared component could not be copy-assigned from the source and kept its old value.
    BadAssign,
    /// An added component could not be copy-constructed from the source and was
    /// default-constructed instead.
    BadCopyConstruct,
}

impl RetypeStatus {
    #[inline]
    pub fn is_success(self) -> bool {
        self == RetypeStatus::Success
    }
}

impl Object {
    /// Change this object's composition to `target`.
    ///
    /// Shared components keep their values, removed ones are destroyed exactly
    /// once and added ones are default-constructed. Always succeeds.
    pub fn retype(&mut self, target: &'static CompositionDescriptor) -> RetypeStatus {
        if ptr::eq(self.composition, target) {
            return RetypeStatus::Success;
        }
        self.retype_from(target, None)
    }

    /// Retyping engine. `source`, when given, is the cell array of an object whose
    /// composition is `target`: shared components are copy-assigned from it and
    /// added ones copy-constructed from it.
    ///
    /// Failed copies do not stop the walk; the object always ends fully constructed.
    pub(crate) fn retype_from(
        &mut self,
        target: &'static CompositionDescriptor,
        source: Option<&[StorageCell]>,
    ) -> RetypeStatus {
        let mut status = RetypeStatus::Success;
        let old = self.composition;
        let mut old_cells = mem::take(&mut self.cells);
        let mut new_cells = alloc_cells(self.allocator.as_ref(), target);

        for &info in old.components() {
            let old_slot = old.slot_of(info.id());
            match target.slot(info.id()) {
                Some(new_slot) => {
                    let cell = &mut new_cells[new_slot];
                    *cell = old_cells[old_slot].take();
                    cell.mark_relocating();

                    if let Some(source) = source {
                        if !info.supports(Capability::CopyAssign) {
                            warn!(component = info.name(), "component cannot be copy-assigned");
                            status = RetypeStatus::BadAssign;
                        } else if let (Some(assign), Some(dest), Some(from)) =
                            (info.lifecycle().copy_assign, cell.data(), source[new_slot].data())
                        {
                            // SAFETY: both cells hold live instances of `info`.
                            unsafe { assign(dest, from) };
                        }
                    }
                }
                None => destroy_component(self.allocator.as_ref(), info, &mut old_cells[old_slot], self.id),
            }
        }

        if !old.is_empty() {
            release_cells(self.allocator.as_ref(), old_cells);
            old.release_object();
        }
        target.acquire_object();
        self.composition = target;
        self.cells = new_cells;

        for &info in target.components() {
            let slot = target.slot_of(info.id());
            let cell = &mut self.cells[slot];
            match cell.state() {
                CellState::Relocating => {
                    cell.bind_owner(OwnerTag::new(self.id, slot));
                    cell.mark_live();
                }
                CellState::Vacant => {
                    let from = source.and_then(|source| source[slot].data());
                    if !make_component(self.allocator.as_ref(), info, cell, self.id, slot, from) {
                        status = RetypeStatus::BadCopyConstruct;
                    }
                }
                CellState::Live => {
                    debug_assert!(false, "component '{}' constructed twice", info.name());
                }
            }
        }

        if !self.is_empty() {
            self.bind_dispatch();
        }

        debug!(
            object = self.id.to_bits(),
            from = old.id(),
            to = target.id(),
            copied = source.is_some(),
            ?status,
            "retyped object"
        );
        status
    }

    /// Move every component and the cell array out of storage served by `from`
    /// into storage served by the object's current allocator. Every component
    /// must support move construction.
    pub(crate) fn adopt_storage(&mut self, from: &AllocatorHandle) {
        let composition = self.composition;
        if composition.is_empty() {
            return;
        }
        let mut old_cells = mem::take(&mut self.cells);
        let mut new_cells = alloc_cells(self.allocator.as_ref(), composition);

        for &info in composition.components() {
            let slot = composition.slot_of(info.id());
            let old = old_cells[slot].take();
            let (Some(old_buffer), Some(old_data)) = (old.buffer(), old.data()) else {
                continue;
            };
            let allocator = allocator_for(self.allocator.as_ref(), info);
            let (buffer, offset) = allocator.allocate(info, self.id);
            let cell = &mut new_cells[slot];
            // SAFETY: the block is fresh, the old one holds a live instance of `info`
            // handed out by `from`, and nothing reads it after the move.
            unsafe {
                let data = cell.set(buffer, offset);
                cell.bind_owner(OwnerTag::new(self.id, slot));
                let moved = allocator.move_construct(info, data, old_data);
                debug_assert!(moved, "component '{}' cannot be move-constructed", info.name());
                from.component().deallocate(old_buffer, old.offset(), info, self.id);
            }
            cell.mark_live();
            trace!(object = self.id.to_bits(), component = info.name(), slot, "adopted component");
        }

        release_cells(Some(from), old_cells);
        self.cells = new_cells;
    }

    /// Point the default dispatch cell at this object's anchor and tag it.
    pub(crate) fn bind_dispatch(&mut self) {
        let anchor = self
            .anchor
            .get_or_insert_with(|| Box::new([0u8; OWNER_TAG_SIZE]));
        let buffer = NonNull::from(&mut **anchor).cast::<u8>();
        let cell = &mut self.cells[DEFAULT_DISPATCH_SLOT];
        // SAFETY: the anchor is exactly one owner tag wide and lives as long as the object.
        unsafe { cell.set(buffer, OWNER_TAG_SIZE) };
        cell.bind_owner(OwnerTag::new(self.id, DEFAULT_DISPATCH_SLOT));
        cell.mark_live();
    }
}

/// The object's allocator if it has one, the component's default otherwise.
pub(crate) fn allocator_for<'a>(
    handle: Option<&'a AllocatorHandle>,
    info: &'static ComponentDescriptor,
) -> &'a dyn ComponentAllocator {
    match handle {
        Some(handle) => handle.component(),
        None => info.allocator(),
    }
}

/// Cell array for `composition`. The empty composition uses the empty sentinel array.
pub(crate) fn alloc_cells(
    handle: Option<&AllocatorHandle>,
    composition: &CompositionDescriptor,
) -> Box<[StorageCell]> {
    if composition.is_empty() {
        return Box::default();
    }
    match handle {
        Some(handle) => handle.object().alloc_cells(composition.slot_count()),
        None => vacant_cells(composition.slot_count()),
    }
}

/// Return a cell array whose components were already destroyed or moved out.
pub(crate) fn release_cells(handle: Option<&AllocatorHandle>, mut cells: Box<[StorageCell]>) {
    if cells.is_empty() {
        return;
    }
    cells[DEFAULT_DISPATCH_SLOT].clear();
    debug_assert!(cells.iter().all(StorageCell::is_vacant), "released cells still hold components");
    if let Some(handle) = handle {
        handle.object().dealloc_cells(cells);
    }
}

/// Allocate storage for `info` in `cell` and construct it, by copy from `source`
/// when given. Returns `false` when the copy was impossible and the component was
/// default-constructed instead.
pub(crate) fn make_component(
    handle: Option<&AllocatorHandle>,
    info: &'static ComponentDescriptor,
    cell: &mut StorageCell,
    owner: ObjectId,
    slot: usize,
    source: Option<NonNull<u8>>,
) -> bool {
    debug_assert!(cell.is_vacant(), "component '{}' already has storage", info.name());
    let allocator = allocator_for(handle, info);
    let (buffer, offset) = allocator.allocate(info, owner);
    debug_assert!(offset >= OWNER_TAG_SIZE, "allocator left no room for the owner tag");

    // SAFETY: the allocator contract guarantees the block spans `offset` plus the component.
    let data = unsafe { cell.set(buffer, offset) };
    cell.bind_owner(OwnerTag::new(owner, slot));
    info.instance_created();

    let copied = match source {
        None => {
            // SAFETY: `data` is fresh, suitably aligned storage for `info`.
            unsafe { allocator.construct(info, data) };
            true
        }
        // SAFETY: as above; `source` is a live instance in the source object.
        Some(source) => unsafe {
            if allocator.copy_construct(info, data, source) {
                true
            } else {
                // keep the object structurally valid; the caller gets the status
                warn!(component = info.name(), "component cannot be copy-constructed, default-constructing");
                allocator.construct(info, data);
                false
            }
        },
    };
    cell.mark_live();
    trace!(object = owner.to_bits(), component = info.name(), slot, "constructed component");
    copied
}

/// Destroy the component in `cell`, return its storage and leave the cell vacant.
pub(crate) fn destroy_component(
    handle: Option<&AllocatorHandle>,
    info: &'static ComponentDescriptor,
    cell: &mut StorageCell,
    owner: ObjectId,
) {
    debug_assert!(!cell.is_vacant(), "component '{}' destroyed twice", info.name());
    let (Some(buffer), Some(data)) = (cell.buffer(), cell.data()) else {
        return;
    };
    let allocator = allocator_for(handle, info);
    // SAFETY: a non-vacant cell holds a live instance in storage from `allocator`.
    unsafe {
        allocator.destroy(info, data);
        allocator.deallocate(buffer, cell.offset(), info, owner);
    }
    info.instance_destroyed();
    cell.clear();
    trace!(object = owner.to_bits(), component = info.name(), "destroyed component");
}
