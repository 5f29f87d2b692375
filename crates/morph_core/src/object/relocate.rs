// relocate.rs - Moving live components to other storage
//
// Used for defragmentation and custom placement. Every buffer handed in must
// come from the allocator that serves the component (the object's own, or the
// descriptor's default), since that allocator eventually frees it.

use crate::mixin::{Capability, ComponentDescriptor, ComponentId};
use crate::object::retype::allocator_for;
use crate::object::{Object, ObjectError};
use crate::storage::{OwnerTag, OWNER_TAG_SIZE};
use std::ptr::NonNull;
use tracing::{debug, trace};

impl Object {
    /// Move-construct component `id` into `buffer` at `offset` and release its
    /// previous storage. Returns the released `(buffer, offset)`, or `None` if
    /// the object has no such component.
    ///
    /// # Safety
    /// `buffer` must be a block for this component obtained from the allocator
    /// serving it, with component data at `offset` and at least
    /// [`OWNER_TAG_SIZE`] bytes before it. The block must not hold a live value.
    pub unsafe fn relocate_component(
        &mut self,
        id: ComponentId,
        buffer: NonNull<u8>,
        offset: usize,
    ) -> Result<Option<(NonNull<u8>, usize)>, ObjectError> {
        let Some(slot) = self.composition.slot(id) else {
            return Ok(None);
        };
        let Some(info) = self.composition.component_at(slot) else {
            return Ok(None);
        };
        if !info.supports(Capability::MoveConstruct) {
            return Err(ObjectError::BadMove {
                component: info.name().to_string(),
            });
        }
        Ok(self.relocate_slot(info, slot, buffer, offset))
    }

    /// Point component `id` at `buffer` and `offset` without constructing,
    /// moving or freeing anything. Returns the previous `(buffer, offset)`, which
    /// the caller now owns, or `None` if the object has no such component.
    ///
    /// The owner tag in the new block is left as is.
    ///
    /// # Safety
    /// The new block must already hold a live instance of the component and
    /// come from the allocator serving it.
    pub unsafe fn swap_storage(
        &mut self,
        id: ComponentId,
        buffer: NonNull<u8>,
        offset: usize,
    ) -> Option<(NonNull<u8>, usize)> {
        let slot = self.composition.slot(id)?;
        let cell = &mut self.cells[slot];
        let previous = (cell.buffer()?, cell.offset());
        cell.set(buffer, offset);
        trace!(object = self.id.to_bits(), component = id, "swapped component storage");
        Some(previous)
    }

    /// Give every component a fresh block from its allocator, moving it over and
    /// freeing the old one.
    ///
    /// Fails without touching anything if a component cannot be move-constructed.
    pub fn reallocate_all(&mut self) -> Result<(), ObjectError> {
        let composition = self.composition;
        if let Some(info) = composition
            .components()
            .iter()
            .find(|info| !info.supports(Capability::MoveConstruct))
        {
            return Err(ObjectError::BadMove {
                component: info.name().to_string(),
            });
        }

        for &info in composition.components() {
            let slot = composition.slot_of(info.id());
            let (buffer, offset) =
                allocator_for(self.allocator.as_ref(), info).allocate(info, self.id);
            // SAFETY: the block is fresh and comes from the component's allocator.
            unsafe { self.relocate_slot(info, slot, buffer, offset) };
        }
        debug!(object = self.id.to_bits(), components = composition.len(), "reallocated object");
        Ok(())
    }

    /// Move the component in `slot` into the new block and free the old one.
    ///
    /// # Safety
    /// See `relocate_component`; `info` must support move construction.
    unsafe fn relocate_slot(
        &mut self,
        info: &'static ComponentDescriptor,
        slot: usize,
        buffer: NonNull<u8>,
        offset: usize,
    ) -> Option<(NonNull<u8>, usize)> {
        debug_assert!(offset >= OWNER_TAG_SIZE, "relocation target has no room for an owner tag");
        let allocator = allocator_for(self.allocator.as_ref(), info);
        let cell = &mut self.cells[slot];
        let (Some(old_buffer), Some(old_data)) = (cell.buffer(), cell.data()) else {
            return None;
        };
        let old_offset = cell.offset();

        cell.mark_relocating();
        let data = cell.set(buffer, offset);
        cell.bind_owner(OwnerTag::new(self.id, slot));
        let moved = allocator.move_construct(info, data, old_data);
        debug_assert!(moved, "component '{}' lost move construction", info.name());
        allocator.deallocate(old_buffer, old_offset, info, self.id);
        cell.mark_live();

        trace!(object = self.id.to_bits(), component = info.name(), slot, "relocated component");
        Some((old_buffer, old_offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::define_mixin;
    use crate::mixin::{composition, Lifecycle, Mixin};
    use crate::storage::{
        owner_of, AllocatorHandle, ComponentAllocator, HeapAllocator, TrackingAllocator, HEAP,
    };
    use std::alloc::Layout;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    static BALLAST_DROPS: AtomicUsize = AtomicUsize::new(0);

    #[derive(Default, Debug, PartialEq)]
    struct Ballast {
        weight: Vec<u32>,
    }
    define_mixin!(Ballast, 100, "relocate.Ballast");

    impl Drop for Ballast {
        fn drop(&mut self) {
            BALLAST_DROPS.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default, Clone, Debug, PartialEq)]
    struct Heading(f32);
    define_mixin!(Heading, 101, "relocate.Heading", clone);

    const PINNED: ComponentId = 102;

    unsafe fn zero_word(data: NonNull<u8>) {
        data.cast::<u64>().as_ptr().write(0);
    }

    fn pinned() -> &'static ComponentDescriptor {
        if let Some(existing) = crate::mixin::component(PINNED) {
            return existing;
        }
        let lifecycle = Lifecycle {
            default_construct: Some(zero_word),
            ..Lifecycle::default()
        };
        let info = unsafe {
            ComponentDescriptor::from_raw(PINNED, "relocate.Pinned", Layout::new::<u64>(), lifecycle)
        };
        crate::mixin::register_component(info).unwrap()
    }

    fn ballast_object() -> Object {
        Ballast::descriptor();
        Heading::descriptor();
        let mut object = Object::new();
        object.retype(composition(&[Ballast::ID, Heading::ID]).unwrap());
        object.get_mut::<Ballast>().unwrap().weight = vec![1, 2, 3];
        object.get_mut::<Heading>().unwrap().0 = 0.5;
        object
    }

    #[test]
    fn relocate_moves_value_and_rebinds_owner() {
        let mut object = ballast_object();
        let drops = BALLAST_DROPS.load(Ordering::SeqCst);
        let old = object.get(Ballast::ID).unwrap();

        let (buffer, offset) = HEAP.allocate(Ballast::descriptor(), object.id());
        let released = unsafe { object.relocate_component(Ballast::ID, buffer, offset) }
            .unwrap()
            .unwrap();
        assert_eq!(released.0.as_ptr().wrapping_add(released.1), old.as_ptr());

        let data = object.get(Ballast::ID).unwrap();
        assert_ne!(data, old);
        assert_eq!(object.get_ref::<Ballast>().unwrap().weight, vec![1, 2, 3]);
        let tag = unsafe { owner_of(data) };
        assert_eq!(tag.object(), object.id());
        assert_eq!(tag.slot(), object.composition().slot_of(Ballast::ID));
        // a move never drops the value
        assert_eq!(BALLAST_DROPS.load(Ordering::SeqCst), drops);
    }

    #[test]
    fn relocating_an_absent_component_is_a_no_op() {
        let mut object = ballast_object();
        let (buffer, offset) = HEAP.allocate(Ballast::descriptor(), object.id());
        let result = unsafe { object.relocate_component(103, buffer, offset) };
        assert_eq!(result, Ok(None));
        unsafe { HEAP.deallocate(buffer, offset, Ballast::descriptor(), object.id()) };
    }

    #[test]
    fn components_without_move_cannot_relocate() {
        let info = pinned();
        Heading::descriptor();
        let mut object = Object::new();
        object.retype(composition(&[PINNED, Heading::ID]).unwrap());
        let before = object.get(Heading::ID);

        assert_eq!(
            object.reallocate_all(),
            Err(ObjectError::BadMove {
                component: "relocate.Pinned".to_string()
            })
        );
        assert_eq!(object.get(Heading::ID), before);

        let (buffer, offset) = HEAP.allocate(info, object.id());
        let result = unsafe { object.relocate_component(PINNED, buffer, offset) };
        assert!(matches!(result, Err(ObjectError::BadMove { .. })));
        unsafe { HEAP.deallocate(buffer, offset, info, object.id()) };
    }

    #[test]
    fn swap_storage_hands_back_the_old_block() {
        let mut object = ballast_object();
        let info = Heading::descriptor();
        let old = object.get(Heading::ID).unwrap();

        let (buffer, offset) = HEAP.allocate(info, object.id());
        unsafe {
            let data = NonNull::new_unchecked(buffer.as_ptr().add(offset));
            HEAP.construct(info, data);
            data.cast::<Heading>().as_ptr().write(Heading(2.0));
        }

        let (old_buffer, old_offset) =
            unsafe { object.swap_storage(Heading::ID, buffer, offset) }.unwrap();
        assert_eq!(object.get_ref::<Heading>(), Some(&Heading(2.0)));
        unsafe {
            assert_eq!(old_buffer.as_ptr().add(old_offset), old.as_ptr());
            HEAP.destroy(info, old);
            HEAP.deallocate(old_buffer, old_offset, info, object.id());
        }
        assert!(unsafe { object.swap_storage(103, buffer, offset) }.is_none());
    }

    #[test]
    fn reallocate_all_keeps_values_and_balances_blocks() {
        Ballast::descriptor();
        Heading::descriptor();
        let tracker = Arc::new(TrackingAllocator::new(HeapAllocator));
        let mut object = Object::with_allocator(AllocatorHandle::from_arc(tracker.clone()));
        object.retype(composition(&[Ballast::ID, Heading::ID]).unwrap());
        object.get_mut::<Ballast>().unwrap().weight = vec![7];
        let before = object.get(Ballast::ID);

        object.reallocate_all().unwrap();
        assert_ne!(object.get(Ballast::ID), before);
        assert_eq!(object.get_ref::<Ballast>().unwrap().weight, vec![7]);
        assert_eq!(tracker.live_blocks(), 2);
        assert_eq!(tracker.total_blocks(), 4);

        for id in [Ballast::ID, Heading::ID] {
            let tag = unsafe { owner_of(object.get(id).unwrap()) };
            assert_eq!(tag.object(), object.id());
        }
        drop(object);
        assert_eq!(tracker.live_blocks(), 0);
    }
}
