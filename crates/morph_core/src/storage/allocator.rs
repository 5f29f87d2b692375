// allocator.rs - Pluggable storage for components and cell arrays
//
// An object either routes every component through one allocator it was
// given at construction, or lets each component use its descriptor's
// default allocator. That choice is fixed for the object's lifetime.

use crate::mixin::ComponentDescriptor;
use crate::object::ObjectId;
use crate::storage::{vacant_cells, OwnerTag, StorageCell, OWNER_TAG_SIZE};
use std::alloc::{self, Layout};
use std::fmt;
use std::mem::align_of;
use std::ptr::NonNull;
use std::sync::Arc;

/// Per-component facet: provides storage blocks and runs lifecycle functions in them.
pub trait ComponentAllocator: Send + Sync {
    /// Provide a block for one instance of `info`, returning `(buffer, offset)`.
    /// The offset must leave at least [`OWNER_TAG_SIZE`] bytes in front of the data
    /// and satisfy the component's alignment.
    ///
    /// Failure is fatal: implementations call [`alloc::handle_alloc_error`].
    fn allocate(&self, info: &ComponentDescriptor, owner: ObjectId) -> (NonNull<u8>, usize);

    /// Return a block obtained from `allocate`.
    ///
    /// # Safety
    /// `buffer` and `offset` must come from `allocate` on this allocator for the
    /// same component, and the instance in it must already be destroyed or moved out.
    unsafe fn deallocate(
        &self,
        buffer: NonNull<u8>,
        offset: usize,
        info: &ComponentDescriptor,
        owner: ObjectId,
    );

    /// Default-construct into `data`.
    ///
    /// Panics if the component has no default constructor.
    ///
    /// # Safety
    /// `data` must point to uninitialized storage suitable for `info`.
    unsafe fn construct(&self, info: &ComponentDescriptor, data: NonNull<u8>) {
        match info.lifecycle().default_construct {
            Some(construct) => construct(data),
            None => panic!("component '{}' cannot be default-constructed", info.name()),
        }
    }

    /// Copy-construct into `data` from `source`. Returns `false`, leaving `data`
    /// uninitialized, when the component cannot be copy-constructed.
    ///
    /// # Safety
    /// `data` must be uninitialized storage for `info`; `source` a live instance of it.
    unsafe fn copy_construct(
        &self,
        info: &ComponentDescriptor,
        data: NonNull<u8>,
        source: NonNull<u8>,
    ) -> bool {
        match info.lifecycle().copy_construct {
            Some(copy) => {
                copy(data, source);
                true
            }
            None => false,
        }
    }

    /// Move-construct into `data` from `source`. `source` is left uninitialized.
    ///
    /// # Safety
    /// Same as `copy_construct`; afterwards `source` must not be destroyed.
    unsafe fn move_construct(
        &self,
        info: &ComponentDescriptor,
        data: NonNull<u8>,
        source: NonNull<u8>,
    ) -> bool {
        match info.lifecycle().move_construct {
            Some(relocate) => {
                relocate(data, source);
                true
            }
            None => false,
        }
    }

    /// Drop the instance at `data`.
    ///
    /// # Safety
    /// `data` must hold a live instance of `info`.
    unsafe fn destroy(&self, info: &ComponentDescriptor, data: NonNull<u8>) {
        if let Some(destroy) = info.lifecycle().destroy {
            destroy(data);
        }
    }
}

/// What an object should use after its allocator was told about a move or copy.
///
/// After `on_move`, any answer other than `Share` makes the destination move its
/// components and cell array into storage from the new allocator (or the
/// component defaults) and return the old blocks here. Objects holding a
/// component without move construction keep this allocator and are attached again.
pub enum Transfer {
    /// Keep serving the destination with the same allocator.
    Share,
    /// Serve the destination with another allocator; it receives `on_attach`.
    Replace(AllocatorHandle),
    /// The destination falls back to per-component default allocators.
    Detach,
}

/// Per-object facet: told when objects start and stop using the allocator, and
/// provides their cell arrays.
///
/// `on_move` and `on_copy` are the only notification the source's allocator
/// receives for the destination; a `Share` answer needs no further `on_attach`.
pub trait ObjectAllocator: ComponentAllocator {
    fn on_attach(&self, _object: ObjectId) {}

    fn on_detach(&self, _object: ObjectId) {}

    fn on_move(&self, _dest: ObjectId, _source: ObjectId) -> Transfer {
        Transfer::Share
    }

    fn on_copy(&self, _dest: ObjectId, _source: ObjectId) -> Transfer {
        Transfer::Share
    }

    fn alloc_cells(&self, len: usize) -> Box<[StorageCell]> {
        vacant_cells(len)
    }

    fn dealloc_cells(&self, cells: Box<[StorageCell]>) {
        drop(cells);
    }
}

/// Shared handle to one allocator, exposing both of its facets.
#[derive(Clone)]
pub struct AllocatorHandle {
    object: Arc<dyn ObjectAllocator>,
    component: Arc<dyn ComponentAllocator>,
}

impl AllocatorHandle {
    pub fn new<A: ObjectAllocator + 'static>(allocator: A) -> Self {
        Self::from_arc(Arc::new(allocator))
    }

    /// Wrap an allocator the caller keeps a reference to, e.g. to read its counters.
    pub fn from_arc<A: ObjectAllocator + 'static>(allocator: Arc<A>) -> Self {
        Self {
            object: allocator.clone(),
            component: allocator,
        }
    }

    #[inline]
    pub fn object(&self) -> &dyn ObjectAllocator {
        &*self.object
    }

    #[inline]
    pub fn component(&self) -> &dyn ComponentAllocator {
        &*self.component
    }

    /// True when both handles refer to the same allocator instance.
    pub fn same_as(&self, other: &AllocatorHandle) -> bool {
        Arc::as_ptr(&self.object) as *const () == Arc::as_ptr(&other.object) as *const ()
    }
}

impl fmt::Debug for AllocatorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AllocatorHandle")
            .field(&(Arc::as_ptr(&self.object) as *const ()))
            .finish()
    }
}

/// Layout of a header-prefixed block for `info`, and the data offset inside it.
pub fn block_layout(info: &ComponentDescriptor) -> (Layout, usize) {
    let component = info.layout();
    let offset = OWNER_TAG_SIZE.next_multiple_of(component.align());
    let align = component.align().max(align_of::<OwnerTag>());
    let layout = Layout::from_size_align(offset + component.size(), align)
        .expect("component block layout overflows isize");
    (layout, offset)
}

/// Default allocator: one global-heap block per component.
#[derive(Clone, Copy, Debug, Default)]
pub struct HeapAllocator;

/// The allocator every descriptor starts with.
pub static HEAP: HeapAllocator = HeapAllocator;

impl ComponentAllocator for HeapAllocator {
    fn allocate(&self, info: &ComponentDescriptor, _owner: ObjectId) -> (NonNull<u8>, usize) {
        let (layout, offset) = block_layout(info);
        // SAFETY: the layout always includes the owner tag, so it is never zero-sized.
        let buffer = unsafe { alloc::alloc(layout) };
        match NonNull::new(buffer) {
            Some(buffer) => (buffer, offset),
            None => alloc::handle_alloc_error(layout),
        }
    }

    unsafe fn deallocate(
        &self,
        buffer: NonNull<u8>,
        _offset: usize,
        info: &ComponentDescriptor,
        _owner: ObjectId,
    ) {
        let (layout, _) = block_layout(info);
        alloc::dealloc(buffer.as_ptr(), layout);
    }
}

impl ObjectAllocator for HeapAllocator {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::define_mixin;
    use crate::mixin::Mixin;

    #[derive(Default, Clone, Debug, PartialEq)]
    struct Wide {
        lanes: [u64; 4],
    }
    define_mixin!(Wide, 50, "allocator.Wide", clone);

    #[repr(align(32))]
    #[derive(Default)]
    struct Aligned(u8);
    define_mixin!(Aligned, 51, "allocator.Aligned");

    #[test]
    fn block_layout_reserves_owner_tag() {
        let (layout, offset) = block_layout(Wide::descriptor());
        assert_eq!(offset, OWNER_TAG_SIZE);
        assert_eq!(layout.size(), OWNER_TAG_SIZE + 32);
        assert!(layout.align() >= 8);

        let (layout, offset) = block_layout(Aligned::descriptor());
        assert_eq!(offset, 32);
        assert_eq!(layout.align(), 32);
    }

    #[test]
    fn heap_round_trip_through_lifecycle() {
        let info = Wide::descriptor();
        let owner = ObjectId::from_bits(9);
        let (buffer, offset) = HEAP.allocate(info, owner);
        let mut cell = StorageCell::vacant();
        let data = unsafe { cell.set(buffer, offset) };
        assert_eq!(data.as_ptr() as usize % info.layout().align(), 0);

        let mut source = Wide { lanes: [1, 2, 3, 4] };
        let source_ptr = NonNull::from(&mut source).cast::<u8>();
        unsafe {
            assert!(HEAP.copy_construct(info, data, source_ptr));
            assert_eq!(&*data.cast::<Wide>().as_ptr(), &source);
            HEAP.destroy(info, data);
            HEAP.deallocate(buffer, offset, info, owner);
        }
    }

    #[test]
    fn copy_construct_reports_missing_capability() {
        let info = Aligned::descriptor();
        let owner = ObjectId::from_bits(10);
        let (buffer, offset) = HEAP.allocate(info, owner);
        let mut source = Aligned(3);
        unsafe {
            let data = NonNull::new_unchecked(buffer.as_ptr().add(offset));
            let copied = HEAP.copy_construct(info, data, NonNull::from(&mut source).cast());
            assert!(!copied);
            HEAP.deallocate(buffer, offset, info, owner);
        }
    }

    #[test]
    fn handles_compare_by_instance() {
        let shared = Arc::new(HeapAllocator);
        let a = AllocatorHandle::from_arc(shared.clone());
        let b = AllocatorHandle::from_arc(shared);
        let c = AllocatorHandle::new(HeapAllocator);
        assert!(a.same_as(&b));
        assert!(!a.same_as(&c));
    }
}
