//! An allocator wrapper that counts what flows through it.

use crate::mixin::ComponentDescriptor;
use crate::object::ObjectId;
use crate::storage::{
    vacant_cells, ComponentAllocator, HeapAllocator, ObjectAllocator, StorageCell, Transfer,
};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::error;

/// Wraps another component allocator and tracks live blocks, attached objects,
/// cell arrays, moves and copies.
///
/// # Usage
///
/// ```rust,ignore
/// let tracker = Arc::new(TrackingAllocator::new(HeapAllocator));
/// let object = Object::with_allocator(AllocatorHandle::from_arc(tracker.clone()));
/// assert_eq!(tracker.attached_objects(), 1);
/// ```
#[derive(Debug, Default)]
pub struct TrackingAllocator<A = HeapAllocator> {
    inner: A,
    live_blocks: AtomicUsize,
    total_blocks: AtomicUsize,
    attached_objects: AtomicUsize,
    live_cell_arrays: AtomicUsize,
    moves: AtomicUsize,
    copies: AtomicUsize,
}

impl<A> TrackingAllocator<A> {
    /// Creates a new tracking allocator that wraps the given inner allocator.
    pub const fn new(inner: A) -> Self {
        Self {
            inner,
            live_blocks: AtomicUsize::new(0),
            total_blocks: AtomicUsize::new(0),
            attached_objects: AtomicUsize::new(0),
            live_cell_arrays: AtomicUsize::new(0),
            moves: AtomicUsize::new(0),
            copies: AtomicUsize::new(0),
        }
    }

    /// Component blocks currently handed out.
    pub fn live_blocks(&self) -> usize {
        self.live_blocks.load(Ordering::Relaxed)
    }

    /// Component blocks handed out over the allocator's lifetime.
    pub fn total_blocks(&self) -> usize {
        self.total_blocks.load(Ordering::Relaxed)
    }

    pub fn attached_objects(&self) -> usize {
        self.attached_objects.load(Ordering::Relaxed)
    }

    pub fn live_cell_arrays(&self) -> usize {
        self.live_cell_arrays.load(Ordering::Relaxed)
    }

    pub fn moves(&self) -> usize {
        self.moves.load(Ordering::Relaxed)
    }

    pub fn copies(&self) -> usize {
        self.copies.load(Ordering::Relaxed)
    }
}

fn decrement(counter: &AtomicUsize, what: &str) {
    let result = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    if result.is_err() {
        error!("tracking allocator {what} counter underflowed");
    }
}

impl<A: ComponentAllocator> ComponentAllocator for TrackingAllocator<A> {
    fn allocate(&self, info: &ComponentDescriptor, owner: ObjectId) -> (NonNull<u8>, usize) {
        let block = self.inner.allocate(info, owner);
        self.live_blocks.fetch_add(1, Ordering::Relaxed);
        self.total_blocks.fetch_add(1, Ordering::Relaxed);
        block
    }

    unsafe fn deallocate(
        &self,
        buffer: NonNull<u8>,
        offset: usize,
        info: &ComponentDescriptor,
        owner: ObjectId,
    ) {
        decrement(&self.live_blocks, "block");
        self.inner.deallocate(buffer, offset, info, owner);
    }
}

impl<A: ComponentAllocator> ObjectAllocator for TrackingAllocator<A> {
    fn on_attach(&self, _object: ObjectId) {
        self.attached_objects.fetch_add(1, Ordering::Relaxed);
    }

    fn on_detach(&self, _object: ObjectId) {
        decrement(&self.attached_objects, "attachment");
    }

    fn on_move(&self, _dest: ObjectId, _source: ObjectId) -> Transfer {
        // one object stops using us, one starts: attachments are unchanged
        self.moves.fetch_add(1, Ordering::Relaxed);
        Transfer::Share
    }

    fn on_copy(&self, _dest: ObjectId, _source: ObjectId) -> Transfer {
        self.copies.fetch_add(1, Ordering::Relaxed);
        self.attached_objects.fetch_add(1, Ordering::Relaxed);
        Transfer::Share
    }

    fn alloc_cells(&self, len: usize) -> Box<[StorageCell]> {
        self.live_cell_arrays.fetch_add(1, Ordering::Relaxed);
        vacant_cells(len)
    }

    fn dealloc_cells(&self, cells: Box<[StorageCell]>) {
        debug_assert!(cells.iter().all(StorageCell::is_vacant), "released cells still hold storage");
        decrement(&self.live_cell_arrays, "cell array");
        drop(cells);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::define_mixin;
    use crate::mixin::Mixin;
    use crate::storage::AllocatorHandle;
    use std::sync::Arc;

    #[derive(Default)]
    struct Probe(u16);
    define_mixin!(Probe, 55, "tracking.Probe");

    #[test]
    fn counts_blocks() {
        let tracker = TrackingAllocator::new(HeapAllocator);
        let info = Probe::descriptor();
        let owner = ObjectId::from_bits(1);
        let (a, offset_a) = tracker.allocate(info, owner);
        let (b, offset_b) = tracker.allocate(info, owner);
        assert_eq!(tracker.live_blocks(), 2);
        unsafe {
            tracker.deallocate(a, offset_a, info, owner);
            tracker.deallocate(b, offset_b, info, owner);
        }
        assert_eq!(tracker.live_blocks(), 0);
        assert_eq!(tracker.total_blocks(), 2);
    }

    #[test]
    fn counts_object_notifications() {
        let tracker = Arc::new(TrackingAllocator::<HeapAllocator>::default());
        let handle = AllocatorHandle::from_arc(tracker.clone());
        let (a, b) = (ObjectId::from_bits(1), ObjectId::from_bits(2));

        handle.object().on_attach(a);
        assert!(matches!(handle.object().on_copy(b, a), Transfer::Share));
        assert_eq!(tracker.attached_objects(), 2);
        assert!(matches!(handle.object().on_move(ObjectId::from_bits(3), b), Transfer::Share));
        assert_eq!(tracker.attached_objects(), 2);
        handle.object().on_detach(a);
        handle.object().on_detach(b);
        assert_eq!(tracker.attached_objects(), 0);
        assert_eq!((tracker.moves(), tracker.copies()), (1, 1));

        let cells = handle.object().alloc_cells(3);
        assert_eq!(tracker.live_cell_arrays(), 1);
        handle.object().dealloc_cells(cells);
        assert_eq!(tracker.live_cell_arrays(), 0);
    }
}
