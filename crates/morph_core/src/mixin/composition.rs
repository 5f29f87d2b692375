// composition.rs - Interned component sets
//
// A composition is a unique set of component kinds. Objects with the same
// components share the same composition descriptor. Adding or removing a
// component always yields a different descriptor.

use crate::mixin::{ComponentDescriptor, ComponentId, MAX_COMPONENTS};
use once_cell::sync::Lazy;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};

pub type CompositionId = u64;

/// Cell index reserved for the default dispatch pseudo-component.
pub const DEFAULT_DISPATCH_SLOT: usize = 0;

/// Index of the first component cell. Cells below it are header cells.
pub const SLOT_OFFSET: usize = 1;

/// Marks an id absent from `slot_index`. Never a component slot.
const ABSENT: u16 = DEFAULT_DISPATCH_SLOT as u16;

static EMPTY: Lazy<CompositionDescriptor> = Lazy::new(|| CompositionDescriptor::new(Vec::new()));

/// Immutable catalogue of the components an object holds, plus the dense
/// id-to-cell mapping used to find them.
pub struct CompositionDescriptor {
    id: CompositionId,
    /// Sorted by component id. This is the canonical order for every walk.
    components: Vec<&'static ComponentDescriptor>,
    slot_index: Box<[u16]>,
    live_objects: AtomicUsize,
}

impl CompositionDescriptor {
    /// Build a descriptor from resolved components. Callers go through the
    /// registry so that each set is interned once.
    pub(crate) fn new(mut components: Vec<&'static ComponentDescriptor>) -> Self {
        components.sort_unstable_by_key(|info| info.id());
        components.dedup_by_key(|info| info.id());

        let mut slot_index = vec![ABSENT; MAX_COMPONENTS].into_boxed_slice();
        for (position, info) in components.iter().enumerate() {
            slot_index[info.id() as usize] = (position + SLOT_OFFSET) as u16;
        }

        let ids: Vec<ComponentId> = components.iter().map(|info| info.id()).collect();
        Self {
            id: hash_components(&ids),
            components,
            slot_index,
            live_objects: AtomicUsize::new(0),
        }
    }

    /// The shared sentinel for objects with no components.
    pub fn empty() -> &'static CompositionDescriptor {
        &EMPTY
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        ptr::eq(self, Self::empty())
    }

    #[inline]
    pub fn id(&self) -> CompositionId {
        self.id
    }

    /// Check if this composition contains a component. Out-of-range ids are absent.
    #[inline]
    pub fn has(&self, id: ComponentId) -> bool {
        self.slot(id).is_some()
    }

    /// Cell index of a component, if present.
    #[inline]
    pub fn slot(&self, id: ComponentId) -> Option<usize> {
        match self.slot_index.get(id as usize) {
            Some(&slot) if slot != ABSENT => Some(slot as usize),
            _ => None,
        }
    }

    /// Cell index of a component known to be present.
    #[inline]
    pub fn slot_of(&self, id: ComponentId) -> usize {
        debug_assert!(self.has(id), "component {id} is not part of this composition");
        self.slot_index[id as usize] as usize
    }

    /// Components in canonical order.
    #[inline]
    pub fn components(&self) -> &[&'static ComponentDescriptor] {
        &self.components
    }

    /// Component stored at a cell index.
    pub fn component_at(&self, slot: usize) -> Option<&'static ComponentDescriptor> {
        slot.checked_sub(SLOT_OFFSET)
            .and_then(|position| self.components.get(position))
            .copied()
    }

    pub fn ids(&self) -> impl Iterator<Item = ComponentId> + '_ {
        self.components.iter().map(|info| info.id())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// Length of the cell array an object with this composition owns.
    #[inline]
    pub fn slot_count(&self) -> usize {
        self.components.len() + SLOT_OFFSET
    }

    pub fn is_a(&self, class: &TypeClass) -> bool {
        class.matches(self)
    }

    /// True when every component supports copy construction and copy assignment.
    pub fn is_copyable(&self) -> bool {
        self.components.iter().all(|info| info.is_copyable())
    }

    /// Objects currently using this composition. Diagnostics only.
    pub fn live_objects(&self) -> usize {
        self.live_objects.load(Ordering::Relaxed)
    }

    pub(crate) fn acquire_object(&self) {
        if !self.is_empty() {
            self.live_objects.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn release_object(&self) {
        if self.is_empty() {
            return;
        }
        let result = self
            .live_objects
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
        debug_assert!(result.is_ok(), "composition {:#x} released more often than acquired", self.id);
    }
}

impl fmt::Debug for CompositionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositionDescriptor")
            .field("id", &format_args!("{:#x}", self.id))
            .field("components", &self.components.iter().map(|info| info.name()).collect::<Vec<_>>())
            .field("live_objects", &self.live_objects())
            .finish()
    }
}

/// Compute a stable hash for a sorted list of component IDs.
fn hash_components(comps: &[ComponentId]) -> CompositionId {
    use std::collections::hash_map::DefaultHasher;
    let mut hasher = DefaultHasher::new();
    for &c in comps {
        c.hash(&mut hasher);
    }
    hasher.finish()
}

/// A named predicate over compositions, e.g. "has both Health and Position".
#[derive(Clone, Copy)]
pub struct TypeClass {
    name: &'static str,
    predicate: fn(&CompositionDescriptor) -> bool,
}

impl TypeClass {
    pub const fn new(name: &'static str, predicate: fn(&CompositionDescriptor) -> bool) -> Self {
        Self { name, predicate }
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    pub fn matches(&self, composition: &CompositionDescriptor) -> bool {
        (self.predicate)(composition)
    }
}

impl fmt::Debug for TypeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TypeClass").field(&self.name).finish()
    }
}
