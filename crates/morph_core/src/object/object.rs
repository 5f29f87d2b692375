// object.rs - Objects whose type is a runtime set of mixins

use crate::mixin::{
    id_of, Capability, ComponentDescriptor, ComponentId, CompositionDescriptor,
    CompositionTemplate, Mixin, TypeClass, DEFAULT_DISPATCH_SLOT, SLOT_OFFSET,
};
use crate::object::retype::{destroy_component, release_cells};
use crate::object::{ObjectError, ObjectId, RetypeStatus};
use crate::storage::{AllocatorHandle, OwnerTag, StorageCell, Transfer, OWNER_TAG_SIZE};
use std::any::TypeId;
use std::fmt;
use std::mem;
use std::ptr::{self, NonNull};
use tracing::warn;

/// An object whose components can be added and removed at run time.
///
/// Holds exactly one composition descriptor (the empty sentinel when bare) and
/// a cell array sized to it. Components live in allocator-supplied storage;
/// the allocator is either the one given at construction or, per component,
/// the descriptor's default.
///
/// # Example
/// ```ignore
/// let mut actor = Object::new();
/// CompositionTemplate::new()
///     .with::<Health>()
///     .with::<Position>()
///     .apply_to(&mut actor)?;
///
/// actor.get_mut::<Health>().unwrap().value = 80;
/// CompositionTemplate::of(&actor).without::<Position>().apply_to(&mut actor)?;
/// assert_eq!(actor.get_ref::<Health>().unwrap().value, 80);
/// ```
pub struct Object {
    pub(crate) id: ObjectId,
    pub(crate) composition: &'static CompositionDescriptor,
    pub(crate) cells: Box<[StorageCell]>,
    pub(crate) allocator: Option<AllocatorHandle>,
    /// Backing bytes of the default dispatch cell. Allocated on first retype.
    pub(crate) anchor: Option<Box<[u8; OWNER_TAG_SIZE]>>,
}

// SAFETY: components are `Send + Sync` (enforced for Rust mixins by `Mixin`,
// promised by `ComponentDescriptor::from_raw` otherwise) and the cells only
// point at storage this object owns.
unsafe impl Send for Object {}
unsafe impl Sync for Object {}

impl Object {
    /// Create an empty object that uses per-component default allocators.
    pub fn new() -> Self {
        Self {
            id: ObjectId::next(),
            composition: CompositionDescriptor::empty(),
            cells: Box::default(),
            allocator: None,
            anchor: None,
        }
    }

    /// Create an empty object that routes all of its storage through `allocator`.
    pub fn with_allocator(allocator: AllocatorHandle) -> Self {
        let mut object = Self::new();
        allocator.object().on_attach(object.id);
        object.allocator = Some(allocator);
        object
    }

    /// Create an object and apply `template` to it.
    pub fn from_template(
        template: &CompositionTemplate,
        allocator: Option<AllocatorHandle>,
    ) -> Result<Self, ObjectError> {
        let mut object = match allocator {
            Some(allocator) => Self::with_allocator(allocator),
            None => Self::new(),
        };
        template.apply_to(&mut object)?;
        Ok(object)
    }

    #[inline]
    pub fn id(&self) -> ObjectId {
        self.id
    }

    #[inline]
    pub fn composition(&self) -> &'static CompositionDescriptor {
        self.composition
    }

    #[inline]
    pub fn allocator(&self) -> Option<&AllocatorHandle> {
        self.allocator.as_ref()
    }

    /// True when the object has no components.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.composition.is_empty()
    }

    /// Cell array, header cells included. Empty for a bare object.
    #[inline]
    pub fn cells(&self) -> &[StorageCell] {
        &self.cells
    }

    /// Check for a component. Out-of-range ids are never present.
    #[inline]
    pub fn has(&self, id: ComponentId) -> bool {
        self.composition.has(id)
    }

    pub fn has_name(&self, name: &str) -> bool {
        self.has(id_of(name))
    }

    pub fn has_mixin<T: Mixin>(&self) -> bool {
        self.has(T::ID)
    }

    /// Raw pointer to a component's data, or `None` if the object lacks it.
    pub fn get(&self, id: ComponentId) -> Option<NonNull<u8>> {
        let slot = self.composition.slot(id)?;
        self.cells.get(slot)?.data()
    }

    pub fn get_by_name(&self, name: &str) -> Option<NonNull<u8>> {
        self.get(id_of(name))
    }

    /// Typed access. `None` if absent, or if `T::ID` belongs to a different type.
    pub fn get_ref<T: Mixin>(&self) -> Option<&T> {
        let data = self.typed_data::<T>()?;
        // SAFETY: the descriptor's TypeId matches T and the cell holds a live value.
        Some(unsafe { &*data.cast::<T>().as_ptr() })
    }

    pub fn get_mut<T: Mixin>(&mut self) -> Option<&mut T> {
        let data = self.typed_data::<T>()?;
        // SAFETY: as in `get_ref`; `&mut self` makes the borrow unique.
        Some(unsafe { &mut *data.cast::<T>().as_ptr() })
    }

    fn typed_data<T: Mixin>(&self) -> Option<NonNull<u8>> {
        let slot = self.composition.slot(T::ID)?;
        let info = self.composition.component_at(slot)?;
        if info.type_id() != Some(TypeId::of::<T>()) {
            return None;
        }
        self.cells.get(slot)?.data()
    }

    /// Data pointer of the default dispatch cell, for the dispatch layer to
    /// resolve back to this object. `None` while the object is empty.
    pub fn dispatch_data(&self) -> Option<NonNull<u8>> {
        self.cells.get(DEFAULT_DISPATCH_SLOT)?.data()
    }

    pub fn is_a(&self, class: &TypeClass) -> bool {
        self.composition.is_a(class)
    }

    /// True iff every component supports both copy construction and copy assignment.
    pub fn copyable(&self) -> bool {
        self.composition.is_copyable()
    }

    /// Destroy every component in canonical order, return all storage and reset
    /// to the empty sentinel. Never fails.
    pub fn clear(&mut self) {
        let composition = self.composition;
        for &info in composition.components() {
            let slot = composition.slot_of(info.id());
            destroy_component(self.allocator.as_ref(), info, &mut self.cells[slot], self.id);
        }
        if !composition.is_empty() {
            let cells = mem::take(&mut self.cells);
            release_cells(self.allocator.as_ref(), cells);
            composition.release_object();
        }
        self.composition = CompositionDescriptor::empty();
    }

    /// Copy-assign from `other`.
    ///
    /// Identical compositions copy component by component. Otherwise the object
    /// is retyped to `other`'s composition with `other` as the copy source. On
    /// error the object still holds `other`'s composition with every component
    /// constructed; the ones that could not be copied are default-constructed
    /// or keep their previous value.
    pub fn copy_from(&mut self, other: &Object) -> Result<(), ObjectError> {
        if self.is_empty() {
            if let Some(theirs) = other.allocator.as_ref() {
                if let Some(own) = self.allocator.take() {
                    own.object().on_detach(self.id);
                }
                self.allocator = match theirs.object().on_copy(self.id, other.id) {
                    Transfer::Share => Some(theirs.clone()),
                    Transfer::Replace(next) => {
                        next.object().on_attach(self.id);
                        Some(next)
                    }
                    Transfer::Detach => None,
                };
            }
        }

        if other.is_empty() {
            self.clear();
            return Ok(());
        }

        if ptr::eq(self.composition, other.composition) {
            return self.copy_matching_from(other);
        }

        match self.retype_from(other.composition, Some(&other.cells)) {
            RetypeStatus::Success => Ok(()),
            RetypeStatus::BadAssign => Err(ObjectError::BadCopyAssignment),
            RetypeStatus::BadCopyConstruct => Err(ObjectError::BadCopyConstruction),
        }
    }

    /// Copy-construct a new object from this one.
    pub fn try_clone(&self) -> Result<Object, ObjectError> {
        let mut copy = Object::new();
        copy.copy_from(self)?;
        Ok(copy)
    }

    /// Copy-assign every shared component. Checks all of them first, so a
    /// failure leaves both objects untouched.
    fn copy_matching_from(&mut self, other: &Object) -> Result<(), ObjectError> {
        let shared = self.shared_with(other);
        if let Some(info) = shared.iter().find(|info| !info.supports(Capability::CopyAssign)) {
            warn!(component = info.name(), "component cannot be copy-assigned");
            return Err(ObjectError::BadCopyAssignment);
        }

        for info in shared {
            if let (Some(assign), Some(dest), Some(source)) =
                (info.lifecycle().copy_assign, self.get(info.id()), other.get(info.id()))
            {
                // SAFETY: both pointers are live instances of the same component.
                unsafe { assign(dest, source) };
            }
        }
        Ok(())
    }

    /// Components present in both objects, in canonical order.
    fn shared_with(&self, other: &Object) -> Vec<&'static ComponentDescriptor> {
        let mine = self.composition;
        other
            .composition
            .components()
            .iter()
            .copied()
            .filter(|info| mine.has(info.id()))
            .collect()
    }

    /// Move-assign from `other` in O(1): take its composition, cells and (subject
    /// to its allocator's answer) allocator. `other` is left empty.
    pub fn move_from(&mut self, other: &mut Object) {
        self.clear();
        if let Some(own) = self.allocator.take() {
            own.object().on_detach(self.id);
        }
        self.composition = mem::replace(&mut other.composition, CompositionDescriptor::empty());
        self.cells = mem::take(&mut other.cells);

        if let Some(theirs) = other.allocator.take() {
            let transfer = theirs.object().on_move(self.id, other.id);
            self.hand_over(theirs, transfer);
        }

        for slot in SLOT_OFFSET..self.cells.len() {
            self.cells[slot].bind_owner(OwnerTag::new(self.id, slot));
        }
        if !self.is_empty() {
            self.bind_dispatch();
        }
    }

    /// Settle on the allocator named by `transfer` for storage currently served
    /// by `theirs`. Switching allocators moves every component into blocks from
    /// the new one, so each block is freed by the allocator that handed it out.
    fn hand_over(&mut self, theirs: AllocatorHandle, transfer: Transfer) {
        let next = match transfer {
            Transfer::Share => {
                self.allocator = Some(theirs);
                return;
            }
            Transfer::Replace(next) => Some(next),
            Transfer::Detach => None,
        };

        let composition = self.composition;
        if let Some(info) = composition
            .components()
            .iter()
            .find(|info| !info.supports(Capability::MoveConstruct))
        {
            warn!(
                component = info.name(),
                "component cannot be move-constructed, keeping the source allocator"
            );
            theirs.object().on_attach(self.id);
            self.allocator = Some(theirs);
            return;
        }

        if let Some(next) = &next {
            next.object().on_attach(self.id);
        }
        self.allocator = next;
        self.adopt_storage(&theirs);
    }

    /// Move-construct: a new object with its own identity takes over this one's
    /// components, leaving this object empty.
    pub fn take(&mut self) -> Object {
        let mut moved = Object::new();
        moved.move_from(self);
        moved
    }

    /// Move-assign every component shared with `other`, leaving `other`'s values
    /// in their default state. Checks all of them first, so a failure leaves both
    /// objects untouched.
    pub fn move_matching_from(&mut self, other: &mut Object) -> Result<(), ObjectError> {
        let shared = self.shared_with(other);
        if let Some(info) = shared.iter().find(|info| !info.supports(Capability::MoveAssign)) {
            return Err(ObjectError::BadMoveAssignment {
                component: info.name().to_string(),
            });
        }

        for info in shared {
            if let (Some(assign), Some(dest), Some(source)) =
                (info.lifecycle().move_assign, self.get(info.id()), other.get(info.id()))
            {
                // SAFETY: both pointers are live instances of the same component.
                unsafe { assign(dest, source) };
            }
        }
        Ok(())
    }
}

impl Default for Object {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Object {
    fn drop(&mut self) {
        self.clear();
        if let Some(allocator) = self.allocator.take() {
            allocator.object().on_detach(self.id);
        }
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("id", &self.id)
            .field(
                "components",
                &self.composition.components().iter().map(|info| info.name()).collect::<Vec<_>>(),
            )
            .field("allocator", &self.allocator)
            .finish()
    }
}
