// component.rs - Runtime component (mixin) descriptors
//
// Components are identified by u32 IDs, not Rust TypeIds.
// This lets externally described components coexist with Rust mixins.

use crate::mixin::registry;
use crate::storage::{ComponentAllocator, HEAP};
use std::alloc::Layout;
use std::any::TypeId;
use std::fmt;
use std::mem::{self, needs_drop};
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicUsize, Ordering};

pub type ComponentId = u32;

/// Exclusive upper bound for component ids.
pub const MAX_COMPONENTS: usize = 256;

/// Returned by name lookups that match nothing. Always out of range.
pub const INVALID_COMPONENT_ID: ComponentId = ComponentId::MAX;

/// Initialize uninitialized storage with a default value.
pub type ConstructFn = unsafe fn(NonNull<u8>);
/// Drop a live value in place.
pub type DestroyFn = unsafe fn(NonNull<u8>);
/// `(dest, source)`: clone-construct into uninitialized `dest`, or clone-assign into live `dest`.
pub type CopyFn = unsafe fn(NonNull<u8>, NonNull<u8>);
/// `(dest, source)`: move `source` into `dest`.
pub type MoveFn = unsafe fn(NonNull<u8>, NonNull<u8>);

/// One entry of a component's lifecycle capability set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Capability {
    DefaultConstruct,
    CopyConstruct,
    CopyAssign,
    MoveConstruct,
    MoveAssign,
}

/// Lifecycle functions of a component kind. `None` marks an unsupported capability,
/// except for `destroy` where `None` means the value is trivially destructible.
#[derive(Clone, Copy, Default)]
pub struct Lifecycle {
    pub default_construct: Option<ConstructFn>,
    pub destroy: Option<DestroyFn>,
    pub copy_construct: Option<CopyFn>,
    pub copy_assign: Option<CopyFn>,
    pub move_construct: Option<MoveFn>,
    /// Leaves the source in its default state so both sides stay live.
    pub move_assign: Option<MoveFn>,
}

impl Lifecycle {
    /// Default construction, destruction and moves for `T`.
    pub fn of<T: Default + 'static>() -> Self {
        Self {
            default_construct: Some(default_construct::<T>),
            destroy: needs_drop::<T>().then_some(destroy::<T> as DestroyFn),
            copy_construct: None,
            copy_assign: None,
            move_construct: Some(move_construct::<T>),
            move_assign: Some(move_assign::<T>),
        }
    }

    /// Add copy construction and copy assignment for `T`.
    pub fn with_copy<T: Clone + 'static>(mut self) -> Self {
        self.copy_construct = Some(copy_construct::<T>);
        self.copy_assign = Some(copy_assign::<T>);
        self
    }

    pub fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::DefaultConstruct => self.default_construct.is_some(),
            Capability::CopyConstruct => self.copy_construct.is_some(),
            Capability::CopyAssign => self.copy_assign.is_some(),
            Capability::MoveConstruct => self.move_construct.is_some(),
            Capability::MoveAssign => self.move_assign.is_some(),
        }
    }
}

impl fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifecycle")
            .field("default_construct", &self.default_construct.is_some())
            .field("destroy", &self.destroy.is_some())
            .field("copy_construct", &self.copy_construct.is_some())
            .field("copy_assign", &self.copy_assign.is_some())
            .field("move_construct", &self.move_construct.is_some())
            .field("move_assign", &self.move_assign.is_some())
            .finish()
    }
}

unsafe fn default_construct<T: Default>(data: NonNull<u8>) {
    data.cast::<T>().as_ptr().write(T::default());
}

unsafe fn destroy<T>(data: NonNull<u8>) {
    ptr::drop_in_place(data.cast::<T>().as_ptr());
}

unsafe fn copy_construct<T: Clone>(dest: NonNull<u8>, source: NonNull<u8>) {
    let value = (*source.cast::<T>().as_ptr()).clone();
    dest.cast::<T>().as_ptr().write(value);
}

unsafe fn copy_assign<T: Clone>(dest: NonNull<u8>, source: NonNull<u8>) {
    (*dest.cast::<T>().as_ptr()).clone_from(&*source.cast::<T>().as_ptr());
}

unsafe fn move_construct<T>(dest: NonNull<u8>, source: NonNull<u8>) {
    dest.cast::<T>().as_ptr().write(source.cast::<T>().as_ptr().read());
}

unsafe fn move_assign<T: Default>(dest: NonNull<u8>, source: NonNull<u8>) {
    *dest.cast::<T>().as_ptr() = mem::take(&mut *source.cast::<T>().as_ptr());
}

/// Immutable per-kind metadata. One instance per component kind, registered once
/// and kept for the life of the process.
pub struct ComponentDescriptor {
    id: ComponentId,
    name: String,
    layout: Layout,
    type_id: Option<TypeId>,
    lifecycle: Lifecycle,
    allocator: &'static dyn ComponentAllocator,
    live_instances: AtomicUsize,
}

impl ComponentDescriptor {
    /// Describe a Rust mixin without copy support.
    pub fn of<T: Mixin>() -> Self {
        Self {
            id: T::ID,
            name: T::NAME.to_string(),
            layout: Layout::new::<T>(),
            type_id: Some(TypeId::of::<T>()),
            lifecycle: Lifecycle::of::<T>(),
            allocator: &HEAP,
            live_instances: AtomicUsize::new(0),
        }
    }

    /// Describe a Rust mixin that can also be copied.
    pub fn of_clonable<T: Mixin + Clone>() -> Self {
        let mut descriptor = Self::of::<T>();
        descriptor.lifecycle = descriptor.lifecycle.with_copy::<T>();
        descriptor
    }

    /// Describe a component that has no Rust type behind it.
    ///
    /// # Safety
    /// Every function in `lifecycle` must be valid for storage of `layout`, and
    /// the values it manages must be safe to send and share across threads.
    pub unsafe fn from_raw(
        id: ComponentId,
        name: impl Into<String>,
        layout: Layout,
        lifecycle: Lifecycle,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            layout,
            type_id: None,
            lifecycle,
            allocator: &HEAP,
            live_instances: AtomicUsize::new(0),
        }
    }

    /// Replace the default allocator used when an object has none of its own.
    pub fn with_allocator(mut self, allocator: &'static dyn ComponentAllocator) -> Self {
        self.allocator = allocator;
        self
    }

    #[inline]
    pub fn id(&self) -> ComponentId {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// `None` for components without a Rust type.
    #[inline]
    pub fn type_id(&self) -> Option<TypeId> {
        self.type_id
    }

    #[inline]
    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    #[inline]
    pub fn supports(&self, capability: Capability) -> bool {
        self.lifecycle.supports(capability)
    }

    /// True when the component can be both copy-constructed and copy-assigned.
    pub fn is_copyable(&self) -> bool {
        self.supports(Capability::CopyConstruct) && self.supports(Capability::CopyAssign)
    }

    #[inline]
    pub fn allocator(&self) -> &'static dyn ComponentAllocator {
        self.allocator
    }

    /// Constructed instances across all objects. Diagnostics only.
    pub fn live_instances(&self) -> usize {
        self.live_instances.load(Ordering::Relaxed)
    }

    pub(crate) fn instance_created(&self) {
        self.live_instances.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn instance_destroyed(&self) {
        let result = self
            .live_instances
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
        debug_assert!(result.is_ok(), "component `{}` destroyed more often than built", self.name);
    }

    /// Layout and name must match for a re-registration to be accepted.
    pub(crate) fn same_shape(&self, other: &ComponentDescriptor) -> bool {
        self.name == other.name && self.layout == other.layout && self.type_id == other.type_id
    }
}

impl fmt::Debug for ComponentDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentDescriptor")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("layout", &self.layout)
            .field("lifecycle", &self.lifecycle)
            .field("live_instances", &self.live_instances())
            .finish()
    }
}

/// Trait for Rust-defined mixins.
///
/// Implement through [`define_mixin!`](crate::define_mixin) rather than by hand.
pub trait Mixin: 'static + Sized + Send + Sync + Default {
    /// Globally unique component ID.
    const ID: ComponentId;

    /// Human-readable name, also usable for lookups.
    const NAME: &'static str;

    /// Build this mixin's descriptor. Overridden to add copy support.
    fn describe() -> ComponentDescriptor {
        ComponentDescriptor::of::<Self>()
    }

    /// Registered descriptor, registering on first use.
    ///
    /// Panics if a different component already claimed `ID` or `NAME`.
    fn descriptor() -> &'static ComponentDescriptor {
        if let Some(existing) = registry::component(Self::ID) {
            return existing;
        }
        registry::register_component(Self::describe())
            .unwrap_or_else(|err| panic!("failed to register mixin `{}`: {err}", Self::NAME))
    }
}
