//! Morph Core
//!
//! Runtime-composable objects:
//! - Component (mixin) descriptors and the process-wide registry
//! - Composition descriptors shared by every object of the same shape
//! - Storage cells and pluggable allocators
//! - `Object` and the retyping engine that moves it between compositions

pub mod mixin;
pub mod object;
pub mod storage;

pub use mixin::{
    component, component_by_name, composition, id_of, register_component, try_id_of,
    ComponentDescriptor, ComponentId, CompositionDescriptor, CompositionTemplate, Lifecycle, Mixin,
    RegistryError, TypeClass, INVALID_COMPONENT_ID, MAX_COMPONENTS,
};
pub use object::{Object, ObjectError, ObjectId, RetypeStatus};
pub use storage::{
    owner_of, AllocatorHandle, ComponentAllocator, HeapAllocator, ObjectAllocator, OwnerTag,
    StorageCell, TrackingAllocator, Transfer, HEAP,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
