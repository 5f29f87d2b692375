//! Mixin metadata: what an object can be made of.
//!
//! Component descriptors are registered once per process and never freed.
//! Composition descriptors are interned per distinct component set and are
//! shared by every object with exactly that set. Neither is ever mutated after
//! construction apart from its diagnostic live counter.

mod component;
mod composition;
mod registry;
mod registry_error;
mod template;

pub use component::{
    Capability, ComponentDescriptor, ComponentId, ConstructFn, CopyFn, DestroyFn, Lifecycle,
    Mixin, MoveFn, INVALID_COMPONENT_ID, MAX_COMPONENTS,
};
pub use composition::{
    CompositionDescriptor, CompositionId, TypeClass, DEFAULT_DISPATCH_SLOT, SLOT_OFFSET,
};
pub use registry::{
    component, component_by_name, composition, id_of, register_component, try_id_of,
};
pub use registry_error::RegistryError;
pub use template::CompositionTemplate;

/// Implement [`Mixin`] for a type.
///
/// The plain form registers default construction, destruction and moves.
/// Append `clone` to also register copy construction and copy assignment
/// (the type must implement `Clone`).
///
/// # Example
/// ```ignore
/// #[derive(Default, Clone)]
/// struct Health { value: i32 }
///
/// define_mixin!(Health, 1, "Health", clone);
/// ```
#[macro_export]
macro_rules! define_mixin {
    ($ty:ty, $id:expr, $name:expr) => {
        impl $crate::mixin::Mixin for $ty {
            const ID: $crate::mixin::ComponentId = $id;
            const NAME: &'static str = $name;
        }
    };
    ($ty:ty, $id:expr, $name:expr, clone) => {
        impl $crate::mixin::Mixin for $ty {
            const ID: $crate::mixin::ComponentId = $id;
            const NAME: &'static str = $name;

            fn describe() -> $crate::mixin::ComponentDescriptor {
                $crate::mixin::ComponentDescriptor::of_clonable::<$ty>()
            }
        }
    };
}
