// registry.rs - Process-wide component and composition registry
//
// Descriptors are leaked on registration: they live until process exit and
// objects hold plain `&'static` references to them.

use crate::mixin::{
    ComponentDescriptor, ComponentId, CompositionDescriptor, RegistryError, INVALID_COMPONENT_ID,
    MAX_COMPONENTS,
};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use tracing::debug;

#[derive(Default)]
struct Registry {
    by_id: HashMap<ComponentId, &'static ComponentDescriptor>,
    by_name: HashMap<String, ComponentId>,
    compositions: HashMap<Vec<ComponentId>, &'static CompositionDescriptor>,
}

static REGISTRY: Lazy<RwLock<Registry>> = Lazy::new(|| RwLock::new(Registry::default()));

/// Register a component descriptor.
///
/// Registering the same id again with the same name and layout returns the
/// descriptor already stored.
pub fn register_component(
    descriptor: ComponentDescriptor,
) -> Result<&'static ComponentDescriptor, RegistryError> {
    let id = descriptor.id();
    if id as usize >= MAX_COMPONENTS {
        return Err(RegistryError::IdOutOfRange {
            id,
            max: MAX_COMPONENTS,
        });
    }

    let mut registry = REGISTRY.write().unwrap_or_else(PoisonError::into_inner);
    if let Some(existing) = registry.by_id.get(&id) {
        if existing.same_shape(&descriptor) {
            return Ok(*existing);
        }
        return Err(RegistryError::ShapeMismatch {
            id,
            existing: existing.name().to_string(),
        });
    }
    if let Some(&existing) = registry.by_name.get(descriptor.name()) {
        return Err(RegistryError::NameConflict {
            name: descriptor.name().to_string(),
            existing,
        });
    }

    let leaked: &'static ComponentDescriptor = Box::leak(Box::new(descriptor));
    registry.by_id.insert(id, leaked);
    registry.by_name.insert(leaked.name().to_string(), id);
    debug!(id, name = leaked.name(), size = leaked.layout().size(), "registered component");
    Ok(leaked)
}

/// Look up component metadata by ID.
pub fn component(id: ComponentId) -> Option<&'static ComponentDescriptor> {
    REGISTRY
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .by_id
        .get(&id)
        .copied()
}

/// Look up component metadata by name.
pub fn component_by_name(name: &str) -> Option<&'static ComponentDescriptor> {
    let registry = REGISTRY.read().unwrap_or_else(PoisonError::into_inner);
    let id = registry.by_name.get(name)?;
    registry.by_id.get(id).copied()
}

/// Id registered under `name`, or [`INVALID_COMPONENT_ID`].
pub fn id_of(name: &str) -> ComponentId {
    REGISTRY
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .by_name
        .get(name)
        .copied()
        .unwrap_or(INVALID_COMPONENT_ID)
}

/// Id registered under `name`, failing with [`RegistryError::UnknownName`].
pub fn try_id_of(name: &str) -> Result<ComponentId, RegistryError> {
    match id_of(name) {
        INVALID_COMPONENT_ID => Err(RegistryError::UnknownName {
            name: name.to_string(),
        }),
        id => Ok(id),
    }
}

/// Interned composition for a set of component ids. Order and duplicates in
/// `ids` are irrelevant; the empty set yields the empty sentinel.
pub fn composition(ids: &[ComponentId]) -> Result<&'static CompositionDescriptor, RegistryError> {
    let mut key = ids.to_vec();
    key.sort_unstable();
    key.dedup();
    if key.is_empty() {
        return Ok(CompositionDescriptor::empty());
    }
    if let Some(&id) = key.iter().find(|&&id| id as usize >= MAX_COMPONENTS) {
        return Err(RegistryError::IdOutOfRange {
            id,
            max: MAX_COMPONENTS,
        });
    }

    if let Some(existing) = REGISTRY
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .compositions
        .get(&key)
    {
        return Ok(*existing);
    }

    let mut registry = REGISTRY.write().unwrap_or_else(PoisonError::into_inner);
    // another thread may have interned it between the two locks
    if let Some(existing) = registry.compositions.get(&key) {
        return Ok(*existing);
    }

    let components = key
        .iter()
        .map(|id| {
            registry
                .by_id
                .get(id)
                .copied()
                .ok_or(RegistryError::UnknownComponent { id: *id })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let leaked: &'static CompositionDescriptor =
        Box::leak(Box::new(CompositionDescriptor::new(components)));
    debug!(
        composition = leaked.id(),
        components = ?key,
        "interned composition"
    );
    registry.compositions.insert(key, leaked);
    Ok(leaked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::define_mixin;
    use crate::mixin::Mixin;
    use std::alloc::Layout;
    use std::ptr;

    #[derive(Default)]
    struct Speed(f32);
    define_mixin!(Speed, 20, "registry.Speed");

    #[derive(Default)]
    struct Armor(i32);
    define_mixin!(Armor, 21, "registry.Armor");

    #[test]
    fn lookup_by_id_and_name() {
        let info = Speed::descriptor();
        assert!(ptr::eq(component(Speed::ID).unwrap(), info));
        assert!(ptr::eq(component_by_name("registry.Speed").unwrap(), info));
        assert_eq!(id_of("registry.Speed"), Speed::ID);
        assert_eq!(id_of("registry.Nope"), INVALID_COMPONENT_ID);
        assert_eq!(try_id_of("registry.Speed"), Ok(Speed::ID));
        assert_eq!(
            try_id_of("registry.Nope"),
            Err(RegistryError::UnknownName {
                name: "registry.Nope".to_string()
            })
        );
        assert!(component_by_name("registry.Nope").is_none());
    }

    #[test]
    fn compositions_are_interned() {
        Speed::descriptor();
        Armor::descriptor();
        let a = composition(&[Speed::ID, Armor::ID]).unwrap();
        let b = composition(&[Armor::ID, Speed::ID, Armor::ID]).unwrap();
        assert!(ptr::eq(a, b));
        assert!(composition(&[]).unwrap().is_empty());
    }

    #[test]
    fn unknown_and_out_of_range_ids_are_rejected() {
        assert_eq!(
            composition(&[29]).unwrap_err(),
            RegistryError::UnknownComponent { id: 29 }
        );
        assert_eq!(
            composition(&[MAX_COMPONENTS as ComponentId]).unwrap_err(),
            RegistryError::IdOutOfRange {
                id: MAX_COMPONENTS as ComponentId,
                max: MAX_COMPONENTS
            }
        );
    }

    #[test]
    fn conflicting_registrations_are_rejected() {
        Speed::descriptor();
        let impostor = unsafe {
            ComponentDescriptor::from_raw(Speed::ID, "registry.Impostor", Layout::new::<u64>(), Default::default())
        };
        assert!(matches!(
            register_component(impostor),
            Err(RegistryError::ShapeMismatch { id: 20, .. })
        ));

        let stolen_name = unsafe {
            ComponentDescriptor::from_raw(22, "registry.Speed", Layout::new::<u64>(), Default::default())
        };
        assert_eq!(
            register_component(stolen_name).unwrap_err(),
            RegistryError::NameConflict {
                name: "registry.Speed".to_string(),
                existing: Speed::ID
            }
        );
    }

    #[test]
    fn reregistering_same_shape_returns_existing() {
        let first = Armor::descriptor();
        let again = register_component(Armor::describe()).unwrap();
        assert!(ptr::eq(first, again));
    }
}
