//! Composition templates: describe a desired component set, then apply it.

use crate::mixin::{composition, ComponentId, CompositionDescriptor, Mixin, RegistryError};
use crate::object::{Object, RetypeStatus};
use std::collections::BTreeSet;

/// Builder for a target composition.
///
/// Applying a template is the only way an empty object acquires its first
/// components; it goes through [`Object::retype`] like every other change.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CompositionTemplate {
    ids: BTreeSet<ComponentId>,
}

impl CompositionTemplate {
    /// Create a new empty template.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an object's current components, e.g. to add or remove one.
    pub fn of(object: &Object) -> Self {
        Self {
            ids: object.composition().ids().collect(),
        }
    }

    /// Add a Rust mixin, registering it if needed.
    pub fn with<T: Mixin>(mut self) -> Self {
        self.ids.insert(T::descriptor().id());
        self
    }

    /// Add a component by id. Resolved when the template is built.
    pub fn with_id(mut self, id: ComponentId) -> Self {
        self.ids.insert(id);
        self
    }

    pub fn without<T: Mixin>(mut self) -> Self {
        self.ids.remove(&T::ID);
        self
    }

    pub fn without_id(mut self, id: ComponentId) -> Self {
        self.ids.remove(&id);
        self
    }

    pub fn contains(&self, id: ComponentId) -> bool {
        self.ids.contains(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = ComponentId> + '_ {
        self.ids.iter().copied()
    }

    /// Resolve the interned composition for this set.
    pub fn build(&self) -> Result<&'static CompositionDescriptor, RegistryError> {
        let ids: Vec<ComponentId> = self.ids.iter().copied().collect();
        composition(&ids)
    }

    /// Retype `object` to this template's composition.
    pub fn apply_to(&self, object: &mut Object) -> Result<RetypeStatus, RegistryError> {
        let target = self.build()?;
        Ok(object.retype(target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::define_mixin;

    #[derive(Default, Clone, Debug, PartialEq)]
    struct Fuel(u32);
    define_mixin!(Fuel, 40, "template.Fuel", clone);

    #[derive(Default, Clone, Debug, PartialEq)]
    struct Cargo(u32);
    define_mixin!(Cargo, 41, "template.Cargo", clone);

    #[test]
    fn apply_builds_and_retypes() {
        let mut object = Object::new();
        let status = CompositionTemplate::new()
            .with::<Fuel>()
            .with::<Cargo>()
            .apply_to(&mut object)
            .unwrap();
        assert_eq!(status, RetypeStatus::Success);
        assert!(object.has(Fuel::ID));
        assert!(object.has(Cargo::ID));

        let status = CompositionTemplate::of(&object)
            .without::<Cargo>()
            .apply_to(&mut object)
            .unwrap();
        assert!(status.is_success());
        assert!(object.has(Fuel::ID));
        assert!(!object.has(Cargo::ID));
    }

    #[test]
    fn unknown_id_fails_to_build() {
        let template = CompositionTemplate::new().with::<Fuel>().with_id(49);
        assert_eq!(
            template.build().unwrap_err(),
            RegistryError::UnknownComponent { id: 49 }
        );

        let mut object = Object::new();
        assert!(template.apply_to(&mut object).is_err());
        assert!(object.is_empty());
    }

    #[test]
    fn empty_template_clears() {
        let mut object = Object::new();
        CompositionTemplate::new().with::<Fuel>().apply_to(&mut object).unwrap();
        assert!(!object.is_empty());

        let template = CompositionTemplate::of(&object).without_id(Fuel::ID);
        assert!(!template.contains(Fuel::ID));
        template.apply_to(&mut object).unwrap();
        assert!(object.is_empty());
    }
}
