use crate::mixin::ComponentId;
use thiserror::Error;

/// Errors raised while registering or resolving components and compositions.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("component id {id} is outside the supported range 0..{max}")]
    IdOutOfRange { id: ComponentId, max: usize },

    #[error("component id {id} is not registered")]
    UnknownComponent { id: ComponentId },

    #[error("no component is registered under the name '{name}'")]
    UnknownName { name: String },

    #[error("component id {id} is already registered as '{existing}' with a different shape")]
    ShapeMismatch { id: ComponentId, existing: String },

    #[error("component name '{name}' is already used by component id {existing}")]
    NameConflict { name: String, existing: ComponentId },
}
