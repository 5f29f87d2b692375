use crate::mixin::RegistryError;
use thiserror::Error;

/// Failures surfaced by object copy, move and relocation operations.
///
/// Structural failures leave the object fully constructed; see each
/// operation for what state it is left in.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ObjectError {
    #[error("a component of the source object cannot be copy-constructed")]
    BadCopyConstruction,

    #[error("a component shared by both objects cannot be copy-assigned")]
    BadCopyAssignment,

    #[error("component '{component}' cannot be move-assigned")]
    BadMoveAssignment { component: String },

    #[error("component '{component}' cannot be move-constructed")]
    BadMove { component: String },

    #[error(transparent)]
    Registry(#[from] RegistryError),
}
