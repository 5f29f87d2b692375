//! Runtime-composable objects.
//!
//! An [`Object`] owns one composition descriptor and one cell array sized to
//! it. Changing the composition goes through the retyping engine, which keeps
//! components shared by both compositions in place, destroys the ones that
//! were dropped, and constructs the ones that were added.

mod error;
mod id;
#[allow(clippy::module_inception)]
mod object;
#[cfg(feature = "relocation")]
mod relocate;
mod retype;

pub use error::ObjectError;
pub use id::ObjectId;
pub use object::Object;
pub use retype::RetypeStatus;
