//! Object identity
//!
//! Every object gets a process-unique id when it is created. Owner tags
//! written in front of component data refer to objects by this id rather
//! than by address, so a Rust move of an `Object` leaves them valid.

use std::sync::atomic::{AtomicU64, Ordering};

/// Ids fit in the 48 bits an owner tag reserves for them.
const ID_BITS: u32 = 48;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(u64);

impl ObjectId {
    pub(crate) fn next() -> Self {
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        debug_assert!(id < 1 << ID_BITS, "object id space exhausted");
        Self(id & ((1 << ID_BITS) - 1))
    }

    /// Serialize to a 64-bit integer
    pub fn to_bits(&self) -> u64 {
        self.0
    }

    /// Deserialize from a 64-bit integer
    pub fn from_bits(bits: u64) -> Self {
        Self(bits)
    }
}
