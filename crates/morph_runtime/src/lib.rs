//! Morph Runtime
//!
//! Settings and the lifecycle demo driven by the `morph` binary.

pub mod demo;
pub mod settings;
