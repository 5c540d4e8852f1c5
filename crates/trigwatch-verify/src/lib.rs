//! Target verification and trigger binding.
//!
//! [`verify_targets`] turns each target of a trigger into a problem tree;
//! [`TriggerBinder`] runs the structural checks a trigger must pass before
//! it is persisted.

pub mod binder;
pub mod error;
pub mod verify;

#[cfg(test)]
mod tests;

pub use binder::{render_description, BoundTrigger, TriggerBinder};
pub use error::{BindError, VerifyError};
pub use verify::{verify_target, verify_targets};
