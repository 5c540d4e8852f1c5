//! Types shared by every trigwatch crate: triggers, verification problem
//! trees, the error-kind taxonomy, request deadlines and id generation.

pub mod context;
pub mod error;
pub mod id;
pub mod problem;
pub mod types;
