//! Policy snapshot, validation and hot reload

pub mod config;
pub mod runtime;
pub mod validate;

pub use config::*;
pub use runtime::{Components, PolicyRuntimeManager, SharedState};
