//! Hostbridge Core - Shared functionality for the hostbridge daemon and tools
//!
//! Everything that needs to agree on where state lives on disk goes through
//! [`Paths`].

pub mod paths;

pub use paths::Paths;
