//! hostbridge - the trust boundary between chat-site automation and the host
//!
//! A loopback daemon that pairs with a browser extension and lets it list,
//! read, search and (after policy checks and human confirmation) change files
//! and run allow-listed commands.
//!
//! Modules, leaf to root:
//! - `path_policy`, `redact`, `budget`: pure policy primitives
//! - `auth`, `store`, `app_config`: pairing, tokens, site keys, persisted settings
//! - `fs_service`, `write`, `process`: the operations themselves
//! - `confirm`, `audit`, `policy`: approvals, the event log, hot reload
//! - `command`, `daemon`, `mcp`, `server`: dispatch and transports

pub mod app_config;
pub mod audit;
pub mod auth;
pub mod budget;
pub mod command;
pub mod confirm;
pub mod daemon;
pub mod error;
pub mod fs_service;
pub mod mcp;
pub mod path_policy;
pub mod policy;
pub mod process;
pub mod redact;
pub mod server;
pub mod store;
pub mod write;

pub use daemon::Daemon;
pub use error::{BridgeError, ErrorCode, Result};
