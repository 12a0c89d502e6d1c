//! Gateway HTTP API module.
//!
//! # Purpose
//! Route handlers for stream relay, event push upgrades, internal dispatch and
//! system endpoints, plus the shared error and payload types.
pub mod error;
pub mod events;
pub mod internal;
pub mod openapi;
pub mod streams;
pub mod system;
pub mod types;
