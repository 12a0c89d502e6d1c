//! Gateway data model module.
//!
//! # Purpose
//! Re-exports the read-only camera record and the caller identity shared by
//! the auth, store and API layers.
mod camera;
mod caller;

pub use caller::Caller;
pub use camera::{Camera, CameraKey};
