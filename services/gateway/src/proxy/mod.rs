//! Stream proxy engine.
//!
//! # Purpose
//! Relays camera streams from the internal camera backend to authorized
//! callers. Callers never learn the backend's address; the gateway composes the
//! upstream URL from its configured base, the percent-encoded camera key and a
//! format-specific suffix.
pub mod engine;
pub mod format;
pub mod upstream;

pub use engine::{ProxyError, RelayMethod, StreamProxy, StreamRequest};
pub use format::{StreamFormat, UnknownFormat};
pub use upstream::UpstreamTarget;
