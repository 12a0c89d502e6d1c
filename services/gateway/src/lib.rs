//! Camera stream gateway library crate.
//!
//! # Purpose
//! Exposes the gateway's HTTP/WebSocket surface, token verification, camera
//! directory backends, ownership resolution, stream relay, and push sessions
//! for use by the binary and tests.
//!
//! # Notes
//! The push connection registry and broadcast fan-out live in `camgate-hub`;
//! this crate wires them to sockets and HTTP.
pub mod api;
pub mod app;
pub mod auth;
pub mod config;
pub mod model;
pub mod observability;
pub mod ownership;
pub mod proxy;
pub mod push;
pub mod store;
