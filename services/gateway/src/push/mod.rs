//! Tenant-scoped event push over WebSocket.
//!
//! # Purpose
//! Keeps one long-lived socket per subscribed caller, registered under the
//! caller's tenant, and writes broadcast events to it. The connection registry
//! and dispatcher live in `camgate-hub`; this module owns the wire messages,
//! the per-socket state machine and the producer-facing broadcaster.
pub mod broadcaster;
pub mod messages;
pub mod session;

pub use broadcaster::{BroadcastError, EventBroadcaster, HubBroadcaster};
pub use messages::{ClientMessage, ServerMessage};
pub use session::{
    CloseReason, PushSettings, SessionContext, SessionShutdown, SessionState, run_session,
};
