// Per-tenant registry of live push connections and the broadcast fan-out that
// feeds them. The registry is the only shared mutable state in the gateway:
// admission and removal go through its synchronized operations and broadcasts
// iterate immutable snapshots, so a connection closing mid-broadcast never
// disturbs the fan-out loop.
mod connection;
mod dispatch;
mod registry;

pub use connection::{Connection, ConnectionId, PushError, PushFrame, PushReceiver};
pub use dispatch::{DispatchReport, Dispatcher};
pub use registry::{AdmissionGuard, ConnectionRegistry, DEFAULT_PUSH_QUEUE_CAPACITY};
