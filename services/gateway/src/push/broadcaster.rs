//! Event production seam.
//!
//! Producers hand a tenant and a JSON payload to an [`EventBroadcaster`]; the
//! hub-backed implementation serializes the envelope once and fans it out to
//! the tenant's live push connections without blocking.
use super::messages::event_frame;
use camgate_hub::{DispatchReport, Dispatcher};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("tenant id must not be empty")]
    EmptyTenant,
    #[error("event payload could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
}

pub trait EventBroadcaster: Send + Sync {
    fn dispatch(&self, tenant_id: &str, payload: &Value) -> Result<DispatchReport, BroadcastError>;
}

#[derive(Debug, Clone)]
pub struct HubBroadcaster {
    dispatcher: Dispatcher,
}

impl HubBroadcaster {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }
}

impl EventBroadcaster for HubBroadcaster {
    fn dispatch(&self, tenant_id: &str, payload: &Value) -> Result<DispatchReport, BroadcastError> {
        if tenant_id.trim().is_empty() {
            return Err(BroadcastError::EmptyTenant);
        }
        let frame = event_frame(payload)?;
        let report = self.dispatcher.dispatch(tenant_id, frame);
        tracing::debug!(
            %tenant_id,
            delivered = report.delivered,
            dropped = report.dropped,
            pruned = report.pruned,
            "event dispatched"
        );
        Ok(report)
    }
}
