use crate::connection::{PushError, PushFrame};
use crate::registry::ConnectionRegistry;
use std::sync::Arc;

/// Outcome of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Frames queued onto live connections.
    pub delivered: usize,
    /// Frames dropped because a connection's queue was full.
    pub dropped: usize,
    /// Connections found closed and removed from the registry.
    pub pruned: usize,
}

/// Fans a frame out to every live connection of a tenant.
///
/// Pushes never wait: each connection has a bounded queue and a full queue
/// drops the frame for that connection only, so a slow subscriber can't stall
/// the producer or its peers. Closed queues are pruned from the registry and
/// the fan-out carries on with the rest of the snapshot.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<ConnectionRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn dispatch(&self, tenant_id: &str, frame: PushFrame) -> DispatchReport {
        let connections = self.registry.snapshot(tenant_id);
        let mut report = DispatchReport::default();
        let mut closed = Vec::new();

        for connection in connections.iter() {
            match connection.try_push(frame.clone()) {
                Ok(()) => report.delivered += 1,
                Err(PushError::Full) => {
                    report.dropped += 1;
                    tracing::debug!(
                        tenant_id,
                        connection_id = %connection.id(),
                        "push queue full; event dropped for connection"
                    );
                }
                Err(PushError::Closed) => closed.push(connection.id()),
            }
        }

        if !closed.is_empty() {
            // Only count what this call actually removed; the socket task may
            // have raced us to it.
            report.pruned = self.registry.remove_many(tenant_id, &closed);
        }

        metrics::counter!("camgate_dispatch_delivered_total").increment(report.delivered as u64);
        if report.dropped > 0 {
            metrics::counter!("camgate_dispatch_dropped_total").increment(report.dropped as u64);
        }
        if report.pruned > 0 {
            metrics::counter!("camgate_dispatch_pruned_total").increment(report.pruned as u64);
        }
        tracing::trace!(
            tenant_id,
            delivered = report.delivered,
            dropped = report.dropped,
            pruned = report.pruned,
            "dispatch complete"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connection;

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(Arc::new(ConnectionRegistry::new()))
    }

    #[test]
    fn dispatch_reaches_only_the_target_tenant() {
        let dispatcher = dispatcher();
        let registry = dispatcher.registry().clone();
        let (a, mut rx_a) = Connection::open("t1", "u1", 4);
        let (b, mut rx_b) = Connection::open("t1", "u2", 4);
        let (c, mut rx_c) = Connection::open("t2", "u3", 4);
        registry.admit(&a);
        registry.admit(&b);
        registry.admit(&c);

        let report = dispatcher.dispatch("t1", PushFrame::new("hello"));
        assert_eq!(report.delivered, 2);
        assert_eq!(rx_a.try_recv().expect("a").text(), "hello");
        assert_eq!(rx_b.try_recv().expect("b").text(), "hello");
        assert!(rx_c.try_recv().is_err());
    }

    #[test]
    fn dispatch_prunes_exactly_the_closed_connections() {
        let dispatcher = dispatcher();
        let registry = dispatcher.registry().clone();
        let (live, mut rx_live) = Connection::open("t1", "u1", 4);
        let (gone_a, rx_gone_a) = Connection::open("t1", "u2", 4);
        let (gone_b, rx_gone_b) = Connection::open("t1", "u3", 4);
        registry.admit(&live);
        registry.admit(&gone_a);
        registry.admit(&gone_b);
        drop(rx_gone_a);
        drop(rx_gone_b);

        let report = dispatcher.dispatch("t1", PushFrame::new("evt"));
        assert_eq!(
            report,
            DispatchReport {
                delivered: 1,
                dropped: 0,
                pruned: 2
            }
        );
        let remaining = registry.snapshot("t1");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id(), live.id());
        assert_eq!(rx_live.try_recv().expect("live").text(), "evt");
    }

    #[test]
    fn full_queue_drops_without_pruning() {
        let dispatcher = dispatcher();
        let registry = dispatcher.registry().clone();
        let (slow, mut rx_slow) = Connection::open("t1", "u1", 1);
        registry.admit(&slow);

        assert_eq!(dispatcher.dispatch("t1", PushFrame::new("one")).delivered, 1);
        let report = dispatcher.dispatch("t1", PushFrame::new("two"));
        assert_eq!(report.dropped, 1);
        assert_eq!(report.pruned, 0);
        assert!(registry.contains("t1", slow.id()));
        assert_eq!(rx_slow.try_recv().expect("first").text(), "one");
    }

    #[test]
    fn dispatch_preserves_order_per_connection() {
        let dispatcher = dispatcher();
        let (conn, mut rx) = Connection::open("t1", "u1", 8);
        dispatcher.registry().admit(&conn);
        for text in ["1", "2", "3"] {
            dispatcher.dispatch("t1", PushFrame::new(text));
        }
        let seen: Vec<String> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|frame| frame.text().to_string())
            .collect();
        assert_eq!(seen, vec!["1", "2", "3"]);
    }

    #[test]
    fn dispatch_to_unknown_tenant_is_empty() {
        let report = dispatcher().dispatch("nobody", PushFrame::new("x"));
        assert_eq!(report, DispatchReport::default());
    }

    #[test]
    fn prune_already_removed_by_guard_is_not_counted() {
        let dispatcher = dispatcher();
        let registry = dispatcher.registry().clone();
        let (conn, rx) = Connection::open("t1", "u1", 4);
        let guard = registry.admit_guarded(&conn);
        let stale = registry.snapshot("t1");
        drop(rx);
        drop(guard);
        assert_eq!(stale.len(), 1);
        let report = dispatcher.dispatch("t1", PushFrame::new("x"));
        assert_eq!(report.pruned, 0);
        assert_eq!(registry.total_connections(), 0);
    }
}
