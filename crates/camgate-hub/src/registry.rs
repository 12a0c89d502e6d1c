use crate::connection::{Connection, ConnectionId};
use arc_swap::ArcSwap;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

pub const DEFAULT_PUSH_QUEUE_CAPACITY: usize = 64;

/// Tenant-partitioned set of live push connections.
///
/// Different tenants live in different map shards and each tenant has its
/// own member lock, so admissions for one tenant do not wait on another
/// tenant's traffic beyond a momentary shard lock. Broadcast readers never
/// take the member lock: they load the tenant's published snapshot.
///
/// ```
/// use camgate_hub::{Connection, ConnectionRegistry};
///
/// let registry = ConnectionRegistry::new();
/// let (conn, _rx) = Connection::open("t1", "user-1", 8);
/// assert!(registry.admit(&conn));
/// assert_eq!(registry.snapshot("t1").len(), 1);
/// assert!(registry.remove("t1", conn.id()));
/// assert!(!registry.remove("t1", conn.id()));
/// ```
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    // tenant id -> that tenant's connection set.
    tenants: DashMap<String, Arc<TenantConnections>>,
    // Live connections across all tenants; moves only on effective admit/remove.
    total: AtomicUsize,
}

#[derive(Debug)]
struct TenantConnections {
    // Lock-free view used by broadcasts; rebuilt on every membership change.
    snapshot: ArcSwap<Vec<Connection>>,
    // Authoritative membership, mutated only on admit/remove.
    members: Mutex<HashMap<ConnectionId, Connection>>,
}

impl TenantConnections {
    fn new() -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(Vec::new()),
            members: Mutex::new(HashMap::new()),
        }
    }

    /// Insert and bump `total` under the member lock. Returns the new total,
    /// or `None` if the connection was already present.
    fn insert(&self, connection: &Connection, total: &AtomicUsize) -> Option<usize> {
        let mut members = self.members.lock();
        if members.contains_key(&connection.id()) {
            return None;
        }
        members.insert(connection.id(), connection.clone());
        // Counted under the lock, so a racing remove never decrements first.
        let now = total.fetch_add(1, Ordering::AcqRel) + 1;
        self.rebuild_snapshot(&members);
        Some(now)
    }

    /// Remove the given ids and decrement `total` under the member lock.
    fn remove(&self, ids: &[ConnectionId], total: &AtomicUsize) -> (usize, usize) {
        let mut members = self.members.lock();
        let removed = ids
            .iter()
            .filter(|id| members.remove(id).is_some())
            .count();
        if removed == 0 {
            return (0, total.load(Ordering::Acquire));
        }
        let now = total.fetch_sub(removed, Ordering::AcqRel) - removed;
        self.rebuild_snapshot(&members);
        (removed, now)
    }

    fn is_empty(&self) -> bool {
        self.members.lock().is_empty()
    }

    fn len(&self) -> usize {
        self.members.lock().len()
    }

    fn rebuild_snapshot(&self, members: &HashMap<ConnectionId, Connection>) {
        // Admission order keeps broadcasts deterministic for a given membership.
        let mut snapshot: Vec<Connection> = members.values().cloned().collect();
        snapshot.sort_unstable_by_key(Connection::id);
        self.snapshot.store(Arc::new(snapshot));
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection under its own tenant.
    ///
    /// Returns `false` if the connection was already admitted.
    pub fn admit(&self, connection: &Connection) -> bool {
        let entry = self
            .tenants
            .entry(connection.tenant_id().to_string())
            .or_insert_with(|| Arc::new(TenantConnections::new()));
        // The shard guard is still held here, so a concurrent prune of an
        // empty set cannot orphan this insert.
        let inserted = entry.value().insert(connection, &self.total);
        drop(entry);

        if let Some(total) = inserted {
            metrics::gauge!("camgate_push_connections").set(total as f64);
            tracing::debug!(
                tenant_id = connection.tenant_id(),
                connection_id = %connection.id(),
                "push connection admitted"
            );
        }
        inserted.is_some()
    }

    /// Admit and return a guard that removes the connection when dropped.
    pub fn admit_guarded(self: &Arc<Self>, connection: &Connection) -> AdmissionGuard {
        self.admit(connection);
        AdmissionGuard {
            registry: Arc::downgrade(self),
            tenant_id: connection.tenant_id().to_string(),
            connection_id: connection.id(),
        }
    }

    /// Remove a connection. Removing an absent connection is a no-op.
    pub fn remove(&self, tenant_id: &str, connection_id: ConnectionId) -> bool {
        self.remove_many(tenant_id, &[connection_id]) == 1
    }

    /// Remove a batch of connections from one tenant under a single lock.
    pub fn remove_many(&self, tenant_id: &str, connection_ids: &[ConnectionId]) -> usize {
        if connection_ids.is_empty() {
            return 0;
        }
        let Some(set) = self
            .tenants
            .get(tenant_id)
            .map(|entry| Arc::clone(entry.value()))
        else {
            return 0;
        };

        let (removed, total) = set.remove(connection_ids, &self.total);
        if removed > 0 {
            metrics::gauge!("camgate_push_connections").set(total as f64);
            tracing::debug!(tenant_id, removed, "push connections removed");
        }
        if set.is_empty() {
            // Re-checked under the shard lock: an admit may have raced in.
            self.tenants.remove_if(tenant_id, |_, set| set.is_empty());
        }
        removed
    }

    /// Live connections of one tenant at the time of the call.
    pub fn snapshot(&self, tenant_id: &str) -> Arc<Vec<Connection>> {
        self.tenants
            .get(tenant_id)
            .map(|entry| entry.value().snapshot.load_full())
            .unwrap_or_default()
    }

    pub fn contains(&self, tenant_id: &str, connection_id: ConnectionId) -> bool {
        self.snapshot(tenant_id)
            .iter()
            .any(|connection| connection.id() == connection_id)
    }

    pub fn connection_count(&self, tenant_id: &str) -> usize {
        self.tenants
            .get(tenant_id)
            .map(|entry| entry.value().len())
            .unwrap_or(0)
    }

    pub fn total_connections(&self) -> usize {
        self.total.load(Ordering::Acquire)
    }

    /// Tenants with at least one entry; emptied tenants are pruned on remove.
    pub fn tenant_count(&self) -> usize {
        self.tenants.len()
    }
}

/// RAII handle that removes an admitted connection on drop.
#[derive(Debug)]
pub struct AdmissionGuard {
    registry: Weak<ConnectionRegistry>,
    tenant_id: String,
    connection_id: ConnectionId,
}

impl AdmissionGuard {
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Remove now instead of waiting for drop. Safe to combine with drop.
    pub fn release(&self) -> bool {
        match self.registry.upgrade() {
            Some(registry) => registry.remove(&self.tenant_id, self.connection_id),
            None => false,
        }
    }
}

impl Drop for AdmissionGuard {
    fn drop(&mut self) {
        self.release();
    }
}
