/// Live connection registry
///
/// Tracks the single live connection per user and the groups that
/// connection has joined. All state sits behind one `RwLock`; every public
/// operation takes the lock once, so connect/disconnect/join/leave events
/// arriving from independent sessions are serialized here and nowhere else.
///
/// Nothing in here fails: unknown users or connections are no-ops.
use super::{GroupKey, ServerEvent};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::time::Instant;
use uuid::Uuid;

/// Outbound half of a live socket
pub type EventSender = mpsc::UnboundedSender<ServerEvent>;

/// Unique identifier of one WebSocket session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for ConnectionId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

struct ConnectionEntry {
    user_id: Uuid,
    tenant_id: Uuid,
    groups: HashSet<GroupKey>,
    sender: EventSender,
    last_seen: Instant,
}

#[derive(Default)]
struct RegistryState {
    /// user -> current live connection (at most one per user)
    users: HashMap<Uuid, ConnectionId>,
    /// live connection records; only connections referenced from `users`
    connections: HashMap<ConnectionId, ConnectionEntry>,
}

#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<RegistryState>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the live connection for `user_id`.
    ///
    /// A previous connection for the same user is dropped from the registry
    /// without being told. Returns the superseded connection id, if any.
    pub async fn register(
        &self,
        user_id: Uuid,
        connection_id: ConnectionId,
        tenant_id: Uuid,
        sender: EventSender,
    ) -> Option<ConnectionId> {
        let mut state = self.inner.write().await;

        let superseded = state
            .users
            .insert(user_id, connection_id)
            .filter(|previous| *previous != connection_id);

        if let Some(previous) = superseded {
            state.connections.remove(&previous);
            tracing::debug!(
                user_id = %user_id,
                superseded = %previous,
                connection_id = %connection_id,
                "Connection superseded by newer session"
            );
        }

        state.connections.insert(
            connection_id,
            ConnectionEntry {
                user_id,
                tenant_id,
                groups: HashSet::new(),
                sender,
                last_seen: Instant::now(),
            },
        );

        superseded
    }

    /// Remove the user's mapping, but only if it still points at
    /// `connection_id`. A late disconnect from a stale session must not evict
    /// the newer one. Returns whether the mapping was removed.
    pub async fn unregister(&self, user_id: Uuid, connection_id: ConnectionId) -> bool {
        let mut state = self.inner.write().await;
        state.remove_if_current(user_id, connection_id)
    }

    /// Current live connection for a user
    pub async fn lookup(&self, user_id: Uuid) -> Option<ConnectionId> {
        let state = self.inner.read().await;
        state.users.get(&user_id).copied()
    }

    /// Tenant the connection authenticated under
    pub async fn tenant_of(&self, connection_id: ConnectionId) -> Option<Uuid> {
        let state = self.inner.read().await;
        state.connections.get(&connection_id).map(|c| c.tenant_id)
    }

    /// Add a live connection to a group. Returns false if the connection is
    /// not (or no longer) registered.
    pub async fn join_group(&self, connection_id: ConnectionId, key: GroupKey) -> bool {
        let mut state = self.inner.write().await;
        match state.connections.get_mut(&connection_id) {
            Some(entry) => {
                entry.groups.insert(key);
                true
            }
            None => false,
        }
    }

    /// Remove a connection from a group. Returns whether it was a member.
    pub async fn leave_group(&self, connection_id: ConnectionId, key: GroupKey) -> bool {
        let mut state = self.inner.write().await;
        state
            .connections
            .get_mut(&connection_id)
            .map(|entry| entry.groups.remove(&key))
            .unwrap_or(false)
    }

    pub async fn is_member(&self, connection_id: ConnectionId, key: GroupKey) -> bool {
        let state = self.inner.read().await;
        state
            .connections
            .get(&connection_id)
            .map(|entry| entry.groups.contains(&key))
            .unwrap_or(false)
    }

    /// Snapshot of the user's live channel
    pub async fn sender_for_user(&self, user_id: Uuid) -> Option<(ConnectionId, EventSender)> {
        let state = self.inner.read().await;
        let connection_id = state.users.get(&user_id)?;
        state
            .connections
            .get(connection_id)
            .map(|entry| (*connection_id, entry.sender.clone()))
    }

    /// Snapshot of every channel currently in `key`
    pub async fn group_senders(&self, key: GroupKey) -> Vec<(ConnectionId, EventSender)> {
        self.group_senders_where(key, |_| true).await
    }

    /// Members of `key` that authenticated under `tenant_id`
    pub async fn group_senders_in_tenant(
        &self,
        key: GroupKey,
        tenant_id: Uuid,
    ) -> Vec<(ConnectionId, EventSender)> {
        self.group_senders_where(key, |entry| entry.tenant_id == tenant_id)
            .await
    }

    async fn group_senders_where<F>(&self, key: GroupKey, keep: F) -> Vec<(ConnectionId, EventSender)>
    where
        F: Fn(&ConnectionEntry) -> bool,
    {
        let state = self.inner.read().await;
        state
            .connections
            .iter()
            .filter(|(_, entry)| entry.groups.contains(&key) && keep(entry))
            .map(|(id, entry)| (*id, entry.sender.clone()))
            .collect()
    }

    /// Record client activity for heartbeat eviction
    pub async fn touch(&self, connection_id: ConnectionId) -> bool {
        let mut state = self.inner.write().await;
        match state.connections.get_mut(&connection_id) {
            Some(entry) => {
                entry.last_seen = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Drop every connection not seen within `timeout`.
    ///
    /// Covers sessions that vanished without a disconnect event. Returns the
    /// evicted `(user_id, connection_id)` pairs.
    pub async fn evict_stale(&self, timeout: Duration) -> Vec<(Uuid, ConnectionId)> {
        let mut state = self.inner.write().await;
        let now = Instant::now();

        let stale: Vec<(Uuid, ConnectionId)> = state
            .connections
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.last_seen) > timeout)
            .map(|(id, entry)| (entry.user_id, *id))
            .collect();

        for (user_id, connection_id) in &stale {
            state.remove_if_current(*user_id, *connection_id);
        }

        stale
    }

    pub async fn connected_users_count(&self) -> usize {
        let state = self.inner.read().await;
        state.users.len()
    }

    pub async fn total_connections(&self) -> usize {
        let state = self.inner.read().await;
        state.connections.len()
    }

    pub async fn group_size(&self, key: GroupKey) -> usize {
        let state = self.inner.read().await;
        state
            .connections
            .values()
            .filter(|entry| entry.groups.contains(&key))
            .count()
    }

    pub async fn connected_user_ids(&self) -> Vec<Uuid> {
        let state = self.inner.read().await;
        state.users.keys().copied().collect()
    }

    /// Connected users of one tenant
    pub async fn connected_user_ids_in_tenant(&self, tenant_id: Uuid) -> Vec<Uuid> {
        let state = self.inner.read().await;
        state
            .connections
            .values()
            .filter(|entry| entry.tenant_id == tenant_id)
            .map(|entry| entry.user_id)
            .collect()
    }

    /// Drop everything (graceful shutdown)
    pub async fn clear(&self) {
        let mut state = self.inner.write().await;
        state.users.clear();
        state.connections.clear();
    }
}

impl RegistryState {
    fn remove_if_current(&mut self, user_id: Uuid, connection_id: ConnectionId) -> bool {
        if self.users.get(&user_id) != Some(&connection_id) {
            return false;
        }
        self.users.remove(&user_id);
        self.connections.remove(&connection_id);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> (EventSender, mpsc::UnboundedReceiver<ServerEvent>) {
        mpsc::unbounded_channel()
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let registry = ConnectionRegistry::new();
        let user_id = Uuid::new_v4();
        let conn = ConnectionId::new();
        let (tx, _rx) = channel();

        assert_eq!(registry.register(user_id, conn, Uuid::new_v4(), tx).await, None);
        assert_eq!(registry.lookup(user_id).await, Some(conn));
        assert_eq!(registry.connected_users_count().await, 1);
    }

    #[tokio::test]
    async fn test_lookup_unknown_user() {
        let registry = ConnectionRegistry::new();
        assert_eq!(registry.lookup(Uuid::new_v4()).await, None);
    }

    #[tokio::test]
    async fn test_stale_unregister_keeps_newer_session() {
        let registry = ConnectionRegistry::new();
        let user_id = Uuid::new_v4();
        let tenant_id = Uuid::new_v4();
        let conn_a = ConnectionId::new();
        let conn_b = ConnectionId::new();
        let (tx_a, _rx_a) = channel();
        let (tx_b, _rx_b) = channel();

        registry.register(user_id, conn_a, tenant_id, tx_a).await;
        let superseded = registry.register(user_id, conn_b, tenant_id, tx_b).await;
        assert_eq!(superseded, Some(conn_a));

        assert!(!registry.unregister(user_id, conn_a).await);
        assert_eq!(registry.lookup(user_id).await, Some(conn_b));
        assert_eq!(registry.total_connections().await, 1);
    }

    #[tokio::test]
    async fn test_unregister_current_session() {
        let registry = ConnectionRegistry::new();
        let user_id = Uuid::new_v4();
        let conn = ConnectionId::new();
        let (tx, _rx) = channel();

        registry.register(user_id, conn, Uuid::new_v4(), tx).await;
        assert!(registry.unregister(user_id, conn).await);
        assert_eq!(registry.lookup(user_id).await, None);
        assert_eq!(registry.total_connections().await, 0);

        // Second unregister is a no-op
        assert!(!registry.unregister(user_id, conn).await);
    }

    #[tokio::test]
    async fn test_reregister_same_connection_is_not_a_supersede() {
        let registry = ConnectionRegistry::new();
        let user_id = Uuid::new_v4();
        let conn = ConnectionId::new();
        let (tx, _rx) = channel();

        registry.register(user_id, conn, Uuid::new_v4(), tx.clone()).await;
        assert_eq!(registry.register(user_id, conn, Uuid::new_v4(), tx).await, None);
        assert_eq!(registry.lookup(user_id).await, Some(conn));
    }

    #[tokio::test]
    async fn test_group_membership() {
        let registry = ConnectionRegistry::new();
        let conn = ConnectionId::new();
        let task = GroupKey::task(Uuid::new_v4());
        let (tx, _rx) = channel();

        // Unknown connection cannot join
        assert!(!registry.join_group(conn, task).await);

        registry.register(Uuid::new_v4(), conn, Uuid::new_v4(), tx).await;
        assert!(registry.join_group(conn, task).await);
        assert!(registry.is_member(conn, task).await);
        assert_eq!(registry.group_size(task).await, 1);
        assert_eq!(registry.group_senders(task).await.len(), 1);

        assert!(registry.leave_group(conn, task).await);
        assert!(!registry.leave_group(conn, task).await);
        assert_eq!(registry.group_size(task).await, 0);
    }

    #[tokio::test]
    async fn test_superseded_connection_loses_groups() {
        let registry = ConnectionRegistry::new();
        let user_id = Uuid::new_v4();
        let tenant = GroupKey::company(Uuid::new_v4());
        let conn_a = ConnectionId::new();
        let conn_b = ConnectionId::new();
        let (tx_a, _rx_a) = channel();
        let (tx_b, _rx_b) = channel();

        registry.register(user_id, conn_a, Uuid::new_v4(), tx_a).await;
        registry.join_group(conn_a, tenant).await;
        registry.register(user_id, conn_b, Uuid::new_v4(), tx_b).await;

        assert!(!registry.is_member(conn_a, tenant).await);
        assert_eq!(registry.group_size(tenant).await, 0);
    }

    #[tokio::test]
    async fn test_concurrent_register_unregister_keeps_latest() {
        let registry = ConnectionRegistry::new();
        let user_id = Uuid::new_v4();
        let tenant_id = Uuid::new_v4();

        // Each task registers its own connection then a stale one unregisters;
        // whatever wins, lookup must never point at an unregistered id.
        let mut handles = Vec::new();
        for _ in 0..50 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                let conn = ConnectionId::new();
                let (tx, _rx) = mpsc::unbounded_channel();
                registry.register(user_id, conn, tenant_id, tx).await;
                registry.unregister(user_id, ConnectionId::new()).await;
                conn
            }));
        }

        let mut registered = Vec::new();
        for handle in handles {
            registered.push(handle.await.unwrap());
        }

        let current = registry.lookup(user_id).await.unwrap();
        assert!(registered.contains(&current));
        assert_eq!(registry.total_connections().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_evict_stale_only_removes_idle_connections() {
        let registry = ConnectionRegistry::new();
        let idle_user = Uuid::new_v4();
        let active_user = Uuid::new_v4();
        let idle = ConnectionId::new();
        let active = ConnectionId::new();
        let (tx_idle, _rx_idle) = channel();
        let (tx_active, _rx_active) = channel();

        registry.register(idle_user, idle, Uuid::new_v4(), tx_idle).await;
        registry.register(active_user, active, Uuid::new_v4(), tx_active).await;

        tokio::time::advance(Duration::from_secs(20)).await;
        registry.touch(active).await;
        tokio::time::advance(Duration::from_secs(15)).await;

        let evicted = registry.evict_stale(Duration::from_secs(30)).await;
        assert_eq!(evicted, vec![(idle_user, idle)]);
        assert_eq!(registry.lookup(idle_user).await, None);
        assert_eq!(registry.lookup(active_user).await, Some(active));
    }

    #[tokio::test]
    async fn test_clear() {
        let registry = ConnectionRegistry::new();
        for _ in 0..3 {
            let (tx, _rx) = channel();
            registry
                .register(Uuid::new_v4(), ConnectionId::new(), Uuid::new_v4(), tx)
                .await;
        }
        assert_eq!(registry.connected_users_count().await, 3);
        assert_eq!(registry.connected_user_ids().await.len(), 3);

        registry.clear().await;
        assert_eq!(registry.connected_users_count().await, 0);
        assert_eq!(registry.total_connections().await, 0);
    }
}
