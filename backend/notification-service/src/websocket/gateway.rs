/// Realtime gateway
///
/// Connection lifecycle (connect/disconnect), group join/leave and the two
/// push primitives. Pushes are at-most-once: a user without a live
/// connection simply misses the event, and nothing here ever returns an
/// error to the caller.
use super::registry::{ConnectionId, ConnectionRegistry, EventSender};
use super::{GroupKey, ServerEvent};
use crate::metrics;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Result of a single-user push
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Handed to the recipient's live socket
    Delivered(ConnectionId),
    /// Recipient has no live connection; the event was dropped
    NotConnected,
    /// The socket went away between lookup and send
    ChannelClosed,
}

impl PushOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            PushOutcome::Delivered(_) => "delivered",
            PushOutcome::NotConnected => "not_connected",
            PushOutcome::ChannelClosed => "channel_closed",
        }
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self, PushOutcome::Delivered(_))
    }
}

#[derive(Clone, Default)]
pub struct RealtimeGateway {
    registry: ConnectionRegistry,
}

impl RealtimeGateway {
    pub fn new(registry: ConnectionRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Register the connection as the user's live session and join the
    /// tenant-wide group.
    pub async fn on_connect(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
        connection_id: ConnectionId,
        sender: EventSender,
    ) {
        let superseded = self
            .registry
            .register(user_id, connection_id, tenant_id, sender.clone())
            .await;
        self.registry
            .join_group(connection_id, GroupKey::company(tenant_id))
            .await;

        if sender
            .send(ServerEvent::connected(connection_id.as_uuid()))
            .is_err()
        {
            debug!(connection_id = %connection_id, "Socket closed before connect confirmation");
        }

        metrics::set_active_connections(self.registry.total_connections().await);
        debug!(
            user_id = %user_id,
            tenant_id = %tenant_id,
            connection_id = %connection_id,
            superseded = ?superseded,
            "Client connected"
        );
    }

    /// Unregister (guarded by connection id) and leave the tenant group.
    pub async fn on_disconnect(&self, user_id: Uuid, tenant_id: Uuid, connection_id: ConnectionId) {
        let tenant_group = GroupKey::company(tenant_id);

        // Leave first: unregister drops the connection record and its groups
        if !self.registry.leave_group(connection_id, tenant_group).await {
            debug!(
                connection_id = %connection_id,
                group = %tenant_group,
                "Connection was not in tenant group on disconnect"
            );
        }

        let removed = self.registry.unregister(user_id, connection_id).await;
        if !removed {
            debug!(
                user_id = %user_id,
                connection_id = %connection_id,
                "Stale disconnect ignored; user has a newer session"
            );
        }

        metrics::set_active_connections(self.registry.total_connections().await);
    }

    /// Subscribe a connection to one task's update stream.
    pub async fn join_entity_group(&self, connection_id: ConnectionId, task_id: Uuid) -> bool {
        let key = GroupKey::task(task_id);
        let joined = self.registry.join_group(connection_id, key).await;
        if !joined {
            warn!(connection_id = %connection_id, group = %key, "Join from unregistered connection");
        }
        joined
    }

    pub async fn leave_entity_group(&self, connection_id: ConnectionId, task_id: Uuid) -> bool {
        self.registry
            .leave_group(connection_id, GroupKey::task(task_id))
            .await
    }

    /// Best-effort push to one user
    pub async fn push_to_user(&self, user_id: Uuid, event: ServerEvent) -> PushOutcome {
        let outcome = match self.registry.sender_for_user(user_id).await {
            None => PushOutcome::NotConnected,
            Some((connection_id, sender)) => match sender.send(event) {
                Ok(()) => PushOutcome::Delivered(connection_id),
                Err(_) => {
                    warn!(
                        user_id = %user_id,
                        connection_id = %connection_id,
                        "Live push failed: socket channel closed"
                    );
                    PushOutcome::ChannelClosed
                }
            },
        };

        metrics::record_live_push(outcome.as_str());
        outcome
    }

    /// Fan out to every current member of `key`. Returns how many sockets
    /// accepted the event; an empty group is a no-op.
    pub async fn push_to_group(&self, key: GroupKey, event: ServerEvent) -> usize {
        let members = self.registry.group_senders(key).await;
        Self::fan_out(key, members, event)
    }

    /// Like `push_to_group`, restricted to members of one tenant.
    pub async fn push_to_group_in_tenant(
        &self,
        key: GroupKey,
        tenant_id: Uuid,
        event: ServerEvent,
    ) -> usize {
        let members = self.registry.group_senders_in_tenant(key, tenant_id).await;
        Self::fan_out(key, members, event)
    }

    fn fan_out(key: GroupKey, members: Vec<(ConnectionId, EventSender)>, event: ServerEvent) -> usize {
        if members.is_empty() {
            return 0;
        }

        let mut delivered = 0;
        for (connection_id, sender) in members {
            if sender.send(event.clone()).is_ok() {
                delivered += 1;
            } else {
                debug!(connection_id = %connection_id, group = %key, "Skipping closed socket");
            }
        }

        debug!(group = %key, delivered, "Group push");
        delivered
    }

    pub async fn heartbeat(&self, connection_id: ConnectionId) -> bool {
        self.registry.touch(connection_id).await
    }

    /// Evict sessions silent for longer than `timeout`.
    pub async fn evict_stale(&self, timeout: Duration) -> usize {
        let evicted = self.registry.evict_stale(timeout).await;
        for (user_id, connection_id) in &evicted {
            warn!(
                user_id = %user_id,
                connection_id = %connection_id,
                "Evicted connection after heartbeat timeout"
            );
        }
        if !evicted.is_empty() {
            metrics::set_active_connections(self.registry.total_connections().await);
        }
        evicted.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn gateway() -> RealtimeGateway {
        RealtimeGateway::new(ConnectionRegistry::new())
    }

    #[tokio::test]
    async fn test_connect_joins_tenant_group_and_confirms() {
        let gateway = gateway();
        let (user_id, tenant_id, conn) = (Uuid::new_v4(), Uuid::new_v4(), ConnectionId::new());
        let (tx, mut rx) = mpsc::unbounded_channel();

        gateway.on_connect(user_id, tenant_id, conn, tx).await;

        assert_eq!(gateway.registry().lookup(user_id).await, Some(conn));
        assert_eq!(gateway.registry().tenant_of(conn).await, Some(tenant_id));
        assert!(gateway
            .registry()
            .is_member(conn, GroupKey::company(tenant_id))
            .await);
        assert!(matches!(rx.recv().await, Some(ServerEvent::Connected { .. })));
    }

    #[tokio::test]
    async fn test_disconnect_removes_user_and_group() {
        let gateway = gateway();
        let (user_id, tenant_id, conn) = (Uuid::new_v4(), Uuid::new_v4(), ConnectionId::new());
        let (tx, _rx) = mpsc::unbounded_channel();

        gateway.on_connect(user_id, tenant_id, conn, tx).await;
        gateway.on_disconnect(user_id, tenant_id, conn).await;

        assert_eq!(gateway.registry().lookup(user_id).await, None);
        assert_eq!(gateway.registry().group_size(GroupKey::company(tenant_id)).await, 0);
    }

    #[tokio::test]
    async fn test_disconnect_of_unknown_connection_is_silent() {
        let gateway = gateway();
        gateway
            .on_disconnect(Uuid::new_v4(), Uuid::new_v4(), ConnectionId::new())
            .await;
    }

    #[tokio::test]
    async fn test_push_to_user_delivers() {
        let gateway = gateway();
        let (user_id, conn) = (Uuid::new_v4(), ConnectionId::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        gateway.on_connect(user_id, Uuid::new_v4(), conn, tx).await;
        rx.recv().await; // Connected

        let event = ServerEvent::error("TEST", "hello");
        assert_eq!(
            gateway.push_to_user(user_id, event.clone()).await,
            PushOutcome::Delivered(conn)
        );
        assert_eq!(rx.recv().await, Some(event));
    }

    #[tokio::test]
    async fn test_push_to_offline_user_is_dropped() {
        let gateway = gateway();
        let outcome = gateway
            .push_to_user(Uuid::new_v4(), ServerEvent::ack("noop"))
            .await;
        assert_eq!(outcome, PushOutcome::NotConnected);
    }

    #[tokio::test]
    async fn test_push_to_closed_channel_reports_closed() {
        let gateway = gateway();
        let user_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        gateway
            .on_connect(user_id, Uuid::new_v4(), ConnectionId::new(), tx)
            .await;
        drop(rx);

        let outcome = gateway.push_to_user(user_id, ServerEvent::ack("x")).await;
        assert_eq!(outcome, PushOutcome::ChannelClosed);
    }

    #[tokio::test]
    async fn test_push_to_empty_group_is_noop() {
        let gateway = gateway();
        let delivered = gateway
            .push_to_group(GroupKey::task(Uuid::new_v4()), ServerEvent::ack("x"))
            .await;
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn test_tenant_scoped_fan_out_skips_other_tenants() {
        let gateway = gateway();
        let (ours, theirs) = (Uuid::new_v4(), Uuid::new_v4());
        let task_id = Uuid::new_v4();

        let mut receivers = Vec::new();
        for tenant_id in [ours, theirs] {
            let conn = ConnectionId::new();
            let (tx, mut rx) = mpsc::unbounded_channel();
            gateway.on_connect(Uuid::new_v4(), tenant_id, conn, tx).await;
            rx.recv().await; // Connected
            gateway.join_entity_group(conn, task_id).await;
            receivers.push(rx);
        }

        let event = ServerEvent::task_update(task_id, serde_json::json!({"status": "Done"}));
        assert_eq!(
            gateway
                .push_to_group_in_tenant(GroupKey::task(task_id), ours, event)
                .await,
            1
        );
        assert!(receivers[0].try_recv().is_ok());
        assert!(receivers[1].try_recv().is_err());

        assert_eq!(
            gateway.registry().connected_user_ids_in_tenant(theirs).await.len(),
            1
        );
    }

    #[tokio::test]
    async fn test_entity_group_fan_out() {
        let gateway = gateway();
        let tenant_id = Uuid::new_v4();
        let task_id = Uuid::new_v4();
        let mut receivers = Vec::new();

        for i in 0..3 {
            let conn = ConnectionId::new();
            let (tx, mut rx) = mpsc::unbounded_channel();
            gateway.on_connect(Uuid::new_v4(), tenant_id, conn, tx).await;
            rx.recv().await; // Connected
            if i < 2 {
                assert!(gateway.join_entity_group(conn, task_id).await);
            }
            receivers.push(rx);
        }

        let event = ServerEvent::task_update(task_id, serde_json::json!({"status": "Done"}));
        assert_eq!(gateway.push_to_group(GroupKey::task(task_id), event).await, 2);

        assert!(receivers[0].try_recv().is_ok());
        assert!(receivers[1].try_recv().is_ok());
        assert!(receivers[2].try_recv().is_err());

        // Tenant-wide group reaches everyone
        assert_eq!(
            gateway
                .push_to_group(GroupKey::company(tenant_id), ServerEvent::ack("all"))
                .await,
            3
        );
    }

    #[tokio::test]
    async fn test_leave_entity_group() {
        let gateway = gateway();
        let conn = ConnectionId::new();
        let task_id = Uuid::new_v4();
        let (tx, _rx) = mpsc::unbounded_channel();
        gateway.on_connect(Uuid::new_v4(), Uuid::new_v4(), conn, tx).await;

        gateway.join_entity_group(conn, task_id).await;
        assert!(gateway.leave_entity_group(conn, task_id).await);
        assert_eq!(gateway.registry().group_size(GroupKey::task(task_id)).await, 0);
    }

    #[tokio::test]
    async fn test_stale_disconnect_keeps_newer_session_in_tenant_group() {
        let gateway = gateway();
        let (user_id, tenant_id) = (Uuid::new_v4(), Uuid::new_v4());
        let (conn_a, conn_b) = (ConnectionId::new(), ConnectionId::new());
        let (tx_a, _rx_a) = mpsc::unbounded_channel();
        let (tx_b, _rx_b) = mpsc::unbounded_channel();

        gateway.on_connect(user_id, tenant_id, conn_a, tx_a).await;
        gateway.on_connect(user_id, tenant_id, conn_b, tx_b).await;
        gateway.on_disconnect(user_id, tenant_id, conn_a).await;

        assert_eq!(gateway.registry().lookup(user_id).await, Some(conn_b));
        assert!(gateway
            .registry()
            .is_member(conn_b, GroupKey::company(tenant_id))
            .await);
    }
}
