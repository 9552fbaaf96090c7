//! Connection pool shared by all connection workers
//!
//! The `ChannelPool` is the only state shared across connections. It knows
//! two kinds of registrations:
//!
//! - **base registrations** (`join`), one per connection that is not bound
//!   to a single channel;
//! - **channel memberships** (`join_channel`), each with its own membership
//!   id, so one connection can hold several independent subscriptions to the
//!   same or different channels.
//!
//! # Architecture
//!
//! ```text
//! handler ──broadcast(channel)──▶ ChannelPool ──snapshot under read lock──▶ members
//!                                                     │
//!                                   deliver to each mailbox (lock released)
//!                                                     │
//!                               dead mailboxes reaped under write lock
//! ```
//!
//! The pool has no protocol knowledge: it hands [`Delivery`] values to the
//! owning connection's mailbox, and the connection renders them with its own
//! serializer.

use crate::core::error::GatewayError;
use crate::core::events::Payload;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

/// Something the pool asks a connection worker to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Deliver a message to the connection
    Message {
        /// Channel the message was broadcast on, `None` for direct sends
        channel: Option<String>,
        /// Registration the message was addressed to
        membership_id: String,
        /// Message content
        payload: Payload,
    },
    /// Close the connection's transport
    Close { code: u16, reason: String },
}

/// Pool-side handle to a connection
///
/// Owned by the connection worker; the pool only keeps `Arc` clones of it for
/// fan-out and cleanup.
pub struct ClientHandle {
    mailbox: mpsc::UnboundedSender<Delivery>,
    path: Option<String>,
    protocol: Option<String>,
    connected_at: DateTime<Utc>,
    attributes: RwLock<HashMap<String, serde_json::Value>>,
}

impl ClientHandle {
    /// Create a handle and the mailbox the connection worker drains
    pub fn new(
        path: Option<String>,
        protocol: Option<String>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Delivery>) {
        let (mailbox, rx) = mpsc::unbounded_channel();
        let handle = Self {
            mailbox,
            path,
            protocol,
            connected_at: Utc::now(),
            attributes: RwLock::new(HashMap::new()),
        };
        (Arc::new(handle), rx)
    }

    /// Path the connection was opened on
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Negotiated sub-protocol
    pub fn protocol(&self) -> Option<&str> {
        self.protocol.as_deref()
    }

    /// Push a delivery to the owning worker
    ///
    /// Returns `false` when the worker is gone.
    pub fn deliver(&self, delivery: Delivery) -> bool {
        self.mailbox.send(delivery).is_ok()
    }
}

/// Public description of a registration
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    /// Registration id
    pub id: String,
    /// Channel for memberships, `None` for base registrations
    pub channel: Option<String>,
    /// Path the connection was opened on
    pub path: Option<String>,
    /// Negotiated sub-protocol
    pub protocol: Option<String>,
    /// When the connection was created
    pub connected_at: DateTime<Utc>,
}

/// Optional admission limits
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolLimits {
    /// Maximum number of base registrations
    pub max_connections: Option<usize>,
    /// Maximum number of channel memberships across all channels
    pub max_memberships: Option<usize>,
}

#[derive(Default)]
struct PoolState {
    connections: HashMap<String, Arc<ClientHandle>>,
    channels: HashMap<String, HashMap<String, Arc<ClientHandle>>>,
    memberships: usize,
}

impl PoolState {
    fn lookup(&self, id: &str) -> Option<(Option<&str>, &Arc<ClientHandle>)> {
        if let Some(handle) = self.connections.get(id) {
            return Some((None, handle));
        }
        self.channels.iter().find_map(|(name, members)| {
            members
                .get(id)
                .map(|handle| (Some(name.as_str()), handle))
        })
    }

    fn remove_membership(&mut self, channel: &str, id: &str) -> bool {
        let Some(members) = self.channels.get_mut(channel) else {
            return false;
        };
        let removed = members.remove(id).is_some();
        if removed {
            self.memberships -= 1;
        }
        if members.is_empty() {
            self.channels.remove(channel);
        }
        removed
    }
}

/// Registry of connections and channel memberships
///
/// Thread-safe via `RwLock`: broadcasts only hold the read lock long enough
/// to snapshot the members, so a concurrent `remove_from_channel` never waits
/// on a slow send and never deadlocks against it.
pub struct ChannelPool {
    state: RwLock<PoolState>,
    limits: PoolLimits,
}

impl ChannelPool {
    /// Create a pool without limits
    pub fn new() -> Self {
        Self::with_limits(PoolLimits::default())
    }

    /// Create a pool with admission limits
    pub fn with_limits(limits: PoolLimits) -> Self {
        Self {
            state: RwLock::new(PoolState::default()),
            limits,
        }
    }

    /// Register a connection without channel association
    pub async fn join(&self, handle: Arc<ClientHandle>) -> Result<String, GatewayError> {
        let mut state = self.state.write().await;
        if let Some(max) = self.limits.max_connections
            && state.connections.len() >= max
        {
            return Err(GatewayError::Capacity(format!(
                "max_connections ({max}) reached"
            )));
        }

        let id = format!("conn_{}", Uuid::new_v4().simple());
        state.connections.insert(id.clone(), handle);

        tracing::debug!(connection_id = %id, "Connection joined pool");
        Ok(id)
    }

    /// Register a membership of a connection in a channel
    ///
    /// Not idempotent: every call creates a new, separately removable
    /// membership.
    pub async fn join_channel(
        &self,
        handle: Arc<ClientHandle>,
        channel: &str,
    ) -> Result<String, GatewayError> {
        let mut state = self.state.write().await;
        if let Some(max) = self.limits.max_memberships
            && state.memberships >= max
        {
            return Err(GatewayError::Capacity(format!(
                "max_memberships ({max}) reached"
            )));
        }

        let id = format!("mem_{}", Uuid::new_v4().simple());
        state
            .channels
            .entry(channel.to_string())
            .or_default()
            .insert(id.clone(), handle);
        state.memberships += 1;

        tracing::debug!(membership_id = %id, channel = %channel, "Channel membership added");
        Ok(id)
    }

    /// Remove a base registration
    ///
    /// Returns `true` if the registration existed.
    pub async fn remove(&self, id: &str) -> bool {
        let removed = self.state.write().await.connections.remove(id).is_some();
        if removed {
            tracing::debug!(connection_id = %id, "Connection left pool");
        }
        removed
    }

    /// Remove one channel membership owned by `handle`
    ///
    /// A no-op when the membership is gone or belongs to another connection.
    pub async fn remove_from_channel(
        &self,
        handle: &Arc<ClientHandle>,
        channel: &str,
        id: &str,
    ) -> bool {
        let mut state = self.state.write().await;
        let owned = state
            .channels
            .get(channel)
            .and_then(|members| members.get(id))
            .is_some_and(|member| Arc::ptr_eq(member, handle));
        if !owned {
            return false;
        }

        let removed = state.remove_membership(channel, id);
        tracing::debug!(membership_id = %id, channel = %channel, "Channel membership removed");
        removed
    }

    /// Deliver a payload to every member of a channel
    ///
    /// Members are snapshotted at call time. Returns the number of members
    /// that accepted the delivery.
    pub async fn broadcast(&self, channel: &str, payload: Payload) -> usize {
        let members: Vec<(String, Arc<ClientHandle>)> = {
            let state = self.state.read().await;
            match state.channels.get(channel) {
                Some(members) => members
                    .iter()
                    .map(|(id, handle)| (id.clone(), handle.clone()))
                    .collect(),
                None => return 0,
            }
        };

        let mut delivered = 0;
        let mut dead = Vec::new();
        for (id, handle) in members {
            let delivery = Delivery::Message {
                channel: Some(channel.to_string()),
                membership_id: id.clone(),
                payload: payload.clone(),
            };
            if handle.deliver(delivery) {
                delivered += 1;
            } else {
                dead.push(id);
            }
        }

        if !dead.is_empty() {
            let mut state = self.state.write().await;
            for id in &dead {
                if state.remove_membership(channel, id) {
                    tracing::debug!(
                        membership_id = %id,
                        channel = %channel,
                        "Reaped membership of disconnected client"
                    );
                }
            }
        }

        tracing::debug!(channel = %channel, recipients = delivered, "Broadcast delivered");
        delivered
    }

    /// Deliver a payload to every base registration
    pub async fn emit(&self, payload: Payload) -> usize {
        let targets: Vec<(String, Arc<ClientHandle>)> = {
            let state = self.state.read().await;
            state
                .connections
                .iter()
                .map(|(id, handle)| (id.clone(), handle.clone()))
                .collect()
        };

        targets
            .into_iter()
            .filter(|(id, handle)| {
                handle.deliver(Delivery::Message {
                    channel: None,
                    membership_id: id.clone(),
                    payload: payload.clone(),
                })
            })
            .count()
    }

    /// Deliver a payload to specific registrations
    ///
    /// Ids may name base registrations or channel memberships; unknown ids
    /// are skipped.
    pub async fn send(&self, ids: &[String], payload: Payload) -> usize {
        let targets: Vec<(String, Option<String>, Arc<ClientHandle>)> = {
            let state = self.state.read().await;
            ids.iter()
                .filter_map(|id| {
                    state.lookup(id).map(|(channel, handle)| {
                        (id.clone(), channel.map(str::to_string), handle.clone())
                    })
                })
                .collect()
        };

        targets
            .into_iter()
            .filter(|(id, channel, handle)| {
                handle.deliver(Delivery::Message {
                    channel: channel.clone(),
                    membership_id: id.clone(),
                    payload: payload.clone(),
                })
            })
            .count()
    }

    /// Ask the connection owning `id` to close its transport
    pub async fn close(&self, id: &str, code: u16, reason: &str) -> bool {
        let handle = {
            let state = self.state.read().await;
            state.lookup(id).map(|(_, handle)| handle.clone())
        };
        handle.is_some_and(|handle| {
            handle.deliver(Delivery::Close {
                code,
                reason: reason.to_string(),
            })
        })
    }

    /// Ids of all base registrations
    pub async fn ids(&self) -> Vec<String> {
        self.state.read().await.connections.keys().cloned().collect()
    }

    /// Describe a registration
    pub async fn info(&self, id: &str) -> Option<ConnectionInfo> {
        let state = self.state.read().await;
        state.lookup(id).map(|(channel, handle)| ConnectionInfo {
            id: id.to_string(),
            channel: channel.map(str::to_string),
            path: handle.path.clone(),
            protocol: handle.protocol.clone(),
            connected_at: handle.connected_at,
        })
    }

    /// Path the connection behind `id` was opened on
    pub async fn path(&self, id: &str) -> Option<String> {
        let state = self.state.read().await;
        state
            .lookup(id)
            .and_then(|(_, handle)| handle.path.clone())
    }

    /// Store an attribute on the connection behind `id`
    pub async fn set_attribute(&self, id: &str, key: &str, value: serde_json::Value) -> bool {
        let Some(handle) = self.handle(id).await else {
            return false;
        };
        handle
            .attributes
            .write()
            .await
            .insert(key.to_string(), value);
        true
    }

    /// Read an attribute of the connection behind `id`
    pub async fn attribute(&self, id: &str, key: &str) -> Option<serde_json::Value> {
        let handle = self.handle(id).await?;
        let attributes = handle.attributes.read().await;
        attributes.get(key).cloned()
    }

    /// Delete an attribute of the connection behind `id`
    pub async fn remove_attribute(&self, id: &str, key: &str) -> Option<serde_json::Value> {
        let handle = self.handle(id).await?;
        let mut attributes = handle.attributes.write().await;
        attributes.remove(key)
    }

    /// Number of base registrations
    pub async fn connection_count(&self) -> usize {
        self.state.read().await.connections.len()
    }

    /// Number of channel memberships across all channels
    pub async fn membership_count(&self) -> usize {
        self.state.read().await.memberships
    }

    /// Number of memberships in a channel
    pub async fn channel_size(&self, channel: &str) -> usize {
        self.state
            .read()
            .await
            .channels
            .get(channel)
            .map_or(0, HashMap::len)
    }

    /// Whether a membership id is registered in a channel
    pub async fn contains_membership(&self, channel: &str, id: &str) -> bool {
        self.state
            .read()
            .await
            .channels
            .get(channel)
            .is_some_and(|members| members.contains_key(id))
    }

    /// Names of channels with at least one member
    pub async fn channel_names(&self) -> Vec<String> {
        self.state.read().await.channels.keys().cloned().collect()
    }

    async fn handle(&self, id: &str) -> Option<Arc<ClientHandle>> {
        let state = self.state.read().await;
        state.lookup(id).map(|(_, handle)| handle.clone())
    }
}

impl Default for ChannelPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client() -> (Arc<ClientHandle>, mpsc::UnboundedReceiver<Delivery>) {
        ClientHandle::new(None, None)
    }

    #[tokio::test]
    async fn test_join_and_remove() {
        let pool = ChannelPool::new();
        let (handle, _rx) = client();

        let id = pool.join(handle).await.unwrap();
        assert!(id.starts_with("conn_"));
        assert_eq!(pool.connection_count().await, 1);

        assert!(pool.remove(&id).await);
        assert_eq!(pool.connection_count().await, 0);

        // Already removed: no-op
        assert!(!pool.remove(&id).await);
    }

    #[tokio::test]
    async fn test_join_channel_is_not_idempotent() {
        let pool = ChannelPool::new();
        let (handle, _rx) = client();

        let first = pool.join_channel(handle.clone(), "/x").await.unwrap();
        let second = pool.join_channel(handle.clone(), "/x").await.unwrap();
        assert_ne!(first, second);
        assert!(first.starts_with("mem_"));
        assert_eq!(pool.channel_size("/x").await, 2);

        assert!(pool.remove_from_channel(&handle, "/x", &first).await);
        assert_eq!(pool.channel_size("/x").await, 1);
        assert!(pool.contains_membership("/x", &second).await);
    }

    #[tokio::test]
    async fn test_remove_from_channel_leaves_other_members() {
        let pool = ChannelPool::new();
        let (c1, _rx1) = client();
        let (c2, _rx2) = client();

        let id1 = pool.join_channel(c1.clone(), "x").await.unwrap();
        let id2 = pool.join_channel(c2.clone(), "x").await.unwrap();

        assert!(pool.remove_from_channel(&c1, "x", &id1).await);
        assert!(!pool.contains_membership("x", &id1).await);
        assert!(pool.contains_membership("x", &id2).await);
    }

    #[tokio::test]
    async fn test_remove_from_channel_unknown_id_is_noop() {
        let pool = ChannelPool::new();
        let (handle, _rx) = client();
        pool.join_channel(handle.clone(), "x").await.unwrap();

        assert!(!pool.remove_from_channel(&handle, "x", "mem_missing").await);
        assert!(!pool.remove_from_channel(&handle, "y", "mem_missing").await);
        assert_eq!(pool.channel_size("x").await, 1);
    }

    #[tokio::test]
    async fn test_remove_from_channel_requires_owner() {
        let pool = ChannelPool::new();
        let (owner, _rx1) = client();
        let (other, _rx2) = client();
        let id = pool.join_channel(owner, "x").await.unwrap();

        assert!(!pool.remove_from_channel(&other, "x", &id).await);
        assert!(pool.contains_membership("x", &id).await);
    }

    #[tokio::test]
    async fn test_empty_channel_is_deleted() {
        let pool = ChannelPool::new();
        let (handle, _rx) = client();
        let id = pool.join_channel(handle.clone(), "x").await.unwrap();
        assert_eq!(pool.channel_names().await, vec!["x".to_string()]);

        pool.remove_from_channel(&handle, "x", &id).await;
        assert!(pool.channel_names().await.is_empty());
        assert_eq!(pool.membership_count().await, 0);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_member() {
        let pool = ChannelPool::new();
        let (c1, mut rx1) = client();
        let (c2, mut rx2) = client();
        let (c3, mut rx3) = client();

        let id1 = pool.join_channel(c1, "/chat").await.unwrap();
        pool.join_channel(c2, "/chat").await.unwrap();
        pool.join_channel(c3, "/other").await.unwrap();

        let delivered = pool.broadcast("/chat", Payload::from("hi")).await;
        assert_eq!(delivered, 2);

        match rx1.try_recv().unwrap() {
            Delivery::Message {
                channel,
                membership_id,
                payload,
            } => {
                assert_eq!(channel.as_deref(), Some("/chat"));
                assert_eq!(membership_id, id1);
                assert_eq!(payload, Payload::from("hi"));
            }
            other => panic!("Expected message, got {:?}", other),
        }
        assert!(rx2.try_recv().is_ok());
        assert!(rx3.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_broadcast_unknown_channel() {
        let pool = ChannelPool::new();
        assert_eq!(pool.broadcast("/nobody", Payload::from("hi")).await, 0);
    }

    #[tokio::test]
    async fn test_broadcast_reaps_dead_members() {
        let pool = ChannelPool::new();
        let (alive, _rx_alive) = client();
        let (dead, rx_dead) = client();

        pool.join_channel(alive, "x").await.unwrap();
        pool.join_channel(dead, "x").await.unwrap();
        drop(rx_dead);

        let delivered = pool.broadcast("x", Payload::from("hi")).await;
        assert_eq!(delivered, 1);
        assert_eq!(pool.channel_size("x").await, 1);
        assert_eq!(pool.membership_count().await, 1);
    }

    #[tokio::test]
    async fn test_capacity_limits() {
        let pool = ChannelPool::with_limits(PoolLimits {
            max_connections: Some(1),
            max_memberships: Some(1),
        });
        let (c1, _rx1) = client();
        let (c2, _rx2) = client();

        pool.join(c1.clone()).await.unwrap();
        let err = pool.join(c2.clone()).await.unwrap_err();
        assert!(matches!(err, GatewayError::Capacity(_)));

        pool.join_channel(c1, "x").await.unwrap();
        let err = pool.join_channel(c2, "x").await.unwrap_err();
        assert!(matches!(err, GatewayError::Capacity(_)));
        assert_eq!(pool.channel_size("x").await, 1);
    }

    #[tokio::test]
    async fn test_emit_and_send() {
        let pool = ChannelPool::new();
        let (c1, mut rx1) = client();
        let (c2, mut rx2) = client();
        let id1 = pool.join(c1).await.unwrap();
        let id2 = pool.join(c2).await.unwrap();

        assert_eq!(pool.emit(Payload::from("all")).await, 2);
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());

        let sent = pool
            .send(&[id2.clone(), "conn_missing".to_string()], Payload::from("one"))
            .await;
        assert_eq!(sent, 1);
        assert!(rx1.try_recv().is_err());
        assert!(matches!(
            rx2.try_recv().unwrap(),
            Delivery::Message { membership_id, .. } if membership_id == id2
        ));

        let mut ids = pool.ids().await;
        ids.sort();
        let mut expected = vec![id1, id2];
        expected.sort();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn test_close_asks_worker() {
        let pool = ChannelPool::new();
        let (handle, mut rx) = client();
        let id = pool.join(handle).await.unwrap();

        assert!(pool.close(&id, 1000, "bye").await);
        assert_eq!(
            rx.try_recv().unwrap(),
            Delivery::Close {
                code: 1000,
                reason: "bye".to_string()
            }
        );
        assert!(!pool.close("conn_missing", 1000, "bye").await);
    }

    #[tokio::test]
    async fn test_info_and_attributes() {
        let pool = ChannelPool::new();
        let (handle, _rx) = ClientHandle::new(Some("/chat".to_string()), None);
        let id = pool.join_channel(handle, "/chat").await.unwrap();

        let info = pool.info(&id).await.unwrap();
        assert_eq!(info.channel.as_deref(), Some("/chat"));
        assert_eq!(pool.path(&id).await.as_deref(), Some("/chat"));

        assert!(pool.set_attribute(&id, "nick", json!("alice")).await);
        assert_eq!(pool.attribute(&id, "nick").await, Some(json!("alice")));
        assert_eq!(
            pool.remove_attribute(&id, "nick").await,
            Some(json!("alice"))
        );
        assert_eq!(pool.attribute(&id, "nick").await, None);
        assert!(!pool.set_attribute("conn_missing", "nick", json!(1)).await);
    }

    #[tokio::test]
    async fn test_concurrent_joins_and_removes() {
        let pool = Arc::new(ChannelPool::new());
        let (stable, _rx) = client();
        let stable_id = pool.join_channel(stable, "x").await.unwrap();

        let mut tasks = Vec::new();
        for _ in 0..32 {
            let pool = pool.clone();
            tasks.push(tokio::spawn(async move {
                let (handle, _rx) = ClientHandle::new(None, None);
                let id = pool.join_channel(handle.clone(), "x").await.unwrap();
                pool.broadcast("x", Payload::from("tick")).await;
                assert!(pool.remove_from_channel(&handle, "x", &id).await);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(pool.channel_size("x").await, 1);
        assert!(pool.contains_membership("x", &stable_id).await);
    }
}
