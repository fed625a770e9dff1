//! Per-group subscriber sets and ordered fan-out for the realtime gateway.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use civic_shared::protocol::ServerEvent;
use civic_shared::types::GroupId;

/// Identifies one realtime connection.
pub type ConnId = Uuid;

/// Outbound buffer per connection before events are dropped.
pub const OUTBOX_CAPACITY: usize = 256;

/// The set of connections subscribed to one group.
struct Room {
    group_id: GroupId,
    subscribers: HashMap<ConnId, mpsc::Sender<ServerEvent>>,
}

impl Room {
    fn new(group_id: GroupId) -> Self {
        Self {
            group_id,
            subscribers: HashMap::new(),
        }
    }

    fn join(&mut self, conn: ConnId, outbox: mpsc::Sender<ServerEvent>) {
        self.subscribers.insert(conn, outbox);
        info!(
            group = %self.group_id,
            conn = %conn,
            subscribers = self.subscribers.len(),
            "Connection joined room"
        );
    }

    fn leave(&mut self, conn: &ConnId) -> bool {
        let removed = self.subscribers.remove(conn).is_some();
        if removed {
            info!(
                group = %self.group_id,
                conn = %conn,
                subscribers = self.subscribers.len(),
                "Connection left room"
            );
        }
        removed
    }

    /// Deliver to every subscriber, the originator included.
    fn broadcast(&self, event: &ServerEvent) -> usize {
        let mut delivered = 0;
        for (conn, tx) in &self.subscribers {
            match tx.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(group = %self.group_id, conn = %conn, "Dropping event for slow connection");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(group = %self.group_id, conn = %conn, "Subscriber already gone");
                }
            }
        }
        delivered
    }

    fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}

/// Routes events to every connection subscribed to a group.
#[derive(Clone, Default)]
pub struct RoomHub {
    rooms: Arc<RwLock<HashMap<GroupId, Room>>>,
    write_locks: Arc<Mutex<HashMap<GroupId, Arc<Mutex<()>>>>>,
}

impl RoomHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `conn` to `group_id`, creating the room if needed.
    pub async fn join(&self, group_id: GroupId, conn: ConnId, outbox: mpsc::Sender<ServerEvent>) {
        let mut rooms = self.rooms.write().await;
        rooms
            .entry(group_id)
            .or_insert_with(|| Room::new(group_id))
            .join(conn, outbox);
    }

    /// Unsubscribe. Empty rooms are dropped.
    pub async fn leave(&self, group_id: GroupId, conn: &ConnId) -> bool {
        let mut rooms = self.rooms.write().await;
        let (removed, now_empty) = match rooms.get_mut(&group_id) {
            Some(room) => (room.leave(conn), room.is_empty()),
            None => (false, false),
        };

        if now_empty {
            rooms.remove(&group_id);
            debug!(group = %group_id, "Removed empty room");
        }
        removed
    }

    pub async fn leave_all<'a>(&self, groups: impl IntoIterator<Item = &'a GroupId>, conn: &ConnId) {
        for group_id in groups {
            self.leave(*group_id, conn).await;
        }
    }

    /// Returns how many subscribers accepted the event.
    pub async fn broadcast(&self, group_id: GroupId, event: &ServerEvent) -> usize {
        let rooms = self.rooms.read().await;
        match rooms.get(&group_id) {
            Some(room) => room.broadcast(event),
            None => {
                debug!(group = %group_id, "Broadcast to room with no subscribers");
                0
            }
        }
    }

    /// Total subscriptions across all rooms.
    pub async fn subscription_count(&self) -> usize {
        self.rooms
            .read()
            .await
            .values()
            .map(|r| r.subscribers.len())
            .sum()
    }

    #[cfg(test)]
    pub async fn participant_count(&self, group_id: GroupId) -> usize {
        self.rooms
            .read()
            .await
            .get(&group_id)
            .map(|r| r.subscribers.len())
            .unwrap_or(0)
    }

    pub async fn list_rooms(&self) -> Vec<GroupId> {
        self.rooms.read().await.keys().copied().collect()
    }

    /// Serialises persist-and-broadcast for one group.
    pub async fn write_lock(&self, group_id: GroupId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.write_locks.lock().await;
            locks.entry(group_id).or_default().clone()
        };
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_room_join_leave() {
        let hub = RoomHub::new();
        let group = GroupId::new();
        let conn = Uuid::new_v4();
        let (tx, _rx) = mpsc::channel(4);

        hub.join(group, conn, tx).await;
        assert_eq!(hub.participant_count(group).await, 1);
        assert_eq!(hub.list_rooms().await, vec![group]);
        assert_eq!(hub.subscription_count().await, 1);

        assert!(hub.leave(group, &conn).await);
        assert!(!hub.leave(group, &conn).await);
        assert!(hub.list_rooms().await.is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_subscriber() {
        let hub = RoomHub::new();
        let group = GroupId::new();
        let (a_tx, mut a_rx) = mpsc::channel(4);
        let (b_tx, mut b_rx) = mpsc::channel(4);
        let (c_tx, mut c_rx) = mpsc::channel(4);

        hub.join(group, Uuid::new_v4(), a_tx).await;
        hub.join(group, Uuid::new_v4(), b_tx).await;
        hub.join(GroupId::new(), Uuid::new_v4(), c_tx).await;

        let delivered = hub.broadcast(group, &ServerEvent::error("ping")).await;
        assert_eq!(delivered, 2);
        assert_eq!(a_rx.try_recv().unwrap(), ServerEvent::error("ping"));
        assert_eq!(b_rx.try_recv().unwrap(), ServerEvent::error("ping"));
        assert!(c_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_full_outbox_is_skipped() {
        let hub = RoomHub::new();
        let group = GroupId::new();
        let (tx, mut rx) = mpsc::channel(1);
        hub.join(group, Uuid::new_v4(), tx).await;

        assert_eq!(hub.broadcast(group, &ServerEvent::error("1")).await, 1);
        assert_eq!(hub.broadcast(group, &ServerEvent::error("2")).await, 0);
        assert_eq!(rx.try_recv().unwrap(), ServerEvent::error("1"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_leave_all() {
        let hub = RoomHub::new();
        let conn = Uuid::new_v4();
        let groups = [GroupId::new(), GroupId::new()];
        for g in &groups {
            let (tx, _rx) = mpsc::channel(1);
            hub.join(*g, conn, tx).await;
        }

        hub.leave_all(groups.iter(), &conn).await;
        assert!(hub.list_rooms().await.is_empty());
    }

    #[tokio::test]
    async fn test_write_lock_is_per_group() {
        let hub = RoomHub::new();
        let g1 = GroupId::new();
        let g2 = GroupId::new();

        let held = hub.write_lock(g1).await;
        // A different group is not blocked.
        let _other = hub.write_lock(g2).await;

        let hub2 = hub.clone();
        let waiter = tokio::spawn(async move {
            let _g = hub2.write_lock(g1).await;
        });
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());
        drop(held);
        waiter.await.unwrap();
    }
}
