//! Realtime gateway: per-connection state machine over room subscriptions.
//!
//! A [`Connection`] exists only after a successful handshake, so no event is
//! ever processed for an unauthenticated client. In-room failures are
//! reported to the originating connection as `error` events and never close
//! the connection. The one exception is the session itself: it is re-checked
//! before every event and periodically, and a revoked, expired or blocked
//! session ends the connection.

use std::collections::HashSet;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use civic_shared::constants::MAX_MESSAGE_SIZE;
use civic_shared::protocol::{ClientEvent, ServerEvent};
use civic_shared::session::SessionClaims;
use civic_shared::types::{ContentType, GroupId};
use civic_store::{Group, Profile};

use crate::chat::{ChatError, ChatService};
use crate::rooms::{ConnId, RoomHub, OUTBOX_CAPACITY};
use crate::sessions::{SessionRejection, SessionVerifier};

/// Why a handshake was refused.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthenticationError {
    #[error("Authentication token missing")]
    MissingToken,

    #[error("Invalid or expired token")]
    InvalidToken,
}

#[derive(Clone)]
pub struct Gateway {
    sessions: SessionVerifier,
    chat: ChatService,
    hub: RoomHub,
    page_size: u32,
}

impl Gateway {
    pub fn new(sessions: SessionVerifier, chat: ChatService, hub: RoomHub, page_size: u32) -> Self {
        Self {
            sessions,
            chat,
            hub,
            page_size,
        }
    }

    pub fn hub(&self) -> &RoomHub {
        &self.hub
    }

    /// Authenticate a handshake. On success the caller owns the connection
    /// and must forward everything arriving on the receiver to the client.
    pub async fn connect(
        &self,
        token: Option<&str>,
    ) -> Result<(Connection, mpsc::Receiver<ServerEvent>), AuthenticationError> {
        let auth = self.sessions.authenticate(token).await.map_err(|e| {
            debug!(error = %e, "Realtime handshake rejected");
            match e {
                SessionRejection::Missing => AuthenticationError::MissingToken,
                _ => AuthenticationError::InvalidToken,
            }
        })?;

        let (outbox, inbox) = mpsc::channel(OUTBOX_CAPACITY);
        let conn = Connection {
            id: Uuid::new_v4(),
            claims: auth.claims,
            profile: auth.profile,
            rooms: HashSet::new(),
            outbox,
            gateway: self.clone(),
            closed: false,
        };
        info!(conn = %conn.id, profile = %conn.profile.id, "Realtime connection established");
        Ok((conn, inbox))
    }
}

/// One authenticated realtime client.
pub struct Connection {
    id: ConnId,
    claims: SessionClaims,
    /// Last profile seen by [`Connection::revalidate`].
    profile: Profile,
    rooms: HashSet<GroupId>,
    outbox: mpsc::Sender<ServerEvent>,
    gateway: Gateway,
    closed: bool,
}

impl Connection {
    pub fn id(&self) -> ConnId {
        self.id
    }

    /// Set once the session stops being valid; the transport should hang up.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Re-check the session and reload the profile.
    ///
    /// A revoked, expired or blocked session leaves every room, emits an
    /// `error` event and marks the connection closed. A role change
    /// re-checks each joined room and leaves the ones no longer permitted.
    /// Returns whether the connection may keep acting.
    pub async fn revalidate(&mut self) -> bool {
        if self.closed {
            return false;
        }

        let profile = match self.gateway.sessions.refresh(&self.claims).await {
            Ok(profile) => profile,
            Err(SessionRejection::Store(e)) => {
                warn!(conn = %self.id, error = %e, "Session check failed");
                self.reply(ServerEvent::error("Failed to load session")).await;
                return false;
            }
            Err(rejection) => {
                info!(
                    conn = %self.id,
                    profile = %self.profile.id,
                    reason = %rejection,
                    "Closing realtime connection"
                );
                self.gateway.hub.leave_all(self.rooms.iter(), &self.id).await;
                self.rooms.clear();
                self.closed = true;
                self.reply(ServerEvent::error(rejection.to_string())).await;
                return false;
            }
        };

        let role_changed = profile.role != self.profile.role;
        self.profile = profile;
        if role_changed {
            self.drop_unpermitted_rooms().await;
        }
        true
    }

    async fn drop_unpermitted_rooms(&mut self) {
        let joined: Vec<GroupId> = self.rooms.iter().copied().collect();
        for id in joined {
            match self.gateway.chat.authorize(&id.to_string(), &self.profile).await {
                Ok(_) | Err(ChatError::Store(_)) => {}
                Err(e) => {
                    debug!(conn = %self.id, group = %id, "Leaving room after role change");
                    self.rooms.remove(&id);
                    self.gateway.hub.leave(id, &self.id).await;
                    self.reply(ServerEvent::error(e.to_string())).await;
                }
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn rooms(&self) -> &HashSet<GroupId> {
        &self.rooms
    }

    /// Handle one raw text frame. Malformed frames produce an `error` event.
    pub async fn handle_text(&mut self, text: &str) {
        match ClientEvent::from_json(text) {
            Ok(event) => self.handle(event).await,
            Err(e) => {
                debug!(conn = %self.id, error = %e, "Malformed client event");
                self.reply(ServerEvent::error("Malformed event")).await;
            }
        }
    }

    pub async fn handle(&mut self, event: ClientEvent) {
        match event {
            ClientEvent::JoinRoom(group_id) => self.join_room(&group_id).await,
            ClientEvent::LeaveRoom(group_id) => self.leave_room(&group_id).await,
            ClientEvent::SendMessage {
                group_id,
                content,
                content_type,
            } => {
                self.send_message(group_id, content, content_type.unwrap_or_default())
                    .await
            }
            ClientEvent::LoadHistory { group_id, before } => {
                self.load_history(&group_id, before).await
            }
        }
    }

    pub async fn join_room(&mut self, group_id: &str) {
        if !self.revalidate().await {
            return;
        }
        let Some(group) = self.authorized(group_id).await else {
            return;
        };

        let page = match self
            .gateway
            .chat
            .history_page(group.id, None, self.gateway.page_size)
            .await
        {
            Ok(page) => page,
            Err(e) => {
                warn!(conn = %self.id, group = %group.id, error = %e, "Failed to load history");
                self.reply(ServerEvent::error("Failed to load messages")).await;
                return;
            }
        };

        self.gateway
            .hub
            .join(group.id, self.id, self.outbox.clone())
            .await;
        self.rooms.insert(group.id);

        if group.has_member(self.profile.id) {
            if let Err(e) = self.gateway.chat.mark_read(group.id, self.profile.id).await {
                debug!(conn = %self.id, group = %group.id, error = %e, "Could not mark group read");
            }
        }

        let event = ServerEvent::AllMessage {
            group_id: group.id,
            messages: page.messages,
            group_description: group.description,
            next_cursor: page.next_cursor,
        };
        self.gateway.hub.broadcast(group.id, &event).await;
    }

    pub async fn leave_room(&mut self, group_id: &str) {
        let Ok(id) = GroupId::parse(group_id.trim()) else {
            self.reply(ServerEvent::error("Group not found")).await;
            return;
        };
        if self.rooms.remove(&id) {
            self.gateway.hub.leave(id, &self.id).await;
        }
    }

    pub async fn send_message(
        &mut self,
        group_id: Option<String>,
        content: Option<String>,
        content_type: ContentType,
    ) {
        let (Some(group_id), Some(content)) = (
            group_id.filter(|g| !g.trim().is_empty()),
            content.filter(|c| !c.trim().is_empty()),
        ) else {
            self.reply(ServerEvent::error("Group ID and content are required"))
                .await;
            return;
        };

        if content.len() > MAX_MESSAGE_SIZE {
            self.reply(ServerEvent::error("Message is too large")).await;
            return;
        }

        if !self.revalidate().await {
            return;
        }
        let Some(group) = self.authorized(&group_id).await else {
            return;
        };

        let _ordering = self.gateway.hub.write_lock(group.id).await;
        match self
            .gateway
            .chat
            .post_message(group.id, self.profile.id, content, content_type)
            .await
        {
            Ok(view) => {
                let delivered = self
                    .gateway
                    .hub
                    .broadcast(group.id, &ServerEvent::NewMessage(view))
                    .await;
                debug!(conn = %self.id, group = %group.id, delivered, "Message broadcast");
            }
            Err(e) => {
                warn!(conn = %self.id, group = %group.id, error = %e, "Failed to store message");
                self.reply(ServerEvent::error("Failed to send message")).await;
            }
        }
    }

    pub async fn load_history(&mut self, group_id: &str, before: Option<i64>) {
        if !self.revalidate().await {
            return;
        }
        let Some(group) = self.authorized(group_id).await else {
            return;
        };

        match self
            .gateway
            .chat
            .history_page(group.id, before, self.gateway.page_size)
            .await
        {
            Ok(page) => {
                self.reply(ServerEvent::History {
                    group_id: group.id,
                    messages: page.messages,
                    next_cursor: page.next_cursor,
                })
                .await
            }
            Err(e) => {
                warn!(conn = %self.id, group = %group.id, error = %e, "Failed to load history");
                self.reply(ServerEvent::error("Failed to load messages")).await;
            }
        }
    }

    /// Drop every room subscription. Consumes the connection.
    pub async fn disconnect(self) {
        self.gateway.hub.leave_all(self.rooms.iter(), &self.id).await;
        info!(conn = %self.id, profile = %self.profile.id, "Realtime connection closed");
    }

    /// Resolve a group the caller may use, replying with an error otherwise.
    async fn authorized(&self, group_id: &str) -> Option<Group> {
        match self.gateway.chat.authorize(group_id, &self.profile).await {
            Ok(group) => Some(group),
            Err(ChatError::Store(e)) => {
                warn!(conn = %self.id, error = %e, "Group lookup failed");
                self.reply(ServerEvent::error("Failed to load group")).await;
                None
            }
            Err(e) => {
                self.reply(ServerEvent::error(e.to_string())).await;
                None
            }
        }
    }

    async fn reply(&self, event: ServerEvent) {
        if self.outbox.send(event).await.is_err() {
            debug!(conn = %self.id, "Reply dropped, connection closing");
        }
    }
}
