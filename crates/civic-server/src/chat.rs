//! Group and message operations shared by the HTTP API and the gateway.

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info};

use civic_shared::constants::MAX_HISTORY_PAGE;
use civic_shared::protocol::MessageView;
use civic_shared::types::{ContentType, GroupId, GroupRole, ProfileId, Role};
use civic_store::{Group, GroupMember, MessagePage, NewMessage, Profile, StoreError};

use crate::error::ServerError;
use crate::state::Store;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Forbidden(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<ChatError> for ServerError {
    fn from(e: ChatError) -> Self {
        match e {
            ChatError::Validation(msg) => ServerError::BadRequest(msg),
            ChatError::NotFound(msg) => ServerError::NotFound(msg),
            ChatError::Forbidden(msg) => ServerError::Forbidden(msg),
            ChatError::Store(inner) => inner.into(),
        }
    }
}

#[derive(Clone)]
pub struct ChatService {
    db: Store,
}

impl ChatService {
    pub fn new(db: Store) -> Self {
        Self { db }
    }

    /// Create a group owned by `creator`.
    ///
    /// Every id in `member_ids` must name an existing profile. Duplicates and
    /// the creator's own id are dropped; the creator is then appended as the
    /// group admin.
    pub async fn create_group(
        &self,
        creator: &Profile,
        name: &str,
        description: &str,
        member_ids: &[String],
    ) -> Result<Group, ChatError> {
        let name = name.trim();
        let description = description.trim();
        if name.is_empty() || description.is_empty() {
            return Err(ChatError::Validation(
                "Name and description are required".into(),
            ));
        }

        let mut ids: Vec<ProfileId> = Vec::with_capacity(member_ids.len());
        for raw in member_ids {
            let id = ProfileId::parse(raw.trim())
                .map_err(|_| ChatError::NotFound("One or more members not found".into()))?;
            if id != creator.id && !ids.contains(&id) {
                ids.push(id);
            }
        }
        if ids.is_empty() {
            return Err(ChatError::Validation(
                "At least one member is required".into(),
            ));
        }

        let now = Utc::now();
        let mut members: Vec<GroupMember> = ids
            .iter()
            .map(|id| GroupMember {
                profile_id: *id,
                role: GroupRole::Member,
                joined_at: now,
                last_read_at: None,
            })
            .collect();
        members.push(GroupMember {
            profile_id: creator.id,
            role: GroupRole::Admin,
            joined_at: now,
            last_read_at: None,
        });

        let group = Group {
            id: GroupId::new(),
            name: name.to_string(),
            description: description.to_string(),
            creator_id: creator.id,
            members,
            created_at: now,
            updated_at: now,
        };

        let group = self
            .db
            .call(move |db| {
                let missing = db.missing_profiles(&ids)?;
                if !missing.is_empty() {
                    debug!(count = missing.len(), "Group members do not resolve");
                    return Err(ChatError::NotFound("One or more members not found".into()));
                }
                db.create_group(&group)?;
                Ok(group)
            })
            .await?;

        info!(
            group = %group.id,
            creator = %creator.id,
            members = group.members.len(),
            "Created group"
        );
        Ok(group)
    }

    /// Groups created by `creator`. Empty when there are none.
    pub async fn list_created_by(&self, creator: ProfileId) -> Result<Vec<Group>, ChatError> {
        self.db
            .call(move |db| Ok(db.list_groups_created_by(creator)?))
            .await
    }

    /// Groups the profile registered under `phone` belongs to.
    pub async fn list_for_member(&self, phone: &str) -> Result<Vec<Group>, ChatError> {
        let phone = phone.to_string();
        self.db
            .call(move |db| {
                let member = db
                    .find_profile_by_phone(&phone)?
                    .ok_or_else(|| ChatError::NotFound("Volunteer not found".into()))?;
                Ok(db.list_groups_for_member(member.id)?)
            })
            .await
    }

    /// Load a group and check that `profile` may read and post in it.
    pub async fn authorize(&self, group_id: &str, profile: &Profile) -> Result<Group, ChatError> {
        let not_found = || ChatError::NotFound("Group not found".into());
        let id = GroupId::parse(group_id.trim()).map_err(|_| not_found())?;

        let group = match self.db.call(move |db| db.get_group(id)).await {
            Ok(group) => group,
            Err(StoreError::NotFound) => return Err(not_found()),
            Err(e) => return Err(e.into()),
        };

        if profile.role != Role::Admin && !group.has_member(profile.id) {
            return Err(ChatError::Forbidden("Not a member of this group".into()));
        }
        Ok(group)
    }

    /// One page of history, oldest first. `limit` is clamped to
    /// `1..=MAX_HISTORY_PAGE`.
    pub async fn history_page(
        &self,
        group_id: GroupId,
        before: Option<i64>,
        limit: u32,
    ) -> Result<MessagePage, ChatError> {
        let limit = limit.clamp(1, MAX_HISTORY_PAGE);
        self.db
            .call(move |db| Ok(db.list_messages_page(group_id, limit, before)?))
            .await
    }

    /// Persist a message and return it with the sender denormalised.
    pub async fn post_message(
        &self,
        group_id: GroupId,
        sender: ProfileId,
        content: String,
        content_type: ContentType,
    ) -> Result<MessageView, ChatError> {
        self.db
            .call(move |db| {
                let stored = db.insert_message(&NewMessage {
                    group_id,
                    sender_id: sender,
                    content,
                    content_type,
                })?;
                let view = db.get_message_view(stored.id)?;
                debug!(group = %group_id, message = %stored.id, seq = stored.seq, "Message stored");
                Ok(view)
            })
            .await
    }

    pub async fn mark_read(&self, group_id: GroupId, profile: ProfileId) -> Result<(), ChatError> {
        self.db
            .call(move |db| Ok(db.mark_group_read(group_id, profile)?))
            .await
    }
}
