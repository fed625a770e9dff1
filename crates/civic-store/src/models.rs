//! Domain model structs persisted in the SQLite database.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use civic_shared::protocol::{ProfileSnapshot, SenderView};
use civic_shared::types::{
    AccountStatus, ContentType, CredentialId, GroupId, GroupRole, MessageId, ProfileId, Role,
};

// ---------------------------------------------------------------------------
// Credential
// ---------------------------------------------------------------------------

/// Phone-number identity and its one-time code state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credential {
    pub id: CredentialId,
    /// Normalised phone number, unique.
    pub phone: String,
    /// BLAKE3 hash of the outstanding code. `None` once consumed.
    pub otp_hash: Option<String>,
    pub otp_expires_at: Option<DateTime<Utc>>,
    pub resend_available_at: Option<DateTime<Utc>>,
    pub account_status: AccountStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields written by a code request.
#[derive(Debug, Clone)]
pub struct IssuedCode {
    pub otp_hash: String,
    pub otp_expires_at: DateTime<Utc>,
    pub resend_available_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Profile
// ---------------------------------------------------------------------------

/// The public user record linked 1:1 to a credential.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Profile {
    pub id: ProfileId,
    pub credential_id: CredentialId,
    pub display_name: String,
    pub phone: String,
    pub role: Role,
    pub photo_url: String,
    pub region_id: String,
    pub account_status: AccountStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    pub fn snapshot(&self) -> ProfileSnapshot {
        ProfileSnapshot {
            id: self.id,
            credential_id: self.credential_id,
            display_name: self.display_name.clone(),
            phone: self.phone.clone(),
            role: self.role,
            photo_url: self.photo_url.clone(),
            region_id: self.region_id.clone(),
            account_status: self.account_status,
        }
    }

    pub fn sender_view(&self) -> SenderView {
        SenderView {
            id: self.id,
            display_name: self.display_name.clone(),
            photo_url: self.photo_url.clone(),
            role: self.role,
        }
    }
}

// ---------------------------------------------------------------------------
// Group
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GroupMember {
    pub profile_id: ProfileId,
    pub role: GroupRole,
    pub joined_at: DateTime<Utc>,
    pub last_read_at: Option<DateTime<Utc>>,
}

/// A chat group. `members` is kept in insertion order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    pub description: String,
    pub creator_id: ProfileId,
    pub members: Vec<GroupMember>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Group {
    pub fn has_member(&self, profile_id: ProfileId) -> bool {
        self.members.iter().any(|m| m.profile_id == profile_id)
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// An immutable chat message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    /// Storage position within the whole table; monotonic.
    pub seq: i64,
    pub group_id: GroupId,
    pub sender_id: ProfileId,
    pub content: String,
    pub content_type: ContentType,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub group_id: GroupId,
    pub sender_id: ProfileId,
    pub content: String,
    pub content_type: ContentType,
}
