//! Append and page [`Message`] records for a group.

use chrono::Utc;
use rusqlite::params;

use civic_shared::protocol::{MessageView, SenderView};
use civic_shared::types::{GroupId, MessageId, ProfileId};

use crate::database::Database;
use crate::error::{not_found, Result};
use crate::models::{Message, NewMessage};
use crate::rows::{enum_col, ts_col, uuid_col};

/// Messages joined with their sender's current profile.
const VIEW_SELECT: &str = "SELECT m.id, m.group_id, m.content, m.content_type, m.created_at,
            m.updated_at, m.seq, p.id, p.display_name, p.photo_url, p.role
     FROM messages m
     JOIN profiles p ON p.id = m.sender_id";

/// One page of history, oldest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessagePage {
    pub messages: Vec<MessageView>,
    /// Pass as `before` to fetch the next older page; `None` at the start.
    pub next_cursor: Option<i64>,
}

impl Database {
    pub fn insert_message(&self, new: &NewMessage) -> Result<Message> {
        let id = MessageId::new();
        let now = Utc::now();

        self.conn().execute(
            "INSERT INTO messages (id, group_id, sender_id, content, content_type, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                id.to_string(),
                new.group_id.to_string(),
                new.sender_id.to_string(),
                new.content,
                new.content_type.as_str(),
                now.to_rfc3339(),
            ],
        )?;

        Ok(Message {
            id,
            seq: self.conn().last_insert_rowid(),
            group_id: new.group_id,
            sender_id: new.sender_id,
            content: new.content.clone(),
            content_type: new.content_type,
            created_at: now,
            updated_at: now,
        })
    }

    /// Fetch one message with its sender denormalised.
    pub fn get_message_view(&self, id: MessageId) -> Result<MessageView> {
        let sql = format!("{VIEW_SELECT} WHERE m.id = ?1");
        self.conn()
            .query_row(&sql, params![id.to_string()], row_to_view)
            .map_err(not_found)
    }

    /// Every message of a group in storage order.
    #[cfg(test)]
    pub(crate) fn list_messages(&self, group_id: GroupId) -> Result<Vec<MessageView>> {
        let sql = format!("{VIEW_SELECT} WHERE m.group_id = ?1 ORDER BY m.seq ASC");
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(params![group_id.to_string()], row_to_view)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// The `limit` most recent messages stored before `before` (exclusive),
    /// returned oldest first.
    pub fn list_messages_page(
        &self,
        group_id: GroupId,
        limit: u32,
        before: Option<i64>,
    ) -> Result<MessagePage> {
        let sql = format!(
            "{VIEW_SELECT}
             WHERE m.group_id = ?1 AND m.seq < ?2
             ORDER BY m.seq DESC
             LIMIT ?3"
        );
        let mut stmt = self.conn().prepare(&sql)?;
        // Fetch one extra row to learn whether older history exists.
        let rows = stmt.query_map(
            params![
                group_id.to_string(),
                before.unwrap_or(i64::MAX),
                i64::from(limit) + 1
            ],
            row_to_view,
        )?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }

        let has_more = messages.len() > limit as usize;
        messages.truncate(limit as usize);
        messages.reverse();

        let next_cursor = if has_more {
            messages.first().map(|m| m.cursor)
        } else {
            None
        };
        Ok(MessagePage {
            messages,
            next_cursor,
        })
    }

    #[cfg(test)]
    pub(crate) fn count_messages(&self, group_id: GroupId) -> Result<u64> {
        let n: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM messages WHERE group_id = ?1",
            params![group_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }
}

fn row_to_view(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageView> {
    Ok(MessageView {
        id: MessageId(uuid_col(row, 0)?),
        group_id: GroupId(uuid_col(row, 1)?),
        content: row.get(2)?,
        content_type: enum_col(row, 3)?,
        created_at: ts_col(row, 4)?,
        updated_at: ts_col(row, 5)?,
        cursor: row.get(6)?,
        sender: SenderView {
            id: ProfileId(uuid_col(row, 7)?),
            display_name: row.get(8)?,
            photo_url: row.get(9)?,
            role: enum_col(row, 10)?,
        },
    })
}
