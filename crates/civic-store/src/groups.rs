//! CRUD operations for [`Group`] records and their members.

use chrono::Utc;
use rusqlite::params;

use civic_shared::types::{GroupId, ProfileId};

use crate::database::Database;
use crate::error::{not_found, Result, StoreError};
use crate::models::{Group, GroupMember};
use crate::rows::{enum_col, opt_ts_col, ts_col, uuid_col};

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a group and its member list in one transaction.
    pub fn create_group(&self, group: &Group) -> Result<()> {
        let tx = self.conn().unchecked_transaction()?;

        tx.execute(
            "INSERT INTO groups (id, name, description, creator_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                group.id.to_string(),
                group.name,
                group.description,
                group.creator_id.to_string(),
                group.created_at.to_rfc3339(),
                group.updated_at.to_rfc3339(),
            ],
        )?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO group_members (group_id, profile_id, position, role, joined_at, last_read_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for (position, member) in group.members.iter().enumerate() {
                stmt.execute(params![
                    group.id.to_string(),
                    member.profile_id.to_string(),
                    position as i64,
                    member.role.as_str(),
                    member.joined_at.to_rfc3339(),
                    member.last_read_at.map(|t| t.to_rfc3339()),
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn get_group(&self, id: GroupId) -> Result<Group> {
        let mut group = self
            .conn()
            .query_row(
                "SELECT id, name, description, creator_id, created_at, updated_at
                 FROM groups WHERE id = ?1",
                params![id.to_string()],
                row_to_group,
            )
            .map_err(not_found)?;
        group.members = self.group_members(id)?;
        Ok(group)
    }

    /// Groups created by `creator`, newest first.
    pub fn list_groups_created_by(&self, creator: ProfileId) -> Result<Vec<Group>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, name, description, creator_id, created_at, updated_at
             FROM groups
             WHERE creator_id = ?1
             ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map(params![creator.to_string()], row_to_group)?;
        self.with_members(rows)
    }

    /// Groups listing `member` in their member list, newest first.
    pub fn list_groups_for_member(&self, member: ProfileId) -> Result<Vec<Group>> {
        let mut stmt = self.conn().prepare(
            "SELECT g.id, g.name, g.description, g.creator_id, g.created_at, g.updated_at
             FROM groups g
             JOIN group_members m ON m.group_id = g.id
             WHERE m.profile_id = ?1
             ORDER BY g.created_at DESC",
        )?;
        let rows = stmt.query_map(params![member.to_string()], row_to_group)?;
        self.with_members(rows)
    }

    pub fn is_group_member(&self, group: GroupId, profile: ProfileId) -> Result<bool> {
        let exists: bool = self.conn().query_row(
            "SELECT EXISTS(SELECT 1 FROM group_members WHERE group_id = ?1 AND profile_id = ?2)",
            params![group.to_string(), profile.to_string()],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Record that `profile` has read `group` up to now.
    pub fn mark_group_read(&self, group: GroupId, profile: ProfileId) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE group_members SET last_read_at = ?3 WHERE group_id = ?1 AND profile_id = ?2",
            params![group.to_string(), profile.to_string(), Utc::now().to_rfc3339()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn group_members(&self, id: GroupId) -> Result<Vec<GroupMember>> {
        let mut stmt = self.conn().prepare_cached(
            "SELECT profile_id, role, joined_at, last_read_at
             FROM group_members
             WHERE group_id = ?1
             ORDER BY position ASC",
        )?;
        let rows = stmt.query_map(params![id.to_string()], |row| {
            Ok(GroupMember {
                profile_id: ProfileId(uuid_col(row, 0)?),
                role: enum_col(row, 1)?,
                joined_at: ts_col(row, 2)?,
                last_read_at: opt_ts_col(row, 3)?,
            })
        })?;

        let mut members = Vec::new();
        for row in rows {
            members.push(row?);
        }
        Ok(members)
    }

    fn with_members<I>(&self, rows: I) -> Result<Vec<Group>>
    where
        I: Iterator<Item = rusqlite::Result<Group>>,
    {
        let mut groups = Vec::new();
        for row in rows {
            let mut group = row?;
            group.members = self.group_members(group.id)?;
            groups.push(group);
        }
        Ok(groups)
    }
}

/// Map a `rusqlite::Row` to a [`Group`] with an empty member list.
fn row_to_group(row: &rusqlite::Row<'_>) -> rusqlite::Result<Group> {
    Ok(Group {
        id: GroupId(uuid_col(row, 0)?),
        name: row.get(1)?,
        description: row.get(2)?,
        creator_id: ProfileId(uuid_col(row, 3)?),
        members: Vec::new(),
        created_at: ts_col(row, 4)?,
        updated_at: ts_col(row, 5)?,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::profiles::tests::seed_profile;
    use civic_shared::types::{GroupRole, Role};

    pub(crate) fn seed_group(db: &Database, creator: ProfileId, others: &[ProfileId]) -> Group {
        let now = Utc::now();
        let mut members: Vec<GroupMember> = others
            .iter()
            .map(|id| GroupMember {
                profile_id: *id,
                role: GroupRole::Member,
                joined_at: now,
                last_read_at: None,
            })
            .collect();
        members.push(GroupMember {
            profile_id: creator,
            role: GroupRole::Admin,
            joined_at: now,
            last_read_at: None,
        });
        let group = Group {
            id: GroupId::new(),
            name: "Ward 3".into(),
            description: "Canvassing crew".into(),
            creator_id: creator,
            members,
            created_at: now,
            updated_at: now,
        };
        db.create_group(&group).unwrap();
        group
    }

    #[test]
    fn create_and_fetch_preserves_member_order() {
        let db = Database::open_in_memory().unwrap();
        let creator = seed_profile(&db, "5551000000", Role::Candidate);
        let a = seed_profile(&db, "5551000001", Role::Volunteer);
        let b = seed_profile(&db, "5551000002", Role::Volunteer);

        let group = seed_group(&db, creator.id, &[a.id, b.id]);
        let fetched = db.get_group(group.id).unwrap();

        let ids: Vec<_> = fetched.members.iter().map(|m| m.profile_id).collect();
        assert_eq!(ids, vec![a.id, b.id, creator.id]);
        assert_eq!(fetched.members[2].role, GroupRole::Admin);
    }

    #[test]
    fn list_by_creator_and_member() {
        let db = Database::open_in_memory().unwrap();
        let creator = seed_profile(&db, "5552000000", Role::Candidate);
        let vol = seed_profile(&db, "5552000001", Role::Volunteer);
        let outsider = seed_profile(&db, "5552000002", Role::Voter);

        let g = seed_group(&db, creator.id, &[vol.id]);

        assert_eq!(db.list_groups_created_by(creator.id).unwrap()[0].id, g.id);
        assert!(db.list_groups_created_by(vol.id).unwrap().is_empty());
        assert_eq!(db.list_groups_for_member(vol.id).unwrap().len(), 1);
        assert!(db.list_groups_for_member(outsider.id).unwrap().is_empty());

        assert!(db.is_group_member(g.id, vol.id).unwrap());
        assert!(!db.is_group_member(g.id, outsider.id).unwrap());
    }

    #[test]
    fn unknown_group_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(db.get_group(GroupId::new()), Err(StoreError::NotFound)));
    }

    #[test]
    fn mark_read_requires_membership() {
        let db = Database::open_in_memory().unwrap();
        let creator = seed_profile(&db, "5553000000", Role::Candidate);
        let vol = seed_profile(&db, "5553000001", Role::Volunteer);
        let g = seed_group(&db, creator.id, &[vol.id]);

        db.mark_group_read(g.id, vol.id).unwrap();
        assert!(db.get_group(g.id).unwrap().members[0].last_read_at.is_some());
        assert!(matches!(
            db.mark_group_read(g.id, ProfileId::new()),
            Err(StoreError::NotFound)
        ));
    }
}
