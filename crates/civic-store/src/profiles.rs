//! CRUD operations for [`Profile`] records.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use civic_shared::types::{AccountStatus, CredentialId, ProfileId, Role};

use crate::database::Database;
use crate::error::{not_found, Result, StoreError};
use crate::models::Profile;
use crate::rows::{enum_col, ts_col, uuid_col};

const PROFILE_COLUMNS: &str = "id, credential_id, display_name, phone, role, photo_url,
     region_id, account_status, created_at, updated_at";

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert `profile` unless its credential already owns one.
    ///
    /// The unique index on `credential_id` makes this safe against two
    /// concurrent first-time verifications: the loser of the race gets the
    /// winner's row back. Returns the stored profile and whether this call
    /// created it.
    pub fn insert_profile_if_absent(&self, profile: &Profile) -> Result<(Profile, bool)> {
        let inserted = self.conn().execute(
            "INSERT INTO profiles
                 (id, credential_id, display_name, phone, role, photo_url,
                  region_id, account_status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(credential_id) DO NOTHING",
            params![
                profile.id.to_string(),
                profile.credential_id.to_string(),
                profile.display_name,
                profile.phone,
                profile.role.as_str(),
                profile.photo_url,
                profile.region_id,
                profile.account_status.as_str(),
                profile.created_at.to_rfc3339(),
                profile.updated_at.to_rfc3339(),
            ],
        )?;

        let stored = self
            .find_profile_by_credential(profile.credential_id)?
            .ok_or(StoreError::NotFound)?;
        Ok((stored, inserted > 0))
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn get_profile(&self, id: ProfileId) -> Result<Profile> {
        let sql = format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE id = ?1");
        self.conn()
            .query_row(&sql, params![id.to_string()], row_to_profile)
            .map_err(not_found)
    }

    pub fn find_profile_by_credential(&self, credential_id: CredentialId) -> Result<Option<Profile>> {
        let sql = format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE credential_id = ?1");
        Ok(self
            .conn()
            .query_row(&sql, params![credential_id.to_string()], row_to_profile)
            .optional()?)
    }

    pub fn find_profile_by_phone(&self, phone: &str) -> Result<Option<Profile>> {
        let sql = format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE phone = ?1");
        Ok(self
            .conn()
            .query_row(&sql, params![phone], row_to_profile)
            .optional()?)
    }

    /// Return the ids from `ids` that do not resolve to a stored profile.
    pub fn missing_profiles(&self, ids: &[ProfileId]) -> Result<Vec<ProfileId>> {
        let mut stmt = self
            .conn()
            .prepare_cached("SELECT EXISTS(SELECT 1 FROM profiles WHERE id = ?1)")?;

        let mut missing = Vec::new();
        for id in ids {
            let exists: bool = stmt.query_row(params![id.to_string()], |row| row.get(0))?;
            if !exists {
                missing.push(*id);
            }
        }
        Ok(missing)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    pub fn set_profile_role(&self, id: ProfileId, role: Role) -> Result<Profile> {
        let affected = self.conn().execute(
            "UPDATE profiles SET role = ?2, updated_at = ?3 WHERE id = ?1",
            params![id.to_string(), role.as_str(), Utc::now().to_rfc3339()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        self.get_profile(id)
    }

    /// Set the account status on both the profile and its credential.
    pub fn set_account_status(&self, id: ProfileId, status: AccountStatus) -> Result<Profile> {
        let profile = self.get_profile(id)?;
        let now = Utc::now().to_rfc3339();

        let tx = self.conn().unchecked_transaction()?;
        tx.execute(
            "UPDATE profiles SET account_status = ?2, updated_at = ?3 WHERE id = ?1",
            params![id.to_string(), status.as_str(), now],
        )?;
        tx.execute(
            "UPDATE credentials SET account_status = ?2, updated_at = ?3 WHERE id = ?1",
            params![profile.credential_id.to_string(), status.as_str(), now],
        )?;
        tx.commit()?;

        self.get_profile(id)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn row_to_profile(row: &rusqlite::Row<'_>) -> rusqlite::Result<Profile> {
    Ok(Profile {
        id: ProfileId(uuid_col(row, 0)?),
        credential_id: CredentialId(uuid_col(row, 1)?),
        display_name: row.get(2)?,
        phone: row.get(3)?,
        role: enum_col(row, 4)?,
        photo_url: row.get(5)?,
        region_id: row.get(6)?,
        account_status: enum_col(row, 7)?,
        created_at: ts_col(row, 8)?,
        updated_at: ts_col(row, 9)?,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::IssuedCode;
    use chrono::Duration;

    /// Create a credential + profile pair for `phone`.
    pub(crate) fn seed_profile(db: &Database, phone: &str, role: Role) -> Profile {
        let now = Utc::now();
        let cred = db
            .upsert_credential_code(
                phone,
                &IssuedCode {
                    otp_hash: "seed".into(),
                    otp_expires_at: now + Duration::minutes(10),
                    resend_available_at: now + Duration::seconds(30),
                },
                now,
            )
            .unwrap();
        let profile = Profile {
            id: ProfileId::new(),
            credential_id: cred.id,
            display_name: format!("User {phone}"),
            phone: phone.to_string(),
            role,
            photo_url: "https://example.org/p.png".into(),
            region_id: "r1".into(),
            account_status: AccountStatus::Active,
            created_at: now,
            updated_at: now,
        };
        db.insert_profile_if_absent(&profile).unwrap().0
    }

    #[test]
    fn second_insert_returns_existing() {
        let db = Database::open_in_memory().unwrap();
        let first = seed_profile(&db, "5551234567", Role::Voter);

        let mut rival = first.clone();
        rival.id = ProfileId::new();
        rival.display_name = "Impostor".into();

        let (stored, created) = db.insert_profile_if_absent(&rival).unwrap();
        assert!(!created);
        assert_eq!(stored.id, first.id);
        assert_eq!(stored.display_name, first.display_name);
    }

    #[test]
    fn lookup_by_phone_and_missing() {
        let db = Database::open_in_memory().unwrap();
        let p = seed_profile(&db, "5552223333", Role::Volunteer);

        assert_eq!(db.find_profile_by_phone("5552223333").unwrap().unwrap().id, p.id);
        assert!(db.find_profile_by_phone("5550000000").unwrap().is_none());

        let ghost = ProfileId::new();
        assert_eq!(db.missing_profiles(&[p.id, ghost]).unwrap(), vec![ghost]);
        assert!(matches!(db.get_profile(ghost), Err(StoreError::NotFound)));
    }

    #[test]
    fn role_and_status_updates() {
        let db = Database::open_in_memory().unwrap();
        let p = seed_profile(&db, "5554445555", Role::Voter);

        let promoted = db.set_profile_role(p.id, Role::Candidate).unwrap();
        assert_eq!(promoted.role, Role::Candidate);

        let blocked = db.set_account_status(p.id, AccountStatus::Blocked).unwrap();
        assert!(blocked.account_status.is_blocked());
        let cred = db.get_credential(p.credential_id).unwrap();
        assert!(cred.account_status.is_blocked());
    }
}
