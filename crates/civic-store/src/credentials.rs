//! CRUD operations for [`Credential`] records.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use civic_shared::types::CredentialId;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{Credential, IssuedCode};
use crate::rows::{enum_col, opt_ts_col, ts_col, uuid_col};

const CREDENTIAL_COLUMNS: &str = "id, phone, otp_hash, otp_expires_at, resend_available_at,
     account_status, created_at, updated_at";

impl Database {
    /// Look up a credential by normalised phone number.
    pub fn find_credential_by_phone(&self, phone: &str) -> Result<Option<Credential>> {
        let sql = format!("SELECT {CREDENTIAL_COLUMNS} FROM credentials WHERE phone = ?1");
        Ok(self
            .conn()
            .query_row(&sql, params![phone], row_to_credential)
            .optional()?)
    }

    #[cfg(test)]
    pub(crate) fn get_credential(&self, id: CredentialId) -> Result<Credential> {
        let sql = format!("SELECT {CREDENTIAL_COLUMNS} FROM credentials WHERE id = ?1");
        self.conn()
            .query_row(&sql, params![id.to_string()], row_to_credential)
            .map_err(crate::error::not_found)
    }

    /// Store a freshly issued code for `phone`, creating the credential on
    /// first use. An existing credential keeps its id and account status.
    pub fn upsert_credential_code(
        &self,
        phone: &str,
        code: &IssuedCode,
        now: DateTime<Utc>,
    ) -> Result<Credential> {
        self.conn().execute(
            "INSERT INTO credentials
                 (id, phone, otp_hash, otp_expires_at, resend_available_at,
                  account_status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'active', ?6, ?6)
             ON CONFLICT(phone) DO UPDATE SET
                 otp_hash = excluded.otp_hash,
                 otp_expires_at = excluded.otp_expires_at,
                 resend_available_at = excluded.resend_available_at,
                 updated_at = excluded.updated_at",
            params![
                CredentialId::new().to_string(),
                phone,
                code.otp_hash,
                code.otp_expires_at.to_rfc3339(),
                code.resend_available_at.to_rfc3339(),
                now.to_rfc3339(),
            ],
        )?;

        self.find_credential_by_phone(phone)?
            .ok_or(StoreError::NotFound)
    }

    /// Consume the outstanding code so it cannot be replayed.
    ///
    /// Only clears the code if it still matches `expected_hash`, so a code
    /// re-issued concurrently is left alone. Returns `true` when this call
    /// consumed it.
    pub fn consume_credential_code(
        &self,
        id: CredentialId,
        expected_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE credentials
             SET otp_hash = NULL, otp_expires_at = NULL, updated_at = ?3
             WHERE id = ?1 AND otp_hash = ?2",
            params![id.to_string(), expected_hash, now.to_rfc3339()],
        )?;
        Ok(affected > 0)
    }
}

fn row_to_credential(row: &rusqlite::Row<'_>) -> rusqlite::Result<Credential> {
    Ok(Credential {
        id: CredentialId(uuid_col(row, 0)?),
        phone: row.get(1)?,
        otp_hash: row.get(2)?,
        otp_expires_at: opt_ts_col(row, 3)?,
        resend_available_at: opt_ts_col(row, 4)?,
        account_status: enum_col(row, 5)?,
        created_at: ts_col(row, 6)?,
        updated_at: ts_col(row, 7)?,
    })
}
