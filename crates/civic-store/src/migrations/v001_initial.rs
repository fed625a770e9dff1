//! v001 -- Initial schema creation.
//!
//! Creates the identity tables: `credentials` and `profiles`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Credentials (one per phone number)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS credentials (
    id                  TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    phone               TEXT NOT NULL UNIQUE,        -- normalised phone number
    otp_hash            TEXT,                        -- BLAKE3 hex, NULL once consumed
    otp_expires_at      TEXT,                        -- RFC-3339
    resend_available_at TEXT,                        -- RFC-3339
    account_status      TEXT NOT NULL DEFAULT 'active',
    created_at          TEXT NOT NULL,
    updated_at          TEXT NOT NULL
);

-- ----------------------------------------------------------------
-- Profiles (one per credential, created on first verification)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS profiles (
    id             TEXT PRIMARY KEY NOT NULL,        -- UUID v4
    credential_id  TEXT NOT NULL UNIQUE,             -- FK -> credentials(id)
    display_name   TEXT NOT NULL,
    phone          TEXT NOT NULL,                    -- denormalised
    role           TEXT NOT NULL DEFAULT 'VOTER',
    photo_url      TEXT NOT NULL,
    region_id      TEXT NOT NULL,
    account_status TEXT NOT NULL DEFAULT 'active',
    created_at     TEXT NOT NULL,
    updated_at     TEXT NOT NULL,

    FOREIGN KEY (credential_id) REFERENCES credentials(id)
);

CREATE INDEX IF NOT EXISTS idx_profiles_phone ON profiles(phone);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
