//! v002 -- Group chat: `groups`, `group_members`, `messages`.

use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS groups (
    id          TEXT PRIMARY KEY NOT NULL,       -- UUID v4
    name        TEXT NOT NULL,
    description TEXT NOT NULL,
    creator_id  TEXT NOT NULL,                   -- FK -> profiles(id)
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL,

    FOREIGN KEY (creator_id) REFERENCES profiles(id)
);

CREATE INDEX IF NOT EXISTS idx_groups_creator ON groups(creator_id);

CREATE TABLE IF NOT EXISTS group_members (
    group_id     TEXT NOT NULL,                  -- FK -> groups(id)
    profile_id   TEXT NOT NULL,                  -- FK -> profiles(id)
    position     INTEGER NOT NULL,               -- insertion order
    role         TEXT NOT NULL,                  -- 'admin' | 'member'
    joined_at    TEXT NOT NULL,
    last_read_at TEXT,

    PRIMARY KEY (group_id, profile_id),
    FOREIGN KEY (group_id) REFERENCES groups(id) ON DELETE CASCADE,
    FOREIGN KEY (profile_id) REFERENCES profiles(id)
);

CREATE INDEX IF NOT EXISTS idx_group_members_profile ON group_members(profile_id);

CREATE TABLE IF NOT EXISTS messages (
    seq          INTEGER PRIMARY KEY AUTOINCREMENT, -- storage order, history cursor
    id           TEXT NOT NULL UNIQUE,              -- UUID v4
    group_id     TEXT NOT NULL,                     -- FK -> groups(id)
    sender_id    TEXT NOT NULL,                     -- FK -> profiles(id)
    content      TEXT NOT NULL,
    content_type TEXT NOT NULL DEFAULT 'text',
    created_at   TEXT NOT NULL,
    updated_at   TEXT NOT NULL,

    FOREIGN KEY (group_id) REFERENCES groups(id) ON DELETE CASCADE,
    FOREIGN KEY (sender_id) REFERENCES profiles(id)
);

CREATE INDEX IF NOT EXISTS idx_messages_group_seq ON messages(group_id, seq DESC);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
