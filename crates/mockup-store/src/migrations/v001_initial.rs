//! v001 -- Initial schema creation.
//!
//! Creates the four core tables: `profiles`, `projects`, `messages` and
//! `frames`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Profiles (one per user; holds the credit balance)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS profiles (
    id         TEXT PRIMARY KEY NOT NULL,     -- UUID, issued by the auth provider
    email      TEXT,
    tier       TEXT NOT NULL DEFAULT 'free',  -- free | starter | pro | ultimate
    credits    INTEGER NOT NULL DEFAULT 0 CHECK (credits >= 0),
    created_at TEXT NOT NULL                  -- RFC-3339, UTC, microseconds
);

CREATE INDEX IF NOT EXISTS idx_profiles_email ON profiles(email);

-- ----------------------------------------------------------------
-- Projects
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS projects (
    id         TEXT PRIMARY KEY NOT NULL,     -- UUID v4
    user_id    TEXT NOT NULL,                 -- FK -> profiles(id)
    name       TEXT NOT NULL,
    created_at TEXT NOT NULL,

    FOREIGN KEY (user_id) REFERENCES profiles(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_projects_user ON projects(user_id, created_at DESC);

-- ----------------------------------------------------------------
-- Messages (chat transcript)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id         TEXT PRIMARY KEY NOT NULL,     -- UUID v4
    project_id TEXT NOT NULL,                 -- FK -> projects(id)
    role       TEXT NOT NULL,                 -- user | assistant | system
    content    TEXT NOT NULL,
    image      TEXT,                          -- optional data: URL
    kind       TEXT NOT NULL DEFAULT 'normal',-- normal | status
    created_at TEXT NOT NULL,

    FOREIGN KEY (project_id) REFERENCES projects(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_project_ts ON messages(project_id, created_at);

-- ----------------------------------------------------------------
-- Frames (one generated screen each)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS frames (
    id         TEXT PRIMARY KEY NOT NULL,     -- client or generation assigned
    project_id TEXT NOT NULL,                 -- FK -> projects(id)
    content    TEXT NOT NULL,
    type       TEXT NOT NULL,                 -- mobile | desktop
    created_at TEXT NOT NULL,

    FOREIGN KEY (project_id) REFERENCES projects(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_frames_project_ts ON frames(project_id, created_at);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
