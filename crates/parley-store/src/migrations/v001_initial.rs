//! v001 -- Initial schema.
//!
//! Profile ids are stored without foreign keys so that rows authored by a
//! removed profile keep pointing at its id. Unordered pairs (friendships,
//! conversations, pending friend requests) are stored as a normalized
//! `(low, high)` column pair so that uniqueness holds in both directions.

use rusqlite::Connection;

const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Profiles
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS profiles (
    id           TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    external_id  TEXT NOT NULL UNIQUE,        -- identity-provider subject
    username     TEXT NOT NULL UNIQUE,
    display_name TEXT NOT NULL,
    email        TEXT,
    avatar_url   TEXT,
    status       TEXT NOT NULL DEFAULT 'offline',
    created_at   TEXT NOT NULL,               -- RFC 3339
    updated_at   TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_profiles_email ON profiles(email);

-- ----------------------------------------------------------------
-- Servers, roles, categories, memberships
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS servers (
    id         TEXT PRIMARY KEY NOT NULL,
    name       TEXT NOT NULL,
    icon_url   TEXT,
    owner_id   TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS roles (
    id         TEXT PRIMARY KEY NOT NULL,
    server_id  TEXT NOT NULL,
    name       TEXT NOT NULL,
    is_default INTEGER NOT NULL DEFAULT 0,    -- boolean 0/1
    position   INTEGER NOT NULL,

    FOREIGN KEY (server_id) REFERENCES servers(id) ON DELETE CASCADE
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_roles_default
    ON roles(server_id) WHERE is_default = 1;

CREATE TABLE IF NOT EXISTS categories (
    id        TEXT PRIMARY KEY NOT NULL,
    server_id TEXT NOT NULL,
    name      TEXT NOT NULL,
    position  INTEGER NOT NULL,

    FOREIGN KEY (server_id) REFERENCES servers(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS memberships (
    id         TEXT PRIMARY KEY NOT NULL,
    profile_id TEXT NOT NULL,
    server_id  TEXT NOT NULL,
    role_id    TEXT NOT NULL,
    joined_at  TEXT NOT NULL,

    UNIQUE (profile_id, server_id),
    FOREIGN KEY (server_id) REFERENCES servers(id) ON DELETE CASCADE,
    FOREIGN KEY (role_id) REFERENCES roles(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_memberships_profile ON memberships(profile_id);

-- ----------------------------------------------------------------
-- Channels
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS channels (
    id          TEXT PRIMARY KEY NOT NULL,
    server_id   TEXT NOT NULL,
    category_id TEXT,
    name        TEXT NOT NULL,
    kind        TEXT NOT NULL,                -- text | voice | video
    position    INTEGER NOT NULL,
    created_at  TEXT NOT NULL,

    FOREIGN KEY (server_id) REFERENCES servers(id) ON DELETE CASCADE,
    FOREIGN KEY (category_id) REFERENCES categories(id) ON DELETE SET NULL
);

CREATE INDEX IF NOT EXISTS idx_channels_server_id ON channels(server_id);

-- ----------------------------------------------------------------
-- Channel messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id              TEXT PRIMARY KEY NOT NULL,
    channel_id      TEXT NOT NULL,
    author_id       TEXT NOT NULL,
    content         TEXT,
    attachment_url  TEXT,
    attachment_mime TEXT,
    client_key      TEXT,
    edited          INTEGER NOT NULL DEFAULT 0,
    deleted_at      TEXT,
    created_at      TEXT NOT NULL,

    FOREIGN KEY (channel_id) REFERENCES channels(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_channel_ts
    ON messages(channel_id, created_at DESC);

CREATE UNIQUE INDEX IF NOT EXISTS idx_messages_client_key
    ON messages(author_id, client_key) WHERE client_key IS NOT NULL;

-- ----------------------------------------------------------------
-- Conversations and direct messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS conversations (
    id            TEXT PRIMARY KEY NOT NULL,
    member_one_id TEXT NOT NULL,              -- lower id of the pair
    member_two_id TEXT NOT NULL,              -- higher id of the pair
    created_at    TEXT NOT NULL,

    UNIQUE (member_one_id, member_two_id)
);

CREATE INDEX IF NOT EXISTS idx_conversations_two ON conversations(member_two_id);

CREATE TABLE IF NOT EXISTS direct_messages (
    id              TEXT PRIMARY KEY NOT NULL,
    conversation_id TEXT NOT NULL,
    author_id       TEXT NOT NULL,
    content         TEXT,
    attachment_url  TEXT,
    attachment_mime TEXT,
    client_key      TEXT,
    edited          INTEGER NOT NULL DEFAULT 0,
    deleted_at      TEXT,
    created_at      TEXT NOT NULL,

    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_direct_messages_conversation_ts
    ON direct_messages(conversation_id, created_at DESC);

CREATE UNIQUE INDEX IF NOT EXISTS idx_direct_messages_client_key
    ON direct_messages(author_id, client_key) WHERE client_key IS NOT NULL;

-- ----------------------------------------------------------------
-- Friend requests and friendships
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS friend_requests (
    id          TEXT PRIMARY KEY NOT NULL,
    sender_id   TEXT NOT NULL,
    receiver_id TEXT NOT NULL,
    pair_low    TEXT NOT NULL,
    pair_high   TEXT NOT NULL,
    status      TEXT NOT NULL,                -- pending | accepted | rejected
    created_at  TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_friend_requests_pending_pair
    ON friend_requests(pair_low, pair_high) WHERE status = 'pending';

CREATE TABLE IF NOT EXISTS friendships (
    id             TEXT PRIMARY KEY NOT NULL,
    profile_one_id TEXT NOT NULL,
    profile_two_id TEXT NOT NULL,
    created_at     TEXT NOT NULL,

    UNIQUE (profile_one_id, profile_two_id)
);

CREATE INDEX IF NOT EXISTS idx_friendships_two ON friendships(profile_two_id);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
