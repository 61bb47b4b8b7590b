use chrono::{DateTime, Utc};
use parley_shared::models::{Profile, ProfileSync};
use parley_shared::ProfileId;
use rusqlite::{params, OptionalExtension};

use crate::database::Database;
use crate::error::Result;
use crate::rows::{enum_col, fmt_ts, id_col, ts_col};

const PROFILE_COLUMNS: &str =
    "id, external_id, username, display_name, email, avatar_url, status, created_at, updated_at";

impl Database {
    /// Insert or refresh the profile keyed on its identity-provider subject.
    ///
    /// A new profile gets a fresh id and `offline` status unless the sync
    /// says otherwise; an existing one keeps its id and, when the sync
    /// carries no status, its current status.
    pub fn upsert_profile(&self, sync: &ProfileSync, now: DateTime<Utc>) -> Result<Profile> {
        let now = fmt_ts(&now);
        self.conn().execute(
            "INSERT INTO profiles
                 (id, external_id, username, display_name, email, avatar_url, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, COALESCE(?7, 'offline'), ?8, ?8)
             ON CONFLICT(external_id) DO UPDATE SET
                 username     = excluded.username,
                 display_name = excluded.display_name,
                 email        = excluded.email,
                 avatar_url   = excluded.avatar_url,
                 status       = COALESCE(?7, profiles.status),
                 updated_at   = excluded.updated_at",
            params![
                ProfileId::new().to_string(),
                sync.external_id,
                sync.username,
                sync.display_name,
                sync.email,
                sync.avatar_url,
                sync.status.map(|s| s.as_str()),
                now,
            ],
        )?;
        self.get_profile_by_external_id(&sync.external_id)
    }

    pub fn get_profile(&self, id: ProfileId) -> Result<Profile> {
        Ok(self.conn().query_row(
            &format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE id = ?1"),
            params![id.to_string()],
            row_to_profile,
        )?)
    }

    pub fn get_profile_by_external_id(&self, external_id: &str) -> Result<Profile> {
        Ok(self.conn().query_row(
            &format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE external_id = ?1"),
            params![external_id],
            row_to_profile,
        )?)
    }

    /// Look a profile up by exact username, falling back to email.
    pub fn find_profile_by_handle(&self, handle: &str) -> Result<Option<Profile>> {
        Ok(self
            .conn()
            .query_row(
                &format!(
                    "SELECT {PROFILE_COLUMNS} FROM profiles
                     WHERE username = ?1 OR email = ?1
                     ORDER BY CASE WHEN username = ?1 THEN 0 ELSE 1 END
                     LIMIT 1"
                ),
                params![handle],
                row_to_profile,
            )
            .optional()?)
    }

    /// Remove a profile. Rows it authored keep its id.
    pub fn delete_profile_by_external_id(&self, external_id: &str) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM profiles WHERE external_id = ?1",
            params![external_id],
        )?;
        Ok(affected > 0)
    }
}

fn row_to_profile(row: &rusqlite::Row<'_>) -> rusqlite::Result<Profile> {
    Ok(Profile {
        id: id_col(row, 0)?,
        external_id: row.get(1)?,
        username: row.get(2)?,
        display_name: row.get(3)?,
        email: row.get(4)?,
        avatar_url: row.get(5)?,
        status: enum_col(row, 6)?,
        created_at: ts_col(row, 7)?,
        updated_at: ts_col(row, 8)?,
    })
}
