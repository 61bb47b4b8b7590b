use parley_shared::models::Channel;
use parley_shared::{ChannelId, ServerId};
use rusqlite::params;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::rows::{enum_col, fmt_ts, id_col, opt_id_col, ts_col};

const CHANNEL_COLUMNS: &str = "id, server_id, category_id, name, kind, position, created_at";

impl Database {
    pub fn insert_channel(&self, channel: &Channel) -> Result<()> {
        self.conn().execute(
            "INSERT INTO channels (id, server_id, category_id, name, kind, position, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                channel.id.to_string(),
                channel.server_id.to_string(),
                channel.category_id.map(|c| c.to_string()),
                channel.name,
                channel.kind.as_str(),
                channel.position,
                fmt_ts(&channel.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_channel(&self, id: ChannelId) -> Result<Channel> {
        Ok(self.conn().query_row(
            &format!("SELECT {CHANNEL_COLUMNS} FROM channels WHERE id = ?1"),
            params![id.to_string()],
            row_to_channel,
        )?)
    }

    pub fn list_channels(&self, server_id: ServerId) -> Result<Vec<Channel>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {CHANNEL_COLUMNS} FROM channels
             WHERE server_id = ?1
             ORDER BY position ASC, created_at ASC"
        ))?;
        let rows = stmt.query_map(params![server_id.to_string()], row_to_channel)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Position a newly created channel takes: one past the current maximum.
    pub fn next_channel_position(&self, server_id: ServerId) -> Result<i64> {
        Ok(self.conn().query_row(
            "SELECT COALESCE(MAX(position) + 1, 0) FROM channels WHERE server_id = ?1",
            params![server_id.to_string()],
            |row| row.get(0),
        )?)
    }

    /// Overwrite name and kind.
    pub fn update_channel(&self, channel: &Channel) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE channels SET name = ?2, kind = ?3 WHERE id = ?1",
            params![channel.id.to_string(), channel.name, channel.kind.as_str()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    // ON DELETE CASCADE: channel messages go with it
    pub fn delete_channel(&self, id: ChannelId) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM channels WHERE id = ?1", params![id.to_string()])?;
        Ok(affected > 0)
    }
}

fn row_to_channel(row: &rusqlite::Row<'_>) -> rusqlite::Result<Channel> {
    Ok(Channel {
        id: id_col(row, 0)?,
        server_id: id_col(row, 1)?,
        category_id: opt_id_col(row, 2)?,
        name: row.get(3)?,
        kind: enum_col(row, 4)?,
        position: row.get(5)?,
        created_at: ts_col(row, 6)?,
    })
}
