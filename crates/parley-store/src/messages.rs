//! Channel messages and direct messages.
//!
//! The two live in separate tables (`messages`, `direct_messages`) with the
//! same shape and lifecycle. [`MessageScope`] picks the table.

use chrono::{DateTime, Utc};
use parley_shared::models::{Attachment, Message, MessageScope, MessageWithAuthor};
use parley_shared::{MessageId, ProfileId};
use rusqlite::{params, OptionalExtension};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::rows::{fmt_ts, id_col, opt_ts_col, snapshot_cols, ts_col};

/// Which table a query runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageTable {
    Channel,
    Direct,
}

impl MessageTable {
    const ALL: [MessageTable; 2] = [MessageTable::Channel, MessageTable::Direct];

    fn name(self) -> &'static str {
        match self {
            MessageTable::Channel => "messages",
            MessageTable::Direct => "direct_messages",
        }
    }

    fn scope_column(self) -> &'static str {
        match self {
            MessageTable::Channel => "channel_id",
            MessageTable::Direct => "conversation_id",
        }
    }

    fn columns(self) -> String {
        format!(
            "id, {}, author_id, content, attachment_url, attachment_mime, client_key, \
             edited, deleted_at, created_at",
            self.scope_column()
        )
    }
}

impl From<&MessageScope> for MessageTable {
    fn from(scope: &MessageScope) -> Self {
        match scope {
            MessageScope::Channel(_) => MessageTable::Channel,
            MessageScope::Conversation(_) => MessageTable::Direct,
        }
    }
}

fn scope_id(scope: &MessageScope) -> String {
    match scope {
        MessageScope::Channel(id) => id.to_string(),
        MessageScope::Conversation(id) => id.to_string(),
    }
}

/// One page of history, newest boundary first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessagePage {
    /// Only messages created strictly before this instant.
    pub before: Option<DateTime<Utc>>,
    pub limit: u32,
    /// Include soft-deleted rows as tombstones.
    pub include_deleted: bool,
}

impl Database {
    pub fn insert_message(&self, message: &Message) -> Result<()> {
        let table = MessageTable::from(&message.scope);
        self.conn().execute(
            &format!(
                "INSERT INTO {} ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                table.name(),
                table.columns()
            ),
            params![
                message.id.to_string(),
                scope_id(&message.scope),
                message.author_id.to_string(),
                message.content,
                message.attachment.as_ref().map(|a| a.url.as_str()),
                message.attachment.as_ref().map(|a| a.mime.as_str()),
                message.client_key,
                message.edited,
                message.deleted_at.as_ref().map(fmt_ts),
                fmt_ts(&message.created_at),
            ],
        )?;
        Ok(())
    }

    /// Fetch a message from whichever table holds it.
    pub fn get_message(&self, id: MessageId) -> Result<Message> {
        for table in MessageTable::ALL {
            let found = self
                .conn()
                .query_row(
                    &format!("SELECT {} FROM {} WHERE id = ?1", table.columns(), table.name()),
                    params![id.to_string()],
                    |row| row_to_message(row, table),
                )
                .optional()?;
            if let Some(message) = found {
                return Ok(message);
            }
        }
        Err(StoreError::NotFound)
    }

    /// Look up an earlier send by its client idempotency key.
    pub fn find_message_by_client_key(
        &self,
        table: MessageTable,
        author: ProfileId,
        client_key: &str,
    ) -> Result<Option<Message>> {
        Ok(self
            .conn()
            .query_row(
                &format!(
                    "SELECT {} FROM {} WHERE author_id = ?1 AND client_key = ?2",
                    table.columns(),
                    table.name()
                ),
                params![author.to_string(), client_key],
                |row| row_to_message(row, table),
            )
            .optional()?)
    }

    /// Replace the content of a live message and flag it edited.
    ///
    /// A soft-deleted or missing message yields [`StoreError::NotFound`].
    pub fn edit_message(&self, id: MessageId, content: &str) -> Result<Message> {
        for table in MessageTable::ALL {
            let affected = self.conn().execute(
                &format!(
                    "UPDATE {} SET content = ?2, edited = 1
                     WHERE id = ?1 AND deleted_at IS NULL",
                    table.name()
                ),
                params![id.to_string(), content],
            )?;
            if affected > 0 {
                return self.get_message(id);
            }
        }
        Err(StoreError::NotFound)
    }

    /// Soft-delete: stamp `deleted_at` and keep the row, body included.
    ///
    /// Only the first delete wins; later ones see [`StoreError::NotFound`].
    pub fn soft_delete_message(&self, id: MessageId, at: DateTime<Utc>) -> Result<Message> {
        for table in MessageTable::ALL {
            let affected = self.conn().execute(
                &format!(
                    "UPDATE {} SET deleted_at = ?2 WHERE id = ?1 AND deleted_at IS NULL",
                    table.name()
                ),
                params![id.to_string(), fmt_ts(&at)],
            )?;
            if affected > 0 {
                return self.get_message(id);
            }
        }
        Err(StoreError::NotFound)
    }

    /// A page of history for one scope, returned oldest first.
    pub fn list_messages(&self, scope: &MessageScope, page: &MessagePage) -> Result<Vec<MessageWithAuthor>> {
        let table = MessageTable::from(scope);
        let columns = table
            .columns()
            .split(", ")
            .map(|c| format!("m.{}", c.trim()))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT {columns}, p.username, p.display_name, p.avatar_url
             FROM {table} m
             LEFT JOIN profiles p ON p.id = m.author_id
             WHERE m.{scope_col} = ?1
               AND (?2 IS NULL OR m.created_at < ?2)
               AND (?3 OR m.deleted_at IS NULL)
             ORDER BY m.created_at DESC, m.rowid DESC
             LIMIT ?4",
            table = table.name(),
            scope_col = table.scope_column(),
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(
            params![
                scope_id(scope),
                page.before.as_ref().map(fmt_ts),
                page.include_deleted,
                page.limit,
            ],
            |row| {
                let message = row_to_message(row, table)?;
                let author = snapshot_cols(row, message.author_id, 10)?;
                Ok(MessageWithAuthor { message, author })
            },
        )?;
        let mut page = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        page.reverse();
        Ok(page)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>, table: MessageTable) -> rusqlite::Result<Message> {
    let scope = match table {
        MessageTable::Channel => MessageScope::Channel(id_col(row, 1)?),
        MessageTable::Direct => MessageScope::Conversation(id_col(row, 1)?),
    };
    let url: Option<String> = row.get(4)?;
    let mime: Option<String> = row.get(5)?;
    let attachment = match (url, mime) {
        (Some(url), Some(mime)) => Some(Attachment { url, mime }),
        _ => None,
    };
    Ok(Message {
        id: id_col(row, 0)?,
        scope,
        author_id: id_col(row, 2)?,
        content: row.get(3)?,
        attachment,
        client_key: row.get(6)?,
        edited: row.get(7)?,
        deleted_at: opt_ts_col(row, 8)?,
        created_at: ts_col(row, 9)?,
    })
}
