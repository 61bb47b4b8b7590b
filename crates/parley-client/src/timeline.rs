//! Per-topic message timeline.
//!
//! Merges optimistic sends with confirmed events from the server. Every entry
//! is in exactly one state:
//!
//! - [`Entry::Confirmed`]: a durable message
//! - [`Entry::Pending`]: sent by this client, not yet confirmed
//! - [`Entry::Tombstoned`]: a durable message that was deleted
//!
//! Invariants: each durable id appears at most once; durable entries are in
//! non-decreasing creation order; pending entries are always at the tail.

use chrono::{DateTime, Utc};
use parley_shared::models::{Attachment, MessageScope, MessageWithAuthor, ProfileSnapshot};
use parley_shared::protocol::{BusEvent, EventKind, EventPayload, SendMessageRequest};
use parley_shared::MessageId;
use tracing::debug;
use uuid::Uuid;

/// A message sent from this client and still in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMessage {
    pub temp_id: Uuid,
    pub client_key: String,
    pub author: ProfileSnapshot,
    pub content: Option<String>,
    pub attachment: Option<Attachment>,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    Confirmed(MessageWithAuthor),
    Pending(PendingMessage),
    Tombstoned(MessageWithAuthor),
}

impl Entry {
    pub fn durable_id(&self) -> Option<MessageId> {
        match self {
            Entry::Confirmed(m) | Entry::Tombstoned(m) => Some(m.message.id),
            Entry::Pending(_) => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Entry::Pending(_))
    }

    fn created_at(&self) -> DateTime<Utc> {
        match self {
            Entry::Confirmed(m) | Entry::Tombstoned(m) => m.message.created_at,
            Entry::Pending(p) => p.started_at,
        }
    }
}

/// Handle for an optimistic send: the request to submit and the id of the
/// pending entry it created.
#[derive(Debug, Clone)]
pub struct SendTicket {
    pub temp_id: Uuid,
    pub request: SendMessageRequest,
}

#[derive(Debug, Clone)]
pub struct Timeline {
    scope: MessageScope,
    entries: Vec<Entry>,
    stale: bool,
}

impl Timeline {
    pub fn new(scope: MessageScope) -> Self {
        Self {
            scope,
            entries: Vec::new(),
            stale: false,
        }
    }

    pub fn scope(&self) -> MessageScope {
        self.scope
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Set after the event stream reported dropped events. The owner should
    /// re-fetch history and call [`load_history`](Self::load_history).
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn mark_stale(&mut self) {
        self.stale = true;
    }

    /// Append a pending entry and build the request that confirms it.
    pub fn begin_send(
        &mut self,
        author: ProfileSnapshot,
        content: Option<String>,
        attachment: Option<Attachment>,
    ) -> SendTicket {
        let pending = PendingMessage {
            temp_id: Uuid::new_v4(),
            client_key: Uuid::new_v4().to_string(),
            author,
            content,
            attachment,
            started_at: Utc::now(),
        };

        let (channel_id, conversation_id) = match self.scope {
            MessageScope::Channel(id) => (Some(id), None),
            MessageScope::Conversation(id) => (None, Some(id)),
        };
        let request = SendMessageRequest {
            channel_id,
            conversation_id,
            content: pending.content.clone(),
            attachment_url: pending.attachment.as_ref().map(|a| a.url.clone()),
            attachment_mime: pending.attachment.as_ref().map(|a| a.mime.clone()),
            client_key: Some(pending.client_key.clone()),
        };

        let ticket = SendTicket {
            temp_id: pending.temp_id,
            request,
        };
        self.entries.push(Entry::Pending(pending));
        ticket
    }

    /// Drop a pending entry whose send failed. Returns whether it was found.
    pub fn fail_send(&mut self, temp_id: Uuid) -> bool {
        let before = self.entries.len();
        self.entries
            .retain(|e| !matches!(e, Entry::Pending(p) if p.temp_id == temp_id));
        self.entries.len() != before
    }

    /// Merge a confirmed message, from either the send response or the insert
    /// event. Whichever arrives second is a no-op.
    pub fn confirm(&mut self, message: MessageWithAuthor) -> bool {
        if message.message.scope != self.scope {
            return false;
        }
        if self.position_of(message.message.id).is_some() {
            return false;
        }

        if let Some(key) = message.message.client_key.as_deref() {
            self.entries
                .retain(|e| !matches!(e, Entry::Pending(p) if p.client_key == key));
        }
        self.insert_durable(durable_entry(message));
        true
    }

    /// Apply one bus event addressed to this timeline's topic.
    pub fn apply(&mut self, event: &BusEvent) -> bool {
        if event.topic != self.scope.topic() {
            return false;
        }
        let EventPayload::Message(message) = &event.payload else {
            return false;
        };

        match event.kind {
            EventKind::Insert => self.confirm(message.clone()),
            EventKind::Update => self.update(message.clone()),
            EventKind::Delete => self.tombstone(message.clone()),
        }
    }

    /// Merge a fetched history page. Ids already present are refreshed in
    /// place; new ones are inserted in creation order.
    pub fn load_history(&mut self, page: Vec<MessageWithAuthor>) {
        for message in page {
            if message.message.scope != self.scope {
                continue;
            }
            match self.position_of(message.message.id) {
                Some(idx) => {
                    self.entries[idx] = durable_entry(message);
                }
                None => {
                    self.confirm(message);
                }
            }
        }
        self.stale = false;
    }

    /// Edits touch confirmed entries only; tombstones and pending entries
    /// are left alone.
    fn update(&mut self, message: MessageWithAuthor) -> bool {
        match self.position_of(message.message.id) {
            Some(idx) if matches!(self.entries[idx], Entry::Confirmed(_)) => {
                self.entries[idx] = durable_entry(message);
                true
            }
            Some(_) => false,
            None => {
                debug!(message = %message.message.id, "update for unknown message");
                false
            }
        }
    }

    fn tombstone(&mut self, message: MessageWithAuthor) -> bool {
        match self.position_of(message.message.id) {
            Some(idx) => {
                self.entries[idx] = Entry::Tombstoned(message);
                true
            }
            None => false,
        }
    }

    fn position_of(&self, id: MessageId) -> Option<usize> {
        self.entries.iter().position(|e| e.durable_id() == Some(id))
    }

    /// Index of the first pending entry (the end of the durable prefix).
    fn pending_start(&self) -> usize {
        self.entries
            .iter()
            .position(Entry::is_pending)
            .unwrap_or(self.entries.len())
    }

    fn insert_durable(&mut self, entry: Entry) {
        let end = self.pending_start();
        let at = entry.created_at();
        let idx = self.entries[..end].partition_point(|e| e.created_at() <= at);
        self.entries.insert(idx, entry);
    }
}

fn durable_entry(message: MessageWithAuthor) -> Entry {
    if message.message.is_deleted() {
        Entry::Tombstoned(message)
    } else {
        Entry::Confirmed(message)
    }
}
