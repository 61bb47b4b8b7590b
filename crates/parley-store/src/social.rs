//! Conversations, friend requests and friendships.
//!
//! All three are keyed on an unordered profile pair. Pairs are normalized with
//! [`ordered_pair`] before they reach SQL, so a uniqueness constraint on
//! `(low, high)` rejects duplicates in both directions.

use parley_shared::models::{Conversation, FriendRequest, FriendRequestStatus, Friendship};
use parley_shared::{ordered_pair, ConversationId, FriendRequestId, ProfileId};
use rusqlite::{params, OptionalExtension};

use crate::database::Database;
use crate::error::Result;
use crate::rows::{enum_col, fmt_ts, id_col, ts_col};

impl Database {
    // -----------------------------------------------------------------------
    // Conversations
    // -----------------------------------------------------------------------

    /// Insert a conversation. Its members are stored low id first.
    pub fn insert_conversation(&self, conversation: &Conversation) -> Result<Conversation> {
        let (low, high) = ordered_pair(conversation.member_one_id, conversation.member_two_id);
        self.conn().execute(
            "INSERT INTO conversations (id, member_one_id, member_two_id, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                conversation.id.to_string(),
                low.to_string(),
                high.to_string(),
                fmt_ts(&conversation.created_at),
            ],
        )?;
        Ok(Conversation {
            member_one_id: low,
            member_two_id: high,
            ..conversation.clone()
        })
    }

    pub fn get_conversation(&self, id: ConversationId) -> Result<Conversation> {
        Ok(self.conn().query_row(
            "SELECT id, member_one_id, member_two_id, created_at FROM conversations WHERE id = ?1",
            params![id.to_string()],
            row_to_conversation,
        )?)
    }

    pub fn find_conversation(&self, a: ProfileId, b: ProfileId) -> Result<Option<Conversation>> {
        let (low, high) = ordered_pair(a, b);
        Ok(self
            .conn()
            .query_row(
                "SELECT id, member_one_id, member_two_id, created_at FROM conversations
                 WHERE member_one_id = ?1 AND member_two_id = ?2",
                params![low.to_string(), high.to_string()],
                row_to_conversation,
            )
            .optional()?)
    }

    pub fn list_conversations(&self, profile: ProfileId) -> Result<Vec<Conversation>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, member_one_id, member_two_id, created_at FROM conversations
             WHERE member_one_id = ?1 OR member_two_id = ?1
             ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map(params![profile.to_string()], row_to_conversation)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // -----------------------------------------------------------------------
    // Friend requests
    // -----------------------------------------------------------------------

    pub fn insert_friend_request(&self, request: &FriendRequest) -> Result<()> {
        let (low, high) = ordered_pair(request.sender_id, request.receiver_id);
        self.conn().execute(
            "INSERT INTO friend_requests
                 (id, sender_id, receiver_id, pair_low, pair_high, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                request.id.to_string(),
                request.sender_id.to_string(),
                request.receiver_id.to_string(),
                low.to_string(),
                high.to_string(),
                request.status.as_str(),
                fmt_ts(&request.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_friend_request(&self, id: FriendRequestId) -> Result<FriendRequest> {
        Ok(self.conn().query_row(
            "SELECT id, sender_id, receiver_id, status, created_at FROM friend_requests
             WHERE id = ?1",
            params![id.to_string()],
            row_to_friend_request,
        )?)
    }

    /// The pending request connecting the pair, in either direction.
    pub fn find_pending_request(&self, a: ProfileId, b: ProfileId) -> Result<Option<FriendRequest>> {
        let (low, high) = ordered_pair(a, b);
        Ok(self
            .conn()
            .query_row(
                "SELECT id, sender_id, receiver_id, status, created_at FROM friend_requests
                 WHERE pair_low = ?1 AND pair_high = ?2 AND status = 'pending'",
                params![low.to_string(), high.to_string()],
                row_to_friend_request,
            )
            .optional()?)
    }

    /// Move a pending request to `status`. Returns `false` when the request
    /// was no longer pending (someone else resolved it first).
    pub fn resolve_friend_request(&self, id: FriendRequestId, status: FriendRequestStatus) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE friend_requests SET status = ?2 WHERE id = ?1 AND status = 'pending'",
            params![id.to_string(), status.as_str()],
        )?;
        Ok(affected > 0)
    }

    /// Pending requests as `(incoming, outgoing)`, newest first.
    pub fn list_pending_requests(&self, profile: ProfileId) -> Result<(Vec<FriendRequest>, Vec<FriendRequest>)> {
        let mut stmt = self.conn().prepare(
            "SELECT id, sender_id, receiver_id, status, created_at FROM friend_requests
             WHERE (sender_id = ?1 OR receiver_id = ?1) AND status = 'pending'
             ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map(params![profile.to_string()], row_to_friend_request)?;
        let all = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(all.into_iter().partition(|r| r.receiver_id == profile))
    }

    // -----------------------------------------------------------------------
    // Friendships
    // -----------------------------------------------------------------------

    pub fn insert_friendship(&self, friendship: &Friendship) -> Result<Friendship> {
        let (low, high) = ordered_pair(friendship.profile_one_id, friendship.profile_two_id);
        self.conn().execute(
            "INSERT INTO friendships (id, profile_one_id, profile_two_id, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                friendship.id.to_string(),
                low.to_string(),
                high.to_string(),
                fmt_ts(&friendship.created_at),
            ],
        )?;
        Ok(Friendship {
            profile_one_id: low,
            profile_two_id: high,
            ..friendship.clone()
        })
    }

    pub fn find_friendship(&self, a: ProfileId, b: ProfileId) -> Result<Option<Friendship>> {
        let (low, high) = ordered_pair(a, b);
        Ok(self
            .conn()
            .query_row(
                "SELECT id, profile_one_id, profile_two_id, created_at FROM friendships
                 WHERE profile_one_id = ?1 AND profile_two_id = ?2",
                params![low.to_string(), high.to_string()],
                row_to_friendship,
            )
            .optional()?)
    }

    pub fn list_friendships(&self, profile: ProfileId) -> Result<Vec<Friendship>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, profile_one_id, profile_two_id, created_at FROM friendships
             WHERE profile_one_id = ?1 OR profile_two_id = ?1
             ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map(params![profile.to_string()], row_to_friendship)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: id_col(row, 0)?,
        member_one_id: id_col(row, 1)?,
        member_two_id: id_col(row, 2)?,
        created_at: ts_col(row, 3)?,
    })
}

fn row_to_friend_request(row: &rusqlite::Row<'_>) -> rusqlite::Result<FriendRequest> {
    Ok(FriendRequest {
        id: id_col(row, 0)?,
        sender_id: id_col(row, 1)?,
        receiver_id: id_col(row, 2)?,
        status: enum_col(row, 3)?,
        created_at: ts_col(row, 4)?,
    })
}

fn row_to_friendship(row: &rusqlite::Row<'_>) -> rusqlite::Result<Friendship> {
    Ok(Friendship {
        id: id_col(row, 0)?,
        profile_one_id: id_col(row, 1)?,
        profile_two_id: id_col(row, 2)?,
        created_at: ts_col(row, 3)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use chrono::Utc;
    use parley_shared::FriendshipId;

    fn request(sender: ProfileId, receiver: ProfileId) -> FriendRequest {
        FriendRequest {
            id: FriendRequestId::new(),
            sender_id: sender,
            receiver_id: receiver,
            status: FriendRequestStatus::Pending,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn one_pending_request_per_pair() {
        let db = Database::open_in_memory().unwrap();
        let a = ProfileId::new();
        let b = ProfileId::new();
        db.insert_friend_request(&request(a, b)).unwrap();

        // Reverse direction collides on the normalized pair.
        let err = db.insert_friend_request(&request(b, a)).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert!(db.find_pending_request(b, a).unwrap().is_some());
    }

    #[test]
    fn resolve_is_compare_and_set() {
        let db = Database::open_in_memory().unwrap();
        let a = ProfileId::new();
        let b = ProfileId::new();
        let req = request(a, b);
        db.insert_friend_request(&req).unwrap();

        assert!(db.resolve_friend_request(req.id, FriendRequestStatus::Accepted).unwrap());
        assert!(!db.resolve_friend_request(req.id, FriendRequestStatus::Rejected).unwrap());
        assert_eq!(
            db.get_friend_request(req.id).unwrap().status,
            FriendRequestStatus::Accepted
        );

        // Once resolved, a new pending request for the pair is allowed.
        db.insert_friend_request(&request(b, a)).unwrap();
    }

    #[test]
    fn pending_lists_split_by_direction() {
        let db = Database::open_in_memory().unwrap();
        let me = ProfileId::new();
        db.insert_friend_request(&request(ProfileId::new(), me)).unwrap();
        db.insert_friend_request(&request(me, ProfileId::new())).unwrap();
        db.insert_friend_request(&request(me, ProfileId::new())).unwrap();

        let (incoming, outgoing) = db.list_pending_requests(me).unwrap();
        assert_eq!(incoming.len(), 1);
        assert_eq!(outgoing.len(), 2);
    }

    #[test]
    fn friendship_and_conversation_unique_per_pair() {
        let db = Database::open_in_memory().unwrap();
        let a = ProfileId::new();
        let b = ProfileId::new();

        db.insert_friendship(&Friendship {
            id: FriendshipId::new(),
            profile_one_id: b,
            profile_two_id: a,
            created_at: Utc::now(),
        })
        .unwrap();
        let dup = db.insert_friendship(&Friendship {
            id: FriendshipId::new(),
            profile_one_id: a,
            profile_two_id: b,
            created_at: Utc::now(),
        });
        assert!(matches!(dup, Err(StoreError::Conflict(_))));
        assert!(db.find_friendship(a, b).unwrap().is_some());
        assert_eq!(db.list_friendships(a).unwrap().len(), 1);

        let conv = db
            .insert_conversation(&Conversation {
                id: ConversationId::new(),
                member_one_id: a,
                member_two_id: b,
                created_at: Utc::now(),
            })
            .unwrap();
        assert_eq!((conv.member_one_id, conv.member_two_id), ordered_pair(a, b));
        let dup = db.insert_conversation(&Conversation {
            id: ConversationId::new(),
            member_one_id: b,
            member_two_id: a,
            created_at: Utc::now(),
        });
        assert!(matches!(dup, Err(StoreError::Conflict(_))));
        assert_eq!(db.find_conversation(b, a).unwrap().unwrap().id, conv.id);
        assert_eq!(db.list_conversations(b).unwrap().len(), 1);
    }
}
