//! Async row store interface.
//!
//! [`RowStore`] is the narrow seam the gateway talks to. [`SqliteStore`] is
//! the production implementation: one [`Database`] behind a mutex, every
//! call shipped to the blocking thread pool.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parley_shared::models::*;
use parley_shared::*;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::messages::{MessagePage, MessageTable};

#[async_trait]
pub trait RowStore: Send + Sync {
    // Profiles
    async fn upsert_profile(&self, sync: ProfileSync) -> Result<Profile>;
    async fn get_profile(&self, id: ProfileId) -> Result<Profile>;
    async fn get_profile_by_external_id(&self, external_id: String) -> Result<Profile>;
    async fn find_profile_by_handle(&self, handle: String) -> Result<Option<Profile>>;
    async fn delete_profile_by_external_id(&self, external_id: String) -> Result<bool>;

    // Servers, roles, categories, memberships
    async fn insert_server(&self, server: Server) -> Result<()>;
    async fn get_server(&self, id: ServerId) -> Result<Server>;
    async fn list_servers_for_profile(&self, profile: ProfileId) -> Result<Vec<Server>>;
    async fn update_server(&self, server: Server) -> Result<()>;
    async fn delete_server(&self, id: ServerId) -> Result<bool>;
    async fn insert_role(&self, role: Role) -> Result<()>;
    async fn get_default_role(&self, server: ServerId) -> Result<Role>;
    async fn list_roles(&self, server: ServerId) -> Result<Vec<Role>>;
    async fn insert_category(&self, category: Category) -> Result<()>;
    async fn list_categories(&self, server: ServerId) -> Result<Vec<Category>>;
    async fn insert_membership(&self, membership: Membership) -> Result<()>;
    async fn find_membership(&self, profile: ProfileId, server: ServerId) -> Result<Option<Membership>>;
    async fn delete_membership(&self, profile: ProfileId, server: ServerId) -> Result<bool>;
    async fn list_members(&self, server: ServerId) -> Result<Vec<Member>>;

    // Channels
    async fn insert_channel(&self, channel: Channel) -> Result<()>;
    async fn get_channel(&self, id: ChannelId) -> Result<Channel>;
    async fn list_channels(&self, server: ServerId) -> Result<Vec<Channel>>;
    async fn next_channel_position(&self, server: ServerId) -> Result<i64>;
    async fn update_channel(&self, channel: Channel) -> Result<()>;
    async fn delete_channel(&self, id: ChannelId) -> Result<bool>;

    // Messages
    async fn insert_message(&self, message: Message) -> Result<()>;
    async fn get_message(&self, id: MessageId) -> Result<Message>;
    async fn find_message_by_client_key(
        &self,
        table: MessageTable,
        author: ProfileId,
        client_key: String,
    ) -> Result<Option<Message>>;
    async fn edit_message(&self, id: MessageId, content: String) -> Result<Message>;
    async fn soft_delete_message(&self, id: MessageId, at: DateTime<Utc>) -> Result<Message>;
    async fn list_messages(&self, scope: MessageScope, page: MessagePage) -> Result<Vec<MessageWithAuthor>>;

    // Conversations and the social graph
    async fn insert_conversation(&self, conversation: Conversation) -> Result<Conversation>;
    async fn get_conversation(&self, id: ConversationId) -> Result<Conversation>;
    async fn find_conversation(&self, a: ProfileId, b: ProfileId) -> Result<Option<Conversation>>;
    async fn list_conversations(&self, profile: ProfileId) -> Result<Vec<Conversation>>;
    async fn insert_friend_request(&self, request: FriendRequest) -> Result<()>;
    async fn get_friend_request(&self, id: FriendRequestId) -> Result<FriendRequest>;
    async fn find_pending_request(&self, a: ProfileId, b: ProfileId) -> Result<Option<FriendRequest>>;
    async fn resolve_friend_request(&self, id: FriendRequestId, status: FriendRequestStatus) -> Result<bool>;
    async fn list_pending_requests(
        &self,
        profile: ProfileId,
    ) -> Result<(Vec<FriendRequest>, Vec<FriendRequest>)>;
    async fn insert_friendship(&self, friendship: Friendship) -> Result<Friendship>;
    async fn find_friendship(&self, a: ProfileId, b: ProfileId) -> Result<Option<Friendship>>;
    async fn list_friendships(&self, profile: ProfileId) -> Result<Vec<Friendship>>;
}

/// SQLite-backed [`RowStore`].
#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Mutex<Database>>,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    pub fn open_at(path: &Path) -> Result<Self> {
        Database::open_at(path).map(Self::new)
    }

    pub fn open_in_memory() -> Result<Self> {
        Database::open_in_memory().map(Self::new)
    }

    /// Run `f` against the connection on the blocking pool.
    async fn call<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let guard = db
                .lock()
                .map_err(|_| StoreError::Task("database mutex poisoned".into()))?;
            f(&guard)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

#[async_trait]
impl RowStore for SqliteStore {
    async fn upsert_profile(&self, sync: ProfileSync) -> Result<Profile> {
        self.call(move |db| db.upsert_profile(&sync, Utc::now())).await
    }

    async fn get_profile(&self, id: ProfileId) -> Result<Profile> {
        self.call(move |db| db.get_profile(id)).await
    }

    async fn get_profile_by_external_id(&self, external_id: String) -> Result<Profile> {
        self.call(move |db| db.get_profile_by_external_id(&external_id)).await
    }

    async fn find_profile_by_handle(&self, handle: String) -> Result<Option<Profile>> {
        self.call(move |db| db.find_profile_by_handle(&handle)).await
    }

    async fn delete_profile_by_external_id(&self, external_id: String) -> Result<bool> {
        self.call(move |db| db.delete_profile_by_external_id(&external_id)).await
    }

    async fn insert_server(&self, server: Server) -> Result<()> {
        self.call(move |db| db.insert_server(&server)).await
    }

    async fn get_server(&self, id: ServerId) -> Result<Server> {
        self.call(move |db| db.get_server(id)).await
    }

    async fn list_servers_for_profile(&self, profile: ProfileId) -> Result<Vec<Server>> {
        self.call(move |db| db.list_servers_for_profile(profile)).await
    }

    async fn update_server(&self, server: Server) -> Result<()> {
        self.call(move |db| db.update_server(&server)).await
    }

    async fn delete_server(&self, id: ServerId) -> Result<bool> {
        self.call(move |db| db.delete_server(id)).await
    }

    async fn insert_role(&self, role: Role) -> Result<()> {
        self.call(move |db| db.insert_role(&role)).await
    }

    async fn get_default_role(&self, server: ServerId) -> Result<Role> {
        self.call(move |db| db.get_default_role(server)).await
    }

    async fn list_roles(&self, server: ServerId) -> Result<Vec<Role>> {
        self.call(move |db| db.list_roles(server)).await
    }

    async fn insert_category(&self, category: Category) -> Result<()> {
        self.call(move |db| db.insert_category(&category)).await
    }

    async fn list_categories(&self, server: ServerId) -> Result<Vec<Category>> {
        self.call(move |db| db.list_categories(server)).await
    }

    async fn insert_membership(&self, membership: Membership) -> Result<()> {
        self.call(move |db| db.insert_membership(&membership)).await
    }

    async fn find_membership(&self, profile: ProfileId, server: ServerId) -> Result<Option<Membership>> {
        self.call(move |db| db.find_membership(profile, server)).await
    }

    async fn delete_membership(&self, profile: ProfileId, server: ServerId) -> Result<bool> {
        self.call(move |db| db.delete_membership(profile, server)).await
    }

    async fn list_members(&self, server: ServerId) -> Result<Vec<Member>> {
        self.call(move |db| db.list_members(server)).await
    }

    async fn insert_channel(&self, channel: Channel) -> Result<()> {
        self.call(move |db| db.insert_channel(&channel)).await
    }

    async fn get_channel(&self, id: ChannelId) -> Result<Channel> {
        self.call(move |db| db.get_channel(id)).await
    }

    async fn list_channels(&self, server: ServerId) -> Result<Vec<Channel>> {
        self.call(move |db| db.list_channels(server)).await
    }

    async fn next_channel_position(&self, server: ServerId) -> Result<i64> {
        self.call(move |db| db.next_channel_position(server)).await
    }

    async fn update_channel(&self, channel: Channel) -> Result<()> {
        self.call(move |db| db.update_channel(&channel)).await
    }

    async fn delete_channel(&self, id: ChannelId) -> Result<bool> {
        self.call(move |db| db.delete_channel(id)).await
    }

    async fn insert_message(&self, message: Message) -> Result<()> {
        self.call(move |db| db.insert_message(&message)).await
    }

    async fn get_message(&self, id: MessageId) -> Result<Message> {
        self.call(move |db| db.get_message(id)).await
    }

    async fn find_message_by_client_key(
        &self,
        table: MessageTable,
        author: ProfileId,
        client_key: String,
    ) -> Result<Option<Message>> {
        self.call(move |db| db.find_message_by_client_key(table, author, &client_key))
            .await
    }

    async fn edit_message(&self, id: MessageId, content: String) -> Result<Message> {
        self.call(move |db| db.edit_message(id, &content)).await
    }

    async fn soft_delete_message(&self, id: MessageId, at: DateTime<Utc>) -> Result<Message> {
        self.call(move |db| db.soft_delete_message(id, at)).await
    }

    async fn list_messages(&self, scope: MessageScope, page: MessagePage) -> Result<Vec<MessageWithAuthor>> {
        self.call(move |db| db.list_messages(&scope, &page)).await
    }

    async fn insert_conversation(&self, conversation: Conversation) -> Result<Conversation> {
        self.call(move |db| db.insert_conversation(&conversation)).await
    }

    async fn get_conversation(&self, id: ConversationId) -> Result<Conversation> {
        self.call(move |db| db.get_conversation(id)).await
    }

    async fn find_conversation(&self, a: ProfileId, b: ProfileId) -> Result<Option<Conversation>> {
        self.call(move |db| db.find_conversation(a, b)).await
    }

    async fn list_conversations(&self, profile: ProfileId) -> Result<Vec<Conversation>> {
        self.call(move |db| db.list_conversations(profile)).await
    }

    async fn insert_friend_request(&self, request: FriendRequest) -> Result<()> {
        self.call(move |db| db.insert_friend_request(&request)).await
    }

    async fn get_friend_request(&self, id: FriendRequestId) -> Result<FriendRequest> {
        self.call(move |db| db.get_friend_request(id)).await
    }

    async fn find_pending_request(&self, a: ProfileId, b: ProfileId) -> Result<Option<FriendRequest>> {
        self.call(move |db| db.find_pending_request(a, b)).await
    }

    async fn resolve_friend_request(&self, id: FriendRequestId, status: FriendRequestStatus) -> Result<bool> {
        self.call(move |db| db.resolve_friend_request(id, status)).await
    }

    async fn list_pending_requests(
        &self,
        profile: ProfileId,
    ) -> Result<(Vec<FriendRequest>, Vec<FriendRequest>)> {
        self.call(move |db| db.list_pending_requests(profile)).await
    }

    async fn insert_friendship(&self, friendship: Friendship) -> Result<Friendship> {
        self.call(move |db| db.insert_friendship(&friendship)).await
    }

    async fn find_friendship(&self, a: ProfileId, b: ProfileId) -> Result<Option<Friendship>> {
        self.call(move |db| db.find_friendship(a, b)).await
    }

    async fn list_friendships(&self, profile: ProfileId) -> Result<Vec<Friendship>> {
        self.call(move |db| db.list_friendships(profile)).await
    }
}
