//! Typed HTTP client for the gateway API.

use parley_shared::models::*;
use parley_shared::protocol::*;
use parley_shared::{ChannelId, ConversationId, ErrorBody, ErrorKind, FriendRequestId, MessageId, ServerId};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    config: ClientConfig,
}

impl ApiClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    // -- identity -----------------------------------------------------------

    /// Sync the caller's profile from the identity provider and return it.
    pub async fn me(&self) -> Result<Profile> {
        self.get("/me").await
    }

    // -- servers ------------------------------------------------------------

    pub async fn list_servers(&self) -> Result<Vec<Server>> {
        self.get("/servers").await
    }

    pub async fn create_server(&self, req: &CreateServerRequest) -> Result<ServerDetail> {
        self.send_json(Method::POST, "/servers", req).await
    }

    pub async fn server_detail(&self, id: ServerId) -> Result<ServerDetail> {
        self.get(&format!("/servers/{id}")).await
    }

    pub async fn update_server(&self, id: ServerId, req: &UpdateServerRequest) -> Result<Server> {
        self.send_json(Method::PATCH, &format!("/servers/{id}"), req).await
    }

    pub async fn delete_server(&self, id: ServerId) -> Result<()> {
        self.send_empty(Method::DELETE, &format!("/servers/{id}")).await
    }

    pub async fn join_server(&self, id: ServerId) -> Result<Server> {
        let resp = self.request(Method::POST, &format!("/servers/{id}/join")).send().await?;
        decode(resp).await
    }

    pub async fn leave_server(&self, id: ServerId) -> Result<()> {
        self.send_empty(Method::POST, &format!("/servers/{id}/leave")).await
    }

    // -- channels -----------------------------------------------------------

    pub async fn create_channel(&self, server: ServerId, req: &CreateChannelRequest) -> Result<Channel> {
        self.send_json(Method::POST, &format!("/servers/{server}/channels"), req)
            .await
    }

    pub async fn update_channel(&self, id: ChannelId, req: &UpdateChannelRequest) -> Result<Channel> {
        self.send_json(Method::PATCH, &format!("/channels/{id}"), req).await
    }

    pub async fn delete_channel(&self, id: ChannelId) -> Result<()> {
        self.send_empty(Method::DELETE, &format!("/channels/{id}")).await
    }

    // -- messages -----------------------------------------------------------

    pub async fn channel_history(&self, id: ChannelId, query: &HistoryQuery) -> Result<Vec<MessageWithAuthor>> {
        let resp = self
            .request(Method::GET, &format!("/channels/{id}/messages"))
            .query(&history_params(query))
            .send()
            .await?;
        decode(resp).await
    }

    pub async fn conversation_history(
        &self,
        id: ConversationId,
        query: &HistoryQuery,
    ) -> Result<Vec<MessageWithAuthor>> {
        let resp = self
            .request(Method::GET, &format!("/conversations/{id}/messages"))
            .query(&history_params(query))
            .send()
            .await?;
        decode(resp).await
    }

    /// History of either scope.
    pub async fn history(&self, scope: MessageScope, query: &HistoryQuery) -> Result<Vec<MessageWithAuthor>> {
        match scope {
            MessageScope::Channel(id) => self.channel_history(id, query).await,
            MessageScope::Conversation(id) => self.conversation_history(id, query).await,
        }
    }

    pub async fn send_message(&self, req: &SendMessageRequest) -> Result<MessageWithAuthor> {
        self.send_json(Method::POST, "/messages", req).await
    }

    pub async fn edit_message(&self, id: MessageId, content: impl Into<String>) -> Result<MessageWithAuthor> {
        let req = EditMessageRequest {
            content: content.into(),
        };
        self.send_json(Method::PATCH, &format!("/messages/{id}"), &req).await
    }

    pub async fn delete_message(&self, id: MessageId) -> Result<MessageWithAuthor> {
        let resp = self.request(Method::DELETE, &format!("/messages/{id}")).send().await?;
        decode(resp).await
    }

    // -- friends & conversations --------------------------------------------

    pub async fn list_conversations(&self) -> Result<Vec<ConversationView>> {
        self.get("/conversations").await
    }

    pub async fn list_friends(&self) -> Result<Vec<FriendView>> {
        self.get("/friends").await
    }

    pub async fn list_friend_requests(&self) -> Result<FriendRequestList> {
        self.get("/friends/requests").await
    }

    /// `target` is a username or an email address.
    pub async fn send_friend_request(&self, target: impl Into<String>) -> Result<FriendRequestView> {
        let req = CreateFriendRequest { target: target.into() };
        self.send_json(Method::POST, "/friends/requests", &req).await
    }

    pub async fn respond_friend_request(
        &self,
        id: FriendRequestId,
        action: FriendRequestAction,
    ) -> Result<FriendRequestView> {
        let req = RespondFriendRequest { action };
        self.send_json(Method::POST, &format!("/friends/requests/{id}/respond"), &req)
            .await
    }

    // -- media --------------------------------------------------------------

    pub async fn media_token(&self, room: &str, username: &str) -> Result<MediaTokenResponse> {
        let resp = self
            .request(Method::GET, "/media/token")
            .query(&[("room", room), ("username", username)])
            .send()
            .await?;
        decode(resp).await
    }

    // -- plumbing -----------------------------------------------------------

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        debug!(%method, path, "api request");
        self.http
            .request(method, self.config.http_url(path))
            .bearer_auth(&self.config.session_token)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let resp = self.request(Method::GET, path).send().await?;
        decode(resp).await
    }

    async fn send_json<B: Serialize, T: DeserializeOwned>(&self, method: Method, path: &str, body: &B) -> Result<T> {
        let resp = self.request(method, path).json(body).send().await?;
        decode(resp).await
    }

    async fn send_empty(&self, method: Method, path: &str) -> Result<()> {
        let resp = self.request(method, path).send().await?;
        let status = resp.status();
        let bytes = resp.bytes().await?;
        check_status(status, &bytes)
    }
}

async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
    let status = resp.status();
    let bytes = resp.bytes().await?;
    parse_body(status, &bytes)
}

fn check_status(status: StatusCode, bytes: &[u8]) -> Result<()> {
    if status.is_success() {
        Ok(())
    } else {
        Err(api_error(status, bytes))
    }
}

fn parse_body<T: DeserializeOwned>(status: StatusCode, bytes: &[u8]) -> Result<T> {
    check_status(status, bytes)?;
    Ok(serde_json::from_slice(bytes)?)
}

/// Error bodies that fail to parse (a proxy page, say) are classified from
/// the status code alone.
fn api_error(status: StatusCode, bytes: &[u8]) -> ClientError {
    let body = serde_json::from_slice::<ErrorBody>(bytes).unwrap_or_else(|_| {
        let reason = String::from_utf8_lossy(bytes).trim().to_string();
        ErrorBody::new(kind_for_status(status), reason)
    });
    ClientError::Api {
        status: status.as_u16(),
        body,
    }
}

fn kind_for_status(status: StatusCode) -> ErrorKind {
    match status {
        StatusCode::UNAUTHORIZED => ErrorKind::Unauthenticated,
        StatusCode::FORBIDDEN => ErrorKind::Forbidden,
        StatusCode::NOT_FOUND => ErrorKind::NotFound,
        StatusCode::CONFLICT => ErrorKind::Conflict,
        StatusCode::TOO_MANY_REQUESTS => ErrorKind::RateLimited,
        s if s.is_client_error() => ErrorKind::InvalidInput,
        _ => ErrorKind::Upstream,
    }
}

fn history_params(query: &HistoryQuery) -> Vec<(&'static str, String)> {
    let mut params = Vec::new();
    if let Some(before) = query.before {
        params.push(("before", before.to_rfc3339()));
    }
    if let Some(limit) = query.limit {
        params.push(("limit", limit.to_string()));
    }
    if query.include_deleted {
        params.push(("include_deleted", "true".to_string()));
    }
    params
}
