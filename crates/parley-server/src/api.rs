use std::sync::Arc;

use axum::{
    async_trait,
    body::Bytes,
    extract::{rejection::JsonRejection, FromRequest, Path, Query, Request, State},
    http::{HeaderMap, Method, StatusCode},
    middleware,
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};
use parley_shared::models::*;
use parley_shared::protocol::*;
use parley_shared::{ChannelId, ConversationId, FriendRequestId, MessageId, ServerId};
use parley_store::RowStore;
use serde::{de::DeserializeOwned, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::bus::{BusConfig, EventBus};
use crate::config::ServerConfig;
use crate::error::{GatewayError, Result};
use crate::gateway::Gateway;
use crate::identity::{bearer_token, Actor, IdentityAdapter};
use crate::media::MediaTokenIssuer;
use crate::rate_limit::{rate_limit_middleware, RateLimiter};
use crate::webhook::{self, WebhookVerifier};
use crate::ws;

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub identity: Arc<IdentityAdapter>,
    /// `None` when no webhook secret is configured.
    pub webhooks: Option<Arc<WebhookVerifier>>,
    pub rate_limiter: RateLimiter,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    /// Wire every subsystem from the configuration.
    pub fn new(config: ServerConfig, store: Arc<dyn RowStore>) -> Self {
        let bus = EventBus::new(BusConfig {
            subscriber_queue_capacity: config.subscriber_queue_capacity,
        });
        let media = MediaTokenIssuer::new(
            config.media_api_key.clone(),
            config.media_api_secret.clone(),
            config.media_token_ttl_secs,
        );
        if !media.is_configured() {
            tracing::warn!("media credentials not set, token requests will fail");
        }

        let identity = IdentityAdapter::new(
            config.session_secret.as_deref(),
            config.session_issuer.as_deref(),
            store.clone(),
        );

        let webhooks = config.webhook_secret.as_deref().and_then(|secret| {
            WebhookVerifier::new(secret)
                .inspect_err(|e| tracing::warn!(error = %e, "ignoring WEBHOOK_SECRET"))
                .ok()
                .map(Arc::new)
        });

        Self {
            gateway: Arc::new(Gateway::new(store, bus, media)),
            identity: Arc::new(identity),
            webhooks,
            rate_limiter: RateLimiter::new(config.rate_limit_per_sec, config.rate_limit_burst),
            config: Arc::new(config),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/me", get(me))
        .route("/servers", get(list_servers).post(create_server))
        .route(
            "/servers/:id",
            get(server_detail).patch(update_server).delete(delete_server),
        )
        .route("/servers/:id/join", post(join_server))
        .route("/servers/:id/leave", post(leave_server))
        .route("/servers/:id/channels", post(create_channel))
        .route("/channels/:id", patch(update_channel).delete(delete_channel))
        .route("/channels/:id/messages", get(channel_history))
        .route("/conversations", get(list_conversations))
        .route("/conversations/:id/messages", get(conversation_history))
        .route("/messages", post(send_message))
        .route("/messages/:id", patch(edit_message).delete(delete_message))
        .route("/friends", get(list_friends))
        .route(
            "/friends/requests",
            get(list_friend_requests).post(send_friend_request),
        )
        .route("/friends/requests/:id/respond", post(respond_friend_request))
        .route("/media/token", get(media_token))
        .route("/webhooks/identity", post(identity_webhook))
        .route("/ws", get(ws::handle_websocket))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// JSON body whose rejections use the common error body.
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = GatewayError;

    async fn from_request(req: Request, state: &S) -> Result<Self> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ApiJson(value)),
            Err(rejection) => Err(GatewayError::invalid(body_error(&rejection))),
        }
    }
}

fn body_error(rejection: &JsonRejection) -> String {
    format!("invalid body: {}", rejection.body_text())
}

fn created<T: Serialize>(value: T) -> impl IntoResponse {
    (StatusCode::CREATED, Json(value))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn me(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<Profile>> {
    let token = bearer_token(&headers)
        .ok_or_else(|| GatewayError::Unauthenticated("missing bearer token".into()))?;
    Ok(Json(state.identity.sync(token).await?))
}

// ─── Servers ───

async fn list_servers(State(state): State<AppState>, Actor(actor): Actor) -> Result<Json<Vec<Server>>> {
    Ok(Json(state.gateway.list_servers(&actor).await?))
}

async fn create_server(
    State(state): State<AppState>,
    Actor(actor): Actor,
    ApiJson(req): ApiJson<CreateServerRequest>,
) -> Result<impl IntoResponse> {
    Ok(created(state.gateway.create_server(&actor, req).await?))
}

async fn server_detail(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(id): Path<ServerId>,
) -> Result<Json<ServerDetail>> {
    Ok(Json(state.gateway.server_detail(&actor, id).await?))
}

async fn update_server(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(id): Path<ServerId>,
    ApiJson(req): ApiJson<UpdateServerRequest>,
) -> Result<Json<Server>> {
    Ok(Json(state.gateway.update_server(&actor, id, req).await?))
}

async fn delete_server(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(id): Path<ServerId>,
) -> Result<StatusCode> {
    state.gateway.delete_server(&actor, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn join_server(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(id): Path<ServerId>,
) -> Result<Json<Server>> {
    Ok(Json(state.gateway.join_server(&actor, id).await?))
}

async fn leave_server(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(id): Path<ServerId>,
) -> Result<StatusCode> {
    state.gateway.leave_server(&actor, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ─── Channels ───

async fn create_channel(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(id): Path<ServerId>,
    ApiJson(req): ApiJson<CreateChannelRequest>,
) -> Result<impl IntoResponse> {
    Ok(created(state.gateway.create_channel(&actor, id, req).await?))
}

async fn update_channel(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(id): Path<ChannelId>,
    ApiJson(req): ApiJson<UpdateChannelRequest>,
) -> Result<Json<Channel>> {
    Ok(Json(state.gateway.update_channel(&actor, id, req).await?))
}

async fn delete_channel(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(id): Path<ChannelId>,
) -> Result<StatusCode> {
    state.gateway.delete_channel(&actor, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn channel_history(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(id): Path<ChannelId>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<MessageWithAuthor>>> {
    Ok(Json(state.gateway.channel_history(&actor, id, query).await?))
}

// ─── Conversations & messages ───

async fn list_conversations(
    State(state): State<AppState>,
    Actor(actor): Actor,
) -> Result<Json<Vec<ConversationView>>> {
    Ok(Json(state.gateway.list_conversations(&actor).await?))
}

async fn conversation_history(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(id): Path<ConversationId>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<MessageWithAuthor>>> {
    Ok(Json(state.gateway.conversation_history(&actor, id, query).await?))
}

async fn send_message(
    State(state): State<AppState>,
    Actor(actor): Actor,
    ApiJson(req): ApiJson<SendMessageRequest>,
) -> Result<impl IntoResponse> {
    Ok(created(state.gateway.send_message(&actor, req).await?))
}

async fn edit_message(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(id): Path<MessageId>,
    ApiJson(req): ApiJson<EditMessageRequest>,
) -> Result<Json<MessageWithAuthor>> {
    Ok(Json(state.gateway.edit_message(&actor, id, &req.content).await?))
}

async fn delete_message(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(id): Path<MessageId>,
) -> Result<Json<MessageWithAuthor>> {
    Ok(Json(state.gateway.delete_message(&actor, id).await?))
}

// ─── Friends ───

async fn list_friends(State(state): State<AppState>, Actor(actor): Actor) -> Result<Json<Vec<FriendView>>> {
    Ok(Json(state.gateway.list_friends(&actor).await?))
}

async fn list_friend_requests(
    State(state): State<AppState>,
    Actor(actor): Actor,
) -> Result<Json<FriendRequestList>> {
    Ok(Json(state.gateway.list_friend_requests(&actor).await?))
}

async fn send_friend_request(
    State(state): State<AppState>,
    Actor(actor): Actor,
    ApiJson(req): ApiJson<CreateFriendRequest>,
) -> Result<impl IntoResponse> {
    Ok(created(state.gateway.send_friend_request(&actor, req).await?))
}

async fn respond_friend_request(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Path(id): Path<FriendRequestId>,
    ApiJson(req): ApiJson<RespondFriendRequest>,
) -> Result<Json<FriendRequestView>> {
    Ok(Json(
        state
            .gateway
            .respond_friend_request(&actor, id, req.action)
            .await?,
    ))
}

// ─── Media & webhooks ───

async fn media_token(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Query(query): Query<MediaTokenQuery>,
) -> Result<Json<MediaTokenResponse>> {
    Ok(Json(
        state
            .gateway
            .mint_media_token(&actor, &query.room, &query.username)
            .await?,
    ))
}

async fn identity_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode> {
    let verifier = state
        .webhooks
        .as_ref()
        .ok_or_else(|| GatewayError::not_found("webhook endpoint"))?;
    verifier.verify(&headers, &body, chrono::Utc::now().timestamp())?;
    let outcome = webhook::apply(state.gateway.store().as_ref(), &body).await?;
    tracing::debug!(?outcome, "webhook applied");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}
