use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use parley_server::bus::BusItem;
use parley_server::identity::SessionClaims;
use parley_server::media::MediaClaims;
use parley_server::{build_router, AppState, ServerConfig};
use parley_shared::models::*;
use parley_shared::protocol::{EventKind, EventPayload, FriendRequestList};
use parley_shared::Topic;
use parley_store::{RowStore, SqliteStore};
use serde_json::{json, Value};
use sha2::Sha256;
use tower::ServiceExt;

const SESSION_SECRET: &str = "integration-secret";
const WEBHOOK_SECRET: &str = "whsec_aW50ZWdyYXRpb24td2ViaG9vaw==";

struct Harness {
    state: AppState,
    app: Router,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(ServerConfig {
            session_secret: Some(SESSION_SECRET.into()),
            webhook_secret: Some(WEBHOOK_SECRET.into()),
            media_api_key: Some("media-key".into()),
            media_api_secret: Some("media-secret".into()),
            rate_limit_burst: 10_000.0,
            ..ServerConfig::default()
        })
    }

    fn with_config(config: ServerConfig) -> Self {
        let store: Arc<dyn RowStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let state = AppState::new(config, store);
        let app = build_router(state.clone());
        Self { state, app }
    }

    async fn call(&self, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let req = match body {
            Some(body) => req
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };
        let resp = self.app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }
}

fn token(sub: &str, username: &str) -> String {
    let claims = SessionClaims {
        sub: sub.into(),
        exp: (chrono::Utc::now().timestamp() + 3600) as usize,
        iss: None,
        username: Some(username.into()),
        email: Some(format!("{username}@example.com")),
        first_name: None,
        last_name: None,
        image_url: None,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(SESSION_SECRET.as_bytes()),
    )
    .unwrap()
}

async fn create_server(h: &Harness, token: &str) -> ServerDetail {
    let (status, body) = h
        .call("POST", "/servers", Some(token), Some(json!({ "name": "Test" })))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    serde_json::from_value(body).unwrap()
}

#[tokio::test]
async fn health_is_public() {
    let h = Harness::new();
    let (status, body) = h.call("GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn requests_without_session_are_unauthenticated() {
    let h = Harness::new();
    let (status, body) = h.call("GET", "/servers", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthenticated");

    let (status, _) = h.call("GET", "/servers", Some("not-a-jwt"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn me_syncs_profile_online() {
    let h = Harness::new();
    let (status, body) = h.call("GET", "/me", Some(&token("ext_p1", "p1")), None).await;
    assert_eq!(status, StatusCode::OK);
    let profile: Profile = serde_json::from_value(body).unwrap();
    assert_eq!(profile.username, "p1");
    assert_eq!(profile.status, ProfileStatus::Online);
}

#[tokio::test]
async fn created_server_and_non_member_channel_create() {
    let h = Harness::new();
    let p1 = token("ext_p1", "p1");
    let p2 = token("ext_p2", "p2");

    let detail = create_server(&h, &p1).await;
    let names: Vec<_> = detail
        .channels
        .iter()
        .map(|c| (c.name.as_str(), c.kind))
        .collect();
    assert_eq!(names, vec![("general", ChannelKind::Text), ("General", ChannelKind::Voice)]);

    let uri = format!("/servers/{}/channels", detail.server.id);
    let (status, body) = h
        .call("POST", &uri, Some(&p2), Some(json!({ "name": "random" })))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");
    assert_eq!(body["reason"], "not-member");

    let (status, _) = h
        .call("POST", &uri, Some(&p1), Some(json!({ "name": "random", "kind": "video" })))
        .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn general_cannot_be_deleted_by_owner() {
    let h = Harness::new();
    let p1 = token("ext_p1", "p1");
    let detail = create_server(&h, &p1).await;
    let general = detail.channels.iter().find(|c| c.name == "general").unwrap();

    let (status, body) = h
        .call("DELETE", &format!("/channels/{}", general.id), Some(&p1), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["reason"], "protected-channel");
}

#[tokio::test]
async fn malformed_body_is_invalid_input() {
    let h = Harness::new();
    let p1 = token("ext_p1", "p1");
    let (status, body) = h
        .call("POST", "/servers", Some(&p1), Some(json!({ "nom": "Test" })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid-input");
}

#[tokio::test]
async fn friends_then_direct_message_reaches_receiver() {
    let h = Harness::new();
    let p1 = token("ext_p1", "p1");
    let p2 = token("ext_p2", "p2");
    let (_, me2) = h.call("GET", "/me", Some(&p2), None).await;
    let p2_id: Profile = serde_json::from_value(me2).unwrap();

    let (status, _) = h
        .call("POST", "/friends/requests", Some(&p1), Some(json!({ "target": "p2" })))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, _) = h
        .call("POST", "/friends/requests", Some(&p1), Some(json!({ "target": "p2@example.com" })))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, body) = h.call("GET", "/friends/requests", Some(&p2), None).await;
    let list: FriendRequestList = serde_json::from_value(body).unwrap();
    assert_eq!(list.incoming.len(), 1);
    let request_id = list.incoming[0].request.id;

    let respond = format!("/friends/requests/{request_id}/respond");
    let (status, _) = h
        .call("POST", &respond, Some(&p2), Some(json!({ "action": "accept" })))
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = h
        .call("POST", &respond, Some(&p2), Some(json!({ "action": "accept" })))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, body) = h.call("GET", "/conversations", Some(&p2), None).await;
    let conversations: Vec<ConversationView> = serde_json::from_value(body).unwrap();
    assert_eq!(conversations.len(), 1);
    let conversation = conversations[0].conversation.id;
    assert!(conversations[0].conversation.has_participant(p2_id.id));

    let mut rx = h
        .state
        .gateway
        .bus()
        .subscribe(Topic::Conversation(conversation))
        .await;
    let (status, _) = h
        .call(
            "POST",
            "/messages",
            Some(&p1),
            Some(json!({ "conversation_id": conversation, "content": "hi", "client_key": "k1" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    match rx.recv().await.unwrap() {
        BusItem::Event(event) => {
            assert_eq!(event.kind, EventKind::Insert);
            match &event.payload {
                EventPayload::Message(m) => {
                    assert_eq!(m.message.content.as_deref(), Some("hi"));
                    assert_eq!(m.author.username, "p1");
                    assert_eq!(m.message.client_key.as_deref(), Some("k1"));
                }
                other => panic!("unexpected payload {other:?}"),
            }
        }
        other => panic!("unexpected item {other:?}"),
    }

    let (_, history) = h
        .call("GET", &format!("/conversations/{conversation}/messages"), Some(&p2), None)
        .await;
    assert_eq!(history.as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn only_author_edits_messages() {
    let h = Harness::new();
    let owner = token("ext_owner", "owner");
    let member = token("ext_member", "member");
    let detail = create_server(&h, &owner).await;
    let general = detail.channels[0].id;

    let (status, _) = h
        .call("POST", &format!("/servers/{}/join", detail.server.id), Some(&member), None)
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, sent) = h
        .call(
            "POST",
            "/messages",
            Some(&member),
            Some(json!({ "channel_id": general, "content": "hello" })),
        )
        .await;
    let id = sent["message"]["id"].as_str().unwrap().to_string();

    let (status, _) = h
        .call("PATCH", &format!("/messages/{id}"), Some(&owner), Some(json!({ "content": "x" })))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, body) = h
        .call("PATCH", &format!("/messages/{id}"), Some(&member), Some(json!({ "content": "edited" })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"]["edited"], true);

    let (status, _) = h
        .call("DELETE", &format!("/messages/{id}"), Some(&member), None)
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, history) = h
        .call("GET", &format!("/channels/{general}/messages?include_deleted=true"), Some(&owner), None)
        .await;
    assert_eq!(history[0]["message"]["content"], Value::Null);
    assert!(history[0]["message"]["deleted_at"].is_string());
}

#[tokio::test]
async fn media_token_is_room_scoped() {
    let h = Harness::new();
    let p1 = token("ext_p1", "p1");
    let (status, body) = h
        .call("GET", "/media/token?room=voice-1&username=p1-desk", Some(&p1), None)
        .await;
    assert_eq!(status, StatusCode::OK);

    let mut validation = Validation::default();
    validation.validate_nbf = true;
    let claims = decode::<MediaClaims>(
        body["token"].as_str().unwrap(),
        &DecodingKey::from_secret(b"media-secret"),
        &validation,
    )
    .unwrap()
    .claims;
    assert_eq!(claims.iss, "media-key");
    assert_eq!(claims.sub, "p1-desk");
    assert_eq!(claims.name, "p1");
    assert_eq!(claims.video.room, "voice-1");
    assert!(claims.video.room_join);
    assert_eq!(claims.exp - claims.nbf, 600);
}

#[tokio::test]
async fn media_token_without_credentials_is_upstream() {
    let h = Harness::with_config(ServerConfig {
        session_secret: Some(SESSION_SECRET.into()),
        ..ServerConfig::default()
    });
    let (status, body) = h
        .call("GET", "/media/token?room=r&username=u", Some(&token("ext_u", "u")), None)
        .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["reason"], "upstream failure");
}

fn signed_webhook(body: &str, ts: i64) -> Request<Body> {
    let key = STANDARD
        .decode(WEBHOOK_SECRET.trim_start_matches("whsec_"))
        .unwrap();
    let mut mac = Hmac::<Sha256>::new_from_slice(&key).unwrap();
    mac.update(format!("msg_1.{ts}.{body}").as_bytes());
    let sig = STANDARD.encode(mac.finalize().into_bytes());
    Request::builder()
        .method("POST")
        .uri("/webhooks/identity")
        .header("svix-id", "msg_1")
        .header("svix-timestamp", ts.to_string())
        .header("svix-signature", format!("v1,{sig}"))
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn webhook_upserts_and_deletes_profiles() {
    let h = Harness::new();
    let now = chrono::Utc::now().timestamp();
    let created = json!({
        "type": "user.created",
        "data": {
            "id": "user_2webhook0001",
            "first_name": "Ada",
            "last_name": "Lovelace",
            "email_addresses": [{ "email_address": "ada@example.com" }]
        }
    })
    .to_string();

    let resp = h.app.clone().oneshot(signed_webhook(&created, now)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    let profile = h
        .state
        .gateway
        .store()
        .get_profile_by_external_id("user_2webhook0001".into())
        .await
        .unwrap();
    assert_eq!(profile.username, "ada");
    assert_eq!(profile.display_name, "Ada Lovelace");

    let mut tampered = signed_webhook(&created, now);
    *tampered.body_mut() = Body::from(created.replace("Ada", "Eve"));
    let resp = h.app.clone().oneshot(tampered).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let deleted = json!({ "type": "user.deleted", "data": { "id": "user_2webhook0001" } }).to_string();
    let resp = h.app.clone().oneshot(signed_webhook(&deleted, now)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert!(h
        .state
        .gateway
        .store()
        .get_profile_by_external_id("user_2webhook0001".into())
        .await
        .is_err());
}

#[tokio::test]
async fn burst_over_limit_is_rejected() {
    let h = Harness::with_config(ServerConfig {
        session_secret: Some(SESSION_SECRET.into()),
        rate_limit_per_sec: 0.001,
        rate_limit_burst: 2.0,
        ..ServerConfig::default()
    });
    let p1 = token("ext_p1", "p1");
    for _ in 0..2 {
        let (status, _) = h.call("GET", "/servers", Some(&p1), None).await;
        assert_eq!(status, StatusCode::OK);
    }
    let (status, body) = h.call("GET", "/servers", Some(&p1), None).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"], "rate-limited");

    // Buckets are per client.
    let (status, _) = h.call("GET", "/servers", Some(&token("ext_p2", "p2")), None).await;
    assert_eq!(status, StatusCode::OK);
}
