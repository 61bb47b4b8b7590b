//! Media room access tokens.
//!
//! Audio/video transport is an external SFU. We only mint short-lived
//! HS256 tokens in the LiveKit access-token format so clients can join a
//! room there.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use parley_shared::protocol::MediaTokenResponse;
use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VideoGrant {
    pub room_join: bool,
    pub room: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaClaims {
    /// API key.
    pub iss: String,
    /// Participant identity.
    pub sub: String,
    pub name: String,
    pub nbf: i64,
    pub exp: i64,
    pub video: VideoGrant,
}

#[derive(Clone)]
pub struct MediaTokenIssuer {
    credentials: Option<(String, String)>,
    ttl: Duration,
}

impl MediaTokenIssuer {
    pub fn new(api_key: Option<String>, api_secret: Option<String>, ttl_secs: i64) -> Self {
        Self {
            credentials: api_key.zip(api_secret),
            ttl: Duration::seconds(ttl_secs.max(1)),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.credentials.is_some()
    }

    pub fn mint(&self, room: &str, identity: &str, name: &str, now: DateTime<Utc>) -> Result<MediaTokenResponse> {
        let (key, secret) = self
            .credentials
            .as_ref()
            .ok_or_else(|| GatewayError::Upstream("media server misconfigured".into()))?;

        let expires_at = now + self.ttl;
        let claims = MediaClaims {
            iss: key.clone(),
            sub: identity.to_string(),
            name: name.to_string(),
            nbf: now.timestamp(),
            exp: expires_at.timestamp(),
            video: VideoGrant {
                room_join: true,
                room: room.to_string(),
            },
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .map_err(|e| GatewayError::Upstream(format!("media token encoding: {e}")))?;

        Ok(MediaTokenResponse {
            token,
            room: room.to_string(),
            expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};

    #[test]
    fn minted_token_carries_room_grant() {
        let issuer = MediaTokenIssuer::new(Some("APIkey".into()), Some("s3cret".into()), 600);
        let now = Utc::now();
        let resp = issuer.mint("room-1", "alice", "Alice", now).unwrap();
        assert_eq!(resp.expires_at, now + Duration::seconds(600));

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&["APIkey"]);
        let data = decode::<MediaClaims>(
            &resp.token,
            &DecodingKey::from_secret(b"s3cret"),
            &validation,
        )
        .unwrap();
        assert_eq!(data.claims.sub, "alice");
        assert_eq!(data.claims.name, "Alice");
        assert_eq!(data.claims.exp - data.claims.nbf, 600);
        assert!(data.claims.video.room_join);
        assert_eq!(data.claims.video.room, "room-1");

        let raw: serde_json::Value = serde_json::to_value(&data.claims).unwrap();
        assert_eq!(raw["video"]["roomJoin"], true);
    }

    #[test]
    fn unconfigured_is_upstream() {
        let issuer = MediaTokenIssuer::new(Some("key".into()), None, 600);
        assert!(!issuer.is_configured());
        assert!(matches!(
            issuer.mint("r", "a", "a", Utc::now()),
            Err(GatewayError::Upstream(_))
        ));
    }
}
