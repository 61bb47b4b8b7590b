//! Identity adapter.
//!
//! Sessions are issued by an external identity provider as HS256 JWTs. This
//! module verifies them and maps the provider subject to an internal
//! [`Profile`], creating it on first sight.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use parley_shared::models::{Profile, ProfileStatus, ProfileSync};
use parley_store::{RowStore, StoreError};
use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, Result};
use crate::AppState;

/// Claims carried by a provider session token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionClaims {
    /// Provider subject. Becomes [`Profile::external_id`].
    pub sub: String,
    pub exp: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl SessionClaims {
    fn to_sync(&self, status: Option<ProfileStatus>) -> ProfileSync {
        profile_sync(
            &self.sub,
            self.username.as_deref(),
            self.email.as_deref(),
            self.first_name.as_deref(),
            self.last_name.as_deref(),
            self.image_url.clone(),
            status,
        )
    }
}

/// Build the profile fields from what the provider knows about a user.
///
/// Username falls back to the email local part, then to `user_` plus the
/// last eight characters of the subject. Display name is first + last name,
/// else the username.
pub fn profile_sync(
    external_id: &str,
    username: Option<&str>,
    email: Option<&str>,
    first_name: Option<&str>,
    last_name: Option<&str>,
    avatar_url: Option<String>,
    status: Option<ProfileStatus>,
) -> ProfileSync {
    let username = username
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .map(str::to_string)
        .or_else(|| {
            email
                .and_then(|e| e.split('@').next())
                .filter(|local| !local.is_empty())
                .map(str::to_string)
        })
        .unwrap_or_else(|| {
            let tail: String = {
                let chars: Vec<char> = external_id.chars().collect();
                chars[chars.len().saturating_sub(8)..].iter().collect()
            };
            format!("user_{tail}")
        });

    let full_name = [first_name, last_name]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    let display_name = if full_name.is_empty() {
        username.clone()
    } else {
        full_name
    };

    ProfileSync {
        external_id: external_id.to_string(),
        username,
        display_name,
        email: email.map(str::to_string),
        avatar_url,
        status,
    }
}

/// Verifies session tokens and resolves them to profiles.
pub struct IdentityAdapter {
    key: Option<DecodingKey>,
    validation: Validation,
    store: Arc<dyn RowStore>,
}

impl IdentityAdapter {
    pub fn new(secret: Option<&str>, issuer: Option<&str>, store: Arc<dyn RowStore>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        if let Some(iss) = issuer {
            validation.set_issuer(&[iss]);
        }
        if secret.is_none() {
            tracing::warn!("SESSION_SECRET not set, every request will be unauthenticated");
        }
        Self {
            key: secret.map(|s| DecodingKey::from_secret(s.as_bytes())),
            validation,
            store,
        }
    }

    /// Verify a token's signature, expiry and issuer.
    pub fn verify(&self, token: &str) -> Result<SessionClaims> {
        let key = self
            .key
            .as_ref()
            .ok_or_else(|| GatewayError::Unauthenticated("sessions are not configured".into()))?;
        decode::<SessionClaims>(token, key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!(error = %e, "rejected session token");
                GatewayError::Unauthenticated("invalid session".into())
            })
    }

    /// Resolve a token to its profile, creating the profile on first sight.
    pub async fn resolve(&self, token: &str) -> Result<Profile> {
        let claims = self.verify(token)?;
        match self.store.get_profile_by_external_id(claims.sub.clone()).await {
            Ok(profile) => Ok(profile),
            Err(StoreError::NotFound) => Ok(self.store.upsert_profile(claims.to_sync(None)).await?),
            Err(e) => Err(e.into()),
        }
    }

    /// Refresh the profile from the token's claims and mark it online.
    pub async fn sync(&self, token: &str) -> Result<Profile> {
        let claims = self.verify(token)?;
        let profile = self
            .store
            .upsert_profile(claims.to_sync(Some(ProfileStatus::Online)))
            .await?;
        tracing::debug!(profile = %profile.id, "profile synced");
        Ok(profile)
    }
}

/// Bearer token of a request, if any.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// The authenticated caller of a request.
pub struct Actor(pub Profile);

#[axum::async_trait]
impl FromRequestParts<AppState> for Actor {
    type Rejection = GatewayError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let token = bearer_token(&parts.headers)
            .ok_or_else(|| GatewayError::Unauthenticated("missing bearer token".into()))?;
        state.identity.resolve(token).await.map(Actor)
    }
}

#[cfg(test)]
pub(crate) mod test_tokens {
    use super::SessionClaims;
    use jsonwebtoken::{encode, EncodingKey, Header};

    pub fn issue(secret: &str, sub: &str, username: &str) -> String {
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
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }
}
