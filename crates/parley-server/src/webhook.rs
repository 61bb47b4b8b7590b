//! Identity-provider change webhooks.
//!
//! Deliveries are signed Svix-style: the `svix-signature` header carries one
//! or more `v1,<base64 HMAC-SHA256>` entries over `{id}.{timestamp}.{body}`,
//! keyed by the base64 secret that follows the `whsec_` prefix.

use axum::http::HeaderMap;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use parley_store::RowStore;
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::error::GatewayError;
use crate::identity::profile_sync;

/// Maximum clock skew accepted between the delivery timestamp and now.
pub const TIMESTAMP_TOLERANCE_SECS: i64 = 5 * 60;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WebhookError {
    #[error("webhook secret is not valid base64")]
    BadSecret,

    #[error("missing header {0}")]
    MissingHeader(&'static str),

    #[error("timestamp outside tolerance")]
    StaleTimestamp,

    #[error("no matching signature")]
    BadSignature,

    #[error("malformed payload: {0}")]
    Payload(String),
}

impl From<WebhookError> for GatewayError {
    fn from(e: WebhookError) -> Self {
        match e {
            WebhookError::BadSecret => GatewayError::Upstream(e.to_string()),
            WebhookError::Payload(_) | WebhookError::MissingHeader(_) => {
                GatewayError::InvalidInput(e.to_string())
            }
            WebhookError::StaleTimestamp | WebhookError::BadSignature => {
                GatewayError::Unauthenticated(e.to_string())
            }
        }
    }
}

pub struct WebhookVerifier {
    key: Vec<u8>,
}

impl WebhookVerifier {
    pub fn new(secret: &str) -> Result<Self, WebhookError> {
        let encoded = secret.strip_prefix("whsec_").unwrap_or(secret);
        let key = STANDARD
            .decode(encoded.trim())
            .map_err(|_| WebhookError::BadSecret)?;
        Ok(Self { key })
    }

    fn sign(&self, id: &str, timestamp: &str, body: &[u8]) -> Result<Vec<u8>, WebhookError> {
        let mut mac =
            Hmac::<Sha256>::new_from_slice(&self.key).map_err(|_| WebhookError::BadSecret)?;
        mac.update(id.as_bytes());
        mac.update(b".");
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(body);
        Ok(mac.finalize().into_bytes().to_vec())
    }

    /// Check headers and body against the secret. `now` is unix seconds.
    pub fn verify(&self, headers: &HeaderMap, body: &[u8], now: i64) -> Result<(), WebhookError> {
        let header = |name: &'static str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .ok_or(WebhookError::MissingHeader(name))
        };
        let id = header("svix-id")?;
        let timestamp = header("svix-timestamp")?;
        let signatures = header("svix-signature")?;

        let ts: i64 = timestamp
            .trim()
            .parse()
            .map_err(|_| WebhookError::StaleTimestamp)?;
        if (now - ts).abs() > TIMESTAMP_TOLERANCE_SECS {
            return Err(WebhookError::StaleTimestamp);
        }

        let expected = self.sign(id, timestamp, body)?;
        let matched = signatures
            .split_whitespace()
            .filter_map(|entry| entry.strip_prefix("v1,"))
            .filter_map(|sig| STANDARD.decode(sig).ok())
            .any(|sig| sig.len() == expected.len() && bool::from(sig.as_slice().ct_eq(expected.as_slice())));

        if matched {
            Ok(())
        } else {
            Err(WebhookError::BadSignature)
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: UserData,
}

#[derive(Debug, Deserialize)]
pub struct UserData {
    pub id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub email_addresses: Vec<EmailAddress>,
}

#[derive(Debug, Deserialize)]
pub struct EmailAddress {
    pub email_address: String,
}

/// What a delivery did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    Upserted,
    Deleted,
    Ignored,
}

/// Apply a verified delivery.
pub async fn apply(store: &dyn RowStore, body: &[u8]) -> Result<WebhookOutcome, GatewayError> {
    let event: WebhookEvent =
        serde_json::from_slice(body).map_err(|e| WebhookError::Payload(e.to_string()))?;
    let data = event.data;

    match event.kind.as_str() {
        "user.created" | "user.updated" => {
            let email = data.email_addresses.first().map(|e| e.email_address.as_str());
            let sync = profile_sync(
                &data.id,
                data.username.as_deref(),
                email,
                data.first_name.as_deref(),
                data.last_name.as_deref(),
                data.image_url.clone(),
                None,
            );
            let profile = store.upsert_profile(sync).await?;
            tracing::info!(profile = %profile.id, kind = %event.kind, "profile synced from webhook");
            Ok(WebhookOutcome::Upserted)
        }
        "user.deleted" => {
            let removed = store.delete_profile_by_external_id(data.id.clone()).await?;
            tracing::info!(external_id = %data.id, removed, "profile removed by webhook");
            Ok(WebhookOutcome::Deleted)
        }
        other => {
            tracing::debug!(kind = %other, "ignoring webhook event");
            Ok(WebhookOutcome::Ignored)
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use axum::http::HeaderValue;

    pub const SECRET: &str = "whsec_c2VjcmV0LWtleS1mb3ItdGVzdHM=";

    pub fn signed_headers(body: &[u8], ts: i64) -> HeaderMap {
        let verifier = WebhookVerifier::new(SECRET).unwrap();
        let ts = ts.to_string();
        let sig = STANDARD.encode(verifier.sign("msg_1", &ts, body).unwrap());
        let mut headers = HeaderMap::new();
        headers.insert("svix-id", HeaderValue::from_static("msg_1"));
        headers.insert("svix-timestamp", HeaderValue::from_str(&ts).unwrap());
        headers.insert(
            "svix-signature",
            HeaderValue::from_str(&format!("v1,AAAA v1,{sig}")).unwrap(),
        );
        headers
    }
}
