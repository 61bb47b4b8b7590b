//! Mutation gateway.
//!
//! Every state-changing operation runs the same stages:
//! validate, resolve the authorization context, authorize, persist, publish.
//! Any stage may reject; later stages then never run. Validation is purely
//! structural and never touches storage.

mod channels;
mod context;
mod friends;
mod messages;
mod servers;
mod validate;

use std::future::Future;
use std::sync::Arc;

use parley_shared::authz::{can_perform, Action, AuthContext};
use parley_shared::models::{Profile, ProfileSnapshot};
use parley_shared::protocol::{EventKind, EventPayload};
use parley_shared::{ErrorKind, ProfileId, Topic};
use parley_store::{RowStore, StoreError};
use tracing::{debug, error, info};

use crate::bus::EventBus;
use crate::error::{GatewayError, Result};
use crate::media::MediaTokenIssuer;

pub use context::{ChannelChain, ServerChain};

/// Stage an operation has reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stage {
    Validated,
    Authorized,
    Persisted,
    Published,
}

impl Stage {
    fn as_str(self) -> &'static str {
        match self {
            Stage::Validated => "validated",
            Stage::Authorized => "authorized",
            Stage::Persisted => "persisted",
            Stage::Published => "published",
        }
    }
}

pub struct Gateway {
    store: Arc<dyn RowStore>,
    bus: EventBus,
    media: MediaTokenIssuer,
}

impl Gateway {
    pub fn new(store: Arc<dyn RowStore>, bus: EventBus, media: MediaTokenIssuer) -> Self {
        Self { store, bus, media }
    }

    pub fn store(&self) -> &Arc<dyn RowStore> {
        &self.store
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Mint a media room token for an authenticated caller.
    pub async fn mint_media_token(
        &self,
        actor: &Profile,
        room: &str,
        username: &str,
    ) -> Result<parley_shared::protocol::MediaTokenResponse> {
        const OP: &str = "mint_media_token";
        observe(OP, async {
            let room = validate::required(room, "room")?;
            let identity = validate::required(username, "username")?;
            stage(OP, Stage::Validated);
            debug!(actor = %actor.id, room = %room, "minting media token");
            self.media
                .mint(&room, &identity, &actor.display_name, chrono::Utc::now())
        })
        .await
    }

    fn authorize(&self, op: &'static str, ctx: &AuthContext, action: Action) -> Result<()> {
        can_perform(ctx, action).into_result()?;
        stage(op, Stage::Authorized);
        Ok(())
    }

    async fn publish(&self, op: &'static str, topic: Topic, kind: EventKind, payload: EventPayload) {
        let seq = self.bus.publish(topic, kind, payload).await;
        debug!(op, stage = Stage::Published.as_str(), topic = %topic, seq, "event published");
    }

    /// Public profile of `id`, or a placeholder when it has been removed.
    async fn snapshot_of(&self, id: ProfileId) -> Result<ProfileSnapshot> {
        match self.store.get_profile(id).await {
            Ok(profile) => Ok(profile.snapshot()),
            Err(StoreError::NotFound) => Ok(ProfileSnapshot {
                id,
                username: parley_store::DELETED_USERNAME.into(),
                display_name: parley_store::DELETED_USERNAME.into(),
                avatar_url: None,
            }),
            Err(e) => Err(e.into()),
        }
    }
}

pub(crate) fn stage(op: &'static str, stage: Stage) {
    debug!(op, stage = stage.as_str(), "gateway stage");
}

/// Log the failing step of a composite operation. Earlier steps stay
/// committed.
pub(crate) fn step_failed(op: &'static str, step: &'static str, err: &StoreError) {
    error!(op, step, error = %err, "composite step failed, earlier steps remain committed");
}

/// Run an operation, logging how it ended.
pub(crate) async fn observe<T>(op: &'static str, fut: impl Future<Output = Result<T>>) -> Result<T> {
    match fut.await {
        Ok(value) => Ok(value),
        Err(e) => {
            match e.kind() {
                ErrorKind::Upstream => error!(op, error = %e, "operation failed"),
                kind => info!(op, kind = %kind, reason = %e, "operation rejected"),
            }
            Err(e)
        }
    }
}

/// Treat a missing row as a `NotFound` of a named thing.
pub(crate) fn named(what: &'static str) -> impl Fn(StoreError) -> GatewayError {
    move |e| match e {
        StoreError::NotFound => GatewayError::not_found(what),
        other => other.into(),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use chrono::Utc;
    use parley_shared::models::ProfileSync;
    use parley_store::SqliteStore;

    pub fn gateway() -> Gateway {
        let store: Arc<dyn RowStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
        Gateway::new(
            store,
            EventBus::default(),
            MediaTokenIssuer::new(Some("key".into()), Some("secret".into()), 600),
        )
    }

    pub async fn profile(gw: &Gateway, username: &str) -> Profile {
        gw.store()
            .upsert_profile(ProfileSync {
                external_id: format!("ext_{username}_{}", Utc::now().timestamp_nanos_opt().unwrap_or(0)),
                username: username.into(),
                display_name: username.into(),
                email: Some(format!("{username}@example.com")),
                avatar_url: None,
                status: None,
            })
            .await
            .unwrap()
    }
}
