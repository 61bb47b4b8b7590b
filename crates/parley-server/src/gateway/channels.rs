use chrono::Utc;
use parley_shared::authz::{Action, AuthContext};
use parley_shared::models::{Channel, Profile};
use parley_shared::protocol::{CreateChannelRequest, EventKind, EventPayload, UpdateChannelRequest};
use parley_shared::{ChannelId, ServerId, Topic};

use super::{named, observe, stage, validate, Gateway, Stage};
use crate::error::{GatewayError, Result};

impl Gateway {
    /// Create a channel on a server. Any member may do this.
    pub async fn create_channel(
        &self,
        actor: &Profile,
        server_id: ServerId,
        req: CreateChannelRequest,
    ) -> Result<Channel> {
        const OP: &str = "create_channel";
        observe(OP, async {
            let name = validate::channel_name(&req.name)?;
            stage(OP, Stage::Validated);

            let chain = self.server_chain(actor, server_id).await?;
            self.authorize(
                OP,
                &AuthContext::new(actor.id, chain.target()),
                Action::CreateChannel { owner_only: false },
            )?;

            if let Some(category) = req.category_id {
                let categories = self.store.list_categories(server_id).await?;
                if !categories.iter().any(|c| c.id == category) {
                    return Err(GatewayError::not_found("category"));
                }
            }

            let topic = Topic::Server(server_id);
            let _order = self.bus.ordered(topic).await;
            let channel = Channel {
                id: ChannelId::new(),
                server_id,
                category_id: req.category_id,
                name,
                kind: req.kind,
                position: self.store.next_channel_position(server_id).await?,
                created_at: Utc::now(),
            };
            self.store.insert_channel(channel.clone()).await?;
            stage(OP, Stage::Persisted);
            tracing::info!(server = %server_id, channel = %channel.id, "channel created");

            self.publish(OP, topic, EventKind::Insert, EventPayload::Channel(channel.clone()))
                .await;
            Ok(channel)
        })
        .await
    }

    /// Rename or retype a channel. Server owner only; `general` is fixed.
    pub async fn update_channel(
        &self,
        actor: &Profile,
        id: ChannelId,
        req: UpdateChannelRequest,
    ) -> Result<Channel> {
        const OP: &str = "update_channel";
        observe(OP, async {
            let name = req.name.as_deref().map(validate::channel_name).transpose()?;
            if name.is_none() && req.kind.is_none() {
                return Err(GatewayError::invalid("nothing to update"));
            }
            stage(OP, Stage::Validated);

            let chain = self.channel_chain(actor, id).await?;
            self.authorize(OP, &AuthContext::new(actor.id, chain.target()), Action::UpdateChannel)?;

            let mut channel = chain.channel;
            if let Some(name) = name {
                channel.name = name;
            }
            if let Some(kind) = req.kind {
                channel.kind = kind;
            }

            let topic = Topic::Server(channel.server_id);
            let _order = self.bus.ordered(topic).await;
            self.store
                .update_channel(channel.clone())
                .await
                .map_err(named("channel"))?;
            stage(OP, Stage::Persisted);
            self.publish(OP, topic, EventKind::Update, EventPayload::Channel(channel.clone()))
                .await;
            Ok(channel)
        })
        .await
    }

    /// Delete a channel. The `general` channel is protected, even from the owner.
    pub async fn delete_channel(&self, actor: &Profile, id: ChannelId) -> Result<()> {
        const OP: &str = "delete_channel";
        observe(OP, async {
            stage(OP, Stage::Validated);
            let chain = self.channel_chain(actor, id).await?;
            self.authorize(OP, &AuthContext::new(actor.id, chain.target()), Action::DeleteChannel)?;

            let server_id = chain.server.id;
            let topic = Topic::Server(server_id);
            let _order = self.bus.ordered(topic).await;
            if !self.store.delete_channel(id).await? {
                return Err(GatewayError::not_found("channel"));
            }
            stage(OP, Stage::Persisted);
            tracing::info!(server = %server_id, channel = %id, "channel deleted");
            self.publish(
                OP,
                topic,
                EventKind::Delete,
                EventPayload::ChannelRemoved {
                    server_id,
                    channel_id: id,
                },
            )
            .await;
            Ok(())
        })
        .await
    }
}
