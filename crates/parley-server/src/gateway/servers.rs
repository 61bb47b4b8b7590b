use chrono::Utc;
use parley_shared::authz::{Action, AuthContext};
use parley_shared::constants::{
    DEFAULT_CATEGORY_NAME, DEFAULT_ROLE_NAME, GENERAL_CHANNEL_NAME, GENERAL_VOICE_CHANNEL_NAME,
};
use parley_shared::models::*;
use parley_shared::protocol::{CreateServerRequest, EventKind, EventPayload, UpdateServerRequest};
use parley_shared::*;

use super::{named, observe, stage, step_failed, validate, Gateway, Stage};
use crate::error::{GatewayError, Result};

impl Gateway {
    /// Create a server with its default role, category, `general` text
    /// channel, `General` voice channel and the owner's membership.
    ///
    /// The steps run in that fixed order without a transaction. A failing
    /// step is logged and reported; earlier rows stay.
    pub async fn create_server(&self, actor: &Profile, req: CreateServerRequest) -> Result<ServerDetail> {
        const OP: &str = "create_server";
        observe(OP, async {
            let name = validate::name(&req.name, "server name")?;
            let icon_url = req.icon_url.and_then(|u| validate::required(&u, "icon").ok());
            stage(OP, Stage::Validated);
            // Any authenticated profile may create a server.
            stage(OP, Stage::Authorized);

            let now = Utc::now();
            let server = Server {
                id: ServerId::new(),
                name,
                icon_url,
                owner_id: actor.id,
                created_at: now,
            };
            let role = Role {
                id: RoleId::new(),
                server_id: server.id,
                name: DEFAULT_ROLE_NAME.into(),
                is_default: true,
                position: 0,
            };
            let category = Category {
                id: CategoryId::new(),
                server_id: server.id,
                name: DEFAULT_CATEGORY_NAME.into(),
                position: 0,
            };
            let channels = vec![
                Channel {
                    id: ChannelId::new(),
                    server_id: server.id,
                    category_id: Some(category.id),
                    name: GENERAL_CHANNEL_NAME.into(),
                    kind: ChannelKind::Text,
                    position: 0,
                    created_at: now,
                },
                Channel {
                    id: ChannelId::new(),
                    server_id: server.id,
                    category_id: Some(category.id),
                    name: GENERAL_VOICE_CHANNEL_NAME.into(),
                    kind: ChannelKind::Voice,
                    position: 1,
                    created_at: now,
                },
            ];
            let membership = Membership {
                id: MembershipId::new(),
                profile_id: actor.id,
                server_id: server.id,
                role_id: role.id,
                joined_at: now,
            };

            let store = &self.store;
            store
                .insert_server(server.clone())
                .await
                .inspect_err(|e| step_failed(OP, "server", e))?;
            store
                .insert_role(role.clone())
                .await
                .inspect_err(|e| step_failed(OP, "default_role", e))?;
            store
                .insert_category(category.clone())
                .await
                .inspect_err(|e| step_failed(OP, "default_category", e))?;
            for channel in &channels {
                store
                    .insert_channel(channel.clone())
                    .await
                    .inspect_err(|e| step_failed(OP, "default_channel", e))?;
            }
            store
                .insert_membership(membership.clone())
                .await
                .inspect_err(|e| step_failed(OP, "owner_membership", e))?;
            stage(OP, Stage::Persisted);
            tracing::info!(server = %server.id, owner = %actor.id, "server created");

            self.publish(
                OP,
                Topic::Profile(actor.id),
                EventKind::Insert,
                EventPayload::Server(server.clone()),
            )
            .await;

            Ok(ServerDetail {
                server,
                roles: vec![role],
                categories: vec![category],
                channels,
                members: vec![Member {
                    membership,
                    profile: actor.snapshot(),
                }],
            })
        })
        .await
    }

    /// Rename a server or change its icon. Owner only.
    pub async fn update_server(&self, actor: &Profile, id: ServerId, req: UpdateServerRequest) -> Result<Server> {
        const OP: &str = "update_server";
        observe(OP, async {
            let name = req
                .name
                .as_deref()
                .map(|n| validate::name(n, "server name"))
                .transpose()?;
            if name.is_none() && req.icon_url.is_none() {
                return Err(GatewayError::invalid("nothing to update"));
            }
            stage(OP, Stage::Validated);

            let chain = self.server_chain(actor, id).await?;
            self.authorize(OP, &AuthContext::new(actor.id, chain.target()), Action::RenameServer)?;

            let mut server = chain.server;
            if let Some(name) = name {
                server.name = name;
            }
            if let Some(icon) = req.icon_url {
                let icon = icon.trim();
                server.icon_url = (!icon.is_empty()).then(|| icon.to_string());
            }

            let topic = Topic::Server(id);
            let _order = self.bus.ordered(topic).await;
            self.store
                .update_server(server.clone())
                .await
                .map_err(named("server"))?;
            stage(OP, Stage::Persisted);
            self.publish(OP, topic, EventKind::Update, EventPayload::Server(server.clone()))
                .await;
            Ok(server)
        })
        .await
    }

    /// Delete a server and everything under it. Owner only.
    pub async fn delete_server(&self, actor: &Profile, id: ServerId) -> Result<()> {
        const OP: &str = "delete_server";
        observe(OP, async {
            stage(OP, Stage::Validated);
            let chain = self.server_chain(actor, id).await?;
            self.authorize(OP, &AuthContext::new(actor.id, chain.target()), Action::DeleteServer)?;

            let topic = Topic::Server(id);
            let _order = self.bus.ordered(topic).await;
            if !self.store.delete_server(id).await? {
                return Err(GatewayError::not_found("server"));
            }
            stage(OP, Stage::Persisted);
            tracing::info!(server = %id, "server deleted");
            self.publish(
                OP,
                topic,
                EventKind::Delete,
                EventPayload::ServerRemoved { server_id: id },
            )
            .await;
            Ok(())
        })
        .await
    }

    /// Accept an invite: join the server under its default role.
    pub async fn join_server(&self, actor: &Profile, id: ServerId) -> Result<Server> {
        const OP: &str = "join_server";
        observe(OP, async {
            stage(OP, Stage::Validated);
            let chain = self.server_chain(actor, id).await?;
            self.authorize(OP, &AuthContext::new(actor.id, chain.target()), Action::JoinServer)?;

            let role = self
                .store
                .get_default_role(id)
                .await
                .map_err(named("default role"))?;
            let membership = Membership {
                id: MembershipId::new(),
                profile_id: actor.id,
                server_id: id,
                role_id: role.id,
                joined_at: Utc::now(),
            };

            let topic = Topic::Server(id);
            let _order = self.bus.ordered(topic).await;
            self.store.insert_membership(membership.clone()).await?;
            stage(OP, Stage::Persisted);
            self.publish(
                OP,
                topic,
                EventKind::Insert,
                EventPayload::MemberJoined(Member {
                    membership,
                    profile: actor.snapshot(),
                }),
            )
            .await;
            Ok(chain.server)
        })
        .await
    }

    /// Leave a server. The owner cannot leave their own server.
    pub async fn leave_server(&self, actor: &Profile, id: ServerId) -> Result<()> {
        const OP: &str = "leave_server";
        observe(OP, async {
            stage(OP, Stage::Validated);
            let chain = self.server_chain(actor, id).await?;
            self.authorize(OP, &AuthContext::new(actor.id, chain.target()), Action::LeaveServer)?;

            let topic = Topic::Server(id);
            let _order = self.bus.ordered(topic).await;
            if !self.store.delete_membership(actor.id, id).await? {
                return Err(GatewayError::not_found("membership"));
            }
            stage(OP, Stage::Persisted);
            self.publish(
                OP,
                topic,
                EventKind::Delete,
                EventPayload::MemberLeft {
                    server_id: id,
                    profile_id: actor.id,
                },
            )
            .await;
            Ok(())
        })
        .await
    }

    pub async fn list_servers(&self, actor: &Profile) -> Result<Vec<Server>> {
        observe("list_servers", async {
            Ok(self.store.list_servers_for_profile(actor.id).await?)
        })
        .await
    }

    /// Channels, categories, roles and members of a server. Members only.
    pub async fn server_detail(&self, actor: &Profile, id: ServerId) -> Result<ServerDetail> {
        const OP: &str = "server_detail";
        observe(OP, async {
            let chain = self.server_chain(actor, id).await?;
            self.authorize(OP, &AuthContext::new(actor.id, chain.target()), Action::ReadTopic)?;

            Ok(ServerDetail {
                roles: self.store.list_roles(id).await?,
                categories: self.store.list_categories(id).await?,
                channels: self.store.list_channels(id).await?,
                members: self.store.list_members(id).await?,
                server: chain.server,
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::bus::BusItem;

    fn create(name: &str) -> CreateServerRequest {
        CreateServerRequest {
            name: name.into(),
            icon_url: None,
        }
    }

    #[tokio::test]
    async fn created_server_has_defaults() {
        let gw = gateway();
        let owner = profile(&gw, "owner").await;
        let mut inbox = gw.bus().subscribe(Topic::Profile(owner.id)).await;

        let detail = gw.create_server(&owner, create("Test")).await.unwrap();

        let stored = gw.server_detail(&owner, detail.server.id).await.unwrap();
        let generals: Vec<_> = stored
            .channels
            .iter()
            .filter(|c| c.name == GENERAL_CHANNEL_NAME)
            .collect();
        assert_eq!(generals.len(), 1);
        assert_eq!(generals[0].kind, ChannelKind::Text);
        assert!(stored
            .channels
            .iter()
            .any(|c| c.name == GENERAL_VOICE_CHANNEL_NAME && c.kind == ChannelKind::Voice));

        let defaults: Vec<_> = stored.roles.iter().filter(|r| r.is_default).collect();
        assert_eq!(defaults.len(), 1);
        assert_eq!(stored.members.len(), 1);
        assert_eq!(stored.members[0].membership.role_id, defaults[0].id);
        assert_eq!(stored.members[0].profile.id, owner.id);

        match inbox.recv().await.unwrap() {
            BusItem::Event(e) => {
                assert_eq!(e.kind, EventKind::Insert);
                assert!(matches!(&e.payload, EventPayload::Server(s) if s.id == detail.server.id));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_name_is_invalid() {
        let gw = gateway();
        let owner = profile(&gw, "owner").await;
        assert!(matches!(
            gw.create_server(&owner, create("   ")).await,
            Err(GatewayError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn only_owner_renames_and_deletes() {
        let gw = gateway();
        let owner = profile(&gw, "owner").await;
        let other = profile(&gw, "other").await;
        let id = gw.create_server(&owner, create("Test")).await.unwrap().server.id;

        let rename = UpdateServerRequest {
            name: Some("Renamed".into()),
            icon_url: None,
        };
        assert!(matches!(
            gw.update_server(&other, id, rename.clone()).await,
            Err(GatewayError::Forbidden(_))
        ));
        assert_eq!(gw.update_server(&owner, id, rename).await.unwrap().name, "Renamed");

        assert!(matches!(
            gw.delete_server(&other, id).await,
            Err(GatewayError::Forbidden(_))
        ));
        gw.delete_server(&owner, id).await.unwrap();
        assert!(matches!(
            gw.server_detail(&owner, id).await,
            Err(GatewayError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn join_and_leave() {
        let gw = gateway();
        let owner = profile(&gw, "owner").await;
        let guest = profile(&gw, "guest").await;
        let id = gw.create_server(&owner, create("Test")).await.unwrap().server.id;

        assert!(matches!(
            gw.server_detail(&guest, id).await,
            Err(GatewayError::Forbidden(_))
        ));
        gw.join_server(&guest, id).await.unwrap();
        assert!(matches!(
            gw.join_server(&guest, id).await,
            Err(GatewayError::Conflict(_))
        ));

        let detail = gw.server_detail(&guest, id).await.unwrap();
        assert_eq!(detail.members.len(), 2);
        assert_eq!(gw.list_servers(&guest).await.unwrap().len(), 1);

        assert!(matches!(
            gw.leave_server(&owner, id).await,
            Err(GatewayError::Forbidden(_))
        ));
        gw.leave_server(&guest, id).await.unwrap();
        assert!(gw.list_servers(&guest).await.unwrap().is_empty());
    }
}
