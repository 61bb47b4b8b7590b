//! Authorization context resolution.
//!
//! Each resolver performs at most three store lookups (actor-scoped
//! membership, the resource, its parent) and returns the resolved chain so
//! that the operation can both authorize against it and use it afterwards.

use parley_shared::authz::{Action, AuthContext, Target};
use parley_shared::models::{Channel, Conversation, Membership, Message, MessageScope, Profile, Server};
use parley_shared::{ChannelId, ConversationId, MessageId, ServerId, Topic};

use super::{named, Gateway};
use crate::error::Result;

/// A server with the actor's membership on it.
#[derive(Debug, Clone)]
pub struct ServerChain {
    pub server: Server,
    pub membership: Option<Membership>,
}

impl ServerChain {
    pub fn target(&self) -> Target {
        Target::Server {
            server: self.server.clone(),
            membership: self.membership.clone(),
        }
    }
}

/// A channel, its server, and the actor's membership on that server.
#[derive(Debug, Clone)]
pub struct ChannelChain {
    pub channel: Channel,
    pub server: Server,
    pub membership: Option<Membership>,
}

impl ChannelChain {
    pub fn target(&self) -> Target {
        Target::Channel {
            channel: self.channel.clone(),
            server: self.server.clone(),
            membership: self.membership.clone(),
        }
    }
}

impl Gateway {
    pub(crate) async fn server_chain(&self, actor: &Profile, id: ServerId) -> Result<ServerChain> {
        let server = self.store.get_server(id).await.map_err(named("server"))?;
        let membership = self.store.find_membership(actor.id, id).await?;
        Ok(ServerChain { server, membership })
    }

    pub(crate) async fn channel_chain(&self, actor: &Profile, id: ChannelId) -> Result<ChannelChain> {
        let channel = self.store.get_channel(id).await.map_err(named("channel"))?;
        let server = self
            .store
            .get_server(channel.server_id)
            .await
            .map_err(named("server"))?;
        let membership = self.store.find_membership(actor.id, server.id).await?;
        Ok(ChannelChain {
            channel,
            server,
            membership,
        })
    }

    pub(crate) async fn conversation(&self, id: ConversationId) -> Result<Conversation> {
        self.store
            .get_conversation(id)
            .await
            .map_err(named("conversation"))
    }

    pub(crate) async fn message(&self, id: MessageId) -> Result<Message> {
        self.store.get_message(id).await.map_err(named("message"))
    }

    /// Resolve whatever a read of `scope` is authorized against.
    pub(crate) async fn scope_target(&self, actor: &Profile, scope: MessageScope) -> Result<Target> {
        match scope {
            MessageScope::Channel(id) => Ok(self.channel_chain(actor, id).await?.target()),
            MessageScope::Conversation(id) => Ok(Target::Conversation {
                conversation: self.conversation(id).await?,
            }),
        }
    }

    /// Authorize a subscription to (or history read of) a topic.
    pub async fn authorize_topic(&self, actor: &Profile, topic: Topic) -> Result<()> {
        const OP: &str = "authorize_topic";
        let target = match topic {
            Topic::Channel(id) => self.scope_target(actor, MessageScope::Channel(id)).await?,
            Topic::Conversation(id) => {
                self.scope_target(actor, MessageScope::Conversation(id)).await?
            }
            Topic::Server(id) => self.server_chain(actor, id).await?.target(),
            Topic::Profile(id) => Target::Profile { profile_id: id },
        };
        self.authorize(OP, &AuthContext::new(actor.id, target), Action::ReadTopic)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use crate::error::GatewayError;
    use parley_shared::protocol::CreateServerRequest;
    use parley_shared::{ServerId, Topic};

    #[tokio::test]
    async fn topic_authorization() {
        let gw = gateway();
        let p1 = profile(&gw, "p1").await;
        let p2 = profile(&gw, "p2").await;
        let detail = gw
            .create_server(
                &p1,
                CreateServerRequest {
                    name: "Test".into(),
                    icon_url: None,
                },
            )
            .await
            .unwrap();
        let general = detail.channels[0].id;

        gw.authorize_topic(&p1, Topic::Channel(general)).await.unwrap();
        gw.authorize_topic(&p1, Topic::Server(detail.server.id)).await.unwrap();
        gw.authorize_topic(&p1, Topic::Profile(p1.id)).await.unwrap();

        assert!(matches!(
            gw.authorize_topic(&p2, Topic::Channel(general)).await,
            Err(GatewayError::Forbidden(_))
        ));
        assert!(matches!(
            gw.authorize_topic(&p2, Topic::Profile(p1.id)).await,
            Err(GatewayError::Forbidden(_))
        ));
        assert!(matches!(
            gw.authorize_topic(&p2, Topic::Server(ServerId::new())).await,
            Err(GatewayError::NotFound(_))
        ));
    }
}
