//! Realtime event stream.
//!
//! One WebSocket per client. The connection keeps a single
//! `topic -> forwarding task` map: subscribing spawns a task that drains the
//! bus queue into the connection's outbound channel, and unsubscribing or
//! disconnecting aborts it.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use parley_shared::models::Profile;
use parley_shared::protocol::{ClientFrame, ServerFrame};
use parley_shared::Topic;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, Duration};

use crate::bus::BusItem;
use crate::error::{GatewayError, Result};
use crate::gateway::Gateway;
use crate::AppState;

/// Outbound frames buffered per connection before forwarders wait.
const OUTBOUND_CAPACITY: usize = 256;

const PING_INTERVAL: Duration = Duration::from_secs(30);
const SEND_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub token: Option<String>,
}

pub async fn handle_websocket(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse> {
    let token = query
        .token
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| GatewayError::Unauthenticated("missing token".into()))?;
    let actor = state.identity.resolve(token.trim()).await?;
    let gateway = state.gateway.clone();
    Ok(ws.on_upgrade(move |socket| websocket(socket, actor, gateway)))
}

/// Subscription state of one connection.
pub struct Connection {
    gateway: Arc<Gateway>,
    actor: Profile,
    out: mpsc::Sender<ServerFrame>,
    forwarders: HashMap<Topic, JoinHandle<()>>,
}

impl Connection {
    pub fn new(gateway: Arc<Gateway>, actor: Profile, out: mpsc::Sender<ServerFrame>) -> Self {
        Self {
            gateway,
            actor,
            out,
            forwarders: HashMap::new(),
        }
    }

    pub fn topics(&self) -> impl Iterator<Item = &Topic> {
        self.forwarders.keys()
    }

    /// Apply one client frame and return the replies for the caller to
    /// write. Replies never pass through the outbound channel, so a large
    /// frame cannot block on the queue the caller itself drains. Writing them
    /// before polling that queue again keeps `subscribed` ahead of the
    /// topic's first event.
    pub async fn handle(&mut self, frame: ClientFrame) -> Vec<ServerFrame> {
        match frame {
            ClientFrame::Subscribe { topics } => {
                let mut replies = Vec::with_capacity(topics.len());
                for topic in topics {
                    replies.push(self.subscribe(topic).await);
                }
                replies
            }
            ClientFrame::Unsubscribe { topics } => topics
                .into_iter()
                .map(|topic| {
                    if let Some(task) = self.forwarders.remove(&topic) {
                        task.abort();
                    }
                    ServerFrame::Unsubscribed { topic }
                })
                .collect(),
            ClientFrame::Ping => vec![ServerFrame::Pong],
        }
    }

    async fn subscribe(&mut self, topic: Topic) -> ServerFrame {
        if self.forwarders.contains_key(&topic) {
            return ServerFrame::Subscribed { topic };
        }
        if let Err(e) = self.gateway.authorize_topic(&self.actor, topic).await {
            tracing::info!(profile = %self.actor.id, topic = %topic, reason = %e, "subscription denied");
            return ServerFrame::Denied {
                topic,
                reason: e.body().reason,
            };
        }

        let mut rx = self.gateway.bus().subscribe(topic).await;
        let out = self.out.clone();
        let task = tokio::spawn(async move {
            while let Some(item) = rx.recv().await {
                let frame = match item {
                    BusItem::Event(event) => ServerFrame::Event((*event).clone()),
                    BusItem::Lagged { topic, dropped } => ServerFrame::Lagged { topic, dropped },
                };
                if out.send(frame).await.is_err() {
                    break;
                }
            }
        });
        self.forwarders.insert(topic, task);
        tracing::debug!(profile = %self.actor.id, topic = %topic, "subscribed");
        ServerFrame::Subscribed { topic }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        for (_, task) in self.forwarders.drain() {
            task.abort();
        }
    }
}

async fn send_frame(
    ws_tx: &mut futures::stream::SplitSink<WebSocket, Message>,
    frame: &ServerFrame,
) -> std::result::Result<(), ()> {
    let json = match serde_json::to_string(frame) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize frame");
            return Ok(());
        }
    };
    match timeout(SEND_TIMEOUT, ws_tx.send(Message::Text(json))).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(_)) => Err(()),
        Err(_) => {
            tracing::warn!("timed out sending websocket frame");
            Err(())
        }
    }
}

#[tracing::instrument(skip_all, fields(profile = %actor.id))]
async fn websocket(socket: WebSocket, actor: Profile, gateway: Arc<Gateway>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<ServerFrame>(OUTBOUND_CAPACITY);
    let mut conn = Connection::new(gateway, actor, out_tx);
    let mut ping = interval(PING_INTERVAL);

    tracing::info!("event stream opened");
    loop {
        tokio::select! {
            _ = ping.tick() => {
                if ws_tx.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
            read = ws_rx.next() => match read {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<ClientFrame>(&text) {
                    Ok(frame) => {
                        let mut failed = false;
                        for reply in conn.handle(frame).await {
                            if send_frame(&mut ws_tx, &reply).await.is_err() {
                                failed = true;
                                break;
                            }
                        }
                        if failed {
                            break;
                        }
                    }
                    Err(e) => {
                        let frame = ServerFrame::Error { reason: format!("malformed frame: {e}") };
                        if send_frame(&mut ws_tx, &frame).await.is_err() {
                            break;
                        }
                    }
                },
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                _ => {}
            },
            Some(frame) = out_rx.recv() => {
                if send_frame(&mut ws_tx, &frame).await.is_err() {
                    break;
                }
            }
        }
    }

    let topics = conn.topics().count();
    drop(conn);
    tracing::info!(topics, "event stream closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::test_support::{gateway, profile};
    use parley_shared::protocol::{CreateServerRequest, EventPayload, SendMessageRequest};

    async fn next(rx: &mut mpsc::Receiver<ServerFrame>) -> ServerFrame {
        timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("frame in time")
            .expect("channel open")
    }

    /// Aborted forwarders drop their queue on the next scheduler pass.
    async fn drained(gw: &Gateway, topic: Topic) -> bool {
        for _ in 0..50 {
            if gw.bus().subscriber_count(topic).await == 0 {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn subscribe_forwards_events_and_unsubscribe_stops_them() {
        let gw = Arc::new(gateway());
        let owner = profile(&gw, "owner").await;
        let detail = gw
            .create_server(
                &owner,
                CreateServerRequest {
                    name: "Test".into(),
                    icon_url: None,
                },
            )
            .await
            .unwrap();
        let topic = Topic::Channel(detail.channels[0].id);

        let (tx, mut rx) = mpsc::channel(16);
        let mut conn = Connection::new(gw.clone(), owner.clone(), tx);
        let replies = conn.handle(ClientFrame::Subscribe { topics: vec![topic] }).await;
        assert_eq!(replies, vec![ServerFrame::Subscribed { topic }]);

        gw.send_message(
            &owner,
            SendMessageRequest {
                channel_id: Some(detail.channels[0].id),
                content: Some("hello".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        match next(&mut rx).await {
            ServerFrame::Event(e) => assert!(matches!(e.payload, EventPayload::Message(_))),
            other => panic!("unexpected {other:?}"),
        }

        let replies = conn.handle(ClientFrame::Unsubscribe { topics: vec![topic] }).await;
        assert_eq!(replies, vec![ServerFrame::Unsubscribed { topic }]);
        assert!(drained(&gw, topic).await);
    }

    #[tokio::test]
    async fn foreign_topics_are_denied() {
        let gw = Arc::new(gateway());
        let me = profile(&gw, "me").await;
        let other = profile(&gw, "other").await;
        let topic = Topic::Profile(other.id);

        let (tx, _rx) = mpsc::channel(16);
        let mut conn = Connection::new(gw.clone(), me, tx);
        let replies = conn.handle(ClientFrame::Subscribe { topics: vec![topic] }).await;
        assert!(matches!(
            replies.as_slice(),
            [ServerFrame::Denied { topic: t, .. }] if *t == topic
        ));
        assert_eq!(conn.topics().count(), 0);

        assert_eq!(conn.handle(ClientFrame::Ping).await, vec![ServerFrame::Pong]);
    }

    #[tokio::test]
    async fn dropping_the_connection_aborts_forwarders() {
        let gw = Arc::new(gateway());
        let me = profile(&gw, "me").await;
        let topic = Topic::Profile(me.id);

        let (tx, _rx) = mpsc::channel(16);
        let mut conn = Connection::new(gw.clone(), me, tx);
        conn.handle(ClientFrame::Subscribe { topics: vec![topic] }).await;
        assert_eq!(gw.bus().subscriber_count(topic).await, 1);

        drop(conn);
        assert!(drained(&gw, topic).await);
    }

    #[tokio::test]
    async fn oversized_subscribe_does_not_wait_on_the_outbound_queue() {
        let gw = Arc::new(gateway());
        let me = profile(&gw, "me").await;
        let own = Topic::Profile(me.id);
        let mut topics: Vec<Topic> = (0..OUTBOUND_CAPACITY + 44)
            .map(|_| Topic::Profile(parley_shared::ProfileId::new()))
            .collect();
        topics.push(own);
        let total = topics.len();

        // Nobody reads the outbound queue.
        let (tx, _rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let mut conn = Connection::new(gw.clone(), me, tx);
        let replies = timeout(Duration::from_secs(5), conn.handle(ClientFrame::Subscribe { topics }))
            .await
            .expect("handle finished");

        assert_eq!(replies.len(), total);
        assert_eq!(replies.last(), Some(&ServerFrame::Subscribed { topic: own }));
        let denied = replies
            .iter()
            .filter(|f| matches!(f, ServerFrame::Denied { .. }))
            .count();
        assert_eq!(denied, total - 1);
        assert_eq!(conn.topics().count(), 1);
    }
}
