//! Realtime event session.
//!
//! A single task owns the WebSocket. It keeps its own copy of the desired
//! topic set, re-sends all of it after every (re)connect, and reconnects with
//! [`Backoff`] delays until shut down or until the event receiver is dropped.

use std::collections::HashSet;
use std::time::Instant;

use anyhow::Context;
use futures::{SinkExt, StreamExt};
use parley_shared::protocol::{ClientFrame, ServerFrame};
use parley_shared::Topic;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::config::ClientConfig;
use crate::events::{SessionCommand, SessionEvent};
use crate::subscriptions::Delta;

const EVENT_CHANNEL_CAPACITY: usize = 256;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Control side of a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionHandle {
    /// Forward a subscription delta. Empty deltas are dropped.
    pub fn apply(&self, delta: Delta) {
        if delta.is_empty() {
            return;
        }
        if self.commands.send(SessionCommand::Apply(delta)).is_err() {
            debug!("session already stopped");
        }
    }

    pub fn shutdown(&self) {
        let _ = self.commands.send(SessionCommand::Shutdown);
    }
}

/// Start the session task with an initial topic set.
pub fn spawn(
    config: ClientConfig,
    initial: HashSet<Topic>,
) -> (SessionHandle, mpsc::Receiver<SessionEvent>, JoinHandle<()>) {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let task = tokio::spawn(run_session(config, initial, command_rx, event_tx));
    (SessionHandle { commands: command_tx }, event_rx, task)
}

enum Exit {
    /// Shutdown requested or the event consumer went away.
    Stop,
    /// The socket closed; reconnect.
    Closed,
}

async fn run_session(
    config: ClientConfig,
    mut desired: HashSet<Topic>,
    mut commands: mpsc::UnboundedReceiver<SessionCommand>,
    events: mpsc::Sender<SessionEvent>,
) {
    let url = match config.ws_url() {
        Ok(url) => url,
        Err(e) => {
            warn!(error = %e, "cannot start event session");
            return;
        }
    };
    let mut backoff = Backoff::new();

    loop {
        info!(base_url = %config.base_url, attempt = backoff.attempt(), "connecting event stream");
        match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok((mut ws, _)) => {
                backoff.on_connected(Instant::now());
                let exit = match resubscribe_all(&mut ws, &desired).await {
                    Ok(()) => {
                        if events.send(SessionEvent::Connected).await.is_err() {
                            return;
                        }
                        drive(&mut ws, &mut desired, &mut commands, &events).await
                    }
                    Err(e) => Err(e),
                };
                backoff.on_disconnected(Instant::now());
                match exit {
                    Ok(Exit::Stop) => {
                        let _ = ws.close(None).await;
                        info!("event session stopped");
                        return;
                    }
                    Ok(Exit::Closed) => info!("event stream closed"),
                    Err(e) => warn!(error = %e, "event stream failed"),
                }
            }
            Err(e) => warn!(error = %e, "event stream connect failed"),
        }

        let retry_in = backoff.next_delay();
        if events
            .send(SessionEvent::Disconnected { retry_in })
            .await
            .is_err()
        {
            return;
        }

        // Keep tracking subscription changes while waiting.
        let sleep = tokio::time::sleep(retry_in);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => break,
                cmd = commands.recv() => match cmd {
                    Some(SessionCommand::Apply(delta)) => apply_delta(&mut desired, &delta),
                    Some(SessionCommand::Shutdown) | None => return,
                },
            }
        }
    }
}

async fn drive(
    ws: &mut Socket,
    desired: &mut HashSet<Topic>,
    commands: &mut mpsc::UnboundedReceiver<SessionCommand>,
    events: &mpsc::Sender<SessionEvent>,
) -> anyhow::Result<Exit> {
    loop {
        tokio::select! {
            cmd = commands.recv() => {
                let Some(cmd) = cmd else {
                    return Ok(Exit::Stop);
                };
                match cmd {
                    SessionCommand::Apply(delta) => {
                        apply_delta(desired, &delta);
                        for frame in delta.frames() {
                            send_frame(ws, &frame).await?;
                        }
                    }
                    SessionCommand::Shutdown => return Ok(Exit::Stop),
                }
            }
            msg = ws.next() => {
                let Some(msg) = msg else {
                    return Ok(Exit::Closed);
                };
                match msg.context("reading event stream")? {
                    Message::Text(text) => match serde_json::from_str::<ServerFrame>(&text) {
                        Ok(frame) => {
                            if events.send(SessionEvent::Frame(frame)).await.is_err() {
                                return Ok(Exit::Stop);
                            }
                        }
                        Err(e) => warn!(error = %e, "ignoring malformed frame"),
                    },
                    Message::Close(frame) => {
                        debug!(?frame, "server closed event stream");
                        return Ok(Exit::Closed);
                    }
                    _ => {}
                }
            }
        }
    }
}

async fn resubscribe_all(ws: &mut Socket, desired: &HashSet<Topic>) -> anyhow::Result<()> {
    if desired.is_empty() {
        return Ok(());
    }
    let mut topics: Vec<Topic> = desired.iter().copied().collect();
    topics.sort_by_key(|t| t.to_string());
    debug!(count = topics.len(), "resubscribing");
    send_frame(ws, &ClientFrame::Subscribe { topics }).await
}

async fn send_frame(ws: &mut Socket, frame: &ClientFrame) -> anyhow::Result<()> {
    let text = serde_json::to_string(frame)?;
    ws.send(Message::Text(text))
        .await
        .context("writing event stream")?;
    Ok(())
}

fn apply_delta(desired: &mut HashSet<Topic>, delta: &Delta) {
    for topic in &delta.unsubscribe {
        desired.remove(topic);
    }
    desired.extend(delta.subscribe.iter().copied());
}
