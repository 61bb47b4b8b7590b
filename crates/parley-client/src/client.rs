//! Sign-in bootstrap: load the initial state over HTTP, then start the event
//! session with the resulting topic set.

use std::collections::HashSet;

use parley_shared::models::MessageScope;
use parley_shared::protocol::HistoryQuery;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::api::ApiClient;
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::events::SessionEvent;
use crate::session::{self, SessionHandle};
use crate::state::ClientState;

pub struct Client {
    pub api: ApiClient,
    pub state: ClientState,
    pub session: SessionHandle,
    events: mpsc::Receiver<SessionEvent>,
    task: JoinHandle<()>,
}

impl Client {
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let api = ApiClient::new(config.clone());
        let mut state = ClientState::new();

        let me = api.me().await?;
        info!(profile = %me.id, username = %me.username, "signed in");
        state.set_profile(&me);
        state.load_conversations(api.list_conversations().await?);
        state.load_friend_requests(api.list_friend_requests().await?);

        let desired: HashSet<_> = state.subscriptions().desired();
        let (session, events, task) = session::spawn(config, desired);
        Ok(Self {
            api,
            state,
            session,
            events,
            task,
        })
    }

    /// Wait for the next session event and fold it into the state. Returns
    /// `false` once the session has stopped.
    pub async fn pump(&mut self) -> bool {
        let Some(event) = self.events.recv().await else {
            return false;
        };
        let reconnected = event == SessionEvent::Connected;
        let delta = self.state.handle(event);
        self.session.apply(delta);
        if reconnected {
            self.refresh_stale().await;
        }
        true
    }

    pub async fn open(&mut self, scope: MessageScope) -> Result<()> {
        let delta = self.state.open_timeline(scope);
        self.session.apply(delta);
        let page = self.api.history(scope, &HistoryQuery::default()).await?;
        self.state.load_history(scope, page);
        Ok(())
    }

    pub fn close(&mut self, scope: MessageScope) {
        let delta = self.state.close_timeline(scope);
        self.session.apply(delta);
    }

    /// Optimistically send into an open timeline and settle it with the
    /// HTTP outcome.
    pub async fn send(&mut self, scope: MessageScope, content: impl Into<String>) -> Result<()> {
        let Some(ticket) = self.state.begin_send(scope, Some(content.into()), None) else {
            warn!(?scope, "send into a closed view");
            return Ok(());
        };
        match self.api.send_message(&ticket.request).await {
            Ok(message) => {
                self.state.finish_send::<ClientError>(scope, ticket.temp_id, Ok(message));
                Ok(())
            }
            Err(e) => {
                self.state.finish_send(scope, ticket.temp_id, Err(&e));
                Err(e)
            }
        }
    }

    async fn refresh_stale(&mut self) {
        for scope in self.state.stale_scopes() {
            match self.api.history(scope, &HistoryQuery::default()).await {
                Ok(page) => self.state.load_history(scope, page),
                Err(e) => warn!(error = %e, ?scope, "history refresh failed"),
            }
        }
    }

    pub async fn shutdown(self) {
        self.session.shutdown();
        let _ = self.task.await;
    }
}
