//! Messages exchanged between the event session task and the owner of the
//! client state.

use std::time::Duration;

use parley_shared::protocol::ServerFrame;

use crate::subscriptions::Delta;

/// Emitted by the session task, consumed by [`ClientState::handle`](crate::state::ClientState::handle).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Connected and the full desired topic set was re-sent.
    Connected,
    /// The stream dropped; the next attempt starts after `retry_in`.
    Disconnected { retry_in: Duration },
    Frame(ServerFrame),
}

#[derive(Debug, Clone)]
pub enum SessionCommand {
    /// Apply a subscription delta now and remember it for reconnects.
    Apply(Delta),
    Shutdown,
}
