//! Per-channel authentication state.

use chrono::{DateTime, Utc};

use crate::auth::Principal;
use crate::types::{ChannelId, UserId};

/// Where a channel stands with respect to its handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelAuthState {
    /// No channel-open frame processed yet
    AwaitingHandshake,
    /// Opened without a usable credential; never upgraded later
    Anonymous,
    /// Opened with a verified credential; bound for the channel's lifetime
    Authenticated(Principal),
}

/// One open channel. Owned by the task serving that channel and dropped when
/// the transport closes.
#[derive(Debug)]
pub struct ChannelSession {
    id: ChannelId,
    created_at: DateTime<Utc>,
    state: ChannelAuthState,
}

impl ChannelSession {
    pub fn new() -> Self {
        Self::with_id(ChannelId::generate())
    }

    pub fn with_id(id: ChannelId) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            state: ChannelAuthState::AwaitingHandshake,
        }
    }

    pub fn id(&self) -> &ChannelId {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn state(&self) -> &ChannelAuthState {
        &self.state
    }

    pub fn is_open(&self) -> bool {
        !matches!(self.state, ChannelAuthState::AwaitingHandshake)
    }

    pub fn principal(&self) -> Option<&Principal> {
        match &self.state {
            ChannelAuthState::Authenticated(principal) => Some(principal),
            _ => None,
        }
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.principal().map(|p| p.id())
    }

    /// Bind `principal` for the rest of the channel's life.
    ///
    /// Returns `false` and changes nothing once the handshake has completed.
    pub fn bind(&mut self, principal: Principal) -> bool {
        self.settle(ChannelAuthState::Authenticated(principal))
    }

    /// Open the channel without identity.
    ///
    /// Returns `false` and changes nothing once the handshake has completed.
    pub fn open_anonymous(&mut self) -> bool {
        self.settle(ChannelAuthState::Anonymous)
    }

    fn settle(&mut self, state: ChannelAuthState) -> bool {
        if self.is_open() {
            return false;
        }
        self.state = state;
        true
    }
}

impl Default for ChannelSession {
    fn default() -> Self {
        Self::new()
    }
}
