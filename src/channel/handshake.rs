//! Channel-open interceptor.
//!
//! Runs the authentication pipeline exactly once per channel, on the first
//! `CONNECT`/`STOMP` frame, and binds the outcome to the [`ChannelSession`].
//! Every other frame passes through untouched.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::auth::{AuthError, Authentication, Authenticator};
use crate::channel::frame::Frame;
use crate::channel::session::ChannelSession;

/// What to do with a channel whose handshake credential is rejected.
///
/// A channel that offers *no* credential is anonymous under both policies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandshakePolicy {
    /// Open the channel without identity. Identity-scoped destinations
    /// refuse it later.
    #[default]
    Anonymous,
    /// Answer with an `ERROR` frame and close the transport.
    Reject,
}

/// Result of passing one frame through the interceptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeOutcome {
    /// Not a channel-open frame, or the channel was already open
    Ignored,
    /// A principal was bound to the channel
    Authenticated,
    /// The channel opened without identity
    Anonymous,
}

/// Handshake failures that end the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeError {
    /// Credential rejected under [`HandshakePolicy::Reject`]
    Rejected,
    /// Principal store unavailable; the client may retry on a new channel
    Unavailable,
}

impl HandshakeError {
    /// Text for the `message` header of the closing `ERROR` frame.
    pub fn message(&self) -> &'static str {
        match self {
            Self::Rejected => "Unauthorized",
            Self::Unavailable => "Authentication temporarily unavailable",
        }
    }
}

impl fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

impl std::error::Error for HandshakeError {}

/// Authenticates channel-open frames.
#[derive(Clone)]
pub struct HandshakeInterceptor {
    authenticator: Arc<Authenticator>,
    policy: HandshakePolicy,
}

impl HandshakeInterceptor {
    pub fn new(authenticator: Arc<Authenticator>, policy: HandshakePolicy) -> Self {
        Self {
            authenticator,
            policy,
        }
    }

    pub fn policy(&self) -> HandshakePolicy {
        self.policy
    }

    /// Inspect `frame` before the channel processes it.
    ///
    /// Must complete before the next frame of the same channel is handled.
    pub async fn pre_send(
        &self,
        session: &mut ChannelSession,
        frame: &Frame,
        now: u64,
    ) -> Result<HandshakeOutcome, HandshakeError> {
        if !frame.command().is_channel_open() {
            return Ok(HandshakeOutcome::Ignored);
        }
        if session.is_open() {
            debug!(
                channel_id = %session.id(),
                "Repeated channel-open frame ignored; identity stays bound"
            );
            return Ok(HandshakeOutcome::Ignored);
        }

        match self.authenticator.authenticate(frame, now).await {
            Ok(Authentication::Authenticated(principal)) => {
                info!(
                    channel_id = %session.id(),
                    user_id = %principal.id(),
                    "Channel authenticated"
                );
                session.bind(principal);
                Ok(HandshakeOutcome::Authenticated)
            }
            Ok(Authentication::Anonymous) => {
                debug!(channel_id = %session.id(), "Channel opened without credential");
                session.open_anonymous();
                Ok(HandshakeOutcome::Anonymous)
            }
            Err(AuthError::Unauthorized) => match self.policy {
                HandshakePolicy::Anonymous => {
                    warn!(
                        channel_id = %session.id(),
                        "Channel credential rejected; continuing anonymously"
                    );
                    session.open_anonymous();
                    Ok(HandshakeOutcome::Anonymous)
                }
                HandshakePolicy::Reject => {
                    warn!(channel_id = %session.id(), "Channel credential rejected; closing");
                    Err(HandshakeError::Rejected)
                }
            },
            Err(AuthError::Unavailable) => {
                warn!(
                    channel_id = %session.id(),
                    "Principal store unavailable during handshake; closing"
                );
                Err(HandshakeError::Unavailable)
            }
        }
    }
}
