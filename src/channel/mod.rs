//! Real-time channels: STOMP over WebSocket.
//!
//! A channel authenticates once, on its `CONNECT` frame. The
//! [`HandshakeInterceptor`] binds the resulting principal to the channel's
//! [`ChannelSession`] and every later frame on that channel is attributed to
//! it without presenting a credential again. Channels that open without
//! identity stay anonymous for life; [`DestinationPolicy`] refuses them on
//! identity-scoped destinations.
//!
//! ```text
//! CONNECT ──▶ AwaitingHandshake ──▶ Authenticated(principal)
//!                    │
//!                    ├──▶ Anonymous            (no credential, or rejected under `anonymous` policy)
//!                    └──▶ ERROR + close        (rejected under `reject` policy, or store unavailable)
//! ```

pub mod broker;
pub mod connection;
pub mod destination;
pub mod frame;
pub mod handshake;
pub mod session;

#[cfg(test)]
mod integration_tests;

pub use broker::{Broker, Delivery};
pub use connection::{
    ChannelConnection, ChannelServices, Flow, InboundMessage, OUTBOUND_CAPACITY, USER_ID_HEADER,
};
pub use destination::{DestinationError, DestinationPolicy, Route};
pub use frame::{Command, Frame, FrameError};
pub use handshake::{HandshakeError, HandshakeInterceptor, HandshakeOutcome, HandshakePolicy};
pub use session::{ChannelAuthState, ChannelSession};
