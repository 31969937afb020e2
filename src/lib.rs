// Core modules
pub mod auth;
pub mod config;
pub mod db;
pub mod types;

// Real-time channels and the HTTP surface
pub mod api;
pub mod channel;

// Re-export key types and functions
pub use api::{AppState, create_router};
pub use auth::{
    AuthError, Authentication, Authenticator, Denylist, LoadError, MemoryPrincipalStore,
    Principal, PrincipalLoader, RequestContext, TokenCodec, TokenError, UserCreate, UserStore,
    extract_bearer, unix_now,
};
pub use channel::{ChannelServices, HandshakePolicy, InboundMessage};
pub use config::{AuthConfig, ChannelConfig, ConfigError, JwtConfig};
pub use db::{DatabaseConfig, create_connection, ensure_schema};
pub use types::{ChannelId, UserId, Username};

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::mpsc;

use channel::{Broker, DestinationPolicy, HandshakeInterceptor};

/// Buffer of application messages waiting for a handler.
pub const APP_SINK_CAPACITY: usize = 1024;

/// Convenience function to wire the authenticator, channels and router state.
///
/// Application `SEND`s arrive on the returned receiver; dropping it makes
/// `/app` destinations answer with an `ERROR` frame.
pub fn create_app_state(
    config: &AuthConfig,
    loader: Arc<dyn PrincipalLoader>,
) -> Result<(AppState, mpsc::Receiver<InboundMessage>)> {
    let authenticator = Arc::new(Authenticator::from_config(config, loader)?);

    let (app_tx, app_rx) = mpsc::channel(APP_SINK_CAPACITY);
    let channels = ChannelServices::new(
        HandshakeInterceptor::new(authenticator.clone(), config.handshake_policy),
        DestinationPolicy::new(config.channel.clone()),
        Broker::new(),
    )
    .with_app_sink(app_tx);

    Ok((AppState::new(authenticator, Arc::new(channels)), app_rx))
}
