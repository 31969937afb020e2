//! Integration tests for the token and channel flow.
//!
//! These drive a [`ChannelConnection`] with wire-format frames, from token
//! issue through handshake to identity-scoped destinations.

#![cfg(test)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::auth::{
    Authenticator, LoadError, MemoryPrincipalStore, Principal, PrincipalLoader, TokenCodec,
    TokenError,
};
use crate::channel::{
    Broker, ChannelConnection, ChannelServices, Command, DestinationPolicy, Flow, Frame,
    HandshakeInterceptor, HandshakePolicy, OUTBOUND_CAPACITY, USER_ID_HEADER,
};
use crate::config::{ChannelConfig, JwtConfig};
use crate::types::UserId;

const SECRET: &str = "integration-test-secret-of-at-least-32-bytes";
const T0: u64 = 1_700_000_000;
const TTL: u64 = 3600;

/// Loader that counts lookups so tests can tell when a channel re-verifies.
struct CountingLoader {
    inner: MemoryPrincipalStore,
    calls: AtomicUsize,
}

impl CountingLoader {
    fn new() -> Self {
        Self {
            inner: MemoryPrincipalStore::with_principals([
                Principal::new(UserId::new(42), "erin").with_display_name("Erin"),
                Principal::new(UserId::new(7), "frank"),
            ]),
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PrincipalLoader for CountingLoader {
    async fn load_by_id(&self, id: UserId) -> Result<Principal, LoadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.load_by_id(id).await
    }
}

struct Backend {
    codec: Arc<TokenCodec>,
    loader: Arc<CountingLoader>,
    services: Arc<ChannelServices>,
    app_rx: mpsc::Receiver<crate::channel::InboundMessage>,
}

fn backend(policy: HandshakePolicy) -> Backend {
    let codec = Arc::new(
        TokenCodec::new(&JwtConfig::new(SECRET).with_expiration_seconds(TTL)).unwrap(),
    );
    let loader = Arc::new(CountingLoader::new());
    let authenticator = Arc::new(Authenticator::new(
        codec.clone(),
        loader.clone(),
        Duration::from_millis(200),
    ));
    let (app_tx, app_rx) = mpsc::channel(16);
    let services = ChannelServices::new(
        HandshakeInterceptor::new(authenticator, policy),
        DestinationPolicy::new(ChannelConfig::default()),
        Broker::new(),
    )
    .with_app_sink(app_tx);

    Backend {
        codec,
        loader,
        services: Arc::new(services),
        app_rx,
    }
}

impl Backend {
    fn open(&self) -> (ChannelConnection, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        (ChannelConnection::new(self.services.clone(), tx), rx)
    }
}

/// Parse a frame from wire text, as the socket loop would.
fn wire(raw: &str) -> Frame {
    Frame::parse(raw).unwrap()
}

fn connect_with(token: &str) -> Frame {
    wire(&format!(
        "CONNECT\naccept-version:1.2\nhost:social\nAuthorization:Bearer {}\n\n\0",
        token
    ))
}

#[test]
fn test_token_lifetime_boundaries() {
    let backend = backend(HandshakePolicy::Anonymous);
    let token = backend.codec.issue(UserId::new(42), T0).unwrap();

    assert_eq!(backend.codec.verify(&token, T0 + 3599), Ok(UserId::new(42)));
    assert_eq!(backend.codec.verify(&token, T0 + TTL), Ok(UserId::new(42)));
    assert_eq!(
        backend.codec.verify(&token, T0 + 3601),
        Err(TokenError::Expired)
    );
}

#[tokio::test]
async fn test_end_to_end_channel_binding() {
    let mut backend = backend(HandshakePolicy::Anonymous);
    let token = backend.codec.issue(UserId::new(42), T0).unwrap();
    let other = backend.codec.issue(UserId::new(7), T0).unwrap();
    let (mut conn, mut rx) = backend.open();

    // Channel-open before expiry binds 42
    let flow = conn.handle_frame(connect_with(&token), T0 + 3599).await;
    assert_eq!(flow, Flow::Continue);
    let connected = rx.recv().await.unwrap();
    assert_eq!(connected.command(), Command::Connected);
    assert_eq!(connected.header("user-name"), Some("erin"));
    assert_eq!(conn.session().user_id(), Some(UserId::new(42)));
    assert_eq!(backend.loader.calls(), 1);

    // A later frame carrying a different token changes nothing
    conn.handle_frame(connect_with(&other), T0 + 3599).await;
    let send = wire(&format!(
        "SEND\ndestination:/app/chat.send\nAuthorization:Bearer {}\n\nhello\0",
        other
    ));
    conn.handle_frame(send, T0 + 3599).await;

    let inbound = backend.app_rx.recv().await.unwrap();
    assert_eq!(inbound.principal.map(|p| p.id()), Some(UserId::new(42)));
    assert_eq!(inbound.frame.header(USER_ID_HEADER), Some("42"));
    assert_eq!(inbound.frame.body(), "hello");

    // Bound once, never looked up again
    assert_eq!(conn.session().user_id(), Some(UserId::new(42)));
    assert_eq!(backend.loader.calls(), 1);
}

#[tokio::test]
async fn test_bound_channel_outlives_token_expiry() {
    let mut backend = backend(HandshakePolicy::Anonymous);
    let token = backend.codec.issue(UserId::new(42), T0).unwrap();
    let (mut conn, mut rx) = backend.open();

    conn.handle_frame(connect_with(&token), T0).await;
    rx.recv().await.unwrap();

    conn.handle_frame(wire("SEND\ndestination:/app/ping\n\n\0"), T0 + 10 * TTL)
        .await;
    let inbound = backend.app_rx.recv().await.unwrap();
    assert_eq!(inbound.principal.map(|p| p.id()), Some(UserId::new(42)));
}

#[tokio::test]
async fn test_expired_handshake_leaves_channel_anonymous() {
    let backend = backend(HandshakePolicy::Anonymous);
    let token = backend.codec.issue(UserId::new(42), T0).unwrap();
    let (mut conn, mut rx) = backend.open();

    let flow = conn.handle_frame(connect_with(&token), T0 + 3601).await;
    assert_eq!(flow, Flow::Continue);
    let connected = rx.recv().await.unwrap();
    assert_eq!(connected.command(), Command::Connected);
    assert_eq!(connected.header("user-name"), None);
    assert!(conn.session().principal().is_none());

    for raw in [
        "SEND\ndestination:/app/chat.send\n\nhi\0",
        "SEND\ndestination:/queue/jobs\n\nhi\0",
        "SUBSCRIBE\nid:0\ndestination:/user/queue/messages\n\n\0",
    ] {
        assert_eq!(conn.handle_frame(wire(raw), T0).await, Flow::Continue);
        assert_eq!(rx.recv().await.unwrap().command(), Command::Error);
    }
}

#[tokio::test]
async fn test_expired_handshake_closes_under_reject_policy() {
    let backend = backend(HandshakePolicy::Reject);
    let token = backend.codec.issue(UserId::new(42), T0).unwrap();
    let (mut conn, mut rx) = backend.open();

    let flow = conn.handle_frame(connect_with(&token), T0 + 3601).await;
    assert_eq!(flow, Flow::Close);
    let error = rx.recv().await.unwrap();
    assert_eq!(error.command(), Command::Error);
    // Clients learn nothing about which check failed
    assert_eq!(error.header("message"), Some("Unauthorized"));
}

#[tokio::test]
async fn test_anonymous_channel_can_use_public_topics() {
    let backend = backend(HandshakePolicy::Anonymous);
    let token = backend.codec.issue(UserId::new(42), T0).unwrap();

    let (mut anon, mut anon_rx) = backend.open();
    anon.handle_frame(wire("CONNECT\naccept-version:1.2\n\n\0"), T0)
        .await;
    anon.handle_frame(
        wire("SUBSCRIBE\nid:feed\ndestination:/topic/feed\nreceipt:r\n\n\0"),
        T0,
    )
    .await;
    assert_eq!(anon_rx.recv().await.unwrap().command(), Command::Connected);
    assert_eq!(anon_rx.recv().await.unwrap().command(), Command::Receipt);

    let (mut erin, mut erin_rx) = backend.open();
    erin.handle_frame(connect_with(&token), T0).await;
    erin_rx.recv().await.unwrap();
    erin.handle_frame(wire("SEND\ndestination:/topic/feed\n\nnew post\0"), T0)
        .await;

    let message = anon_rx.recv().await.unwrap();
    assert_eq!(message.command(), Command::Message);
    assert_eq!(message.body(), "new post");
    assert_eq!(message.header(USER_ID_HEADER), Some("42"));

    // Anonymous publishers cannot borrow an identity
    anon.handle_frame(
        wire("SEND\ndestination:/topic/feed\nuser-id:42\n\nspoof\0"),
        T0,
    )
    .await;
    let message = anon_rx.recv().await.unwrap();
    assert_eq!(message.body(), "spoof");
    assert_eq!(message.header(USER_ID_HEADER), None);
}

#[tokio::test]
async fn test_channels_are_isolated() {
    let backend = backend(HandshakePolicy::Anonymous);

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let codec = backend.codec.clone();
            let services = backend.services.clone();
            tokio::spawn(async move {
                let id = if i % 2 == 0 { 42 } else { 7 };
                let token = codec.issue(UserId::new(id), T0).unwrap();
                let (tx, mut rx) = mpsc::channel(OUTBOUND_CAPACITY);
                let mut conn = ChannelConnection::new(services, tx);
                conn.handle_frame(connect_with(&token), T0).await;
                rx.recv().await.unwrap();
                (id, conn.session().user_id())
            })
        })
        .collect();

    for handle in handles {
        let (id, bound) = handle.await.unwrap();
        assert_eq!(bound, Some(UserId::new(id)));
    }
    assert_eq!(backend.loader.calls(), 16);
}
