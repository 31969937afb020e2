//! Frame handling for one open channel.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::auth::Principal;
use crate::channel::broker::{Broker, Delivery};
use crate::channel::destination::{DestinationError, DestinationPolicy, Route};
use crate::channel::frame::{Command, Frame};
use crate::channel::handshake::{HandshakeInterceptor, HandshakeOutcome};
use crate::channel::session::ChannelSession;
use crate::types::ChannelId;

/// Header stamped on every `SEND` with the id of the bound principal.
pub const USER_ID_HEADER: &str = "user-id";

/// Protocol version answered in `CONNECTED`.
pub const STOMP_VERSION: &str = "1.2";

/// Frames queued for one channel's transport before new ones are dropped.
pub const OUTBOUND_CAPACITY: usize = 256;

/// A `SEND` to an application destination, handed to the application.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub channel_id: ChannelId,
    /// Principal bound at handshake; always present for identity-scoped paths
    pub principal: Option<Principal>,
    /// Destination with the application prefix removed
    pub path: String,
    /// The frame as received, with `user-id` stamped
    pub frame: Frame,
}

/// Whether the transport should stay open after a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

/// Collaborators shared by every channel.
pub struct ChannelServices {
    interceptor: HandshakeInterceptor,
    destinations: DestinationPolicy,
    broker: Broker,
    app_sink: Option<mpsc::Sender<InboundMessage>>,
}

impl ChannelServices {
    pub fn new(
        interceptor: HandshakeInterceptor,
        destinations: DestinationPolicy,
        broker: Broker,
    ) -> Self {
        Self {
            interceptor,
            destinations,
            broker,
            app_sink: None,
        }
    }

    /// Route application `SEND`s into `sink`.
    pub fn with_app_sink(mut self, sink: mpsc::Sender<InboundMessage>) -> Self {
        self.app_sink = Some(sink);
        self
    }

    pub fn broker(&self) -> &Broker {
        &self.broker
    }
}

/// One channel: its session, its subscriptions and its outbound queue.
///
/// Frames are handled strictly in order, so the handshake finishes before
/// anything after it on the same channel is looked at. The outbound queue is
/// bounded; a peer that stops reading loses frames instead of growing it.
pub struct ChannelConnection {
    session: ChannelSession,
    services: Arc<ChannelServices>,
    outbound: mpsc::Sender<Frame>,
    subscriptions: HashMap<String, JoinHandle<()>>,
}

impl ChannelConnection {
    pub fn new(services: Arc<ChannelServices>, outbound: mpsc::Sender<Frame>) -> Self {
        Self {
            session: ChannelSession::new(),
            services,
            outbound,
            subscriptions: HashMap::new(),
        }
    }

    pub fn session(&self) -> &ChannelSession {
        &self.session
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    fn emit(&self, frame: Frame) {
        if let Err(TrySendError::Full(frame)) = self.outbound.try_send(frame) {
            warn!(
                channel_id = %self.session.id(),
                command = %frame.command(),
                "Outbound queue full; frame dropped"
            );
        }
    }

    /// Queue an `ERROR` frame, answering `receipt` if given.
    pub fn emit_error(&self, message: &str, receipt: Option<&str>) {
        let mut frame = Frame::error(message);
        if let Some(receipt) = receipt {
            frame.set_header("receipt-id", receipt);
        }
        self.emit(frame);
    }

    fn emit_receipt(&self, receipt: Option<&str>) {
        if let Some(receipt) = receipt {
            self.emit(Frame::new(Command::Receipt).with_header("receipt-id", receipt));
        }
    }

    /// Process one inbound frame at time `now`.
    pub async fn handle_frame(&mut self, frame: Frame, now: u64) -> Flow {
        let outcome = self
            .services
            .interceptor
            .pre_send(&mut self.session, &frame, now)
            .await;

        match outcome {
            Err(e) => {
                self.emit_error(e.message(), None);
                return Flow::Close;
            }
            Ok(HandshakeOutcome::Authenticated) | Ok(HandshakeOutcome::Anonymous) => {
                self.emit(self.connected_frame());
                return Flow::Continue;
            }
            Ok(HandshakeOutcome::Ignored) => {}
        }

        if !self.session.is_open() {
            warn!(
                channel_id = %self.session.id(),
                command = %frame.command(),
                "Frame before channel-open"
            );
            self.emit_error("Channel not connected", None);
            return Flow::Close;
        }

        match frame.command() {
            // Repeated channel-open; identity stays as bound
            Command::Connect | Command::Stomp => Flow::Continue,
            Command::Send => {
                self.handle_send(frame).await;
                Flow::Continue
            }
            Command::Subscribe => {
                self.handle_subscribe(&frame).await;
                Flow::Continue
            }
            Command::Unsubscribe => {
                self.handle_unsubscribe(&frame);
                Flow::Continue
            }
            Command::Disconnect => {
                self.emit_receipt(frame.receipt());
                debug!(channel_id = %self.session.id(), "Channel disconnected by client");
                Flow::Close
            }
            Command::Ack | Command::Nack | Command::Begin | Command::Commit | Command::Abort => {
                self.emit_receipt(frame.receipt());
                Flow::Continue
            }
            Command::Connected | Command::Message | Command::Receipt | Command::Error => {
                self.emit_error(
                    &format!("Unexpected client command: {}", frame.command()),
                    frame.receipt(),
                );
                Flow::Continue
            }
        }
    }

    fn connected_frame(&self) -> Frame {
        let mut frame = Frame::new(Command::Connected)
            .with_header("version", STOMP_VERSION)
            .with_header("heart-beat", "0,0")
            .with_header("session", self.session.id().as_str());
        if let Some(principal) = self.session.principal() {
            frame.set_header("user-name", principal.username().as_str());
        }
        frame
    }

    fn refuse(&self, error: &DestinationError, receipt: Option<&str>) {
        warn!(
            channel_id = %self.session.id(),
            user_id = ?self.session.user_id(),
            "Destination refused: {}",
            error
        );
        self.emit_error(&error.to_string(), receipt);
    }

    async fn handle_send(&self, mut frame: Frame) {
        let receipt = frame.receipt().map(str::to_string);
        let Some(destination) = frame.destination().map(str::to_string) else {
            self.refuse(&DestinationError::Missing, receipt.as_deref());
            return;
        };

        let user = self.session.user_id();
        let route = match self.services.destinations.resolve_send(&destination, user) {
            Ok(route) => route,
            Err(e) => {
                self.refuse(&e, receipt.as_deref());
                return;
            }
        };

        // A client-supplied user-id is never trusted
        match user {
            Some(id) => frame.set_header(USER_ID_HEADER, id.to_string()),
            None => frame.remove_header(USER_ID_HEADER),
        }

        match route {
            Route::App(path) => {
                let Some(sink) = &self.services.app_sink else {
                    debug!(path = %path, "No application handler; message dropped");
                    self.emit_receipt(receipt.as_deref());
                    return;
                };
                let message = InboundMessage {
                    channel_id: self.session.id().clone(),
                    principal: self.session.principal().cloned(),
                    path,
                    frame,
                };
                if sink.send(message).await.is_err() {
                    warn!(channel_id = %self.session.id(), "Application handler is gone");
                    self.emit_error("Destination unavailable", receipt.as_deref());
                    return;
                }
            }
            Route::Broker(target) => {
                let delivery = Delivery::new(target, frame.body())
                    .with_content_type(frame.header("content-type").map(str::to_string))
                    .with_sender(user);
                self.services.broker.publish(delivery).await;
            }
        }

        self.emit_receipt(receipt.as_deref());
    }

    async fn handle_subscribe(&mut self, frame: &Frame) {
        let receipt = frame.receipt();
        let Some(id) = frame.header("id") else {
            self.emit_error("Missing subscription id", receipt);
            return;
        };
        let Some(destination) = frame.destination() else {
            self.refuse(&DestinationError::Missing, receipt);
            return;
        };

        let resolved = match self
            .services
            .destinations
            .resolve_subscribe(destination, self.session.user_id())
        {
            Ok(resolved) => resolved,
            Err(e) => {
                self.refuse(&e, receipt);
                return;
            }
        };

        let rx = self.services.broker.subscribe(&resolved).await;
        let task = tokio::spawn(forward(
            rx,
            self.outbound.clone(),
            id.to_string(),
            destination.to_string(),
        ));
        if let Some(previous) = self.subscriptions.insert(id.to_string(), task) {
            previous.abort();
        }

        debug!(
            channel_id = %self.session.id(),
            subscription = %id,
            destination = %resolved,
            "Subscribed"
        );
        self.emit_receipt(receipt);
    }

    fn handle_unsubscribe(&mut self, frame: &Frame) {
        let receipt = frame.receipt();
        let Some(id) = frame.header("id") else {
            self.emit_error("Missing subscription id", receipt);
            return;
        };
        if let Some(task) = self.subscriptions.remove(id) {
            task.abort();
        }
        self.emit_receipt(receipt);
    }
}

impl Drop for ChannelConnection {
    fn drop(&mut self) {
        for (_, task) in self.subscriptions.drain() {
            task.abort();
        }
    }
}

/// Copy broker deliveries onto the channel as `MESSAGE` frames.
///
/// Deliveries that find the outbound queue full are skipped, the same way a
/// lagging broadcast receiver skips.
async fn forward(
    mut rx: broadcast::Receiver<Delivery>,
    outbound: mpsc::Sender<Frame>,
    subscription: String,
    destination: String,
) {
    let mut dropped: u64 = 0;
    loop {
        let delivery = match rx.recv().await {
            Ok(delivery) => delivery,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(subscription = %subscription, skipped, "Subscriber lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        let mut frame = Frame::new(Command::Message)
            .with_header("subscription", subscription.as_str())
            .with_header("message-id", delivery.message_id)
            .with_header("destination", destination.as_str());
        if let Some(content_type) = delivery.content_type {
            frame.set_header("content-type", content_type);
        }
        if let Some(sender) = delivery.sender {
            frame.set_header(USER_ID_HEADER, sender.to_string());
        }

        match outbound.try_send(frame.with_body(delivery.body)) {
            Ok(()) => {
                if dropped > 0 {
                    warn!(subscription = %subscription, dropped, "Slow subscriber skipped messages");
                    dropped = 0;
                }
            }
            Err(TrySendError::Full(_)) => dropped += 1,
            Err(TrySendError::Closed(_)) => break,
        }
    }
}
