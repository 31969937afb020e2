//! In-process message broker for `/topic` and `/queue` destinations.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast};
use tracing::debug;
use uuid::Uuid;

use crate::types::UserId;

/// Per-destination buffer; slow subscribers skip what they missed.
pub const DEFAULT_DESTINATION_CAPACITY: usize = 256;

/// A message published to a broker destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub message_id: String,
    pub destination: String,
    pub content_type: Option<String>,
    pub body: String,
    /// Bound principal of the publishing channel, if any
    pub sender: Option<UserId>,
}

impl Delivery {
    pub fn new(destination: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            destination: destination.into(),
            content_type: None,
            body: body.into(),
            sender: None,
        }
    }

    pub fn with_content_type(mut self, content_type: Option<String>) -> Self {
        self.content_type = content_type;
        self
    }

    pub fn with_sender(mut self, sender: Option<UserId>) -> Self {
        self.sender = sender;
        self
    }
}

/// Fan-out broker shared by every channel.
#[derive(Clone)]
pub struct Broker {
    destinations: Arc<RwLock<HashMap<String, broadcast::Sender<Delivery>>>>,
    capacity: usize,
}

impl Broker {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_DESTINATION_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            destinations: Arc::new(RwLock::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    /// Listen on `destination`, creating it on first use.
    pub async fn subscribe(&self, destination: &str) -> broadcast::Receiver<Delivery> {
        if let Some(sender) = self.destinations.read().await.get(destination) {
            return sender.subscribe();
        }
        let mut destinations = self.destinations.write().await;
        destinations
            .entry(destination.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Deliver to current subscribers. Returns how many received it.
    pub async fn publish(&self, delivery: Delivery) -> usize {
        let destination = delivery.destination.clone();
        let sender = self.destinations.read().await.get(&destination).cloned();
        let Some(sender) = sender else {
            debug!(destination = %destination, "No subscribers; message dropped");
            return 0;
        };
        match sender.send(delivery) {
            Ok(n) => n,
            Err(_) => {
                let mut destinations = self.destinations.write().await;
                if destinations
                    .get(&destination)
                    .is_some_and(|s| s.receiver_count() == 0)
                {
                    destinations.remove(&destination);
                }
                0
            }
        }
    }

    /// Number of destinations with a live channel.
    pub async fn destination_count(&self) -> usize {
        self.destinations.read().await.len()
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}
