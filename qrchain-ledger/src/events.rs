//! Ledger events and the subscription hub that fans them out.
//!
//! Events are published after a write commits, in commit order. Observers
//! attach with [`EventHub::subscribe`] and detach either explicitly with
//! [`EventHub::unsubscribe`] or by dropping their [`Subscription`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, warn};
use uuid::Uuid;

#[cfg(feature = "typescript")]
use ts_rs::TS;

use crate::role::Role;
use crate::types::{ActorId, ProductId};

/// Observable ledger transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    RoleAssigned {
        identity: ActorId,
        role: Role,
        assigned_by: ActorId,
    },
    RoleRevoked {
        identity: ActorId,
        previous_role: Role,
        revoked_by: ActorId,
    },
    OwnershipTransferred {
        previous_owner: ActorId,
        new_owner: ActorId,
    },
    ProductCreated {
        id: ProductId,
        code: String,
        actor: ActorId,
        status: String,
        timestamp: DateTime<Utc>,
    },
    LocationUpdated {
        id: ProductId,
        actor: ActorId,
        location: String,
        status: String,
        timestamp: DateTime<Utc>,
    },
    StatusUpdated {
        id: ProductId,
        actor: ActorId,
        status: String,
        timestamp: DateTime<Utc>,
    },
}

impl LedgerEvent {
    /// Short name, matching the serialized `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RoleAssigned { .. } => "role_assigned",
            Self::RoleRevoked { .. } => "role_revoked",
            Self::OwnershipTransferred { .. } => "ownership_transferred",
            Self::ProductCreated { .. } => "product_created",
            Self::LocationUpdated { .. } => "location_updated",
            Self::StatusUpdated { .. } => "status_updated",
        }
    }

    /// The product this event concerns, if any.
    pub fn product_id(&self) -> Option<ProductId> {
        match self {
            Self::ProductCreated { id, .. }
            | Self::LocationUpdated { id, .. }
            | Self::StatusUpdated { id, .. } => Some(*id),
            _ => None,
        }
    }
}

/// Hub for broadcasting ledger events to subscribers.
pub struct EventHub {
    sender: broadcast::Sender<LedgerEvent>,
}

impl EventHub {
    /// Create a hub buffering up to `capacity` events per slow subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Attach a new subscriber. It sees only events published after this call.
    pub fn subscribe(&self) -> Subscription {
        let subscription = Subscription {
            id: Uuid::new_v4(),
            receiver: self.sender.subscribe(),
        };
        debug!(subscription_id = %subscription.id, "Subscriber attached");
        subscription
    }

    /// Detach a subscriber.
    pub fn unsubscribe(&self, subscription: Subscription) {
        debug!(subscription_id = %subscription.id, "Subscriber detached");
        drop(subscription);
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: LedgerEvent) {
        // No subscribers is not an error.
        let _ = self.sender.send(event);
    }
}

/// A live attachment to an [`EventHub`].
#[derive(Debug)]
pub struct Subscription {
    id: Uuid,
    receiver: broadcast::Receiver<LedgerEvent>,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Wait for the next event. Returns `None` once the ledger is dropped.
    ///
    /// A subscriber that falls behind skips the events it missed.
    pub async fn recv(&mut self) -> Option<LedgerEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(subscription_id = %self.id, skipped, "Subscriber lagged, events skipped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Take the next buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<LedgerEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(subscription_id = %self.id, skipped, "Subscriber lagged, events skipped");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    /// Drain every event currently buffered.
    pub fn drain(&mut self) -> Vec<LedgerEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    /// Convert into a stream of events, dropping lag notifications.
    pub fn into_stream(self) -> impl Stream<Item = LedgerEvent> {
        let id = self.id;
        BroadcastStream::new(self.receiver).filter_map(move |item| match item {
            Ok(event) => Some(event),
            Err(err) => {
                warn!(subscription_id = %id, error = %err, "Event stream lagged");
                None
            }
        })
    }
}
