//! Durable subscription set.
//!
//! A subscription is the client's *intent* to receive pushed updates for a
//! (category, resource id) pair. The set outlives any single transport
//! connection: the connection task replays the whole set after every
//! successful (re)connect, and the server treats repeated subscribes
//! idempotently.

use std::collections::HashSet;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::protocol::{Category, OutboundMessage, SubscriptionParams};

/// Resource id meaning "every resource in the category".
pub const WILDCARD: &str = "*";

/// A (category, resource id) pair the client wants pushed updates for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subscription {
    /// Resource category
    pub category: Category,
    /// Resource id, [`WILDCARD`] for the whole category
    pub resource_id: String,
}

impl Subscription {
    /// Subscription for a single resource.
    pub fn new(category: Category, resource_id: impl Into<String>) -> Self {
        Self {
            category,
            resource_id: resource_id.into(),
        }
    }

    /// Subscription for every resource in a category.
    pub fn wildcard(category: Category) -> Self {
        Self::new(category, WILDCARD)
    }

    fn params(&self) -> SubscriptionParams {
        SubscriptionParams {
            subscription_type: self.category,
            resource_id: self.resource_id.clone(),
        }
    }

    /// Control message that registers this subscription with the server.
    pub fn to_subscribe(&self) -> OutboundMessage {
        OutboundMessage::Subscribe(self.params())
    }

    /// Control message that removes this subscription on the server.
    pub fn to_unsubscribe(&self) -> OutboundMessage {
        OutboundMessage::Unsubscribe(self.params())
    }
}

/// Thread-safe set of durable subscriptions.
///
/// Shared behind an `Arc` between the host application and the connection
/// task; set semantics make duplicate subscribes harmless.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: RwLock<HashSet<Subscription>>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a subscription. Returns `true` if it was not already present.
    pub fn add(&self, subscription: Subscription) -> bool {
        self.entries.write().unwrap().insert(subscription)
    }

    /// Remove a subscription. Returns `true` if it was present.
    pub fn remove(&self, subscription: &Subscription) -> bool {
        self.entries.write().unwrap().remove(subscription)
    }

    /// Whether the pair is currently recorded.
    pub fn contains(&self, subscription: &Subscription) -> bool {
        self.entries.read().unwrap().contains(subscription)
    }

    /// Snapshot of the current set, in no particular order.
    pub fn snapshot(&self) -> Vec<Subscription> {
        self.entries.read().unwrap().iter().cloned().collect()
    }

    /// Number of recorded pairs.
    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().unwrap().is_empty()
    }

    /// Drop every recorded pair (e.g. on identity change).
    pub fn clear(&self) {
        self.entries.write().unwrap().clear();
    }
}
