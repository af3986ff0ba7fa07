#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

/// Connection lifecycle (connect, heartbeat, bounded reconnection)
pub mod channel;

/// Channel configuration and endpoint construction
pub mod config;

/// Routing of inbound messages to index writes and notifications
pub mod dispatch;

/// Common error types
pub mod error;

/// Bounded, time-decaying index of latest updates per resource
pub mod index;

/// Notification sink boundary (implemented by the host UI)
pub mod notify;

/// Wire protocol: envelope, type tags, typed payloads
pub mod protocol;

/// Durable subscription set, replayed on every reconnect
pub mod subscription;

pub use channel::{ConnectionState, TransportErrorCallback, UpdateChannel};
pub use config::ChannelConfig;
pub use dispatch::Dispatcher;
pub use error::{ChannelError, Result};
pub use index::{IndexSweeper, ResourceUpdateRecord, UpdateIndex};
pub use notify::{LogSink, NotificationSink};
pub use protocol::{
    Category, ErrorPayload, InboundMessage, NotificationPayload, OutboundMessage,
    SubscriptionParams, UpdatePayload,
};
pub use subscription::{Subscription, SubscriptionRegistry, WILDCARD};
