//! Wire protocol for the real-time update channel.
//!
//! Every frame is a JSON envelope of the form `{"type": <tag>, "data": <object>}`
//! where `data` is optional and its shape depends on the tag. Outbound control
//! messages (`ping`, `subscribe`, `unsubscribe`) serialize directly into that
//! envelope; inbound frames are decoded in two steps - envelope first, then the
//! tag-specific payload - so that a malformed or unknown frame fails here at
//! the boundary instead of being trusted at use sites.
//!
//! Decode failures are *local*: the caller logs and drops the frame, the
//! connection stays up.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ChannelError, Result};

/// Resource kinds that subscriptions and pushed updates are scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Long-running workflow executions (OCR, ingestion, exports)
    Workflow,
    /// Individual documents under review
    Document,
    /// Cases (top-level review matters)
    Case,
    /// Upload/processing batches
    Batch,
    /// Extracted entities
    Entity,
    /// Per-user events
    User,
    /// Everything the server is willing to push
    All,
}

impl Category {
    /// Wire name of the category (snake_case, matches serde).
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Workflow => "workflow",
            Category::Document => "document",
            Category::Case => "case",
            Category::Batch => "batch",
            Category::Entity => "entity",
            Category::User => "user",
            Category::All => "all",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `data` shape for subscribe/unsubscribe control messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionParams {
    /// Category being (un)subscribed
    pub subscription_type: Category,
    /// Resource id, `"*"` for the whole category
    pub resource_id: String,
}

/// Control messages the client sends to the server.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Heartbeat, sent periodically while the transport is open
    Ping,
    /// Request pushed updates for a (category, resource id) pair
    Subscribe(SubscriptionParams),
    /// Stop pushed updates for a (category, resource id) pair
    Unsubscribe(SubscriptionParams),
}

impl OutboundMessage {
    /// Serialize into the JSON wire envelope.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Payload carried by `*_update` messages. All fields are optional; the
/// server's shapes vary per workflow stage, so anything beyond the known
/// fields is kept in `extra` rather than dropped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdatePayload {
    /// Id of the resource this update concerns
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    /// Coarse status ("running", "completed", "failed", ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Human-readable progress message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Error detail, present when status is "failed"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Step counter for multi-step workflows
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_step: Option<u64>,
    /// Server-side timestamp (informational only; receipt time is stamped
    /// locally and is what the index trusts)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    /// Any additional fields the server included
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

/// Payload carried by `notification` messages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationPayload {
    /// Severity: "error", "success", or anything else (treated as info)
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
    /// Display text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Payload carried by `error` messages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Display text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Typed messages the server pushes to the client.
///
/// A closed set: anything with an unrecognized tag fails [`decode`] and is
/// dropped by the caller.
///
/// [`decode`]: InboundMessage::decode
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Connection acknowledged by the server
    Connect,
    /// Server is about to close the connection
    Disconnect,
    /// Server-side heartbeat
    Ping,
    /// Reply to our heartbeat
    Pong,
    /// Subscription acknowledged
    SubscribeAck,
    /// Workflow progress update
    WorkflowUpdate(UpdatePayload),
    /// Document mutation
    DocumentUpdate(UpdatePayload),
    /// Case mutation
    CaseUpdate(UpdatePayload),
    /// Batch progress update
    BatchUpdate(UpdatePayload),
    /// Entity mutation
    EntityUpdate(UpdatePayload),
    /// Free-form user-facing notification
    Notification(NotificationPayload),
    /// Server-reported error (not fatal to the connection)
    Error(ErrorPayload),
}

/// Raw wire envelope, decoded before the tag is interpreted.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    tag: String,
    #[serde(default)]
    data: Option<Value>,
}

/// Parse an optional `data` object into a typed payload; a missing or null
/// `data` field yields the payload's default (all fields absent).
fn payload<T: DeserializeOwned + Default>(data: Option<Value>) -> Result<T> {
    match data {
        Some(value) if !value.is_null() => Ok(serde_json::from_value(value)?),
        _ => Ok(T::default()),
    }
}

impl InboundMessage {
    /// Decode a text frame into a typed message.
    ///
    /// Fails on non-JSON input, an unknown `type` tag, or a payload that does
    /// not match the tag's expected shape.
    pub fn decode(frame: &str) -> Result<Self> {
        let envelope: Envelope = serde_json::from_str(frame)?;
        let message = match envelope.tag.as_str() {
            "connect" => InboundMessage::Connect,
            "disconnect" => InboundMessage::Disconnect,
            "ping" => InboundMessage::Ping,
            "pong" => InboundMessage::Pong,
            "subscribe_ack" => InboundMessage::SubscribeAck,
            "workflow_update" => InboundMessage::WorkflowUpdate(payload(envelope.data)?),
            "document_update" => InboundMessage::DocumentUpdate(payload(envelope.data)?),
            "case_update" => InboundMessage::CaseUpdate(payload(envelope.data)?),
            "batch_update" => InboundMessage::BatchUpdate(payload(envelope.data)?),
            "entity_update" => InboundMessage::EntityUpdate(payload(envelope.data)?),
            "notification" => InboundMessage::Notification(payload(envelope.data)?),
            "error" => InboundMessage::Error(payload(envelope.data)?),
            other => return Err(ChannelError::UnknownMessageType(other.to_string())),
        };
        Ok(message)
    }
}
