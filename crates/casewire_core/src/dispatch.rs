//! Routing of inbound messages to side effects.
//!
//! The dispatcher is the only writer of the [`UpdateIndex`] and the only
//! caller of the [`NotificationSink`]. It holds no state of its own; each
//! decoded frame maps to index mutations and/or notifications purely by its
//! type tag and payload fields.

use std::sync::Arc;

use crate::index::UpdateIndex;
use crate::notify::NotificationSink;
use crate::protocol::{
    Category, ErrorPayload, InboundMessage, NotificationPayload, UpdatePayload,
};

const DEFAULT_NOTIFICATION_TEXT: &str = "Notification received";
const DEFAULT_ERROR_TEXT: &str = "The server reported an error";

/// Routes decoded inbound messages into the update index and the
/// notification sink.
pub struct Dispatcher {
    index: Arc<UpdateIndex>,
    sink: Arc<dyn NotificationSink>,
}

impl Dispatcher {
    /// Create a dispatcher writing into `index` and notifying `sink`.
    pub fn new(index: Arc<UpdateIndex>, sink: Arc<dyn NotificationSink>) -> Self {
        Self { index, sink }
    }

    /// Apply one inbound message's side effects.
    pub fn dispatch(&self, message: InboundMessage) {
        match message {
            InboundMessage::Connect => {
                log::debug!("[Dispatcher] Server acknowledged connection");
            }
            InboundMessage::Disconnect => {
                log::debug!("[Dispatcher] Server announced disconnect");
            }
            InboundMessage::Ping | InboundMessage::Pong => {
                log::trace!("[Dispatcher] Heartbeat frame");
            }
            InboundMessage::SubscribeAck => {
                log::debug!("[Dispatcher] Subscription acknowledged");
            }
            InboundMessage::WorkflowUpdate(payload) => {
                self.upsert(Category::Workflow, &payload);
                self.notify_workflow(&payload);
            }
            InboundMessage::DocumentUpdate(payload) => {
                self.upsert(Category::Document, &payload);
            }
            InboundMessage::CaseUpdate(payload) => {
                self.upsert(Category::Case, &payload);
            }
            InboundMessage::BatchUpdate(payload) => {
                self.upsert(Category::Batch, &payload);
            }
            InboundMessage::EntityUpdate(payload) => {
                self.upsert(Category::Entity, &payload);
            }
            InboundMessage::Notification(payload) => {
                self.notify(&payload);
            }
            InboundMessage::Error(payload) => {
                self.report_error(&payload);
            }
        }
    }

    /// Record the update under its resource id; updates without one cannot be
    /// indexed and are logged instead.
    fn upsert(&self, category: Category, payload: &UpdatePayload) {
        match payload.resource_id.as_deref() {
            Some(resource_id) => {
                self.index.upsert(category, resource_id, payload.clone());
            }
            None => {
                log::debug!(
                    "[Dispatcher] Ignoring {} update without a resource id",
                    category
                );
            }
        }
    }

    /// Classify a workflow update by its `status` field.
    fn notify_workflow(&self, payload: &UpdatePayload) {
        match payload.status.as_deref() {
            Some("completed") => {
                let text = payload.message.as_deref().unwrap_or("Workflow completed");
                self.sink.success(text);
            }
            Some("failed") => {
                let text = payload
                    .error_message
                    .as_deref()
                    .or(payload.message.as_deref())
                    .unwrap_or("Workflow failed");
                self.sink.error(text);
            }
            _ => {
                if let Some(step) = payload.current_step {
                    self.sink.info(&format!("Workflow step {}", step));
                }
            }
        }
    }

    /// Route a notification frame by its embedded severity.
    fn notify(&self, payload: &NotificationPayload) {
        let text = payload
            .message
            .as_deref()
            .unwrap_or(DEFAULT_NOTIFICATION_TEXT);
        match payload.severity.as_deref() {
            Some("error") => self.sink.error(text),
            Some("success") => self.sink.success(text),
            _ => self.sink.info(text),
        }
    }

    /// Server-sent errors always reach the error sink; they are not fatal to
    /// the connection.
    fn report_error(&self, payload: &ErrorPayload) {
        let text = payload.message.as_deref().unwrap_or(DEFAULT_ERROR_TEXT);
        self.sink.error(text);
    }
}
