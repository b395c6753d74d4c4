use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{MajordomoError, Result};

/// Routing scope for an outgoing envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Routing {
    Internal,
    External,
    Both,
}

impl Default for Routing {
    fn default() -> Self {
        Routing::Both
    }
}

/// The logical message envelope carried by the broker.
///
/// The concrete on-wire byte format is the transport adapter's concern;
/// the envelope derives serde so an adapter can carry it however it likes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub id: Uuid,
    pub channel_id: String,
    pub message_type: String,
    pub action_type: String,
    pub originator_service_id: String,
    pub channel_priority: i64,
    pub routing: Routing,
    /// Links a response envelope back to the request that produced it.
    pub correlation_id: Option<Uuid>,
    pub response_channel_id: Option<String>,
    pub response_message_type: Option<String>,
    pub response_action_type: Option<String>,
    pub payload: Option<Vec<u8>>,
}

impl Envelope {
    pub fn new(
        channel_id: impl Into<String>,
        message_type: impl Into<String>,
        action_type: impl Into<String>,
        originator_service_id: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            channel_id: channel_id.into(),
            message_type: message_type.into(),
            action_type: action_type.into(),
            originator_service_id: originator_service_id.into(),
            channel_priority: 1,
            routing: Routing::default(),
            correlation_id: None,
            response_channel_id: None,
            response_message_type: None,
            response_action_type: None,
            payload: None,
        }
    }

    /// Build the response envelope for a request, addressed to the
    /// request's response triple and carrying its correlation id.
    pub fn respond_to(request: &Envelope, originator_service_id: impl Into<String>) -> Self {
        let mut response = Envelope::new(
            request.response_channel_id.clone().unwrap_or_default(),
            request.response_message_type.clone().unwrap_or_default(),
            request.response_action_type.clone().unwrap_or_default(),
            originator_service_id,
        );
        response.correlation_id = request.correlation_id;
        response.channel_priority = request.channel_priority;
        response
    }

    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// One-way message transmission to the broker.
///
/// Sends are fire-and-forget with at-least-once delivery and no ordering
/// guarantee. A failed send surfaces as an error to the caller; retry is
/// the caller's concern (the negotiation poll simply retries on its next
/// jittered tick).
pub trait MessageTransport: Send + Sync {
    fn transmit(&self, envelope: Envelope) -> Result<()>;
}

/// In-process topic bus used for single-process wiring and the test
/// harness.
///
/// Every envelope is fanned out to all subscribers of its channel,
/// including the originator's own subscription. The loop-back copy is what
/// lets a VerifyingComms instance confirm its channel is alive.
#[derive(Default)]
pub struct LoopbackBus {
    subscribers: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<Envelope>>>>,
}

impl LoopbackBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to every envelope transmitted on `channel_id`.
    pub fn subscribe(&self, channel_id: impl Into<String>) -> mpsc::UnboundedReceiver<Envelope> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .expect("loopback subscriber lock poisoned")
            .entry(channel_id.into())
            .or_default()
            .push(tx);
        rx
    }
}

impl MessageTransport for LoopbackBus {
    fn transmit(&self, envelope: Envelope) -> Result<()> {
        let mut subscribers = self
            .subscribers
            .lock()
            .map_err(|_| MajordomoError::Transport("loopback subscriber lock poisoned".into()))?;

        let Some(channel) = subscribers.get_mut(&envelope.channel_id) else {
            // No listeners is not a delivery failure on a topic.
            tracing::trace!(channel = %envelope.channel_id, "No subscribers for channel");
            return Ok(());
        };

        channel.retain(|tx| tx.send(envelope.clone()).is_ok());
        Ok(())
    }
}
