use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::RequestorConfig;
use crate::error::{MajordomoError, Result};
use crate::metrics::RequestMetrics;
use crate::transport::{Envelope, MessageTransport, Routing};

/// Per-request options for `process_outgoing`.
#[derive(Debug, Clone, Default)]
pub struct RequestSettings {
    /// Caller-supplied correlation id; a fresh v4 id is minted otherwise.
    pub correlation_id: Option<Uuid>,
    /// Per-request timeout override.
    pub wait_time: Option<Duration>,
    /// Fire-and-forget: transmit and resolve 202 without tracking.
    pub process_async: bool,
    /// Routing override; defaults to both internal and external.
    pub routing: Option<Routing>,
}

/// Typed outcome of an outgoing request.
///
/// Expected failures (timeout, fault, decode) are response codes, not
/// errors: 202 accepted, 200 completed, 408 timed out, 504 faulted,
/// 500 everything else.
#[derive(Debug)]
pub struct ResponseWrapper<RS> {
    pub response_code: u16,
    pub response_message: Option<String>,
    pub response: Option<RS>,
}

impl<RS> ResponseWrapper<RS> {
    pub fn new(response_code: u16, response_message: impl Into<String>) -> Self {
        Self {
            response_code,
            response_message: Some(response_message.into()),
            response: None,
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.response_code)
    }
}

/// A request in flight: the single-slot future a matching response or
/// timeout resolves. Exactly one exists per correlation id.
struct PendingRequest {
    sent_at: Instant,
    max_processing_time: Duration,
    responder: oneshot::Sender<Envelope>,
}

/// Sends typed requests over the transport and correlates the responses.
pub struct Requestor {
    config: RequestorConfig,
    service_id: String,
    transport: Arc<dyn MessageTransport>,
    pending: Mutex<HashMap<Uuid, PendingRequest>>,
    metrics: RequestMetrics,
}

impl Requestor {
    pub fn new(
        config: RequestorConfig,
        service_id: impl Into<String>,
        transport: Arc<dyn MessageTransport>,
    ) -> Self {
        Self {
            config,
            service_id: service_id.into(),
            transport,
            pending: Mutex::new(HashMap::new()),
            metrics: RequestMetrics::new(),
        }
    }

    pub fn metrics(&self) -> &RequestMetrics {
        &self.metrics
    }

    /// Number of requests currently awaiting a response.
    pub fn pending_len(&self) -> usize {
        self.pending.lock().expect("pending lock poisoned").len()
    }

    /// Send a typed request and resolve a typed response.
    ///
    /// Only initiation-time failures are errors: the requestor being
    /// disabled, payload serialization, or the transmit itself. Every
    /// later outcome resolves as a `ResponseWrapper` code.
    pub async fn process_outgoing<RQ, RS>(
        &self,
        channel_id: &str,
        message_type: &str,
        action_type: &str,
        request: &RQ,
        settings: RequestSettings,
        fallback_max_processing_time: Option<Duration>,
    ) -> Result<ResponseWrapper<RS>>
    where
        RQ: Serialize,
        RS: DeserializeOwned,
    {
        if !self.config.outgoing_requests_enabled {
            return Err(MajordomoError::OutgoingRequestsDisabled);
        }

        self.metrics.active_increment();
        let started = Instant::now();
        let result = self
            .dispatch(channel_id, message_type, action_type, request, settings, fallback_max_processing_time)
            .await;
        self.metrics.active_decrement(started.elapsed());

        match &result {
            Ok(wrapper) if !wrapper.is_success() => self.metrics.error_increment(),
            Err(_) => self.metrics.error_increment(),
            _ => {}
        }
        result
    }

    async fn dispatch<RQ, RS>(
        &self,
        channel_id: &str,
        message_type: &str,
        action_type: &str,
        request: &RQ,
        settings: RequestSettings,
        fallback_max_processing_time: Option<Duration>,
    ) -> Result<ResponseWrapper<RS>>
    where
        RQ: Serialize,
        RS: DeserializeOwned,
    {
        let correlation_id = settings.correlation_id.unwrap_or_else(Uuid::new_v4);
        let process_async = settings.process_async;

        let mut envelope =
            Envelope::new(channel_id, message_type, action_type, self.service_id.as_str());
        envelope.routing = settings.routing.unwrap_or_default();
        envelope.channel_priority = if process_async { 0 } else { 1 };
        envelope.correlation_id = Some(correlation_id);
        envelope.response_channel_id = Some(self.config.response_channel_id.clone());
        envelope.response_message_type = Some(self.config.response_message_type.clone());
        envelope.response_action_type = Some(self.config.response_action_type.clone());
        envelope.payload = Some(serde_json::to_vec(request)?);

        let wait_time = settings
            .wait_time
            .or(fallback_max_processing_time)
            .unwrap_or(self.config.default_processing_time);

        if process_async {
            self.transport.transmit(envelope)?;
            tracing::debug!(%correlation_id, action = action_type, "Request accepted for async processing");
            return Ok(ResponseWrapper::new(202, "Accepted"));
        }

        let (responder, response_rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().expect("pending lock poisoned");
            pending.insert(
                correlation_id,
                PendingRequest {
                    sent_at: Instant::now(),
                    max_processing_time: wait_time,
                    responder,
                },
            );
        }

        if let Err(e) = self.transport.transmit(envelope) {
            self.remove_pending(&correlation_id);
            return Err(e);
        }

        match tokio::time::timeout(wait_time, response_rx).await {
            Ok(Ok(response)) => Ok(Self::decode(response)),
            Ok(Err(_)) => {
                // Responder dropped without a send: the requestor is
                // shutting down or the completion task died.
                Ok(ResponseWrapper::new(504, "Response channel faulted"))
            }
            Err(_) => {
                self.remove_pending(&correlation_id);
                tracing::debug!(%correlation_id, action = action_type, wait_ms = wait_time.as_millis() as u64, "Request timed out");
                Ok(ResponseWrapper::new(408, "Time out"))
            }
        }
    }

    fn decode<RS: DeserializeOwned>(response: Envelope) -> ResponseWrapper<RS> {
        match response.payload {
            Some(bytes) => match serde_json::from_slice::<RS>(&bytes) {
                Ok(body) => ResponseWrapper {
                    response_code: 200,
                    response_message: None,
                    response: Some(body),
                },
                Err(e) => ResponseWrapper::new(500, e.to_string()),
            },
            None => ResponseWrapper {
                response_code: 200,
                response_message: None,
                response: None,
            },
        }
    }

    /// Resolve an inbound response envelope against the pending table.
    ///
    /// Remove-then-send makes resolution at-most-once: the first of
    /// response and timeout wins, and later arrivals for the same
    /// correlation id are discarded.
    pub fn complete_response(&self, envelope: Envelope) {
        let Some(correlation_id) = envelope.correlation_id else {
            tracing::warn!(envelope_id = %envelope.id, "Discarding response without a correlation id");
            return;
        };

        let entry = self.remove_pending(&correlation_id);
        match entry {
            Some(request) => {
                tracing::trace!(
                    %correlation_id,
                    elapsed_ms = request.sent_at.elapsed().as_millis() as u64,
                    max_ms = request.max_processing_time.as_millis() as u64,
                    "Correlated response"
                );
                if request.responder.send(envelope).is_err() {
                    tracing::debug!(%correlation_id, "Caller gone before response delivery");
                }
            }
            None => {
                tracing::warn!(%correlation_id, "Discarding response for unknown or already-resolved correlation id");
            }
        }
    }

    /// Drop every in-flight request; their callers resolve 504.
    pub fn abort_pending(&self) {
        let drained: Vec<Uuid> = {
            let mut pending = self.pending.lock().expect("pending lock poisoned");
            let ids = pending.keys().copied().collect();
            pending.clear();
            ids
        };
        if !drained.is_empty() {
            tracing::info!(count = drained.len(), "Aborted pending requests");
        }
    }

    fn remove_pending(&self, correlation_id: &Uuid) -> Option<PendingRequest> {
        self.pending
            .lock()
            .expect("pending lock poisoned")
            .remove(correlation_id)
    }

    /// Pump response envelopes from a subscription into the pending
    /// table until cancelled or the channel closes.
    pub fn spawn_response_pump(
        self: &Arc<Self>,
        mut responses: mpsc::UnboundedReceiver<Envelope>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let requestor = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    maybe = responses.recv() => match maybe {
                        Some(envelope) => requestor.complete_response(envelope),
                        None => break,
                    },
                    _ = cancel.cancelled() => break,
                }
            }
        })
    }
}
