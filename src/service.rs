use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::MasterJobConfig;
use crate::error::{MajordomoError, Result};
use crate::masterjob::context::MasterJobContext;
use crate::masterjob::events::MasterJobEvent;
use crate::masterjob::jobs::MasterJob;
use crate::masterjob::negotiator::{CommandHook, Negotiator, NegotiatorMessage};
use crate::masterjob::state::MasterJobState;
use crate::scheduler::{Schedule, ScheduleCallback, Scheduler};
use crate::transport::{Envelope, MessageTransport};

/// A running master-job role: the negotiation actor, its poll schedule,
/// and the pump feeding it broker traffic.
pub struct MasterJobService {
    name: String,
    service_id: String,
    context: Arc<RwLock<MasterJobContext>>,
    events: broadcast::Sender<MasterJobEvent>,
    message_tx: mpsc::Sender<NegotiatorMessage>,
    poll_schedule: Arc<Schedule>,
    scheduler: Arc<Scheduler>,
    cancel: CancellationToken,
    negotiator_handle: JoinHandle<()>,
    pump_handle: JoinHandle<()>,
}

impl MasterJobService {
    /// Start negotiating. Fails fast if the negotiation channel or
    /// message type is not configured.
    pub async fn start(
        config: MasterJobConfig,
        service_id: impl Into<String>,
        transport: Arc<dyn MessageTransport>,
        incoming: mpsc::UnboundedReceiver<Envelope>,
        scheduler: Arc<Scheduler>,
    ) -> Result<Self> {
        Self::start_with_hooks(config, service_id, transport, incoming, scheduler, None, None).await
    }

    /// Start negotiating with command registration hooks that run around
    /// gated job activation.
    pub async fn start_with_hooks(
        config: MasterJobConfig,
        service_id: impl Into<String>,
        transport: Arc<dyn MessageTransport>,
        incoming: mpsc::UnboundedReceiver<Envelope>,
        scheduler: Arc<Scheduler>,
        on_commands_register: Option<CommandHook>,
        on_commands_unregister: Option<CommandHook>,
    ) -> Result<Self> {
        config.validate()?;
        let service_id = service_id.into();
        let name = config.name.clone();

        let context = Arc::new(RwLock::new(MasterJobContext::new(config.max_poll_attempts)));
        context.write().await.set_state(MasterJobState::VerifyingComms);

        let (message_tx, message_rx) = mpsc::channel(64);
        let (events, _) = broadcast::channel(256);
        let cancel = CancellationToken::new();

        let negotiator = Negotiator::new(
            config.clone(),
            service_id.clone(),
            context.clone(),
            transport,
            scheduler.clone(),
            events.clone(),
            on_commands_register,
            on_commands_unregister,
        );
        let negotiator_handle = tokio::spawn(negotiator.run(message_rx, cancel.clone()));

        let pump_handle = Self::spawn_incoming_pump(
            incoming,
            message_tx.clone(),
            config
                .negotiation_message_type
                .clone()
                .unwrap_or_default(),
            cancel.clone(),
        );

        let poll_schedule = Arc::new(
            Schedule::new(format!("masterjob: {}", name), config.poll_frequency)
                .with_initial_wait(config.poll_initial_wait),
        );
        let poll_tx = message_tx.clone();
        let poll_callback: ScheduleCallback = Arc::new(move |schedule, _cancel| {
            let tx = poll_tx.clone();
            Box::pin(async move {
                tx.send(NegotiatorMessage::Poll { schedule })
                    .await
                    .map_err(|_| MajordomoError::NotRunning)
            })
        });
        scheduler.register(poll_schedule.clone(), poll_callback);

        tracing::info!(job = %name, service_id = %service_id, "Master job negotiation started");

        Ok(Self {
            name,
            service_id,
            context,
            events,
            message_tx,
            poll_schedule,
            scheduler,
            cancel,
            negotiator_handle,
            pump_handle,
        })
    }

    fn spawn_incoming_pump(
        mut incoming: mpsc::UnboundedReceiver<Envelope>,
        message_tx: mpsc::Sender<NegotiatorMessage>,
        message_type: String,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    maybe = incoming.recv() => match maybe {
                        Some(envelope) => {
                            // One handler per channel/message-type pair:
                            // other traffic on the channel is not ours.
                            if !envelope.message_type.eq_ignore_ascii_case(&message_type) {
                                continue;
                            }
                            if message_tx
                                .send(NegotiatorMessage::Incoming(envelope))
                                .await
                                .is_err()
                            {
                                break;
                            }
                        }
                        None => break,
                    },
                    _ = cancel.cancelled() => break,
                }
            }
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    /// Register a job that only runs while this instance is master.
    /// Takes effect at the next activation if the context is already
    /// Active.
    pub async fn register_master_job(&self, job: MasterJob) -> Result<Uuid> {
        let holder = job.into_holder();
        let id = holder.schedule.id();
        self.message_tx
            .send(NegotiatorMessage::RegisterJob(holder))
            .await
            .map_err(|_| MajordomoError::NotRunning)?;
        Ok(id)
    }

    pub async fn state(&self) -> MasterJobState {
        self.context.read().await.state()
    }

    pub async fn master_record(&self) -> Option<String> {
        self.context.read().await.master_record().map(String::from)
    }

    /// Shared context for monitoring; reads are eventually consistent.
    pub fn context(&self) -> Arc<RwLock<MasterJobContext>> {
        self.context.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MasterJobEvent> {
        self.events.subscribe()
    }

    /// Force a negotiation poll outside the schedule.
    pub async fn trigger_poll(&self) -> Result<()> {
        self.message_tx
            .send(NegotiatorMessage::Poll {
                schedule: self.poll_schedule.clone(),
            })
            .await
            .map_err(|_| MajordomoError::NotRunning)
    }

    /// Graceful stop: if Active, peers are told to re-elect and the gated
    /// jobs are deactivated. The context is left Inactive so a restarted
    /// service re-enters negotiation from a neutral state.
    pub async fn stop(self) -> Result<()> {
        self.scheduler.unregister(self.poll_schedule.id());

        let (done, finished) = oneshot::channel();
        if self
            .message_tx
            .send(NegotiatorMessage::Stop { done })
            .await
            .is_ok()
        {
            let _ = finished.await;
        }

        self.cancel.cancel();
        let _ = self.pump_handle.await;
        let _ = self.negotiator_handle.await;

        tracing::info!(job = %self.name, "Master job negotiation stopped");
        Ok(())
    }
}
