use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio_util::sync::CancellationToken;

use crate::config::MasterJobConfig;
use crate::error::Result;
use crate::masterjob::context::MasterJobContext;
use crate::masterjob::events::{CommDirection, MasterJobEvent};
use crate::masterjob::jobs::{self, MasterJobHolder};
use crate::masterjob::state::{MasterJobState, NegotiationAction};
use crate::masterjob::timer::jittered_frequency;
use crate::scheduler::{Schedule, Scheduler};
use crate::transport::{Envelope, MessageTransport, Routing};

/// Hook invoked around gated job activation to register or unregister the
/// job-specific command handlers. Failures are logged, never fatal.
pub type CommandHook = Arc<dyn Fn() -> Result<()> + Send + Sync>;

/// Mailbox messages for the negotiation actor.
pub enum NegotiatorMessage {
    /// Scheduler poll tick driving the outgoing negotiation logic.
    Poll { schedule: Arc<Schedule> },
    /// Negotiation envelope received from the broker.
    Incoming(Envelope),
    /// Register a gated job with the context.
    RegisterJob(MasterJobHolder),
    /// Graceful stop; resolves once teardown has completed.
    Stop { done: oneshot::Sender<()> },
}

/// The single-writer negotiation state machine.
///
/// All mutation of the context flows through `run`'s mailbox loop; the
/// shared lock exists so monitors and the job dispatch can read
/// concurrently.
pub struct Negotiator {
    config: MasterJobConfig,
    service_id: String,
    context: Arc<RwLock<MasterJobContext>>,
    transport: Arc<dyn MessageTransport>,
    scheduler: Arc<Scheduler>,
    events: broadcast::Sender<MasterJobEvent>,
    on_commands_register: Option<CommandHook>,
    on_commands_unregister: Option<CommandHook>,
}

impl Negotiator {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: MasterJobConfig,
        service_id: String,
        context: Arc<RwLock<MasterJobContext>>,
        transport: Arc<dyn MessageTransport>,
        scheduler: Arc<Scheduler>,
        events: broadcast::Sender<MasterJobEvent>,
        on_commands_register: Option<CommandHook>,
        on_commands_unregister: Option<CommandHook>,
    ) -> Self {
        Self {
            config,
            service_id,
            context,
            transport,
            scheduler,
            events,
            on_commands_register,
            on_commands_unregister,
        }
    }

    /// Run the negotiation actor until stopped or cancelled.
    pub async fn run(self, mut rx: mpsc::Receiver<NegotiatorMessage>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                msg = rx.recv() => match msg {
                    Some(NegotiatorMessage::Poll { schedule }) => self.on_poll(&schedule).await,
                    Some(NegotiatorMessage::Incoming(envelope)) => self.on_incoming(envelope).await,
                    Some(NegotiatorMessage::RegisterJob(holder)) => {
                        let mut ctx = self.context.write().await;
                        ctx.jobs.insert(holder.schedule.id(), holder);
                    }
                    Some(NegotiatorMessage::Stop { done }) => {
                        self.master_job_stop().await;
                        let _ = done.send(());
                        break;
                    }
                    None => break,
                },
                _ = cancel.cancelled() => {
                    self.master_job_stop().await;
                    break;
                }
            }
        }
    }

    /// Outgoing negotiation logic, driven by the poll schedule.
    async fn on_poll(&self, schedule: &Arc<Schedule>) {
        let timing = &self.config.timing;
        // Rewrite the poll frequency every tick so fleet instances never
        // retry in lockstep.
        schedule.set_frequency(jittered_frequency(
            timing.negotiate_base,
            timing.negotiate_spread,
        ));

        let state = self.context.read().await.state();
        match state {
            MasterJobState::VerifyingComms => {
                // Advances only when our own message echoes back.
                self.transmit(NegotiationAction::WhoIsMaster).await;
            }
            MasterJobState::Starting => {
                self.transmit(NegotiationAction::WhoIsMaster).await;
                let mut ctx = self.context.write().await;
                ctx.master_poll_attempts_increment();
                self.apply_state(&mut ctx, MasterJobState::Requesting1);
            }
            MasterJobState::Inactive => {
                self.transmit(NegotiationAction::WhoIsMaster).await;
                let mut ctx = self.context.write().await;
                if ctx.master_poll_attempts_exceeded() {
                    // The master has gone quiet for long enough; restart
                    // the negotiation sequence.
                    self.apply_state(&mut ctx, MasterJobState::Starting);
                } else if ctx.master_poll_attempts() == 0 {
                    // No active contention; stretch the poll gap.
                    schedule.set_frequency(jittered_frequency(timing.idle_base, timing.idle_spread));
                }
                ctx.master_poll_attempts_increment();
            }
            MasterJobState::Requesting1 => {
                self.transmit(NegotiationAction::RequestingControl1).await;
                let mut ctx = self.context.write().await;
                self.apply_state(&mut ctx, MasterJobState::Requesting2);
            }
            MasterJobState::Requesting2 => {
                self.transmit(NegotiationAction::RequestingControl2).await;
                let mut ctx = self.context.write().await;
                self.apply_state(&mut ctx, MasterJobState::TakingControl);
            }
            MasterJobState::TakingControl => {
                self.transmit(NegotiationAction::TakingControl).await;
                self.master_job_start().await;
            }
            MasterJobState::Active => {
                self.sync_i_am_master().await;
                schedule.set_frequency(jittered_frequency(timing.sync_base, timing.sync_spread));
            }
            MasterJobState::Disabled => {}
        }
    }

    /// State notifications arriving from other instances.
    async fn on_incoming(&self, envelope: Envelope) {
        let state = {
            let mut ctx = self.context.write().await;
            ctx.message_last_in = Some(Utc::now());
            ctx.state()
        };

        if state == MasterJobState::Disabled {
            return;
        }

        // Our own messages echoed back only prove the channel is alive.
        if envelope
            .originator_service_id
            .eq_ignore_ascii_case(&self.service_id)
        {
            if state == MasterJobState::VerifyingComms {
                let mut ctx = self.context.write().await;
                self.apply_state(&mut ctx, MasterJobState::Starting);
            }
            return;
        }

        {
            let ctx = self.context.read().await;
            let _ = self.events.send(MasterJobEvent::Communication {
                job: self.config.name.clone(),
                direction: CommDirection::Incoming,
                state,
                action: envelope.action_type.clone(),
                generation: ctx.state_change_counter(),
                originator: Some(envelope.originator_service_id.clone()),
            });
        }

        let sender = envelope.originator_service_id.as_str();
        let action = NegotiationAction::parse(&envelope.action_type);
        match &action {
            NegotiationAction::IAmStandby => {
                let mut ctx = self.context.write().await;
                ctx.partner_add(sender, true);
            }
            NegotiationAction::IAmMaster => {
                if state == MasterJobState::Active {
                    // A legitimate peer claims mastership; concede and
                    // deactivate. This is what heals a split brain the
                    // moment both sides observe each other.
                    self.master_job_stop().await;
                }
                {
                    let mut ctx = self.context.write().await;
                    ctx.partner_add(sender, false);
                    self.apply_state(&mut ctx, MasterJobState::Inactive);
                    ctx.master_record_set(sender);
                    ctx.master_poll_attempts_reset();
                }
                self.transmit(NegotiationAction::IAmStandby).await;
            }
            NegotiationAction::ResyncMaster => {
                if state == MasterJobState::Active {
                    // Jobs must be unscheduled before the state can leave
                    // Active, so a resync received while master runs the
                    // full deactivation first.
                    self.master_job_stop().await;
                }
                let mut ctx = self.context.write().await;
                ctx.master_record_clear();
                self.apply_state(&mut ctx, MasterJobState::Starting);
            }
            NegotiationAction::WhoIsMaster => {
                if state == MasterJobState::Active {
                    self.sync_i_am_master().await;
                }
            }
            NegotiationAction::RequestingControl1
            | NegotiationAction::RequestingControl2
            | NegotiationAction::TakingControl => {
                if state == MasterJobState::Active {
                    self.sync_i_am_master().await;
                } else if let Some(gate) = action.contention_gate() {
                    if state <= gate {
                        // A peer at the same or a later contention stage
                        // wins; concede and fall back to standby.
                        let mut ctx = self.context.write().await;
                        self.apply_state(&mut ctx, MasterJobState::Inactive);
                    }
                }
            }
            NegotiationAction::Unrecognized(other) => {
                if !other.is_empty() {
                    tracing::warn!(
                        job = %self.config.name,
                        action = %other,
                        "Not a valid negotiating action type for master job"
                    );
                }
            }
        }
    }

    /// Transmit a negotiation action to the other instances.
    ///
    /// Send failures are logged; the next jittered poll retries.
    async fn transmit(&self, action: NegotiationAction) {
        let Some(channel) = self.config.outgoing_channel() else {
            return;
        };
        let message_type = self
            .config
            .negotiation_message_type
            .clone()
            .unwrap_or_default();

        let mut envelope =
            Envelope::new(channel, message_type, action.as_str(), self.service_id.as_str());
        // Negotiation traffic is routed externally so the loop-back copy
        // proves the channel is working.
        envelope.routing = Routing::External;
        envelope.channel_priority = self.config.negotiation_channel_priority;

        match self.transport.transmit(envelope) {
            Ok(()) => {
                let mut ctx = self.context.write().await;
                ctx.message_last_out = Some(Utc::now());
                let state = ctx.state();
                let generation = ctx.state_change_counter();
                drop(ctx);
                let _ = self.events.send(MasterJobEvent::Communication {
                    job: self.config.name.clone(),
                    direction: CommDirection::Outgoing,
                    state,
                    action: action.as_str().to_string(),
                    generation,
                    originator: None,
                });
            }
            Err(e) => {
                tracing::warn!(
                    job = %self.config.name,
                    action = %action,
                    error = %e,
                    "Negotiation transmit failed"
                );
            }
        }
    }

    /// Heartbeat/sync sent while master: claim mastership and clear the
    /// local master record.
    async fn sync_i_am_master(&self) {
        self.transmit(NegotiationAction::IAmMaster).await;
        let mut ctx = self.context.write().await;
        ctx.master_record_clear();
    }

    /// Gated job activation: become Active, register command handlers,
    /// then bring each registered job onto the scheduler.
    async fn master_job_start(&self) {
        let mut ctx = self.context.write().await;
        self.apply_state(&mut ctx, MasterJobState::Active);

        // Commands are registered before jobs are scheduled so a firing
        // job can call into them.
        if let Some(hook) = &self.on_commands_register {
            if let Err(e) = hook() {
                tracing::error!(job = %self.config.name, error = %e, "Master job command registration failed");
            }
        }

        let callback = jobs::execution_callback(self.context.clone());
        for holder in ctx.jobs.values() {
            if let Some(hook) = &holder.on_activate {
                if let Err(e) = hook(&holder.schedule) {
                    tracing::error!(job = %holder.name, error = %e, "Master job could not be initialised");
                }
            }
            self.scheduler
                .register(holder.schedule.clone(), callback.clone());
        }

        tracing::info!(job = %self.config.name, jobs = ctx.jobs.len(), "Master job active");
    }

    /// Gated job deactivation: announce the re-election, tear the jobs
    /// down, then release command handlers. Always leaves the state at
    /// Inactive so negotiation can restart.
    async fn master_job_stop(&self) {
        let was_active = {
            let mut ctx = self.context.write().await;
            let old = ctx.state();
            // Disabled while tearing down so concurrent incoming traffic
            // is ignored.
            self.apply_state(&mut ctx, MasterJobState::Disabled);
            old == MasterJobState::Active
        };

        if was_active {
            self.transmit(NegotiationAction::ResyncMaster).await;

            let mut ctx = self.context.write().await;
            for holder in ctx.jobs.values() {
                if let Some(hook) = &holder.on_deactivate {
                    if let Err(e) = hook(&holder.schedule) {
                        tracing::error!(job = %holder.name, error = %e, "Master job stop failed");
                    }
                }
                self.scheduler.unregister(holder.schedule.id());
            }
            drop(ctx);

            if let Some(hook) = &self.on_commands_unregister {
                if let Err(e) = hook() {
                    tracing::error!(job = %self.config.name, error = %e, "Master job command unregistration failed");
                }
            }

            tracing::info!(job = %self.config.name, "Master job deactivated");
        }

        let mut ctx = self.context.write().await;
        self.apply_state(&mut ctx, MasterJobState::Inactive);
    }

    /// Move the context to a new state, logging and notifying observers
    /// on a real transition.
    fn apply_state(&self, ctx: &mut MasterJobContext, next: MasterJobState) {
        if let Some(previous) = ctx.set_state(next) {
            tracing::debug!(
                job = %self.config.name,
                from = %previous,
                to = %next,
                generation = ctx.state_change_counter(),
                "Master job state changed"
            );
            let _ = self.events.send(MasterJobEvent::StateChanged {
                job: self.config.name.clone(),
                previous,
                current: next,
                generation: ctx.state_change_counter(),
            });
        }
    }
}
