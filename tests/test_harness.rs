//! Test harness for multi-instance master-job negotiation tests.
//!
//! Provides a shared loopback bus, shortened poll timings, and deadline
//! polling helpers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use majordomo_lite::config::{MasterJobConfig, PollTiming};
use majordomo_lite::error::Result;
use majordomo_lite::masterjob::MasterJobState;
use majordomo_lite::scheduler::Scheduler;
use majordomo_lite::service::MasterJobService;
use majordomo_lite::transport::{Envelope, LoopbackBus, MessageTransport};

pub const CHANNEL: &str = "masterjob";
pub const MESSAGE_TYPE: &str = "negotiation";

/// Shortened timings so elections settle in tens of milliseconds.
#[allow(dead_code)]
pub fn fast_config(name: &str, poll_ms: u64) -> MasterJobConfig {
    MasterJobConfig::new(name, CHANNEL, MESSAGE_TYPE)
        .with_poll_frequency(Duration::from_millis(poll_ms), Duration::from_millis(5))
        .with_timing(fast_timing(poll_ms))
}

/// Config with an effectively dormant schedule, for tests that drive
/// polls by hand.
#[allow(dead_code)]
pub fn manual_config(name: &str) -> MasterJobConfig {
    MasterJobConfig::new(name, CHANNEL, MESSAGE_TYPE)
        .with_poll_frequency(Duration::from_secs(3600), Duration::from_secs(3600))
        .with_timing(fast_timing(3_600_000))
}

fn fast_timing(poll_ms: u64) -> PollTiming {
    let base = Duration::from_millis(poll_ms);
    let spread = Duration::from_millis(poll_ms.max(2) / 2);
    PollTiming {
        negotiate_base: base,
        negotiate_spread: spread,
        sync_base: base,
        sync_spread: spread,
        idle_base: base * 2,
        idle_spread: spread,
    }
}

/// Start a negotiating instance on the bus with its own scheduler.
#[allow(dead_code)]
pub async fn spawn_instance(
    bus: &Arc<LoopbackBus>,
    config: MasterJobConfig,
    service_id: &str,
) -> Result<(MasterJobService, Arc<Scheduler>)> {
    let scheduler = Arc::new(Scheduler::new());
    let incoming = bus.subscribe(CHANNEL);
    let service = MasterJobService::start(
        config,
        service_id,
        bus.clone() as Arc<dyn MessageTransport>,
        incoming,
        scheduler.clone(),
    )
    .await?;
    Ok((service, scheduler))
}

/// Inject a negotiation envelope as if a peer had transmitted it.
#[allow(dead_code)]
pub fn inject(bus: &LoopbackBus, action: &str, originator: &str) {
    bus.transmit(Envelope::new(CHANNEL, MESSAGE_TYPE, action, originator))
        .expect("loopback transmit");
}

/// Poll the state until it matches or the deadline passes.
#[allow(dead_code)]
pub async fn wait_for_state(
    service: &MasterJobService,
    target: MasterJobState,
    deadline: Duration,
) -> bool {
    let start = tokio::time::Instant::now();
    while start.elapsed() < deadline {
        if service.state().await == target {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

/// Trigger a poll and give the actor time to settle.
#[allow(dead_code)]
pub async fn poll_and_settle(service: &MasterJobService) {
    service.trigger_poll().await.expect("trigger poll");
    tokio::time::sleep(Duration::from_millis(30)).await;
}

/// Drive a freshly started instance through comms verification into
/// Starting: one poll to transmit, then the loopback echo advances it.
#[allow(dead_code)]
pub async fn verify_comms(service: &MasterJobService) {
    poll_and_settle(service).await;
    assert!(
        wait_for_state(service, MasterJobState::Starting, Duration::from_secs(1)).await,
        "instance should see its own echo and reach Starting"
    );
}

/// Drive an instance from Starting all the way to Active by hand.
#[allow(dead_code)]
pub async fn climb_to_active(service: &MasterJobService) {
    for _ in 0..4 {
        poll_and_settle(service).await;
    }
    assert_eq!(service.state().await, MasterJobState::Active);
}

/// Count how many of the given services are Active.
#[allow(dead_code)]
pub async fn count_active(services: &[&MasterJobService]) -> usize {
    let mut active = 0;
    for service in services {
        if service.state().await == MasterJobState::Active {
            active += 1;
        }
    }
    active
}

/// Wait for the next action transmitted by `originator`, skipping
/// everything else on the channel.
#[allow(dead_code)]
pub async fn next_action_from(
    rx: &mut mpsc::UnboundedReceiver<Envelope>,
    originator: &str,
    deadline: Duration,
) -> Option<String> {
    tokio::time::timeout(deadline, async {
        loop {
            match rx.recv().await {
                Some(env) if env.originator_service_id == originator => {
                    return Some(env.action_type)
                }
                Some(_) => continue,
                None => return None,
            }
        }
    })
    .await
    .unwrap_or(None)
}

/// A transport that can drop everything on the floor, simulating a
/// partition between instances that share the inner bus.
pub struct GatedBus {
    inner: Arc<LoopbackBus>,
    open: AtomicBool,
}

#[allow(dead_code)]
impl GatedBus {
    pub fn new(inner: Arc<LoopbackBus>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            open: AtomicBool::new(true),
        })
    }

    pub fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::SeqCst);
    }

    pub fn subscribe(&self, channel: &str) -> mpsc::UnboundedReceiver<Envelope> {
        self.inner.subscribe(channel)
    }
}

impl MessageTransport for GatedBus {
    fn transmit(&self, envelope: Envelope) -> Result<()> {
        if self.open.load(Ordering::SeqCst) {
            self.inner.transmit(envelope)
        } else {
            // Partitioned: the message is lost in transit.
            Ok(())
        }
    }
}

/// Start an instance whose transmissions pass through the gate.
#[allow(dead_code)]
pub async fn spawn_gated_instance(
    gate: &Arc<GatedBus>,
    config: MasterJobConfig,
    service_id: &str,
) -> Result<(MasterJobService, Arc<Scheduler>)> {
    let scheduler = Arc::new(Scheduler::new());
    let incoming = gate.subscribe(CHANNEL);
    let service = MasterJobService::start(
        config,
        service_id,
        gate.clone() as Arc<dyn MessageTransport>,
        incoming,
        scheduler.clone(),
    )
    .await?;
    Ok((service, scheduler))
}
