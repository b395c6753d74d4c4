use std::collections::HashMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::masterjob::jobs::MasterJobHolder;
use crate::masterjob::state::MasterJobState;

/// A peer instance observed through negotiation traffic.
///
/// The roster is append/update only; partners are never expired (partition
/// tolerance is not attempted).
#[derive(Debug, Clone)]
pub struct Partner {
    pub service_id: String,
    pub is_standby: bool,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Election state for one negotiating role.
///
/// Mutated only by the negotiation actor; monitors read it through the
/// shared lock with eventual consistency.
#[derive(Debug)]
pub struct MasterJobContext {
    state: MasterJobState,
    state_change_counter: u64,
    partners: HashMap<String, Partner>,
    master_record: Option<String>,
    master_poll_attempts: u32,
    max_poll_attempts: u32,
    pub jobs: HashMap<Uuid, MasterJobHolder>,
    pub message_last_in: Option<DateTime<Utc>>,
    pub message_last_out: Option<DateTime<Utc>>,
}

impl MasterJobContext {
    pub fn new(max_poll_attempts: u32) -> Self {
        Self {
            state: MasterJobState::Disabled,
            state_change_counter: 0,
            partners: HashMap::new(),
            master_record: None,
            master_poll_attempts: 0,
            max_poll_attempts,
            jobs: HashMap::new(),
            message_last_in: None,
            message_last_out: None,
        }
    }

    pub fn state(&self) -> MasterJobState {
        self.state
    }

    /// Opaque generation for observers; bumps on every real transition.
    pub fn state_change_counter(&self) -> u64 {
        self.state_change_counter
    }

    /// Move to a new state. Returns the previous state when the value
    /// actually changed; a same-state write is a no-op so duplicate
    /// message delivery never spends a generation.
    pub fn set_state(&mut self, state: MasterJobState) -> Option<MasterJobState> {
        if self.state == state {
            return None;
        }
        let previous = self.state;
        self.state = state;
        self.state_change_counter += 1;
        Some(previous)
    }

    pub fn partners(&self) -> &HashMap<String, Partner> {
        &self.partners
    }

    /// Record a peer seen in negotiation traffic, updating its standby
    /// flag and last-seen time if already known.
    pub fn partner_add(&mut self, service_id: &str, is_standby: bool) {
        let now = Utc::now();
        self.partners
            .entry(service_id.to_string())
            .and_modify(|p| {
                p.is_standby = is_standby;
                p.last_seen = now;
            })
            .or_insert_with(|| Partner {
                service_id: service_id.to_string(),
                is_standby,
                first_seen: now,
                last_seen: now,
            });
    }

    pub fn master_record(&self) -> Option<&str> {
        self.master_record.as_deref()
    }

    pub fn master_record_set(&mut self, service_id: &str) {
        self.master_record = Some(service_id.to_string());
    }

    pub fn master_record_clear(&mut self) {
        self.master_record = None;
    }

    pub fn master_poll_attempts(&self) -> u32 {
        self.master_poll_attempts
    }

    pub fn master_poll_attempts_increment(&mut self) {
        self.master_poll_attempts += 1;
    }

    pub fn master_poll_attempts_reset(&mut self) {
        self.master_poll_attempts = 0;
    }

    pub fn master_poll_attempts_exceeded(&self) -> bool {
        self.master_poll_attempts > self.max_poll_attempts
    }
}
