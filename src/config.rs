use std::time::Duration;

use crate::error::{MajordomoError, Result};

/// Jitter ranges applied to the negotiation poll schedule.
///
/// Every poll rewrites its own frequency to `base + rand(0..spread)` so that
/// a fleet of instances never retries in lockstep. Three ranges are used
/// depending on state: active contention, master sync, and idle standby.
#[derive(Debug, Clone)]
pub struct PollTiming {
    /// Frequency range while negotiating (VerifyingComms through TakingControl).
    pub negotiate_base: Duration,
    pub negotiate_spread: Duration,
    /// Frequency range for the master's periodic IAmMaster sync.
    pub sync_base: Duration,
    pub sync_spread: Duration,
    /// Stretched range for a standby with no active contention.
    pub idle_base: Duration,
    pub idle_spread: Duration,
}

impl Default for PollTiming {
    fn default() -> Self {
        Self {
            negotiate_base: Duration::from_secs(5),
            negotiate_spread: Duration::from_secs(10),
            sync_base: Duration::from_secs(5),
            sync_spread: Duration::from_secs(25),
            idle_base: Duration::from_secs(10),
            idle_spread: Duration::from_secs(60),
        }
    }
}

/// Configuration for one master-job negotiation role.
#[derive(Debug, Clone)]
pub struct MasterJobConfig {
    /// Display name used in schedule names, events and logs.
    pub name: String,
    /// Channel the negotiation listener is registered on. Required.
    pub negotiation_channel_incoming: Option<String>,
    /// Message type negotiation traffic is filtered on. Required.
    pub negotiation_message_type: Option<String>,
    /// Channel negotiation messages are transmitted on.
    /// Historically there was only one channel, so the incoming channel is
    /// used when this is not set.
    pub negotiation_channel_outgoing: Option<String>,
    pub negotiation_channel_priority: i64,
    /// Frequency the negotiation poll is initially registered with.
    pub poll_frequency: Duration,
    /// Wait before the first negotiation poll fires.
    pub poll_initial_wait: Duration,
    /// Standby polls past this count force a restart of the negotiation
    /// sequence from Starting.
    pub max_poll_attempts: u32,
    pub timing: PollTiming,
}

impl Default for MasterJobConfig {
    fn default() -> Self {
        Self {
            name: "masterjob".to_string(),
            negotiation_channel_incoming: None,
            negotiation_message_type: None,
            negotiation_channel_outgoing: None,
            negotiation_channel_priority: 2,
            poll_frequency: Duration::from_secs(20),
            poll_initial_wait: Duration::from_secs(5),
            max_poll_attempts: 3,
            timing: PollTiming::default(),
        }
    }
}

impl MasterJobConfig {
    pub fn new(
        name: impl Into<String>,
        channel: impl Into<String>,
        message_type: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            negotiation_channel_incoming: Some(channel.into()),
            negotiation_message_type: Some(message_type.into()),
            ..Default::default()
        }
    }

    pub fn with_outgoing_channel(mut self, channel: impl Into<String>) -> Self {
        self.negotiation_channel_outgoing = Some(channel.into());
        self
    }

    pub fn with_poll_frequency(mut self, frequency: Duration, initial_wait: Duration) -> Self {
        self.poll_frequency = frequency;
        self.poll_initial_wait = initial_wait;
        self
    }

    pub fn with_max_poll_attempts(mut self, max: u32) -> Self {
        self.max_poll_attempts = max;
        self
    }

    pub fn with_timing(mut self, timing: PollTiming) -> Self {
        self.timing = timing;
        self
    }

    /// Resolved channel for outbound negotiation traffic.
    pub fn outgoing_channel(&self) -> Option<&str> {
        self.negotiation_channel_outgoing
            .as_deref()
            .or(self.negotiation_channel_incoming.as_deref())
    }

    /// Negotiation requires both an incoming channel and a message type.
    /// Absent either, job startup fails fast and is not retried.
    pub fn validate(&self) -> Result<()> {
        if self.negotiation_channel_incoming.is_none() {
            return Err(MajordomoError::Configuration(format!(
                "master job '{}' is enabled but the incoming negotiation channel has not been set",
                self.name
            )));
        }
        if self.negotiation_message_type.is_none() {
            return Err(MajordomoError::Configuration(format!(
                "master job '{}' is enabled but the negotiation message type has not been set",
                self.name
            )));
        }
        Ok(())
    }
}

/// Configuration for the outgoing request correlator.
#[derive(Debug, Clone)]
pub struct RequestorConfig {
    /// Outgoing requests must be administratively enabled.
    pub outgoing_requests_enabled: bool,
    /// Timeout used when neither the request settings nor the caller
    /// supply one.
    pub default_processing_time: Duration,
    /// Address triple responses must be sent back to.
    pub response_channel_id: String,
    pub response_message_type: String,
    pub response_action_type: String,
}

impl Default for RequestorConfig {
    fn default() -> Self {
        Self {
            outgoing_requests_enabled: true,
            default_processing_time: Duration::from_secs(30),
            response_channel_id: "response".to_string(),
            response_message_type: "message".to_string(),
            response_action_type: "default".to_string(),
        }
    }
}

impl RequestorConfig {
    pub fn new(response_channel_id: impl Into<String>) -> Self {
        Self {
            response_channel_id: response_channel_id.into(),
            ..Default::default()
        }
    }

    pub fn disabled(mut self) -> Self {
        self.outgoing_requests_enabled = false;
        self
    }

    pub fn with_default_processing_time(mut self, timeout: Duration) -> Self {
        self.default_processing_time = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn master_job_config_default() {
        let cfg = MasterJobConfig::default();
        assert_eq!(cfg.poll_frequency, Duration::from_secs(20));
        assert_eq!(cfg.poll_initial_wait, Duration::from_secs(5));
        assert_eq!(cfg.max_poll_attempts, 3);
        assert!(cfg.negotiation_channel_incoming.is_none());
        assert!(cfg.outgoing_channel().is_none());
    }

    #[test]
    fn validate_requires_incoming_channel() {
        let mut cfg = MasterJobConfig::default();
        cfg.negotiation_message_type = Some("negotiation".to_string());
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("incoming negotiation channel"));
    }

    #[test]
    fn validate_requires_message_type() {
        let mut cfg = MasterJobConfig::default();
        cfg.negotiation_channel_incoming = Some("masterjob".to_string());
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("message type"));
    }

    #[test]
    fn validate_accepts_complete_config() {
        let cfg = MasterJobConfig::new("orders", "masterjob", "negotiation");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn outgoing_channel_falls_back_to_incoming() {
        let cfg = MasterJobConfig::new("orders", "masterjob", "negotiation");
        assert_eq!(cfg.outgoing_channel(), Some("masterjob"));

        let cfg = cfg.with_outgoing_channel("masterjob-out");
        assert_eq!(cfg.outgoing_channel(), Some("masterjob-out"));
    }

    #[test]
    fn requestor_config_default() {
        let cfg = RequestorConfig::default();
        assert!(cfg.outgoing_requests_enabled);
        assert_eq!(cfg.default_processing_time, Duration::from_secs(30));
    }

    #[test]
    fn requestor_config_disabled() {
        let cfg = RequestorConfig::new("replies").disabled();
        assert!(!cfg.outgoing_requests_enabled);
        assert_eq!(cfg.response_channel_id, "replies");
    }
}
