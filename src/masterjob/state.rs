/// Negotiation state for a master job.
///
/// States are ordered: the contention downgrade rules compare the local
/// state against the stage a peer's control message represents
/// (`state <= Requesting1` and so on). The ladder is defined by an
/// explicit ordinal table rather than declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MasterJobState {
    /// Negotiation is switched off; all traffic is ignored.
    Disabled,
    /// Waiting to see our own message echoed back, proving the channel works.
    VerifyingComms,
    /// Fresh negotiation round; asking who the master is.
    Starting,
    /// First contention stage.
    Requesting1,
    /// Second contention stage.
    Requesting2,
    /// Final contention stage; next poll claims mastership.
    TakingControl,
    /// Resting as standby; a peer holds mastership.
    Inactive,
    /// This instance is the master and its gated jobs are running.
    Active,
}

impl MasterJobState {
    /// Position on the negotiation ladder.
    pub fn ordinal(&self) -> u8 {
        match self {
            MasterJobState::Disabled => 0,
            MasterJobState::VerifyingComms => 1,
            MasterJobState::Starting => 2,
            MasterJobState::Requesting1 => 3,
            MasterJobState::Requesting2 => 4,
            MasterJobState::TakingControl => 5,
            MasterJobState::Inactive => 6,
            MasterJobState::Active => 7,
        }
    }
}

impl PartialOrd for MasterJobState {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MasterJobState {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.ordinal().cmp(&other.ordinal())
    }
}

impl std::fmt::Display for MasterJobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MasterJobState::Disabled => "disabled",
            MasterJobState::VerifyingComms => "verifying-comms",
            MasterJobState::Starting => "starting",
            MasterJobState::Requesting1 => "requesting-1",
            MasterJobState::Requesting2 => "requesting-2",
            MasterJobState::TakingControl => "taking-control",
            MasterJobState::Inactive => "inactive",
            MasterJobState::Active => "active",
        };
        write!(f, "{}", s)
    }
}

/// Negotiation message action types.
///
/// The wire carries free-form strings; parsing normalizes case once at the
/// boundary and funnels anything unknown into `Unrecognized` instead of
/// silently falling through string comparisons.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegotiationAction {
    WhoIsMaster,
    IAmMaster,
    IAmStandby,
    ResyncMaster,
    RequestingControl1,
    RequestingControl2,
    TakingControl,
    Unrecognized(String),
}

impl NegotiationAction {
    pub fn parse(action: &str) -> Self {
        match action.to_ascii_lowercase().as_str() {
            "whoismaster" => NegotiationAction::WhoIsMaster,
            "iammaster" => NegotiationAction::IAmMaster,
            "iamstandby" => NegotiationAction::IAmStandby,
            "resyncmaster" => NegotiationAction::ResyncMaster,
            "requestingcontrol1" => NegotiationAction::RequestingControl1,
            "requestingcontrol2" => NegotiationAction::RequestingControl2,
            "takingcontrol" => NegotiationAction::TakingControl,
            other => NegotiationAction::Unrecognized(other.to_string()),
        }
    }

    /// Canonical wire form.
    pub fn as_str(&self) -> &str {
        match self {
            NegotiationAction::WhoIsMaster => "whoismaster",
            NegotiationAction::IAmMaster => "iammaster",
            NegotiationAction::IAmStandby => "iamstandby",
            NegotiationAction::ResyncMaster => "resyncmaster",
            NegotiationAction::RequestingControl1 => "requestingcontrol1",
            NegotiationAction::RequestingControl2 => "requestingcontrol2",
            NegotiationAction::TakingControl => "takingcontrol",
            NegotiationAction::Unrecognized(s) => s,
        }
    }

    /// The contention stage a control message represents, used as the gate
    /// for the downgrade rule. Non-contention actions have no stage.
    pub fn contention_gate(&self) -> Option<MasterJobState> {
        match self {
            NegotiationAction::RequestingControl1 => Some(MasterJobState::Requesting1),
            NegotiationAction::RequestingControl2 => Some(MasterJobState::Requesting2),
            NegotiationAction::TakingControl => Some(MasterJobState::TakingControl),
            _ => None,
        }
    }
}

impl std::fmt::Display for NegotiationAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
