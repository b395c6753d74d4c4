use crate::masterjob::state::MasterJobState;

/// Direction of a negotiation exchange, from the local instance's view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommDirection {
    Incoming,
    Outgoing,
}

/// Typed observer events for a master job.
///
/// Delivered over a broadcast channel; a lagging or absent subscriber
/// never affects the negotiation.
#[derive(Debug, Clone)]
pub enum MasterJobEvent {
    /// The negotiation state moved.
    StateChanged {
        job: String,
        previous: MasterJobState,
        current: MasterJobState,
        generation: u64,
    },
    /// A negotiation message was sent or received.
    Communication {
        job: String,
        direction: CommDirection,
        state: MasterJobState,
        action: String,
        generation: u64,
        originator: Option<String>,
    },
}
