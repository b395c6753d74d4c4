use thiserror::Error;

#[derive(Error, Debug)]
pub enum MajordomoError {
    #[error("Master job configuration invalid: {0}")]
    Configuration(String),

    #[error("Outgoing requests are not enabled")]
    OutgoingRequestsDisabled,

    #[error("Transport send failed: {0}")]
    Transport(String),

    #[error("Payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Schedule not found: {0}")]
    ScheduleNotFound(uuid::Uuid),

    #[error("Job '{0}' failed: {1}")]
    JobFailed(String, String),

    #[error("Service is not running")]
    NotRunning,

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, MajordomoError>;
