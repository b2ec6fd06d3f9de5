use herald_domain::error::EventError;
use herald_domain::replay::ReplayError;
use std::time::Duration;

#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("event: {0}")]
    Event(#[from] EventError),

    #[error("replay: {0}")]
    Replay(#[from] ReplayError),

    #[error("validation: {0}")]
    Validation(String),

    #[error("event {event_id} was not handled within {timeout:?}")]
    SyncTimeout { event_id: String, timeout: Duration },

    #[error("telemetry: {0}")]
    Telemetry(String),
}

pub type AppResult<T> = Result<T, AppError>;
