use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The time of day could not be parsed or is out of range.
    #[error("Invalid time of day: {0}")]
    InvalidTime(String),

    /// No local instant exists for the requested time (calendar overflow).
    #[error("Cannot resolve next fire time for {time}")]
    Unresolvable { time: String },

    /// The registry has been shut down and accepts no new schedules.
    #[error("Scheduler is shut down")]
    ShutDown,
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
