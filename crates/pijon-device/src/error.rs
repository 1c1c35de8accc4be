use std::fmt;

use thiserror::Error;

use pijon_transport::TransportError;

/// Why an immediate feed was refused without publishing anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    /// A previous command has not been acknowledged yet.
    Locked,
    /// No heartbeat within the silence window.
    Offline,
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockReason::Locked => write!(f, "a feed command is still outstanding"),
            BlockReason::Offline => write!(f, "device is offline"),
        }
    }
}

/// Errors returned by [`CommandCorrelator::issue_immediate`](crate::CommandCorrelator::issue_immediate).
#[derive(Debug, Error)]
pub enum FeedError {
    /// Refused locally; nothing was published.
    #[error("Feed blocked: {reason}")]
    Blocked { reason: BlockReason },

    /// The transport would not accept the command; the lock was not taken.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl FeedError {
    pub fn is_blocked(&self) -> bool {
        matches!(self, FeedError::Blocked { .. })
    }
}
