use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::PijonError;

/// Wire prefix of every feed command published on the feed topic.
pub const FEED_PREFIX: &str = "FEED";
/// Literal acknowledgement payload sent by the device after a successful feed.
pub const ACK_FED: &str = "FED";
/// Any acknowledgement starting with this prefix reports a device failure.
pub const ACK_ERROR_PREFIX: &str = "ERROR";

/// Closed set of feed quantities understood by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Portion {
    #[default]
    Small,
    Medium,
    Large,
}

impl Portion {
    pub const ALL: [Portion; 3] = [Portion::Small, Portion::Medium, Portion::Large];

    /// Upper-case wire form (`SMALL`, `MEDIUM`, `LARGE`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Portion::Small => "SMALL",
            Portion::Medium => "MEDIUM",
            Portion::Large => "LARGE",
        }
    }
}

impl fmt::Display for Portion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Portion {
    type Err = PijonError;

    /// Case-insensitive so `small`, `Small` and `SMALL` all parse.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SMALL" => Ok(Portion::Small),
            "MEDIUM" => Ok(Portion::Medium),
            "LARGE" => Ok(Portion::Large),
            _ => Err(PijonError::InvalidPortion(s.to_string())),
        }
    }
}

/// Reachability of the remote feeder as inferred from heartbeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConnectionState {
    /// No heartbeat seen yet and the connect window is still open.
    Connecting,
    Online,
    Offline,
}

impl ConnectionState {
    pub fn is_offline(&self) -> bool {
        matches!(self, ConnectionState::Offline)
    }

    /// Short badge text for status displays.
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Online => "Online",
            ConnectionState::Offline => "Offline",
        }
    }

    /// One-line explanation shown under the badge.
    pub fn detail(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "Searching for signal",
            ConnectionState::Online => "Heartbeat active",
            ConnectionState::Offline => "Waiting for device",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Connecting => write!(f, "CONNECTING"),
            ConnectionState::Online => write!(f, "ONLINE"),
            ConnectionState::Offline => write!(f, "OFFLINE"),
        }
    }
}

/// A single feed instruction: `FEED:<PORTION>` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedCommand {
    pub portion: Portion,
}

impl FeedCommand {
    pub fn new(portion: Portion) -> Self {
        Self { portion }
    }

    pub fn encode(&self) -> String {
        format!("{FEED_PREFIX}:{}", self.portion)
    }

    pub fn decode(payload: &str) -> crate::error::Result<Self> {
        let portion = payload
            .strip_prefix(FEED_PREFIX)
            .and_then(|rest| rest.strip_prefix(':'))
            .ok_or_else(|| PijonError::InvalidCommand(payload.to_string()))?;
        Ok(Self {
            portion: portion.parse()?,
        })
    }
}

impl fmt::Display for FeedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Classification of a raw payload received on the ack topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckMessage {
    /// Exactly `FED`.
    Fed,
    /// Starts with `ERROR`; carries the untouched payload.
    Error(String),
    /// Anything else. Ignored by the correlator.
    Other,
}

impl AckMessage {
    pub fn classify(payload: &str) -> Self {
        if payload == ACK_FED {
            AckMessage::Fed
        } else if payload.starts_with(ACK_ERROR_PREFIX) {
            AckMessage::Error(payload.to_string())
        } else {
            AckMessage::Other
        }
    }
}
