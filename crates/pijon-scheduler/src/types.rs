use chrono::{DateTime, Local, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use pijon_core::Portion;

use crate::error::SchedulerError;

/// Opaque identifier for a pending scheduled feed (UUIDv4, never reused).
///
/// Any string converts into an id so user input can be looked up; such an
/// id simply matches nothing unless it was issued by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScheduleId(String);

impl ScheduleId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ScheduleId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ScheduleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ScheduleId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ScheduleId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Wall-clock time of day (local time), `HH:MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FeedTime {
    hour: u8,
    minute: u8,
}

impl FeedTime {
    pub fn new(hour: u8, minute: u8) -> crate::error::Result<Self> {
        if hour > 23 || minute > 59 {
            return Err(SchedulerError::InvalidTime(format!("{hour:02}:{minute:02}")));
        }
        Ok(Self { hour, minute })
    }

    pub fn hour(&self) -> u8 {
        self.hour
    }

    pub fn minute(&self) -> u8 {
        self.minute
    }

    pub fn as_naive(&self) -> NaiveTime {
        // Range is checked in `new`, so this always yields a time.
        NaiveTime::from_hms_opt(self.hour as u32, self.minute as u32, 0).unwrap_or(NaiveTime::MIN)
    }
}

impl fmt::Display for FeedTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl std::str::FromStr for FeedTime {
    type Err = SchedulerError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let invalid = || SchedulerError::InvalidTime(s.to_string());
        let (h, m) = s.trim().split_once(':').ok_or_else(invalid)?;
        let digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
        if h.is_empty() || h.len() > 2 || m.len() != 2 || !digits(h) || !digits(m) {
            return Err(invalid());
        }
        let hour = h.parse::<u8>().map_err(|_| invalid())?;
        let minute = m.parse::<u8>().map_err(|_| invalid())?;
        FeedTime::new(hour, minute)
    }
}

impl TryFrom<String> for FeedTime {
    type Error = SchedulerError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<FeedTime> for String {
    fn from(t: FeedTime) -> Self {
        t.to_string()
    }
}

/// A pending scheduled feed, as shown to the user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduledFeed {
    pub id: ScheduleId,
    /// Time of day as entered.
    pub time: FeedTime,
    /// Resolved absolute instant; always after the moment it was added.
    pub fire_at: DateTime<Local>,
    pub portion: Portion,
}
