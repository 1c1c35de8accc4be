//! `pijon-scheduler`: in-memory registry of one-shot scheduled feeds.
//!
//! # Overview
//!
//! A schedule is a time of day plus a portion size. When added, the time is
//! resolved to the next matching local instant strictly after "now" (a time
//! at or before the current instant rolls over to tomorrow) and a one-shot
//! Tokio timer is armed. When the timer fires the registry publishes
//! `FEED:<PORTION>` and drops the record; removing a schedule first cancels
//! its timer so the feed is never sent.
//!
//! Schedules live only in memory and do not repeat after firing.

pub mod clock;
pub mod error;
pub mod registry;
pub mod schedule;
pub mod types;

pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{Result, SchedulerError};
pub use registry::ScheduleRegistry;
pub use schedule::next_fire_at;
pub use types::{FeedTime, ScheduleId, ScheduledFeed};
