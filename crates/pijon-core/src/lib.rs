//! `pijon-core`: shared types, topic constants and configuration for the
//! Pijon feeder controller.

pub mod config;
pub mod error;
pub mod types;

pub use config::PijonConfig;
pub use error::{PijonError, Result};
pub use types::{AckMessage, ConnectionState, FeedCommand, Portion};
