//! `pijon-device`: live view of a remote feeder over a lossy message bus.
//!
//! - [`LivenessMonitor`] turns sparse heartbeats into ONLINE/OFFLINE.
//! - [`CommandCorrelator`] issues immediate feeds and resolves them from
//!   asynchronous acknowledgements.
//! - [`FeederController`] owns both plus the schedule registry, wires them to
//!   a transport on start and tears everything down on shutdown.

pub mod controller;
pub mod correlator;
pub mod error;
pub mod liveness;

pub use controller::{ControllerSnapshot, FeederController};
pub use correlator::CommandCorrelator;
pub use error::{BlockReason, FeedError};
pub use liveness::LivenessMonitor;
