//! Immediate feed commands and their asynchronous outcome.
//!
//! Publishing a feed takes the command lock; the lock is released by the next
//! `FED` or `ERROR...` message on the ack topic. Acks carry no request id, so
//! any ack releases whatever lock is held, including one taken by a later
//! command than the one being acknowledged.
//!
//! Without a response timeout the lock holds until an ack arrives, possibly
//! forever. With `commands.response_timeout_ms` set, an unanswered command
//! releases its own lock and records a "no response" error.

use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use pijon_core::{AckMessage, FeedCommand, Portion};
use pijon_transport::Transport;

use crate::{
    error::{BlockReason, FeedError},
    liveness::LivenessMonitor,
};

const FAILURE_PREFIX: &str = "Feeding failed";
const NO_RESPONSE: &str = "no response";

#[derive(Default)]
struct CorrelatorState {
    locked: bool,
    error: Option<String>,
    /// Bumped on every issued command; stale response timers compare against it.
    issued: u64,
    response_timer: Option<AbortHandle>,
}

impl CorrelatorState {
    fn cancel_response_timer(&mut self) {
        if let Some(timer) = self.response_timer.take() {
            timer.abort();
        }
    }
}

pub struct CommandCorrelator {
    transport: Arc<dyn Transport>,
    feed_topic: String,
    liveness: Arc<LivenessMonitor>,
    response_timeout: Option<Duration>,
    state: Mutex<CorrelatorState>,
}

impl CommandCorrelator {
    pub fn new(
        transport: Arc<dyn Transport>,
        feed_topic: impl Into<String>,
        liveness: Arc<LivenessMonitor>,
        response_timeout: Option<Duration>,
    ) -> Arc<Self> {
        Arc::new(Self {
            transport,
            feed_topic: feed_topic.into(),
            liveness,
            response_timeout,
            state: Mutex::new(CorrelatorState::default()),
        })
    }

    /// Publish `FEED:<portion>` and take the command lock.
    ///
    /// Refused with [`FeedError::Blocked`] while the device is OFFLINE or a
    /// previous command is outstanding. Returns as soon as the command is
    /// queued; the outcome arrives later through [`Self::on_response`].
    pub fn issue_immediate(self: &Arc<Self>, portion: Portion) -> Result<FeedCommand, FeedError> {
        let mut state = self.lock_state();
        if self.liveness.current_state().is_offline() {
            debug!(%portion, "feed refused: device offline");
            return Err(FeedError::Blocked {
                reason: BlockReason::Offline,
            });
        }
        if state.locked {
            debug!(%portion, "feed refused: command outstanding");
            return Err(FeedError::Blocked {
                reason: BlockReason::Locked,
            });
        }

        let command = FeedCommand::new(portion);
        self.transport
            .publish(&self.feed_topic, &command.encode())?;

        state.locked = true;
        state.error = None;
        state.issued += 1;
        state.cancel_response_timer();
        if let Some(timeout) = self.response_timeout {
            state.response_timer = Some(self.arm_response_timer(timeout, state.issued));
        }
        info!(%portion, topic = %self.feed_topic, "feed command issued");
        Ok(command)
    }

    /// Handle one message from the ack topic. Returns how it was classified.
    pub fn on_response(&self, payload: &str) -> AckMessage {
        let ack = AckMessage::classify(payload);
        let mut state = self.lock_state();
        match &ack {
            AckMessage::Fed => {
                if !state.locked {
                    debug!("FED received with no command outstanding");
                }
                state.locked = false;
                state.error = None;
                state.cancel_response_timer();
                info!("feed confirmed by device");
            }
            AckMessage::Error(raw) => {
                state.locked = false;
                state.error = Some(format!("{FAILURE_PREFIX}: {raw}"));
                state.cancel_response_timer();
                warn!(payload = %raw, "device reported feed failure");
            }
            AckMessage::Other => debug!(%payload, "ignoring unrecognised ack"),
        }
        ack
    }

    pub fn currently_locked(&self) -> bool {
        self.lock_state().locked
    }

    pub fn current_error(&self) -> Option<String> {
        self.lock_state().error.clone()
    }

    /// Drop the stored error without touching the lock.
    pub fn clear_error(&self) {
        self.lock_state().error = None;
    }

    /// Cancel the response timer, if any. The lock is left as it is.
    pub fn shutdown(&self) {
        self.lock_state().cancel_response_timer();
    }

    fn arm_response_timer(self: &Arc<Self>, timeout: Duration, issued: u64) -> AbortHandle {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            this.on_response_timeout(issued);
        })
        .abort_handle()
    }

    fn on_response_timeout(&self, issued: u64) {
        let mut state = self.lock_state();
        if state.issued != issued || !state.locked {
            return;
        }
        state.locked = false;
        state.error = Some(format!("{FAILURE_PREFIX}: {NO_RESPONSE}"));
        state.response_timer = None;
        warn!(
            timeout = ?self.response_timeout,
            "no acknowledgement from device, releasing command lock"
        );
    }

    fn lock_state(&self) -> MutexGuard<'_, CorrelatorState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}
