use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use pijon_core::{
    config::{PijonConfig, TopicsConfig},
    ConnectionState, FeedCommand, Portion,
};
use pijon_scheduler::{
    Clock, FeedTime, ScheduleId, ScheduleRegistry, ScheduledFeed, SchedulerError, SystemClock,
};
use pijon_transport::{MessageHandler, Transport, TransportError};

use crate::{correlator::CommandCorrelator, error::FeedError, liveness::LivenessMonitor};

/// Everything a status display needs, captured at one instant.
#[derive(Debug, Clone, Serialize)]
pub struct ControllerSnapshot {
    pub state: ConnectionState,
    pub locked: bool,
    pub error: Option<String>,
    pub schedules: Vec<ScheduledFeed>,
}

/// Process-wide context tying the liveness monitor, command correlator and
/// schedule registry to one transport.
///
/// Construct once with [`FeederController::start`]; it subscribes the status
/// and ack topics and arms the connect timer. [`FeederController::shutdown`]
/// (also run on drop) unsubscribes both topics and cancels every timer.
pub struct FeederController {
    transport: Arc<dyn Transport>,
    topics: TopicsConfig,
    /// Handlers installed by `start`; shutdown only clears slots still holding them.
    status_handler: MessageHandler,
    ack_handler: MessageHandler,
    liveness: Arc<LivenessMonitor>,
    correlator: Arc<CommandCorrelator>,
    schedules: ScheduleRegistry,
    shut_down: AtomicBool,
}

impl FeederController {
    /// Start with the host's local clock. Must be called inside a Tokio runtime.
    pub fn start(config: &PijonConfig, transport: Arc<dyn Transport>) -> Result<Self, TransportError> {
        Self::start_with_clock(config, transport, Arc::new(SystemClock))
    }

    pub fn start_with_clock(
        config: &PijonConfig,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, TransportError> {
        let topics = config.topics.clone();
        let liveness = LivenessMonitor::new(&config.liveness);
        let correlator = CommandCorrelator::new(
            Arc::clone(&transport),
            topics.feed.clone(),
            Arc::clone(&liveness),
            config.commands.response_timeout(),
        );
        let schedules = ScheduleRegistry::new(Arc::clone(&transport), topics.feed.clone(), clock);

        // A heartbeat means the device is alive again; drop any stale failure text.
        let (monitor, corr) = (Arc::clone(&liveness), Arc::clone(&correlator));
        let status_handler: MessageHandler = Arc::new(move |_payload: &str| {
            monitor.on_heartbeat();
            corr.clear_error();
        });
        transport.subscribe(&topics.status, Arc::clone(&status_handler))?;

        let corr = Arc::clone(&correlator);
        let ack_handler: MessageHandler = Arc::new(move |payload: &str| {
            corr.on_response(payload);
        });
        if let Err(e) = transport.subscribe(&topics.ack, Arc::clone(&ack_handler)) {
            let _ = transport.unsubscribe_handler(&topics.status, &status_handler);
            return Err(e);
        }

        liveness.start();
        info!(
            transport = transport.name(),
            status_topic = %topics.status,
            ack_topic = %topics.ack,
            "feeder controller started"
        );

        Ok(Self {
            transport,
            topics,
            status_handler,
            ack_handler,
            liveness,
            correlator,
            schedules,
            shut_down: AtomicBool::new(false),
        })
    }

    /// Issue an immediate feed. See [`CommandCorrelator::issue_immediate`].
    pub fn feed_now(&self, portion: Portion) -> Result<FeedCommand, FeedError> {
        self.correlator.issue_immediate(portion)
    }

    pub fn add_schedule(&self, time: FeedTime, portion: Portion) -> Result<ScheduledFeed, SchedulerError> {
        self.schedules.add(time, portion)
    }

    /// Cancel a pending schedule; `None` if `id` is not pending.
    pub fn remove_schedule(&self, id: &ScheduleId) -> Option<ScheduledFeed> {
        self.schedules.remove(id)
    }

    pub fn schedules(&self) -> Vec<ScheduledFeed> {
        self.schedules.list()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.liveness.current_state()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.liveness.watch()
    }

    pub fn is_locked(&self) -> bool {
        self.correlator.currently_locked()
    }

    pub fn last_error(&self) -> Option<String> {
        self.correlator.current_error()
    }

    /// Whether an immediate feed would currently be accepted.
    pub fn can_feed(&self) -> bool {
        !self.is_locked() && !self.connection_state().is_offline()
    }

    /// Label for the feed trigger, matching its enabled/disabled state.
    pub fn trigger_label(&self) -> &'static str {
        if self.connection_state().is_offline() {
            "DEVICE OFFLINE"
        } else if self.is_locked() {
            "FEEDING..."
        } else {
            "FEED NOW"
        }
    }

    pub fn snapshot(&self) -> ControllerSnapshot {
        ControllerSnapshot {
            state: self.connection_state(),
            locked: self.is_locked(),
            error: self.last_error(),
            schedules: self.schedules(),
        }
    }

    /// Unsubscribe from the device topics and cancel every timer. Idempotent.
    ///
    /// A slot taken over by a later controller on the same transport is left
    /// to its new owner.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        for (topic, handler) in [
            (&self.topics.status, &self.status_handler),
            (&self.topics.ack, &self.ack_handler),
        ] {
            match self.transport.unsubscribe_handler(topic, handler) {
                Ok(true) => {}
                Ok(false) => debug!(%topic, "slot owned by a newer subscriber, left in place"),
                Err(e) => warn!(%topic, error = %e, "unsubscribe failed during shutdown"),
            }
        }
        self.liveness.shutdown();
        self.correlator.shutdown();
        self.schedules.shutdown();
        info!("feeder controller stopped");
    }
}

impl Drop for FeederController {
    fn drop(&mut self) {
        self.shutdown();
    }
}
