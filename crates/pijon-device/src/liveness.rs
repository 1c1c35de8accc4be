//! Device liveness: passive detection based on heartbeat arrivals only.
//!
//! Every message on the status topic counts as a heartbeat, whatever its
//! content. A heartbeat sets ONLINE and re-arms a silence timer; if the timer
//! expires before the next heartbeat the device is declared OFFLINE. The
//! device is never pinged.
//!
//! A separate connect timer, armed once by [`LivenessMonitor::start`], moves
//! CONNECTING to OFFLINE when no heartbeat is seen at all. It never touches an
//! ONLINE state; leaving ONLINE is the silence timer's job alone.

use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use tokio::{sync::watch, task::AbortHandle};
use tracing::{debug, info, warn};

use pijon_core::{config::LivenessConfig, ConnectionState};

#[derive(Default)]
struct Timers {
    silence: Option<AbortHandle>,
    connect: Option<AbortHandle>,
    /// Bumped on every re-arm; a silence expiry only applies if its epoch is
    /// still current.
    epoch: u64,
    shut_down: bool,
}

/// Tracks whether the feeder is reachable.
pub struct LivenessMonitor {
    silence_timeout: Duration,
    connect_timeout: Duration,
    state_tx: watch::Sender<ConnectionState>,
    timers: Mutex<Timers>,
}

impl LivenessMonitor {
    pub fn new(config: &LivenessConfig) -> Arc<Self> {
        let initial = if config.start_connecting {
            ConnectionState::Connecting
        } else {
            ConnectionState::Offline
        };
        let (state_tx, _) = watch::channel(initial);
        Arc::new(Self {
            silence_timeout: Duration::from_millis(config.silence_timeout_ms),
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
            state_tx,
            timers: Mutex::new(Timers::default()),
        })
    }

    /// Arm the connect timer. Has no effect when the monitor did not start in
    /// CONNECTING or has been shut down.
    pub fn start(self: &Arc<Self>) {
        let mut timers = self.lock_timers();
        if timers.shut_down || self.current_state() != ConnectionState::Connecting {
            return;
        }
        if let Some(old) = timers.connect.take() {
            old.abort();
        }
        let this = Arc::clone(self);
        let delay = self.connect_timeout;
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            this.on_connect_timeout();
        });
        timers.connect = Some(task.abort_handle());
    }

    /// Record a heartbeat: go ONLINE and restart the silence window.
    pub fn on_heartbeat(self: &Arc<Self>) {
        let mut timers = self.lock_timers();
        if timers.shut_down {
            return;
        }
        if let Some(old) = timers.silence.take() {
            old.abort();
        }
        timers.epoch += 1;
        let epoch = timers.epoch;

        if self.transition(ConnectionState::Online) {
            info!(state = %ConnectionState::Online, "device heartbeat received");
        } else {
            debug!("heartbeat");
        }

        let this = Arc::clone(self);
        let delay = self.silence_timeout;
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            this.on_silence_timeout(epoch);
        });
        timers.silence = Some(task.abort_handle());
    }

    pub fn current_state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Receiver that observes every state transition.
    pub fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Cancel both timers and ignore any later heartbeat.
    pub fn shutdown(&self) {
        let mut timers = self.lock_timers();
        timers.shut_down = true;
        timers.epoch += 1;
        for handle in [timers.silence.take(), timers.connect.take()].into_iter().flatten() {
            handle.abort();
        }
    }

    fn on_silence_timeout(&self, epoch: u64) {
        let mut timers = self.lock_timers();
        if timers.shut_down || timers.epoch != epoch {
            return;
        }
        timers.silence = None;
        if self.transition(ConnectionState::Offline) {
            warn!(
                silence_ms = self.silence_timeout.as_millis() as u64,
                state = %ConnectionState::Offline,
                "no heartbeat within silence window"
            );
        }
    }

    fn on_connect_timeout(&self) {
        let mut timers = self.lock_timers();
        timers.connect = None;
        if timers.shut_down {
            return;
        }
        if self.current_state() != ConnectionState::Online
            && self.transition(ConnectionState::Offline)
        {
            warn!(
                connect_ms = self.connect_timeout.as_millis() as u64,
                state = %ConnectionState::Offline,
                "no heartbeat since start"
            );
        }
    }

    /// Returns true when the state actually changed.
    fn transition(&self, to: ConnectionState) -> bool {
        self.state_tx.send_if_modified(|state| {
            if *state == to {
                false
            } else {
                *state = to;
                true
            }
        })
    }

    fn lock_timers(&self) -> MutexGuard<'_, Timers> {
        self.timers.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> Arc<LivenessMonitor> {
        LivenessMonitor::new(&LivenessConfig::default())
    }

    async fn at(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn starts_connecting_then_times_out() {
        let m = monitor();
        m.start();
        assert_eq!(m.current_state(), ConnectionState::Connecting);
        at(9_999).await;
        assert_eq!(m.current_state(), ConnectionState::Connecting);
        at(2).await;
        assert_eq!(m.current_state(), ConnectionState::Offline);
    }

    #[tokio::test(start_paused = true)]
    async fn variant_without_connecting_starts_offline() {
        let m = LivenessMonitor::new(&LivenessConfig {
            start_connecting: false,
            ..LivenessConfig::default()
        });
        m.start();
        assert_eq!(m.current_state(), ConnectionState::Offline);
        m.on_heartbeat();
        assert_eq!(m.current_state(), ConnectionState::Online);
        at(10_001).await;
        assert_eq!(m.current_state(), ConnectionState::Offline);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_timer_never_overrides_online() {
        let m = monitor();
        m.start();
        at(1_000).await;
        m.on_heartbeat();
        // Connect timer expires at 10s; silence timer at 11s.
        at(9_500).await;
        assert_eq!(m.current_state(), ConnectionState::Online);
        at(1_000).await;
        assert_eq!(m.current_state(), ConnectionState::Offline);
    }

    #[tokio::test(start_paused = true)]
    async fn watch_observes_transitions() {
        let m = monitor();
        let mut rx = m.watch();
        m.on_heartbeat();
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), ConnectionState::Online);

        // A repeated heartbeat is not a transition.
        m.on_heartbeat();
        assert!(!rx.has_changed().unwrap());

        at(10_001).await;
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), ConnectionState::Offline);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_timers_and_ignores_heartbeats() {
        let m = monitor();
        m.start();
        m.on_heartbeat();
        m.shutdown();
        at(60_000).await;
        assert_eq!(m.current_state(), ConnectionState::Online);

        m.on_heartbeat();
        assert!(m.lock_timers().silence.is_none());
    }
}
