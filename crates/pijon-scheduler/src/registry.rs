use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use tokio::task::AbortHandle;
use tracing::{debug, error, info};

use pijon_core::{FeedCommand, Portion};
use pijon_transport::Transport;

use crate::{
    clock::Clock,
    error::{Result, SchedulerError},
    schedule::next_fire_at,
    types::{FeedTime, ScheduleId, ScheduledFeed},
};

/// A pending record paired with the timer that will fire it.
struct PendingFeed {
    record: ScheduledFeed,
    timer: AbortHandle,
}

#[derive(Default)]
struct RegistryState {
    /// Insertion order. Each entry owns exactly one live timer.
    pending: Vec<PendingFeed>,
    shut_down: bool,
}

impl RegistryState {
    fn take(&mut self, id: &ScheduleId) -> Option<PendingFeed> {
        let idx = self.pending.iter().position(|p| &p.record.id == id)?;
        Some(self.pending.remove(idx))
    }
}

/// Holds every pending scheduled feed and its one-shot timer.
///
/// Firing and cancelling both start by taking the record out of the registry
/// under the same lock, so whichever runs first wins and the other is a
/// no-op: a removed schedule never publishes and a fired schedule publishes
/// exactly once.
pub struct ScheduleRegistry {
    transport: Arc<dyn Transport>,
    feed_topic: String,
    clock: Arc<dyn Clock>,
    state: Arc<Mutex<RegistryState>>,
}

impl ScheduleRegistry {
    pub fn new(
        transport: Arc<dyn Transport>,
        feed_topic: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            transport,
            feed_topic: feed_topic.into(),
            clock,
            state: Arc::new(Mutex::new(RegistryState::default())),
        }
    }

    /// Schedule a one-shot feed at the next occurrence of `time`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn add(&self, time: FeedTime, portion: Portion) -> Result<ScheduledFeed> {
        let now = self.clock.now();
        let fire_at = next_fire_at(&now, time.as_naive()).ok_or_else(|| {
            SchedulerError::Unresolvable {
                time: time.to_string(),
            }
        })?;
        // `next_fire_at` is strictly after `now`, so the delay is positive.
        let delay = (fire_at - now).to_std().unwrap_or(Duration::ZERO);

        let record = ScheduledFeed {
            id: ScheduleId::new(),
            time,
            fire_at,
            portion,
        };

        // Hold the lock while spawning so the timer cannot look the record
        // up before it is inserted.
        let mut state = lock(&self.state);
        if state.shut_down {
            return Err(SchedulerError::ShutDown);
        }
        let task = tokio::spawn(fire_after(
            delay,
            record.id.clone(),
            Arc::clone(&self.state),
            Arc::clone(&self.transport),
            self.feed_topic.clone(),
        ));
        state.pending.push(PendingFeed {
            record: record.clone(),
            timer: task.abort_handle(),
        });
        drop(state);

        info!(
            schedule_id = %record.id,
            time = %record.time,
            fire_at = %record.fire_at,
            portion = %record.portion,
            delay_secs = delay.as_secs(),
            "feed scheduled"
        );
        Ok(record)
    }

    /// Cancel a pending schedule. Unknown ids are a no-op.
    ///
    /// Returns the removed record, or `None` if nothing was pending under
    /// `id` (never added, already fired, or already removed).
    pub fn remove(&self, id: &ScheduleId) -> Option<ScheduledFeed> {
        let entry = lock(&self.state).take(id);
        match entry {
            Some(PendingFeed { record, timer }) => {
                timer.abort();
                info!(schedule_id = %id, "scheduled feed removed");
                Some(record)
            }
            None => {
                debug!(schedule_id = %id, "remove: no pending schedule");
                None
            }
        }
    }

    /// Pending schedules in insertion order.
    pub fn list(&self) -> Vec<ScheduledFeed> {
        lock(&self.state)
            .pending
            .iter()
            .map(|p| p.record.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.state).pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &ScheduleId) -> bool {
        lock(&self.state).pending.iter().any(|p| &p.record.id == id)
    }

    /// Cancel every pending timer and refuse further schedules.
    pub fn shutdown(&self) {
        let drained = {
            let mut state = lock(&self.state);
            state.shut_down = true;
            std::mem::take(&mut state.pending)
        };
        if !drained.is_empty() {
            info!(count = drained.len(), "cancelling pending scheduled feeds");
        }
        for p in drained {
            p.timer.abort();
        }
    }
}

impl Drop for ScheduleRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn fire_after(
    delay: Duration,
    id: ScheduleId,
    state: Arc<Mutex<RegistryState>>,
    transport: Arc<dyn Transport>,
    topic: String,
) {
    tokio::time::sleep(delay).await;

    let Some(PendingFeed { record, .. }) = lock(&state).take(&id) else {
        // Cancelled between expiry and this point.
        return;
    };

    let payload = FeedCommand::new(record.portion).encode();
    match transport.publish(&topic, &payload) {
        Ok(()) => info!(schedule_id = %id, %topic, %payload, "scheduled feed fired"),
        Err(e) => error!(schedule_id = %id, error = %e, "scheduled feed publish failed"),
    }
}

fn lock(state: &Mutex<RegistryState>) -> MutexGuard<'_, RegistryState> {
    state.lock().unwrap_or_else(|p| p.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use chrono::{Local, TimeZone};
    use pijon_transport::LoopbackTransport;

    fn setup(h: u32, m: u32) -> (Arc<LoopbackTransport>, ScheduleRegistry) {
        let now = Local.with_ymd_and_hms(2026, 3, 10, h, m, 0).single().unwrap();
        let bus = Arc::new(LoopbackTransport::new());
        let registry = ScheduleRegistry::new(
            bus.clone(),
            "pijon/feed",
            Arc::new(FixedClock::new(now)),
        );
        (bus, registry)
    }

    #[tokio::test(start_paused = true)]
    async fn list_preserves_insertion_order() {
        let (_bus, registry) = setup(8, 0);
        let a = registry.add("09:00".parse().unwrap(), Portion::Small).unwrap();
        let b = registry.add("07:00".parse().unwrap(), Portion::Large).unwrap();
        let c = registry.add("08:30".parse().unwrap(), Portion::Medium).unwrap();

        let ids: Vec<_> = registry.list().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![a.id, b.id, c.id]);
        assert_eq!(registry.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn remove_unknown_id_is_noop() {
        let (bus, registry) = setup(8, 0);
        registry.add("09:00".parse().unwrap(), Portion::Small).unwrap();
        assert!(registry.remove(&ScheduleId::from("nope")).is_none());
        assert_eq!(registry.len(), 1);
        assert!(bus.published().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_everything() {
        let (bus, registry) = setup(8, 0);
        registry.add("08:01".parse().unwrap(), Portion::Small).unwrap();
        registry.add("08:02".parse().unwrap(), Portion::Medium).unwrap();
        registry.shutdown();
        assert!(registry.is_empty());

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert!(bus.published().is_empty());
        assert!(matches!(
            registry.add("09:00".parse().unwrap(), Portion::Small),
            Err(SchedulerError::ShutDown)
        ));
    }
}
