// End-to-end behaviour of the feeder controller over the loopback bus.
// Timers run on Tokio's paused clock, so every assertion is deterministic.

use std::{sync::Arc, time::Duration};

use chrono::{Local, TimeZone};
use pijon_core::{config::PijonConfig, ConnectionState, Portion};
use pijon_device::{BlockReason, FeedError, FeederController};
use pijon_scheduler::{FixedClock, ScheduleId};
use pijon_transport::{LoopbackTransport, Transport};

const FEED: &str = "pijon/feed";
const STATUS: &str = "pijon/status";
const ACK: &str = "pijon/ack";

fn start_at(h: u32, m: u32) -> (Arc<LoopbackTransport>, FeederController) {
    start_with(PijonConfig::default(), h, m)
}

fn start_with(config: PijonConfig, h: u32, m: u32) -> (Arc<LoopbackTransport>, FeederController) {
    let now = Local.with_ymd_and_hms(2026, 3, 10, h, m, 0).single().unwrap();
    let bus = Arc::new(LoopbackTransport::new());
    let controller =
        FeederController::start_with_clock(&config, bus.clone(), Arc::new(FixedClock::new(now)))
            .unwrap();
    (bus, controller)
}

async fn advance_ms(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

#[tokio::test(start_paused = true)]
async fn start_subscribes_device_topics() {
    let (bus, controller) = start_at(12, 0);
    assert!(bus.has_subscriber(STATUS));
    assert!(bus.has_subscriber(ACK));
    assert_eq!(controller.connection_state(), ConnectionState::Connecting);
    assert_eq!(controller.trigger_label(), "FEED NOW");
}

#[tokio::test(start_paused = true)]
async fn heartbeat_rearms_silence_window() {
    let (bus, controller) = start_at(12, 0);
    bus.deliver(STATUS, "alive");
    advance_ms(6_000).await;
    bus.deliver(STATUS, "alive");

    advance_ms(9_000).await; // t = 15s
    assert_eq!(controller.connection_state(), ConnectionState::Online);

    advance_ms(1_001).await; // t = 16.001s
    assert_eq!(controller.connection_state(), ConnectionState::Offline);
}

#[tokio::test(start_paused = true)]
async fn silence_flips_offline_until_next_heartbeat() {
    let (bus, controller) = start_at(12, 0);
    bus.deliver(STATUS, "");
    advance_ms(9_999).await;
    assert_eq!(controller.connection_state(), ConnectionState::Online);
    advance_ms(2).await;
    assert_eq!(controller.connection_state(), ConnectionState::Offline);

    advance_ms(60_000).await;
    assert_eq!(controller.connection_state(), ConnectionState::Offline);
    assert_eq!(controller.trigger_label(), "DEVICE OFFLINE");

    bus.deliver(STATUS, "back");
    assert_eq!(controller.connection_state(), ConnectionState::Online);
}

#[tokio::test(start_paused = true)]
async fn no_heartbeat_at_all_goes_offline_after_connect_window() {
    let (_bus, controller) = start_at(12, 0);
    advance_ms(9_999).await;
    assert_eq!(controller.connection_state(), ConnectionState::Connecting);
    advance_ms(2).await;
    assert_eq!(controller.connection_state(), ConnectionState::Offline);
}

#[tokio::test(start_paused = true)]
async fn lock_and_unlock_on_acknowledgement() {
    let (bus, controller) = start_at(12, 0);
    bus.deliver(STATUS, "alive");

    controller.feed_now(Portion::Small).unwrap();
    assert!(controller.is_locked());
    assert_eq!(controller.trigger_label(), "FEEDING...");
    assert!(matches!(
        controller.feed_now(Portion::Small),
        Err(FeedError::Blocked { reason: BlockReason::Locked })
    ));

    bus.deliver(ACK, "FED");
    assert!(!controller.is_locked());
    assert!(controller.last_error().is_none());

    controller.feed_now(Portion::Small).unwrap();
    bus.deliver(ACK, "ERROR:jam");
    assert!(!controller.is_locked());
    assert_eq!(controller.last_error().as_deref(), Some("Feeding failed: ERROR:jam"));

    assert_eq!(
        bus.published_on(FEED),
        vec!["FEED:SMALL".to_string(), "FEED:SMALL".to_string()]
    );
}

#[tokio::test(start_paused = true)]
async fn heartbeat_clears_stored_error() {
    let (bus, controller) = start_at(12, 0);
    bus.deliver(STATUS, "alive");
    controller.feed_now(Portion::Medium).unwrap();
    bus.deliver(ACK, "ERROR:empty");
    assert!(controller.last_error().is_some());

    bus.deliver(STATUS, "alive");
    assert!(controller.last_error().is_none());
}

#[tokio::test(start_paused = true)]
async fn offline_blocks_regardless_of_lock() {
    let (bus, controller) = start_at(12, 0);
    advance_ms(10_001).await;
    assert_eq!(controller.connection_state(), ConnectionState::Offline);

    let err = controller.feed_now(Portion::Large).unwrap_err();
    assert!(matches!(err, FeedError::Blocked { reason: BlockReason::Offline }));
    assert!(!controller.is_locked());
    assert!(bus.published().is_empty());

    // Lock held and device goes offline: still blocked, still nothing sent.
    bus.deliver(STATUS, "alive");
    controller.feed_now(Portion::Large).unwrap();
    advance_ms(10_001).await;
    assert!(controller.feed_now(Portion::Small).unwrap_err().is_blocked());
    assert_eq!(bus.published_on(FEED).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn stray_ack_clears_a_newer_lock() {
    // Acks carry no request id; a late duplicate releases whatever is held.
    let (bus, controller) = start_at(12, 0);
    bus.deliver(STATUS, "alive");
    controller.feed_now(Portion::Small).unwrap();
    bus.deliver(ACK, "FED");
    controller.feed_now(Portion::Large).unwrap();

    bus.deliver(ACK, "FED"); // duplicate of the first ack
    assert!(!controller.is_locked());
}

#[tokio::test(start_paused = true)]
async fn scheduled_feed_ignores_interlock_and_liveness() {
    let (bus, controller) = start_at(7, 0);
    let rec = controller
        .add_schedule("07:30".parse().unwrap(), Portion::Medium)
        .unwrap();

    // Device went offline long ago and never answered.
    advance_ms(30 * 60 * 1000 - 1).await;
    assert_eq!(controller.connection_state(), ConnectionState::Offline);
    assert_eq!(controller.schedules().len(), 1);

    advance_ms(2).await;
    assert!(controller.schedules().is_empty());
    assert_eq!(bus.published_on(FEED), vec!["FEED:MEDIUM".to_string()]);
    assert!(!controller.is_locked());
    assert!(controller.remove_schedule(&rec.id).is_none());
}

#[tokio::test(start_paused = true)]
async fn scheduled_feed_fires_while_command_outstanding() {
    let (bus, controller) = start_at(7, 0);
    bus.deliver(STATUS, "alive");
    controller.feed_now(Portion::Small).unwrap();
    controller
        .add_schedule("07:00".parse().unwrap(), Portion::Large)
        .unwrap();
    controller
        .add_schedule("07:01".parse().unwrap(), Portion::Large)
        .unwrap();

    advance_ms(61_000).await;
    assert!(controller.is_locked());
    assert_eq!(
        bus.published_on(FEED),
        vec!["FEED:SMALL".to_string(), "FEED:LARGE".to_string()]
    );
    // The 07:00 entry rolled over to tomorrow.
    assert_eq!(controller.schedules().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancel_prevents_fire() {
    let (bus, controller) = start_at(7, 0);
    let rec = controller
        .add_schedule("07:30".parse().unwrap(), Portion::Small)
        .unwrap();
    assert!(controller.remove_schedule(&rec.id).is_some());
    assert!(controller.remove_schedule(&ScheduleId::from("unknown")).is_none());

    advance_ms(2 * 3600 * 1000).await;
    assert!(bus.published_on(FEED).is_empty());
    assert!(controller.schedules().is_empty());
}

#[tokio::test(start_paused = true)]
async fn response_timeout_enhancement_is_opt_in() {
    let mut config = PijonConfig::default();
    config.commands.response_timeout_ms = 5_000;
    let (bus, controller) = start_with(config, 12, 0);
    bus.deliver(STATUS, "alive");
    controller.feed_now(Portion::Small).unwrap();

    advance_ms(5_001).await;
    assert!(!controller.is_locked());
    assert_eq!(controller.last_error().as_deref(), Some("Feeding failed: no response"));
}

#[tokio::test(start_paused = true)]
async fn shutdown_unsubscribes_and_cancels_timers() {
    let (bus, controller) = start_at(7, 0);
    bus.deliver(STATUS, "alive");
    controller
        .add_schedule("07:05".parse().unwrap(), Portion::Small)
        .unwrap();

    controller.shutdown();
    assert!(!bus.has_subscriber(STATUS));
    assert!(!bus.has_subscriber(ACK));
    assert!(controller.schedules().is_empty());

    advance_ms(3600 * 1000).await;
    assert!(bus.published().is_empty());
    // Silence timer was cancelled too: the last observed state is kept.
    assert_eq!(controller.connection_state(), ConnectionState::Online);

    // Idempotent.
    controller.shutdown();
}

#[tokio::test(start_paused = true)]
async fn drop_releases_subscriptions() {
    let (bus, controller) = start_at(12, 0);
    drop(controller);
    assert!(!bus.has_subscriber(STATUS));
    assert!(!bus.has_subscriber(ACK));
    assert!(!bus.deliver(STATUS, "alive"));
}

#[tokio::test(start_paused = true)]
async fn restart_on_same_transport_does_not_duplicate_handlers() {
    let (bus, first) = start_at(12, 0);
    let second = FeederController::start(&PijonConfig::default(), bus.clone()).unwrap();

    // The later subscription owns the slot; the first controller hears nothing.
    bus.deliver(STATUS, "alive");
    assert_eq!(second.connection_state(), ConnectionState::Online);
    assert_eq!(first.connection_state(), ConnectionState::Connecting);
    second.shutdown();
    assert_eq!(bus.link_status(), pijon_transport::LinkStatus::Connected);
}

#[tokio::test(start_paused = true)]
async fn dropping_replaced_controller_keeps_newer_subscriptions() {
    let (bus, first) = start_at(12, 0);
    let second = FeederController::start(&PijonConfig::default(), bus.clone()).unwrap();
    drop(first);

    assert!(bus.has_subscriber(STATUS));
    assert!(bus.has_subscriber(ACK));
    bus.deliver(STATUS, "alive");
    assert_eq!(second.connection_state(), ConnectionState::Online);

    second.feed_now(Portion::Small).unwrap();
    bus.deliver(ACK, "FED");
    assert!(!second.is_locked());

    drop(second);
    assert!(!bus.has_subscriber(STATUS));
    assert!(!bus.has_subscriber(ACK));
}

#[tokio::test(start_paused = true)]
async fn snapshot_serializes_for_display() {
    let (bus, controller) = start_at(7, 0);
    bus.deliver(STATUS, "alive");
    controller
        .add_schedule("07:30".parse().unwrap(), Portion::Large)
        .unwrap();

    let json = serde_json::to_value(controller.snapshot()).unwrap();
    assert_eq!(json["state"], "ONLINE");
    assert_eq!(json["locked"], false);
    assert!(json["error"].is_null());
    assert_eq!(json["schedules"][0]["portion"], "LARGE");
    assert_eq!(json["schedules"][0]["time"], "07:30");
}
