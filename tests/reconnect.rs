//! Exercises the signaling attach/retry/reconnect lifecycle against the `sim`
//! channel double. Requires the `sim` feature.

use std::time::Duration;

use serde_json::json;

use callflow::core::config::CoordinatorConfig;
use callflow::core::coordinator::CallFlowCoordinator;
use callflow::core::signaling::{InboundEvent, InviteSuccess};
use callflow::sim::{ManualClock, SimMediaSession, SimSignalingChannel};
use callflow::InvitationStatus;

fn test_init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn short_config() -> CoordinatorConfig {
    CoordinatorConfig::default()
        .with_invite_ttl(Duration::from_secs(5))
        .with_connect_timeout(Duration::from_secs(5))
        .with_listener_attach_retry(3, Duration::from_millis(10))
}

#[test]
fn attach_is_retried_until_channel_becomes_ready() {
    test_init();
    let channel = SimSignalingChannel::new();
    channel.set_ready(false);
    let clock = ManualClock::new();
    let mut coordinator = CallFlowCoordinator::new(
        "alice",
        Box::new(channel.clone()),
        Box::new(SimMediaSession::new()),
        Box::new(clock.clone()),
        short_config(),
    );

    // Channel is not ready yet: initialize() must not fail outright.
    coordinator.initialize().unwrap();
    assert!(!channel.is_attached());

    // The channel comes up before the retry budget (3 attempts) is exhausted.
    channel.set_ready(true);
    clock.advance(Duration::from_millis(10));
    coordinator.pump(clock.now());

    assert!(channel.is_attached());
}

#[test]
fn attach_retry_budget_exhausts_without_panicking() {
    test_init();
    let channel = SimSignalingChannel::new();
    channel.set_ready(false);
    let clock = ManualClock::new();
    let mut coordinator = CallFlowCoordinator::new(
        "alice",
        Box::new(channel.clone()),
        Box::new(SimMediaSession::new()),
        Box::new(clock.clone()),
        short_config(),
    );
    coordinator.initialize().unwrap();

    for _ in 0..5 {
        clock.advance(Duration::from_millis(10));
        coordinator.pump(clock.now());
    }

    assert!(!channel.is_attached());
}

#[test]
fn reinitialize_re_arms_listeners_after_a_reconnect() {
    test_init();
    let channel = SimSignalingChannel::new();
    channel.set_ready(true);
    let clock = ManualClock::new();
    let mut coordinator = CallFlowCoordinator::new(
        "alice",
        Box::new(channel.clone()),
        Box::new(SimMediaSession::new()),
        Box::new(clock.clone()),
        short_config(),
    );
    coordinator.initialize().unwrap();
    assert!(channel.is_attached());

    coordinator
        .send_invitation("bob", json!({}), None)
        .unwrap();
    channel.push_inbound(InboundEvent::InviteSuccess(InviteSuccess {
        invite_id: "invite-1".into(),
        receiver_id: "bob".to_string(),
        call_history_id: None,
    }));
    coordinator.pump(clock.now());
    assert_eq!(
        coordinator.current_invitation().invite_id.unwrap().as_str(),
        "invite-1"
    );

    // Simulate a transport bounce: the host detaches and reinitializes.
    coordinator.reinitialize().unwrap();
    assert!(channel.is_attached());

    // The in-flight invitation is untouched by the reconnect.
    assert_eq!(
        coordinator.current_invitation().status,
        InvitationStatus::Inviting
    );
}
