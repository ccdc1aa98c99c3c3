//! End-to-end tests for the receiver (incoming invite) role, driven against the
//! `sim` test doubles. Requires the `sim` feature.

use std::time::Duration;

use serde_json::json;

use callflow::core::config::CoordinatorConfig;
use callflow::core::coordinator::CallFlowCoordinator;
use callflow::core::media::MediaEvent;
use callflow::core::notify::NotificationKind;
use callflow::core::signaling::{
    CallStart, ExpiresAt, InboundEvent, InviteDeclined, InviteIncoming, OutboundEvent,
};
use callflow::sim::{ManualClock, SimMediaSession, SimSignalingChannel};
use callflow::{ActiveCallStatus, InvitationStatus, Role};

fn test_init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn short_config() -> CoordinatorConfig {
    CoordinatorConfig::default()
        .with_invite_ttl(Duration::from_secs(5))
        .with_connect_timeout(Duration::from_secs(5))
        .with_listener_attach_retry(3, Duration::from_millis(10))
}

struct Harness {
    coordinator: CallFlowCoordinator,
    channel: SimSignalingChannel,
    media: SimMediaSession,
    clock: ManualClock,
}

fn harness(auth_user_id: &str) -> Harness {
    test_init();
    let channel = SimSignalingChannel::new();
    channel.set_ready(true);
    let media = SimMediaSession::new();
    let clock = ManualClock::new();
    let mut coordinator = CallFlowCoordinator::new(
        auth_user_id,
        Box::new(channel.clone()),
        Box::new(media.clone()),
        Box::new(clock.clone()),
        short_config(),
    );
    coordinator.initialize().unwrap();
    Harness {
        coordinator,
        channel,
        media,
        clock,
    }
}

fn incoming_invite(invite_id: &str, clock: &ManualClock, ttl: Duration) -> InviteIncoming {
    InviteIncoming {
        invite_id: invite_id.into(),
        caller_id: "alice".to_string(),
        caller_name: "Alice".to_string(),
        caller_profile_pic: None,
        metadata: json!({"isVideo": false}),
        expires_at: ExpiresAt(clock.wall_now() + ttl),
        call_history_id: None,
        auto_accept: false,
    }
}

#[test]
fn invite_incoming_sets_receiver_role_and_incoming_status() {
    let mut h = harness("bob");
    h.channel.push_inbound(InboundEvent::InviteIncoming(incoming_invite(
        "invite-1",
        &h.clock,
        Duration::from_secs(5),
    )));
    h.coordinator.pump(h.clock.now());

    let invitation = h.coordinator.current_invitation();
    assert_eq!(invitation.status, InvitationStatus::Incoming);
    assert_eq!(invitation.role, Role::Receiver);
    assert_eq!(invitation.remote_user_id.as_deref(), Some("alice"));
}

#[test]
fn duplicate_invite_incoming_is_ignored() {
    let mut h = harness("bob");
    let invite = incoming_invite("invite-1", &h.clock, Duration::from_secs(5));
    h.channel.push_inbound(InboundEvent::InviteIncoming(invite.clone()));
    h.coordinator.pump(h.clock.now());
    h.channel.push_inbound(InboundEvent::InviteIncoming(invite));
    h.coordinator.pump(h.clock.now());

    // still exactly the first invitation, not reset/re-applied
    assert_eq!(
        h.coordinator.current_invitation().invite_id.unwrap().as_str(),
        "invite-1"
    );
}

#[test]
fn accept_invitation_moves_active_call_to_connecting() {
    let mut h = harness("bob");
    h.channel.push_inbound(InboundEvent::InviteIncoming(incoming_invite(
        "invite-1",
        &h.clock,
        Duration::from_secs(5),
    )));
    h.coordinator.pump(h.clock.now());

    h.coordinator.accept_invitation("invite-1").unwrap();

    assert_eq!(
        h.coordinator.current_call().status,
        ActiveCallStatus::Connecting
    );
    assert!(matches!(
        h.channel.outbound().last(),
        Some(OutboundEvent::InviteAccept { invite_id }) if invite_id.as_str() == "invite-1"
    ));
    // the Invitation is intentionally left in place until `call:start` resolves it
    assert_eq!(
        h.coordinator.current_invitation().status,
        InvitationStatus::Incoming
    );
}

#[test]
fn call_start_after_accept_resolves_invitation_and_binds_call_id() {
    let mut h = harness("bob");
    h.channel.push_inbound(InboundEvent::InviteIncoming(incoming_invite(
        "invite-1",
        &h.clock,
        Duration::from_secs(5),
    )));
    h.coordinator.pump(h.clock.now());
    h.coordinator.accept_invitation("invite-1").unwrap();

    h.channel.push_inbound(InboundEvent::CallStart(CallStart {
        call_id: "call-1".into(),
        caller_id: "alice".to_string(),
        receiver_id: "bob".to_string(),
        metadata: json!({}),
        call_history_id: None,
    }));
    h.coordinator.pump(h.clock.now());

    assert_eq!(
        h.coordinator.current_invitation().status,
        InvitationStatus::Idle
    );
    let call = h.coordinator.current_call();
    assert_eq!(call.status, ActiveCallStatus::Connecting);
    assert_eq!(call.call_id.unwrap().as_str(), "call-1");
    assert_eq!(h.media.synced_snapshots().len(), 1);
}

#[test]
fn media_connected_transitions_call_to_connected() {
    let mut h = harness("bob");
    h.channel.push_inbound(InboundEvent::InviteIncoming(incoming_invite(
        "invite-1",
        &h.clock,
        Duration::from_secs(5),
    )));
    h.coordinator.pump(h.clock.now());
    h.coordinator.accept_invitation("invite-1").unwrap();
    h.channel.push_inbound(InboundEvent::CallStart(CallStart {
        call_id: "call-1".into(),
        caller_id: "alice".to_string(),
        receiver_id: "bob".to_string(),
        metadata: json!({}),
        call_history_id: None,
    }));
    h.coordinator.pump(h.clock.now());

    h.coordinator.on_media_event(MediaEvent::Connected);

    let call = h.coordinator.current_call();
    assert_eq!(call.status, ActiveCallStatus::Connected);
    assert!(call.call_start_time.is_some());
}

/// A decline that races an already-issued accept must still tear down the
/// ActiveCall the accept provisionally started.
#[test]
fn decline_racing_accept_tears_down_active_call() {
    let mut h = harness("bob");
    h.channel.push_inbound(InboundEvent::InviteIncoming(incoming_invite(
        "invite-1",
        &h.clock,
        Duration::from_secs(5),
    )));
    h.coordinator.pump(h.clock.now());
    h.coordinator.accept_invitation("invite-1").unwrap();
    assert_eq!(
        h.coordinator.current_call().status,
        ActiveCallStatus::Connecting
    );

    h.channel.push_inbound(InboundEvent::InviteDeclined(InviteDeclined {
        invite_id: "invite-1".into(),
        receiver_id: Some("bob".to_string()),
    }));
    h.coordinator.pump(h.clock.now());

    assert_eq!(h.coordinator.current_call().status, ActiveCallStatus::Idle);
    assert_eq!(
        h.coordinator.current_invitation().status,
        InvitationStatus::Idle
    );
}

/// A host listening for `invitation:state-changed` and reacting by accepting (the
/// "UI reacts to incoming by calling accept" flow) must be able to request that
/// reentrantly, from inside the notification callback firing mid-dispatch, without
/// panicking or deadlocking.
#[test]
fn deferred_ops_let_a_notification_callback_accept_reentrantly() {
    let mut h = harness("bob");
    let deferred = h.coordinator.deferred_ops();
    h.coordinator.on(NotificationKind::InvitationStateChanged, move |n| {
        if let callflow::core::notify::Notification::InvitationStateChanged(inv) = n {
            if inv.status == InvitationStatus::Incoming {
                if let Some(id) = &inv.invite_id {
                    deferred.request_accept_invitation(id.as_str());
                }
            }
        }
    });

    h.channel.push_inbound(InboundEvent::InviteIncoming(incoming_invite(
        "invite-1",
        &h.clock,
        Duration::from_secs(5),
    )));
    h.coordinator.pump(h.clock.now());

    assert_eq!(
        h.coordinator.current_call().status,
        ActiveCallStatus::Connecting
    );
    assert!(matches!(
        h.channel.outbound().last(),
        Some(OutboundEvent::InviteAccept { invite_id }) if invite_id.as_str() == "invite-1"
    ));
}

/// Connect timeout: if media never reports `connected` within `connect_timeout` of
/// `call:start`, the coordinator resets ActiveCall to `idle` on its own, and a late
/// `MediaEvent::Connected` arriving after that must be a no-op.
#[test]
fn connect_timeout_resets_active_call_and_ignores_late_media_connected() {
    let mut h = harness("bob");
    h.channel.push_inbound(InboundEvent::InviteIncoming(incoming_invite(
        "invite-1",
        &h.clock,
        Duration::from_secs(30),
    )));
    h.coordinator.pump(h.clock.now());
    h.coordinator.accept_invitation("invite-1").unwrap();
    h.channel.push_inbound(InboundEvent::CallStart(CallStart {
        call_id: "call-1".into(),
        caller_id: "alice".to_string(),
        receiver_id: "bob".to_string(),
        metadata: json!({}),
        call_history_id: None,
    }));
    h.coordinator.pump(h.clock.now());
    assert_eq!(
        h.coordinator.current_call().status,
        ActiveCallStatus::Connecting
    );

    h.clock.advance(Duration::from_secs(6));
    h.coordinator.pump(h.clock.now());

    assert_eq!(h.coordinator.current_call().status, ActiveCallStatus::Idle);

    h.coordinator.on_media_event(MediaEvent::Connected);

    assert_eq!(
        h.coordinator.current_call().status,
        ActiveCallStatus::Idle,
        "a media-connected event arriving after the connect timeout must be ignored"
    );
}

#[test]
fn auto_accept_invitation_is_accepted_immediately() {
    let mut h = harness("bob");
    let mut invite = incoming_invite("invite-1", &h.clock, Duration::from_secs(5));
    invite.auto_accept = true;
    h.channel.push_inbound(InboundEvent::InviteIncoming(invite));
    h.coordinator.pump(h.clock.now());

    assert_eq!(
        h.coordinator.current_call().status,
        ActiveCallStatus::Connecting
    );
}
