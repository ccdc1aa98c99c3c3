//! Incoming Invitation Facade (C6).
//!
//! A thin seam between whatever delivers an invitation out-of-band of the usual
//! signaling channel (push notification wakeup, platform call-kit callback) and the
//! coordinator's normal `invite:incoming` handling, so both paths share one dedup and
//! state-transition implementation.

use log::debug;

use crate::core::coordinator::CallFlowCoordinator;
use crate::core::signaling::{InboundEvent, InviteIncoming};

/// Delivers an invitation payload that arrived outside the polled signaling channel
/// (e.g. a platform push) into the coordinator as if it had been polled normally.
///
/// Idempotent: a duplicate delivery for an invite id already known to the coordinator
/// (current, or already accepted) is dropped by the same dedup check `handle_inbound`
/// applies to channel-polled events.
pub fn deliver_incoming_invitation(
    coordinator: &mut CallFlowCoordinator,
    payload: InviteIncoming,
) {
    debug!(
        "deliver_incoming_invitation({}): routing out-of-band invitation into the coordinator",
        payload.invite_id
    );
    coordinator.handle_inbound(InboundEvent::InviteIncoming(payload));
}
