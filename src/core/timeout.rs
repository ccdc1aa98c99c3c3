//! Timeout & Expiry Service (C5).
//!
//! Single-shot timers keyed by `(atom, id)`. The coordinator is the sole caller and
//! the sole consumer of fired keys, there is no shared access and no background
//! thread; `fire_due` is driven by the coordinator's own `pump` tick (single
//! threaded, cooperative event loop).

use std::collections::HashMap;
use std::time::Instant;

use crate::common::InviteId;

/// Identifies a single timer. A cancelled key never fires (removed before it's due);
/// a fired key is removed and cannot fire twice.
///
/// Both variants are keyed by `InviteId`, not `CallId`: the receiver's ActiveCall
/// enters `connecting` at local `acceptInvitation()`, before any `call:start` and
/// hence before a `CallId` exists, so `CallId` can't key the connect-phase timer.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TimerKey {
    /// Client-side safety net mirroring the server's invitation expiry.
    InvitationExpiry(InviteId),
    /// Bound on time spent in `connecting` before media reports connected.
    ConnectPhase(InviteId),
}

#[derive(Default)]
pub struct TimeoutService {
    deadlines: HashMap<TimerKey, Instant>,
}

impl TimeoutService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&mut self, key: TimerKey, deadline: Instant) {
        self.deadlines.insert(key, deadline);
    }

    pub fn cancel(&mut self, key: &TimerKey) {
        self.deadlines.remove(key);
    }

    pub fn is_armed(&self, key: &TimerKey) -> bool {
        self.deadlines.contains_key(key)
    }

    /// Removes and returns every key whose deadline has passed. Each returned key is
    /// already gone from the service: re-arming is the caller's responsibility.
    pub fn fire_due(&mut self, now: Instant) -> Vec<TimerKey> {
        let due: Vec<TimerKey> = self
            .deadlines
            .iter()
            .filter(|(_, &deadline)| deadline <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &due {
            self.deadlines.remove(key);
        }
        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn cancelled_timer_never_fires() {
        let mut svc = TimeoutService::new();
        let t0 = Instant::now();
        let key = TimerKey::ConnectPhase(InviteId::from("i1"));
        svc.arm(key.clone(), t0 + Duration::from_secs(1));
        svc.cancel(&key);
        assert!(svc.fire_due(t0 + Duration::from_secs(2)).is_empty());
    }

    #[test]
    fn fired_timer_is_inert_afterward() {
        let mut svc = TimeoutService::new();
        let t0 = Instant::now();
        let key = TimerKey::ConnectPhase(InviteId::from("i1"));
        svc.arm(key.clone(), t0 + Duration::from_secs(1));
        let fired = svc.fire_due(t0 + Duration::from_secs(2));
        assert_eq!(fired, vec![key.clone()]);
        assert!(svc.fire_due(t0 + Duration::from_secs(3)).is_empty());
    }
}
