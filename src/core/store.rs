//! Observable State Store (C1).
//!
//! Holds the two state atoms and broadcasts change notifications to
//! subscribers, synchronously, in the order mutations are issued. The store itself
//! carries no business logic: every mutation here is a plain field assignment; the
//! rules that decide *when* to call these live in [`crate::core::coordinator`].

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::{Instant, SystemTime};

use serde_json::Value;

use crate::common::{ActiveCallStatus, CallId, InvitationStatus, InviteId, Role};

/// The pre-call handshake artifact.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InvitationState {
    pub invite_id: Option<InviteId>,
    pub role: Role,
    pub status: InvitationStatus,
    pub remote_user_id: Option<String>,
    pub remote_user_name: Option<String>,
    pub remote_user_profile_pic: Option<String>,
    pub expires_at: Option<SystemTime>,
    pub metadata: Value,
    pub call_history_id: Option<String>,
}

impl InvitationState {
    fn reset(&mut self) {
        *self = InvitationState::default();
    }
}

/// The media-session-bound call.
///
/// `callDuration` from the data model is deliberately not a stored field: it's
/// "monotonic since callStartTime", which is exactly what [`Self::duration_since_start`]
/// computes on demand. A stored duration would need its own refresh tick this crate
/// has no reason to own; hosts that want a live ticking duration call the method
/// against their own UI-refresh clock.
#[derive(Clone, Debug, PartialEq)]
pub struct ActiveCallState {
    pub status: ActiveCallStatus,
    pub call_id: Option<CallId>,
    pub remote_user_id: Option<String>,
    pub remote_user_name: Option<String>,
    pub is_audio_enabled: bool,
    pub is_video_enabled: bool,
    pub call_start_time: Option<Instant>,
    pub call_history_id: Option<String>,
}

impl Default for ActiveCallState {
    fn default() -> Self {
        Self {
            status: ActiveCallStatus::Idle,
            call_id: None,
            remote_user_id: None,
            remote_user_name: None,
            is_audio_enabled: true,
            is_video_enabled: false,
            call_start_time: None,
            call_history_id: None,
        }
    }
}

impl ActiveCallState {
    fn reset(&mut self) {
        *self = ActiveCallState::default();
    }

    /// Duration since `call_start_time`, or zero if the call never connected.
    pub fn duration_since_start(&self, now: Instant) -> std::time::Duration {
        match self.call_start_time {
            Some(start) => now.saturating_duration_since(start),
            None => std::time::Duration::ZERO,
        }
    }
}

struct AtomInner<T> {
    value: T,
    next_id: u64,
    listeners: HashMap<u64, Box<dyn FnMut(&T)>>,
}

/// A single observable value with synchronous, reentrancy-tolerant notification.
pub struct Atom<T> {
    inner: Rc<RefCell<AtomInner<T>>>,
}

impl<T> Clone for Atom<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone> Atom<T> {
    pub fn new(initial: T) -> Self {
        Self {
            inner: Rc::new(RefCell::new(AtomInner {
                value: initial,
                next_id: 0,
                listeners: HashMap::new(),
            })),
        }
    }

    pub fn get(&self) -> T {
        self.inner.borrow().value.clone()
    }

    /// Apply `mutator` to the current value, then notify subscribers with the result.
    pub fn update(&self, mutator: impl FnOnce(&mut T)) {
        {
            let mut inner = self.inner.borrow_mut();
            mutator(&mut inner.value);
        }
        self.notify();
    }

    /// Subscribe to changes. The listener fires immediately with the current value,
    /// then again on every subsequent `update`. Dropping the returned [`Subscription`]
    /// (or calling [`Subscription::unsubscribe`]) detaches it.
    pub fn subscribe<F>(&self, mut listener: F) -> Subscription
    where
        F: FnMut(&T) + 'static,
    {
        listener(&self.inner.borrow().value);

        let id = {
            let mut inner = self.inner.borrow_mut();
            let id = inner.next_id;
            inner.next_id += 1;
            inner.listeners.insert(id, Box::new(listener));
            id
        };

        let weak = Rc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.borrow_mut().listeners.remove(&id);
            }
        })
    }

    fn notify(&self) {
        let value = self.inner.borrow().value.clone();
        let keys: Vec<u64> = self.inner.borrow().listeners.keys().copied().collect();
        for key in keys {
            // Pull the callback out before invoking it: a subscriber is allowed to
            // call back into the coordinator reentrantly, which may in turn
            // touch this atom, so no borrow may be held across the call.
            let callback = self.inner.borrow_mut().listeners.remove(&key);
            if let Some(mut callback) = callback {
                callback(&value);
                self.inner.borrow_mut().listeners.entry(key).or_insert(callback);
            }
        }
    }
}

/// RAII unsubscribe handle returned by [`Atom::subscribe`].
pub struct Subscription {
    detach: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    fn new(detach: impl FnOnce() + 'static) -> Self {
        Self {
            detach: Some(Box::new(detach)),
        }
    }

    pub fn unsubscribe(mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

/// The two disjoint state atoms, bundled for the coordinator to own.
#[derive(Clone)]
pub struct StateStore {
    invitation: Atom<InvitationState>,
    active_call: Atom<ActiveCallState>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self {
            invitation: Atom::new(InvitationState::default()),
            active_call: Atom::new(ActiveCallState::default()),
        }
    }
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn invitation(&self) -> InvitationState {
        self.invitation.get()
    }

    pub fn active_call(&self) -> ActiveCallState {
        self.active_call.get()
    }

    pub fn subscribe_invitation<F>(&self, listener: F) -> Subscription
    where
        F: FnMut(&InvitationState) + 'static,
    {
        self.invitation.subscribe(listener)
    }

    pub fn subscribe_active_call<F>(&self, listener: F) -> Subscription
    where
        F: FnMut(&ActiveCallState) + 'static,
    {
        self.active_call.subscribe(listener)
    }

    /// `setInvitation(partial)`: merge fields via `mutator`, then notify.
    pub fn set_invitation(&self, mutator: impl FnOnce(&mut InvitationState)) {
        self.invitation.update(mutator);
    }

    /// `resetInvitation()`: clears every field to its initial value.
    pub fn reset_invitation(&self) {
        self.invitation.update(InvitationState::reset);
    }

    /// `setActiveCall(full|partial)`: merge fields via `mutator`, then notify.
    pub fn set_active_call(&self, mutator: impl FnOnce(&mut ActiveCallState)) {
        self.active_call.update(mutator);
    }

    /// `resetActiveCall()`: clears every field to its initial value.
    pub fn reset_active_call(&self) {
        self.active_call.update(ActiveCallState::reset);
    }
}
