//! Call Flow Coordinator (C3).
//!
//! Owns the two state machines, event deduplication, invitation <-> call linkage,
//! timeout guards, and the public operation surface. This module is the core of the
//! crate; the numbered rules enforced here are the design.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;
use std::time::{Duration, Instant, SystemTime};

use log::{debug, error, info, warn};
use serde_json::Value;

use crate::common::time::Clock;
use crate::common::{ActiveCallStatus, CallId, InvitationStatus, InviteId, Result, Role};
use crate::core::config::CoordinatorConfig;
use crate::core::media::{CallSnapshot, MediaEvent, MediaSessionAdapter};
use crate::core::notify::{ListenerId, Notification, NotificationBus, NotificationKind};
use crate::core::signaling::{
    CallEnd, CallStart, InboundEvent, InviteDeclined, InviteError, InviteIncoming,
    InviteSuccess, OutboundEvent, SignalingBinder, SignalingChannel,
};
use crate::core::store::{ActiveCallState, InvitationState, StateStore, Subscription};
use crate::core::timeout::{TimeoutService, TimerKey};
use crate::error::CallFlowError;

/// Accepted-Invitation Mapping value: `pending` until the server's `call:start`
/// resolves it to a real call id.
#[derive(Clone, Debug, PartialEq, Eq)]
enum MappedCall {
    Pending,
    Bound(CallId),
}

#[derive(Clone, Debug)]
enum DeferredOp {
    Accept(String),
    Decline(String),
    Cancel(String),
    EndCall(Option<String>),
}

/// A cloneable handle for requesting coordinator operations from inside a subscriber
/// or notification callback, where the callback has no `&mut CallFlowCoordinator` to
/// call back into directly (and the host's own `Rc<RefCell<CallFlowCoordinator>>`, if
/// it uses one, is already mutably borrowed by whatever call is dispatching the
/// notification). Requests queue here, independent of however the host stores the
/// coordinator itself, and are run in order the next time the coordinator drains its
/// queue (end of the current public operation, or the current `pump` tick).
///
/// ```ignore
/// let mut coordinator = CallFlowCoordinator::new(...);
/// let deferred = coordinator.deferred_ops();
/// coordinator.on(NotificationKind::InvitationStateChanged, move |n| {
///     if let Notification::InvitationStateChanged(inv) = n {
///         if inv.status == InvitationStatus::Incoming {
///             if let Some(id) = &inv.invite_id {
///                 deferred.request_accept_invitation(id.as_str());
///             }
///         }
///     }
/// });
/// ```
#[derive(Clone, Default)]
pub struct DeferredOps(Rc<RefCell<VecDeque<DeferredOp>>>);

impl DeferredOps {
    pub fn request_accept_invitation(&self, invite_id: impl Into<String>) {
        self.0.borrow_mut().push_back(DeferredOp::Accept(invite_id.into()));
    }

    pub fn request_decline_invitation(&self, invite_id: impl Into<String>) {
        self.0.borrow_mut().push_back(DeferredOp::Decline(invite_id.into()));
    }

    pub fn request_cancel_invitation(&self, invite_id: impl Into<String>) {
        self.0.borrow_mut().push_back(DeferredOp::Cancel(invite_id.into()));
    }

    pub fn request_end_call(&self, reason: Option<String>) {
        self.0.borrow_mut().push_back(DeferredOp::EndCall(reason));
    }
}

pub struct CallFlowCoordinator {
    auth_user_id: String,
    config: CoordinatorConfig,
    store: StateStore,
    channel: Box<dyn SignalingChannel>,
    media: Box<dyn MediaSessionAdapter>,
    clock: Box<dyn Clock>,
    binder: SignalingBinder,
    timeouts: TimeoutService,
    /// `inviteId -> callId | pending`. Sole source of truth for "an accepted
    /// invitation's expiration never tears down its call."
    accepted_invitations: HashMap<InviteId, MappedCall>,
    /// Dedup set of call ids whose `call:start` has already been processed.
    handled_calls: HashSet<CallId>,
    /// The invite id tied to the current ActiveCall, if any, so its timers can be
    /// found and cancelled on any terminal transition.
    active_call_invite_id: Option<InviteId>,
    notifications: NotificationBus,
    deferred: DeferredOps,
    /// Guards `drain_deferred` against recursing into itself when a deferred
    /// operation's own notifications enqueue further work; the outermost call keeps
    /// looping until the queue is empty, nested calls just return.
    dispatching: bool,
}

impl CallFlowCoordinator {
    pub fn new(
        auth_user_id: impl Into<String>,
        channel: Box<dyn SignalingChannel>,
        media: Box<dyn MediaSessionAdapter>,
        clock: Box<dyn Clock>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            auth_user_id: auth_user_id.into(),
            config,
            store: StateStore::new(),
            channel,
            media,
            clock,
            binder: SignalingBinder::new(),
            timeouts: TimeoutService::new(),
            accepted_invitations: HashMap::new(),
            handled_calls: HashSet::new(),
            active_call_invite_id: None,
            notifications: NotificationBus::new(),
            deferred: DeferredOps::default(),
            dispatching: false,
        }
    }

    /// A cloneable handle subscriber and notification callbacks can use to request
    /// coordinator operations without reentering `&mut self`. See [`DeferredOps`].
    pub fn deferred_ops(&self) -> DeferredOps {
        self.deferred.clone()
    }

    fn drain_deferred(&mut self) {
        if self.dispatching {
            return;
        }
        self.dispatching = true;
        while let Some(op) = self.deferred.0.borrow_mut().pop_front() {
            let result = match op {
                DeferredOp::Accept(id) => self.accept_invitation(&id),
                DeferredOp::Decline(id) => self.decline_invitation(&id),
                DeferredOp::Cancel(id) => self.cancel_invitation(&id),
                DeferredOp::EndCall(reason) => self.end_call(reason.as_deref()),
            };
            if let Err(e) = result {
                error!("deferred operation failed: {e}");
            }
        }
        self.dispatching = false;
    }

    // ---- lifecycle -----------------------------------------------------

    /// Called once per process lifetime.
    pub fn initialize(&mut self) -> Result<()> {
        self.media.initialize()?;
        self.binder.reset();
        let now = self.clock.now();
        self.binder.pump(self.channel.as_mut(), now, &self.config)
    }

    /// Re-arms signaling listeners after a reconnect. Idempotent.
    pub fn reinitialize(&mut self) -> Result<()> {
        info!("reinitialize(): re-arming signaling listeners");
        self.binder.reset();
        let now = self.clock.now();
        self.binder.pump(self.channel.as_mut(), now, &self.config)
    }

    /// Drains due signaling events and fired timers. The host calls this once per
    /// event-loop tick; single-threaded and cooperative, never reentrant with itself.
    pub fn pump(&mut self, now: Instant) {
        if let Err(e) = self.binder.pump(self.channel.as_mut(), now, &self.config) {
            error!("signaling binder failed to attach: {e}");
        }
        if self.binder.is_attached() {
            for event in self.channel.poll_inbound() {
                self.handle_inbound(event);
            }
        }
        for key in self.timeouts.fire_due(now) {
            match key {
                TimerKey::InvitationExpiry(invite_id) => {
                    self.handle_invitation_expiry_locally(invite_id)
                }
                TimerKey::ConnectPhase(invite_id) => self.handle_connect_timeout(invite_id),
            }
        }
        self.drain_deferred();
    }

    // ---- public operation surface ----------------------------------------

    pub fn send_invitation(
        &mut self,
        receiver_id: &str,
        metadata: Value,
        receiver_name: Option<&str>,
    ) -> Result<()> {
        if receiver_id.is_empty() {
            return Err(CallFlowError::InvalidPayload(
                "receiverId must not be empty".into(),
            ));
        }
        let invitation = self.store.invitation();
        let active = self.store.active_call();
        if invitation.status != InvitationStatus::Idle || active.status != ActiveCallStatus::Idle
        {
            warn!(
                "sendInvitation(): ignored, invitation={:?} activeCall={:?}",
                invitation.status, active.status
            );
            return Ok(());
        }
        if !self.channel.is_ready() {
            warn!("sendInvitation(): signaling channel not attached");
            self.store.reset_invitation();
            return Err(CallFlowError::TransportUnavailable);
        }

        let expires_at = self.clock.wall_now() + self.config.invite_ttl;
        self.channel.emit(OutboundEvent::Invite {
            receiver_id: receiver_id.to_string(),
            metadata: metadata.clone(),
        })?;
        self.store.set_invitation(|inv| {
            inv.status = InvitationStatus::Inviting;
            inv.role = Role::Sender;
            inv.invite_id = None;
            inv.remote_user_id = Some(receiver_id.to_string());
            inv.remote_user_name = receiver_name.map(str::to_string);
            inv.metadata = metadata;
            inv.expires_at = Some(expires_at);
        });
        self.arm_invitation_expiry(pending_send_key(), expires_at);
        self.emit_invitation_state_changed();
        self.drain_deferred();
        Ok(())
    }

    pub fn accept_invitation(&mut self, invite_id: &str) -> Result<()> {
        let invitation = self.store.invitation();
        let Some(current_id) = invitation.invite_id.clone() else {
            warn!("acceptInvitation(): no current invitation");
            return Ok(());
        };
        if invitation.status != InvitationStatus::Incoming || current_id.as_str() != invite_id {
            warn!(
                "acceptInvitation({invite_id}): id/status mismatch with current invitation {current_id}"
            );
            return Ok(());
        }

        self.accepted_invitations
            .insert(current_id.clone(), MappedCall::Pending);
        self.active_call_invite_id = Some(current_id.clone());
        self.store.set_active_call(|call| {
            call.status = ActiveCallStatus::Connecting;
            call.call_id = None;
            call.remote_user_id = invitation.remote_user_id.clone();
            call.remote_user_name = invitation.remote_user_name.clone();
            call.is_audio_enabled = true;
            call.is_video_enabled = is_video(&invitation.metadata);
            call.call_history_id = invitation.call_history_id.clone();
        });
        self.arm_connect_timeout(&current_id);
        self.timeouts
            .cancel(&TimerKey::InvitationExpiry(current_id.clone()));

        self.channel.emit(OutboundEvent::InviteAccept {
            invite_id: current_id,
        })?;
        self.emit_call_state_changed();
        self.drain_deferred();
        Ok(())
    }

    pub fn decline_invitation(&mut self, invite_id: &str) -> Result<()> {
        let invitation = self.store.invitation();
        let Some(current_id) = invitation.invite_id.clone() else {
            warn!("declineInvitation(): no current invitation");
            return Ok(());
        };
        if invitation.status != InvitationStatus::Incoming || current_id.as_str() != invite_id {
            warn!("declineInvitation({invite_id}): id/status mismatch");
            return Ok(());
        }

        self.channel.emit(OutboundEvent::InviteDecline {
            invite_id: current_id.clone(),
        })?;
        self.timeouts_cancel_for_invite(&current_id);
        self.accepted_invitations.remove(&current_id);
        self.store.reset_invitation();
        self.emit_invitation_state_changed();

        let active = self.store.active_call();
        if active.status == ActiveCallStatus::Connecting && active.call_id.is_none() {
            self.teardown_active_call();
        }
        self.drain_deferred();
        Ok(())
    }

    /// Cancels the local outgoing invitation. Callable even before the server has
    /// assigned an `inviteId` (i.e. before `invite:success`): since at most one
    /// Invitation exists at a time, a sole `inviting` invitation with no confirmed id
    /// yet is unambiguous, and a user must be able to abandon an invite before it's
    /// even confirmed.
    pub fn cancel_invitation(&mut self, invite_id: &str) -> Result<()> {
        let invitation = self.store.invitation();
        if invitation.status != InvitationStatus::Inviting {
            warn!("cancelInvitation({invite_id}): no outgoing invitation in flight");
            return Ok(());
        }
        if let Some(current_id) = &invitation.invite_id {
            if current_id.as_str() != invite_id {
                warn!("cancelInvitation({invite_id}): id mismatch with current invitation {current_id}");
                return Ok(());
            }
        }
        let outbound_id: InviteId = invitation.invite_id.clone().unwrap_or_else(|| invite_id.into());

        self.channel.emit(OutboundEvent::InviteCancel {
            invite_id: outbound_id.clone(),
        })?;
        self.timeouts_cancel_for_invite(&outbound_id);
        self.store.reset_invitation();
        self.emit_invitation_state_changed();
        self.drain_deferred();
        Ok(())
    }

    pub fn end_call(&mut self, reason: Option<&str>) -> Result<()> {
        let active = self.store.active_call();
        if active.status == ActiveCallStatus::Idle {
            warn!("endCall(): no active call");
            return Ok(());
        }
        if let Some(call_id) = active.call_id.clone() {
            self.channel.emit(OutboundEvent::CallEnd {
                call_id,
                reason: reason.map(str::to_string),
            })?;
        }
        self.teardown_active_call();
        self.drain_deferred();
        Ok(())
    }

    // ---- read-only accessors & subscriptions ----------------------------

    pub fn current_invitation(&self) -> InvitationState {
        self.store.invitation()
    }

    pub fn current_call(&self) -> ActiveCallState {
        self.store.active_call()
    }

    pub fn is_in_call(&self) -> bool {
        self.store.active_call().status != ActiveCallStatus::Idle
    }

    pub fn subscribe_invitation<F>(&self, listener: F) -> Subscription
    where
        F: FnMut(&InvitationState) + 'static,
    {
        self.store.subscribe_invitation(listener)
    }

    pub fn subscribe_active_call<F>(&self, listener: F) -> Subscription
    where
        F: FnMut(&ActiveCallState) + 'static,
    {
        self.store.subscribe_active_call(listener)
    }

    pub fn on<F>(&mut self, kind: NotificationKind, handler: F) -> ListenerId
    where
        F: FnMut(&Notification) + 'static,
    {
        self.notifications.on(kind, handler)
    }

    pub fn off(&mut self, kind: NotificationKind, id: ListenerId) {
        self.notifications.off(kind, id);
    }

    // ---- media events ------------------------------------------------

    pub fn on_media_event(&mut self, event: MediaEvent) {
        match event {
            MediaEvent::Connected => self.handle_media_connected(),
            MediaEvent::Disconnected => self.handle_media_disconnected(),
        }
    }

    fn handle_media_connected(&mut self) {
        let active = self.store.active_call();
        if active.status != ActiveCallStatus::Connecting {
            warn!(
                "webrtc:connected while ActiveCall status={:?}, ignoring",
                active.status
            );
            return;
        }
        if let Some(invite_id) = &self.active_call_invite_id {
            self.timeouts.cancel(&TimerKey::ConnectPhase(invite_id.clone()));
        }
        let started_at = self.clock.now();
        self.store.set_active_call(|call| {
            call.status = ActiveCallStatus::Connected;
            call.call_start_time = Some(started_at);
        });
        self.emit_call_state_changed();
        self.notifications.emit(Notification::WebrtcConnected);
        self.notifications.emit(Notification::NavigateToCallScreen);
    }

    fn handle_media_disconnected(&mut self) {
        let active = self.store.active_call();
        if active.status == ActiveCallStatus::Idle {
            return;
        }
        warn!("media session disconnected while status={:?}", active.status);
        self.teardown_active_call();
    }

    // ---- inbound signaling dispatch --------------------------------------

    pub fn handle_inbound(&mut self, event: InboundEvent) {
        match event {
            InboundEvent::InviteIncoming(p) => self.handle_invite_incoming(p),
            InboundEvent::InviteSuccess(p) => self.handle_invite_success(p),
            InboundEvent::InviteError(p) => self.handle_invite_error(p),
            InboundEvent::InviteDeclined(p) => self.handle_invite_declined(p),
            InboundEvent::InviteCancelled(p) => self.handle_invite_terminal(p.invite_id, false),
            InboundEvent::InviteExpired(p) => self.handle_invite_terminal(p.invite_id, true),
            InboundEvent::CallStart(p) => self.handle_call_start(p),
            InboundEvent::CallEnd(p) => self.handle_call_end(p),
        }
    }

    fn handle_invite_incoming(&mut self, payload: InviteIncoming) {
        let invitation = self.store.invitation();
        if invitation.invite_id.as_ref() == Some(&payload.invite_id)
            || self.accepted_invitations.contains_key(&payload.invite_id)
        {
            debug!(
                "invite:incoming({}): duplicate of an already-known invitation, ignoring",
                payload.invite_id
            );
            return;
        }

        self.store.set_invitation(|inv| {
            inv.invite_id = Some(payload.invite_id.clone());
            inv.role = Role::Receiver;
            inv.status = InvitationStatus::Incoming;
            inv.remote_user_id = Some(payload.caller_id.clone());
            inv.remote_user_name = Some(payload.caller_name.clone());
            inv.remote_user_profile_pic = payload.caller_profile_pic.clone();
            inv.metadata = payload.metadata.clone();
            inv.expires_at = Some(payload.expires_at.0);
            inv.call_history_id = payload.call_history_id.clone();
        });
        self.arm_invitation_expiry(payload.invite_id.clone(), payload.expires_at.0);
        self.emit_invitation_state_changed();

        if payload.auto_accept {
            info!(
                "invite:incoming({}): autoAccept set, accepting immediately",
                payload.invite_id
            );
            if let Err(e) = self.accept_invitation(payload.invite_id.as_str()) {
                error!("auto-accept failed for {}: {e}", payload.invite_id);
            }
        }
    }

    fn handle_invite_success(&mut self, payload: InviteSuccess) {
        let invitation = self.store.invitation();
        if invitation.status != InvitationStatus::Inviting || invitation.role != Role::Sender {
            warn!(
                "invite:success({}): no matching outgoing invite, ignoring",
                payload.invite_id
            );
            return;
        }
        let expires_at = invitation
            .expires_at
            .unwrap_or_else(|| self.clock.wall_now() + self.config.invite_ttl);
        let history_id = payload.call_history_id.or(invitation.call_history_id.clone());
        self.store.set_invitation(|inv| {
            inv.invite_id = Some(payload.invite_id.clone());
            inv.call_history_id = history_id;
        });
        self.timeouts
            .cancel(&TimerKey::InvitationExpiry(pending_send_key()));
        self.arm_invitation_expiry(payload.invite_id, expires_at);
        self.emit_invitation_state_changed();
    }

    fn handle_invite_error(&mut self, payload: InviteError) {
        warn!("invite:error: {}", payload.error);
        self.store.reset_invitation();
        self.emit_invitation_state_changed();
        self.notifications
            .emit(Notification::InvitationError(payload.error));
    }

    fn handle_invite_declined(&mut self, payload: InviteDeclined) {
        let invitation = self.store.invitation();
        let matches_current = invitation.invite_id.as_ref() == Some(&payload.invite_id);
        let matches_pending_accept = matches!(
            self.accepted_invitations.get(&payload.invite_id),
            Some(MappedCall::Pending)
        );
        if !matches_current && !matches_pending_accept {
            debug!(
                "invite:declined({}): no matching invitation, ignoring",
                payload.invite_id
            );
            return;
        }

        self.timeouts_cancel_for_invite(&payload.invite_id);
        self.accepted_invitations.remove(&payload.invite_id);
        self.store.reset_invitation();
        self.emit_invitation_state_changed();

        // Decline races acceptance: if we'd already moved ActiveCall to `connecting`
        // but `call:start` hasn't landed, the decline wins.
        let active = self.store.active_call();
        if active.status == ActiveCallStatus::Connecting && active.call_id.is_none() {
            self.teardown_active_call();
        }
        self.notifications.emit(Notification::InvitationDeclined);
    }

    /// Shared handling for `invite:expired` and `invite:cancelled`. Never tears down
    /// an ActiveCall that has already bound the invite to a live call id.
    fn handle_invite_terminal(&mut self, invite_id: InviteId, is_expiry: bool) {
        let invitation = self.store.invitation();
        let active = self.store.active_call();
        let call_in_progress = matches!(
            active.status,
            ActiveCallStatus::Connecting | ActiveCallStatus::Connected
        );
        let mapping_live = self.accepted_invitations.contains_key(&invite_id);

        if mapping_live && call_in_progress {
            if invitation.invite_id.as_ref() == Some(&invite_id) {
                self.store.reset_invitation();
                self.emit_invitation_state_changed();
            }
            if is_expiry {
                self.accepted_invitations.remove(&invite_id);
            }
            debug!(
                "invite:{}({invite_id}): call already in progress, ignoring for ActiveCall",
                if is_expiry { "expired" } else { "cancelled" }
            );
            return;
        }

        if invitation.invite_id.as_ref() == Some(&invite_id) {
            self.store.reset_invitation();
            self.emit_invitation_state_changed();
        }
        self.timeouts_cancel_for_invite(&invite_id);
        self.accepted_invitations.remove(&invite_id);

        if active.status == ActiveCallStatus::Connecting && active.call_id.is_none() {
            self.teardown_active_call();
        }
    }

    fn handle_call_start(&mut self, payload: CallStart) {
        if self.handled_calls.contains(&payload.call_id) {
            debug!("call:start({}): duplicate, ignoring", payload.call_id);
            return;
        }

        let role = if self.auth_user_id == payload.caller_id {
            Role::Sender
        } else if self.auth_user_id == payload.receiver_id {
            Role::Receiver
        } else {
            error!(
                "call:start({}): matches neither caller nor receiver of this client",
                payload.call_id
            );
            return;
        };
        self.handled_calls.insert(payload.call_id.clone());

        let invitation = self.store.invitation();
        let remote_user_id = match role {
            Role::Sender => payload.receiver_id.clone(),
            Role::Receiver => payload.caller_id.clone(),
            Role::None => unreachable!("role is resolved to Sender or Receiver above"),
        };
        let is_video = is_video(&payload.metadata) || is_video(&invitation.metadata);
        let call_history_id = payload
            .call_history_id
            .clone()
            .or(invitation.call_history_id.clone());

        if let Some(invite_id) = invitation.invite_id.clone() {
            self.accepted_invitations
                .insert(invite_id.clone(), MappedCall::Bound(payload.call_id.clone()));
            self.active_call_invite_id = Some(invite_id.clone());
            self.timeouts.cancel(&TimerKey::InvitationExpiry(invite_id.clone()));
            self.arm_connect_timeout(&invite_id);
        }

        let remote_user_name = invitation.remote_user_name.clone();
        self.store.set_active_call(|call| {
            call.status = ActiveCallStatus::Connecting;
            call.call_id = Some(payload.call_id.clone());
            call.remote_user_id = Some(remote_user_id.clone());
            call.remote_user_name = remote_user_name;
            call.is_video_enabled = is_video;
            call.call_history_id = call_history_id;
        });

        // The Invitation is now subsumed by the ActiveCall.
        self.store.reset_invitation();
        self.emit_invitation_state_changed();
        self.emit_call_state_changed();

        if let Err(e) = self.media.sync_state(CallSnapshot {
            call_id: payload.call_id,
            role,
            remote_user_id,
            is_video_enabled: is_video,
        }) {
            error!("media sync_state failed: {e}");
        }
    }

    fn handle_call_end(&mut self, payload: CallEnd) {
        let active = self.store.active_call();
        if active.call_id.as_ref() != Some(&payload.call_id) {
            debug!("call:end({}): not the active call, ignoring", payload.call_id);
            return;
        }
        info!(
            "call:end({}): reason={:?} endedBy={:?}",
            payload.call_id, payload.reason, payload.ended_by
        );
        self.teardown_active_call();
    }

    // ---- timer firing ----------------------------------------------------

    fn handle_invitation_expiry_locally(&mut self, invite_id: InviteId) {
        let invitation = self.store.invitation();
        let is_pending_send = invite_id == pending_send_key();
        if !is_pending_send && invitation.invite_id.as_ref() != Some(&invite_id) {
            return;
        }
        match invitation.status {
            InvitationStatus::Inviting => {
                let target = invitation
                    .invite_id
                    .as_ref()
                    .map(InviteId::as_str)
                    .unwrap_or_else(|| invite_id.as_str());
                let _ = self.cancel_invitation(target);
            }
            InvitationStatus::Incoming => {
                let _ = self.decline_invitation(invite_id.as_str());
            }
            InvitationStatus::Idle => {}
        }
    }

    fn handle_connect_timeout(&mut self, invite_id: InviteId) {
        let active = self.store.active_call();
        if active.status != ActiveCallStatus::Connecting {
            return;
        }
        if self.active_call_invite_id.as_ref() != Some(&invite_id) {
            return;
        }
        warn!("connect timeout for invitation {invite_id}, resetting ActiveCall");
        self.teardown_active_call();
    }

    // ---- shared helpers ---------------------------------------------------

    /// Tears down the ActiveCall atom and, crucially, releases the Accepted-Invitation
    /// Mapping entry and timers tied to it. This is the single path every call-ending
    /// event (`call:end`, media disconnect, connect timeout, explicit `endCall`) funnels
    /// through, so the mapping can never outlive the call it protects.
    fn teardown_active_call(&mut self) {
        if let Some(invite_id) = self.active_call_invite_id.take() {
            self.timeouts_cancel_for_invite(&invite_id);
            self.accepted_invitations.remove(&invite_id);
        }
        self.media.teardown();
        self.store.reset_active_call();
        self.emit_call_state_changed();
    }

    fn timeouts_cancel_for_invite(&mut self, invite_id: &InviteId) {
        self.timeouts
            .cancel(&TimerKey::InvitationExpiry(invite_id.clone()));
        self.timeouts.cancel(&TimerKey::ConnectPhase(invite_id.clone()));
    }

    fn arm_invitation_expiry(&mut self, invite_id: InviteId, expires_at: SystemTime) {
        let now_wall = self.clock.wall_now();
        let now_mono = self.clock.now();
        let remaining = expires_at.duration_since(now_wall).unwrap_or(Duration::ZERO);
        self.timeouts
            .arm(TimerKey::InvitationExpiry(invite_id), now_mono + remaining);
    }

    fn arm_connect_timeout(&mut self, invite_id: &InviteId) {
        let key = TimerKey::ConnectPhase(invite_id.clone());
        if self.timeouts.is_armed(&key) {
            return;
        }
        let deadline = self.clock.now() + self.config.connect_timeout;
        self.timeouts.arm(key, deadline);
    }

    fn emit_invitation_state_changed(&mut self) {
        let snapshot = self.store.invitation();
        self.notifications
            .emit(Notification::InvitationStateChanged(snapshot));
    }

    fn emit_call_state_changed(&mut self) {
        let snapshot = self.store.active_call();
        self.notifications
            .emit(Notification::CallStateChanged(snapshot));
    }
}

fn is_video(metadata: &Value) -> bool {
    metadata.get("isVideo").and_then(Value::as_bool).unwrap_or(false)
}

/// Fixed key for the local expiry timer armed at `sendInvitation()`, before the
/// server has assigned a real invite id. At most one outgoing invitation exists at a
/// time, so a single fixed key is never ambiguous; `handle_invite_success` cancels it
/// once the real invite id takes over.
fn pending_send_key() -> InviteId {
    InviteId::from("$pending-send")
}
