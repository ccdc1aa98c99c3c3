//! Internal notification bus: the named events plus the
//! "declined" user notification, consumed by UI and
//! adapters via `on`/`off`.

use std::collections::HashMap;

use strum_macros::{Display as StrumDisplay, EnumString};

use crate::core::store::{ActiveCallState, InvitationState};

pub type ListenerId = u64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, StrumDisplay, EnumString)]
pub enum NotificationKind {
    #[strum(serialize = "call:state-changed")]
    CallStateChanged,
    #[strum(serialize = "invitation:state-changed")]
    InvitationStateChanged,
    #[strum(serialize = "invitation:error")]
    InvitationError,
    #[strum(serialize = "webrtc:connected")]
    WebrtcConnected,
    #[strum(serialize = "navigate-to-call-screen")]
    NavigateToCallScreen,
    #[strum(serialize = "invitation:declined")]
    InvitationDeclined,
}

#[derive(Clone, Debug)]
pub enum Notification {
    CallStateChanged(ActiveCallState),
    InvitationStateChanged(InvitationState),
    InvitationError(String),
    WebrtcConnected,
    NavigateToCallScreen,
    InvitationDeclined,
}

impl Notification {
    pub fn kind(&self) -> NotificationKind {
        match self {
            Self::CallStateChanged(_) => NotificationKind::CallStateChanged,
            Self::InvitationStateChanged(_) => NotificationKind::InvitationStateChanged,
            Self::InvitationError(_) => NotificationKind::InvitationError,
            Self::WebrtcConnected => NotificationKind::WebrtcConnected,
            Self::NavigateToCallScreen => NotificationKind::NavigateToCallScreen,
            Self::InvitationDeclined => NotificationKind::InvitationDeclined,
        }
    }
}

#[derive(Default)]
pub struct NotificationBus {
    next_id: ListenerId,
    listeners: HashMap<NotificationKind, HashMap<ListenerId, Box<dyn FnMut(&Notification)>>>,
}

impl NotificationBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(&mut self, kind: NotificationKind, handler: F) -> ListenerId
    where
        F: FnMut(&Notification) + 'static,
    {
        let id = self.next_id;
        self.next_id += 1;
        self.listeners
            .entry(kind)
            .or_default()
            .insert(id, Box::new(handler));
        id
    }

    pub fn off(&mut self, kind: NotificationKind, id: ListenerId) {
        if let Some(handlers) = self.listeners.get_mut(&kind) {
            handlers.remove(&id);
        }
    }

    pub fn emit(&mut self, notification: Notification) {
        let kind = notification.kind();
        if let Some(handlers) = self.listeners.get_mut(&kind) {
            for handler in handlers.values_mut() {
                handler(&notification);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn notification_kind_round_trips_through_its_wire_name() {
        for kind in [
            NotificationKind::CallStateChanged,
            NotificationKind::InvitationStateChanged,
            NotificationKind::InvitationError,
            NotificationKind::WebrtcConnected,
            NotificationKind::NavigateToCallScreen,
            NotificationKind::InvitationDeclined,
        ] {
            let wire = kind.to_string();
            assert_eq!(NotificationKind::from_str(&wire).unwrap(), kind);
        }
    }
}
