//! Media Session Adapter (C4): the narrow interface to the opaque media session.
//!
//! The coordinator drives the adapter one-way (`initialize`, `sync_state`); the
//! adapter reports back through [`MediaEvent`]s the host feeds into
//! [`crate::core::coordinator::CallFlowCoordinator::on_media_event`]. No back-reference
//! from the adapter to the coordinator is ever held, breaking the cyclic dependency
//! the adapter and coordinator would otherwise form.

use crate::common::{CallId, Result, Role};

/// Read-only snapshot of the expected ActiveCall, handed to the adapter so it accepts
/// the inbound offer for the right call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallSnapshot {
    pub call_id: CallId,
    pub role: Role,
    pub remote_user_id: String,
    pub is_video_enabled: bool,
}

/// Events the media session publishes; the only two the coordinator consumes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaEvent {
    Connected,
    Disconnected,
}

pub trait MediaSessionAdapter {
    /// Called once per process lifetime.
    fn initialize(&mut self) -> Result<()>;

    /// Provide the expected call context ahead of or alongside the first `call:start`.
    fn sync_state(&mut self, snapshot: CallSnapshot) -> Result<()>;

    /// Tear down any session state between calls.
    fn teardown(&mut self);
}
