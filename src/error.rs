//! Crate-wide error conditions.
//!
//! Precondition violations on the public operations (wrong role, stale id, idle atom)
//! are reported by logging a warning and no-op'ing rather than by `Result::Err`:
//! they're expected races in a cooperative event loop, not failures. Only the
//! conditions below are exceptional enough to propagate.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallFlowError {
    #[error("signaling channel is not attached")]
    TransportUnavailable,

    #[error("listener attach retry budget exhausted after {0} attempts")]
    ListenerAttachTimedOut(u32),

    #[error("malformed signaling payload: {0}")]
    InvalidPayload(String),
}
