//! Signaling Event Binder (C2): the wire contract with the server, plus
//! the bounded-retry / idempotent-reattach bookkeeping for a channel that may not be
//! ready yet or may bounce through a reconnect.

use std::time::{Duration, Instant, SystemTime};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::common::{CallId, InviteId};
use crate::core::config::CoordinatorConfig;
use crate::error::CallFlowError;

/// `expiresAt` arrives as either milliseconds-since-epoch or RFC3339 text.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExpiresAt(pub SystemTime);

impl serde::Serialize for ExpiresAt {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = self
            .0
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        serializer.serialize_u64(millis)
    }
}

impl<'de> serde::Deserialize<'de> for ExpiresAt {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        match &value {
            Value::Number(n) => {
                let millis = n.as_u64().ok_or_else(|| {
                    serde::de::Error::custom("expiresAt number must be a non-negative integer")
                })?;
                Ok(ExpiresAt(
                    std::time::UNIX_EPOCH + Duration::from_millis(millis),
                ))
            }
            Value::String(s) => crate::common::time::parse_iso8601_utc(s)
                .map(ExpiresAt)
                .ok_or_else(|| serde::de::Error::custom(format!("unparseable expiresAt: {s}"))),
            other => Err(serde::de::Error::custom(format!(
                "expiresAt must be a number or string, got {other}"
            ))),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InviteIncoming {
    pub invite_id: InviteId,
    pub caller_id: String,
    pub caller_name: String,
    #[serde(default)]
    pub caller_profile_pic: Option<String>,
    #[serde(default)]
    pub metadata: Value,
    pub expires_at: ExpiresAt,
    #[serde(default)]
    pub call_history_id: Option<String>,
    /// Match/pairing-flow hint: skip user prompting and auto-accept.
    #[serde(default)]
    pub auto_accept: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InviteSuccess {
    pub invite_id: InviteId,
    pub receiver_id: String,
    #[serde(default)]
    pub call_history_id: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InviteError {
    pub error: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InviteDeclined {
    pub invite_id: InviteId,
    #[serde(default)]
    pub receiver_id: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InviteCancelled {
    pub invite_id: InviteId,
    #[serde(default)]
    pub cancelled_by: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InviteExpired {
    pub invite_id: InviteId,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CallStart {
    pub call_id: CallId,
    pub caller_id: String,
    pub receiver_id: String,
    #[serde(default)]
    pub metadata: Value,
    #[serde(default)]
    pub call_history_id: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CallEnd {
    pub call_id: CallId,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub ended_by: Option<String>,
}

/// Inbound signaling events, the closed sum the binder validates into.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum InboundEvent {
    #[serde(rename = "invite:incoming")]
    InviteIncoming(InviteIncoming),
    #[serde(rename = "invite:success")]
    InviteSuccess(InviteSuccess),
    #[serde(rename = "invite:error")]
    InviteError(InviteError),
    #[serde(rename = "invite:declined")]
    InviteDeclined(InviteDeclined),
    #[serde(rename = "invite:cancelled")]
    InviteCancelled(InviteCancelled),
    #[serde(rename = "invite:expired")]
    InviteExpired(InviteExpired),
    #[serde(rename = "call:start")]
    CallStart(CallStart),
    #[serde(rename = "call:end")]
    CallEnd(CallEnd),
}

impl InboundEvent {
    /// Parses and shape-validates a raw JSON payload, dropping malformed events
    /// with an error the caller can log.
    pub fn parse(raw: &str) -> crate::common::Result<Self> {
        serde_json::from_str(raw).map_err(|e| CallFlowError::InvalidPayload(e.to_string()))
    }
}

/// Outbound signaling events emitted by the coordinator.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum OutboundEvent {
    #[serde(rename = "invite")]
    Invite {
        receiver_id: String,
        metadata: Value,
    },
    #[serde(rename = "invite:accept")]
    InviteAccept { invite_id: InviteId },
    #[serde(rename = "invite:decline")]
    InviteDecline { invite_id: InviteId },
    #[serde(rename = "invite:cancel")]
    InviteCancel { invite_id: InviteId },
    #[serde(rename = "call:end")]
    CallEnd {
        call_id: CallId,
        reason: Option<String>,
    },
}

/// The transport abstraction a host implements: the signaling transport is
/// abstracted as an emitter/subscriber of named events with payloads.
///
/// `poll_inbound` is drained by the coordinator's pump loop rather than pushed via a
/// callback, which avoids the cyclic-dependency problem the media adapter has the
/// same shape for: the coordinator pulls from the channel one-way; it never hands the
/// channel a back-reference to itself.
pub trait SignalingChannel {
    /// Whether the underlying transport is currently usable for `emit`.
    fn is_ready(&self) -> bool;

    /// Attempt to (re)attach listeners. Idempotent: calling this while already
    /// attached must not register twice or duplicate delivery.
    fn attach(&mut self) -> bool;

    fn emit(&mut self, event: OutboundEvent) -> crate::common::Result<()>;

    /// Drain inbound events received since the last call.
    fn poll_inbound(&mut self) -> Vec<InboundEvent>;
}

/// Bounded, fixed-interval retry bookkeeping for attaching to a channel that isn't
/// ready yet.
pub struct SignalingBinder {
    attempts_made: u32,
    next_attempt_at: Option<Instant>,
    attached: bool,
    exhausted: bool,
}

impl Default for SignalingBinder {
    fn default() -> Self {
        Self {
            attempts_made: 0,
            next_attempt_at: None,
            attached: false,
            exhausted: false,
        }
    }
}

impl SignalingBinder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the binder as needing to (re)attach, e.g. after `reinitialize()`.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// Drive one tick of the attach retry schedule. Returns `Err` once the retry
    /// budget is exhausted.
    pub fn pump(
        &mut self,
        channel: &mut dyn SignalingChannel,
        now: Instant,
        config: &CoordinatorConfig,
    ) -> crate::common::Result<()> {
        if self.attached {
            return Ok(());
        }
        if self.exhausted {
            return Err(CallFlowError::ListenerAttachTimedOut(
                config.listener_attach_retry_attempts,
            ));
        }
        if let Some(next) = self.next_attempt_at {
            if now < next {
                return Ok(());
            }
        }
        if channel.attach() {
            self.attached = true;
            return Ok(());
        }
        self.attempts_made += 1;
        if self.attempts_made >= config.listener_attach_retry_attempts {
            self.exhausted = true;
            return Err(CallFlowError::ListenerAttachTimedOut(self.attempts_made));
        }
        self.next_attempt_at = Some(now + config.listener_attach_retry_interval);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expires_at_parses_millis_and_iso() {
        let from_millis: InviteIncoming = serde_json::from_value(serde_json::json!({
            "invite_id": "i1",
            "caller_id": "u1",
            "caller_name": "Alice",
            "expires_at": 1_000,
        }))
        .unwrap();
        assert_eq!(
            from_millis.expires_at.0,
            std::time::UNIX_EPOCH + Duration::from_millis(1_000)
        );

        let from_iso: InviteIncoming = serde_json::from_value(serde_json::json!({
            "invite_id": "i1",
            "caller_id": "u1",
            "caller_name": "Alice",
            "expires_at": "1970-01-01T00:00:01Z",
        }))
        .unwrap();
        assert_eq!(
            from_iso.expires_at.0,
            std::time::UNIX_EPOCH + Duration::from_secs(1)
        );
    }

    #[test]
    fn invalid_payload_is_rejected_not_panicked() {
        let err = InboundEvent::parse("{ not json").unwrap_err();
        assert!(matches!(err, CallFlowError::InvalidPayload(_)));
    }
}
