//! Common types shared across the coordinator, store, and signaling layers.

pub mod time;

use std::fmt;

use serde::{Deserialize, Serialize};
use strum_macros::Display as StrumDisplay;

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, crate::error::CallFlowError>;

macro_rules! opaque_id {
    ($name:ident) => {
        #[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

opaque_id!(InviteId);
opaque_id!(CallId);

/// Whether this client is the sender or receiver of a given invitation/call.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, StrumDisplay,
)]
pub enum Role {
    #[default]
    None,
    Sender,
    Receiver,
}

/// Status of the Invitation atom.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, StrumDisplay,
)]
pub enum InvitationStatus {
    #[default]
    Idle,
    Inviting,
    Incoming,
}

/// Status of the ActiveCall atom.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, StrumDisplay,
)]
pub enum ActiveCallStatus {
    #[default]
    Idle,
    Connecting,
    Connected,
    Ended,
}
