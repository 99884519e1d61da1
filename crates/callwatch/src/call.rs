//! Core call event types.
//!
//! A [`CallEvent`] is what the platform's telephony layer reports: a state
//! and, usually, the raw phone number it concerns.

use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

/// Telephony status reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallState {
    /// No call activity; a call has just ended.
    Idle,
    /// Incoming call ringing.
    Ringing,
    /// Call answered or active.
    Offhook,
    /// Outgoing call initiated.
    Outgoing,
}

impl CallState {
    /// All states, in the order the platform documents them.
    pub const ALL: [Self; 4] = [Self::Idle, Self::Ringing, Self::Offhook, Self::Outgoing];

    /// Map a platform state string to a state.
    ///
    /// Unrecognised strings map to [`CallState::Idle`], matching how the
    /// phone-state receiver treats unknown broadcasts.
    #[must_use]
    pub fn from_platform(raw: &str) -> Self {
        raw.parse().unwrap_or(Self::Idle)
    }

    /// The wire name of this state.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Ringing => "RINGING",
            Self::Offhook => "OFFHOOK",
            Self::Outgoing => "OUTGOING",
        }
    }

    /// Human-readable description.
    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Self::Idle => "No active calls",
            Self::Ringing => "Incoming call ringing",
            Self::Offhook => "Call is active",
            Self::Outgoing => "Outgoing call initiated",
        }
    }

    /// Whether this state starts a call (and therefore always notifies).
    #[must_use]
    pub const fn is_call_start(&self) -> bool {
        matches!(self, Self::Ringing | Self::Outgoing)
    }
}

impl std::fmt::Display for CallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing a state string strictly.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown call state: {0}")]
pub struct UnknownCallState(pub String);

impl FromStr for CallState {
    type Err = UnknownCallState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "IDLE" => Ok(Self::Idle),
            "RINGING" => Ok(Self::Ringing),
            "OFFHOOK" => Ok(Self::Offhook),
            "OUTGOING" => Ok(Self::Outgoing),
            _ => Err(UnknownCallState(s.to_string())),
        }
    }
}

impl<'de> Deserialize<'de> for CallState {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::from_platform(&raw))
    }
}

/// A call-state change reported by the platform.
///
/// Serialized with the platform's field names: `{"state": "RINGING",
/// "phoneNumber": "021-555-0100"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallEvent {
    /// The new call state.
    pub state: CallState,

    /// The raw, unnormalized phone number, when the platform supplied one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
}

impl CallEvent {
    /// Create a new event.
    #[must_use]
    pub fn new(state: CallState, phone_number: Option<impl Into<String>>) -> Self {
        Self {
            state,
            phone_number: phone_number.map(Into::into),
        }
    }

    /// Create an event for a known number.
    #[must_use]
    pub fn with_number(state: CallState, phone_number: impl Into<String>) -> Self {
        Self {
            state,
            phone_number: Some(phone_number.into()),
        }
    }

    /// The raw phone number as a string slice, if any.
    #[must_use]
    pub fn phone_number(&self) -> Option<&str> {
        self.phone_number.as_deref()
    }
}
