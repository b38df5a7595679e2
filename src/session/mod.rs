//! Durable sessions: pending confirmations and in-flight wizard state.

mod store;

pub use store::SessionStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle states of a session. `PENDING` is the only state that accepts
/// transitions; everything else is settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Pending,
    Confirmed,
    Done,
    Cancelled,
    Expired,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Confirmed => "CONFIRMED",
            Self::Done => "DONE",
            Self::Cancelled => "CANCELLED",
            Self::Expired => "EXPIRED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "CONFIRMED" => Some(Self::Confirmed),
            "DONE" => Some(Self::Done),
            "CANCELLED" => Some(Self::Cancelled),
            "EXPIRED" => Some(Self::Expired),
            _ => None,
        }
    }

    /// Legal transitions: `PENDING -> CONFIRMED | CANCELLED | EXPIRED` and
    /// `CONFIRMED -> DONE`.
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Confirmed)
                | (Self::Pending, Self::Cancelled)
                | (Self::Pending, Self::Expired)
                | (Self::Confirmed, Self::Done)
        )
    }
}

/// A persistent record keyed by an opaque, unguessable identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub user_id: i64,
    pub pending_action: Value,
    pub status: SessionStatus,
    pub user_response: Option<Value>,
    pub execution_result: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// Whether this session carries wizard state rather than a pending
    /// confirmation.
    pub fn is_wizard(&self) -> bool {
        self.pending_action
            .get("kind")
            .and_then(Value::as_str)
            .map(|k| k == "wizard")
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            SessionStatus::Pending,
            SessionStatus::Confirmed,
            SessionStatus::Done,
            SessionStatus::Cancelled,
            SessionStatus::Expired,
        ] {
            assert_eq!(SessionStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(SessionStatus::parse("pending"), None);
    }

    #[test]
    fn test_transition_matrix() {
        use SessionStatus::*;
        assert!(Pending.can_transition_to(Confirmed));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Pending.can_transition_to(Expired));
        assert!(Confirmed.can_transition_to(Done));

        assert!(!Done.can_transition_to(Pending));
        assert!(!Cancelled.can_transition_to(Confirmed));
        assert!(!Pending.can_transition_to(Done));
        assert!(!Expired.can_transition_to(Cancelled));
    }
}
