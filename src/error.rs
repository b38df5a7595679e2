//! Error types for fleetops-core.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using fleetops-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while handling an agent request.
#[derive(Error, Debug)]
pub enum Error {
    /// A domain-level failure with a user-facing kind and safe message.
    #[error("{message}")]
    Domain {
        kind: ErrorKind,
        /// Entity the failure relates to ("trip", "vehicle", "session", ...).
        entity_type: Option<String>,
        message: String,
    },

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// LLM provider error
    #[error("LLM error: {provider} - {message}")]
    Llm { provider: String, message: String },

    /// Timeout during operation
    #[error("operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a domain error with no entity attached.
    pub fn domain(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Domain {
            kind,
            entity_type: None,
            message: message.into(),
        }
    }

    /// Create a domain error raised by a tool operation on a specific entity.
    pub fn tool(kind: ErrorKind, entity_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Domain {
            kind,
            entity_type: Some(entity_type.into()),
            message: message.into(),
        }
    }

    /// Create a database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database(message.into())
    }

    /// Create an LLM provider error.
    pub fn llm(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Llm {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// The user-facing kind for this error. Infrastructure failures collapse
    /// to `internal_error`; their detail is logged, never surfaced.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Domain { kind, .. } => *kind,
            Self::Llm { .. } | Self::Timeout { .. } => ErrorKind::LlmUnavailable,
            _ => ErrorKind::InternalError,
        }
    }

    /// A message that is safe to show to the user.
    pub fn user_message(&self) -> String {
        match self {
            Self::Domain { message, .. } => message.clone(),
            other => other.kind().user_message().to_string(),
        }
    }
}

/// The closed, user-facing error taxonomy.
///
/// Every kind serialises to a stable snake_case wire string and maps to a
/// single human sentence that is safe to display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Unauthorised,
    InvalidRequest,
    UnknownAction,
    AmbiguousTarget,
    TargetNotFound,
    TripCancelled,
    TripPast,
    AlreadyDeployed,
    VehicleUnavailable,
    DriverUnavailable,
    NoDeployment,
    PageContextMismatch,
    SessionNotFound,
    SessionNotPending,
    LlmUnavailable,
    InternalError,
}

impl ErrorKind {
    /// Stable wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unauthorised => "unauthorised",
            Self::InvalidRequest => "invalid_request",
            Self::UnknownAction => "unknown_action",
            Self::AmbiguousTarget => "ambiguous_target",
            Self::TargetNotFound => "target_not_found",
            Self::TripCancelled => "trip_cancelled",
            Self::TripPast => "trip_past",
            Self::AlreadyDeployed => "already_deployed",
            Self::VehicleUnavailable => "vehicle_unavailable",
            Self::DriverUnavailable => "driver_unavailable",
            Self::NoDeployment => "no_deployment",
            Self::PageContextMismatch => "page_context_mismatch",
            Self::SessionNotFound => "session_not_found",
            Self::SessionNotPending => "session_not_pending",
            Self::LlmUnavailable => "llm_unavailable",
            Self::InternalError => "internal_error",
        }
    }

    /// The default human sentence shown when no more specific message exists.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Unauthorised => "You are not authorised to perform this request.",
            Self::InvalidRequest => "That request could not be understood. Please rephrase it.",
            Self::UnknownAction => {
                "I couldn't work out what you want to do. Try something like 'show status of trip 5'."
            }
            Self::AmbiguousTarget => "More than one trip matches. Which one did you mean?",
            Self::TargetNotFound => "I couldn't find a matching trip.",
            Self::TripCancelled => "That trip has been cancelled, so this operation is not available.",
            Self::TripPast => "That trip is in the past, so this operation is not available.",
            Self::AlreadyDeployed => {
                "A vehicle is already assigned to that trip. Confirm if you want to replace it."
            }
            Self::VehicleUnavailable => "That vehicle is already deployed in an overlapping time window.",
            Self::DriverUnavailable => "That driver is already assigned in an overlapping time window.",
            Self::NoDeployment => "That trip has no vehicle or driver assigned yet.",
            Self::PageContextMismatch => "That action is not available from this page.",
            Self::SessionNotFound => "That confirmation has expired or does not exist.",
            Self::SessionNotPending => "That confirmation was already handled.",
            Self::LlmUnavailable => "The language service is temporarily unavailable; a simplified parser was used.",
            Self::InternalError => "Something went wrong while processing your request. Please try again.",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_wire_strings() {
        assert_eq!(ErrorKind::AlreadyDeployed.as_str(), "already_deployed");
        assert_eq!(ErrorKind::PageContextMismatch.as_str(), "page_context_mismatch");
        let json = serde_json::to_string(&ErrorKind::SessionNotPending).unwrap();
        assert_eq!(json, "\"session_not_pending\"");
    }

    #[test]
    fn test_infrastructure_errors_collapse_to_internal() {
        let err = Error::database("no such table: trips");
        assert_eq!(err.kind(), ErrorKind::InternalError);
        // SQL detail must not leak into the user message.
        assert!(!err.user_message().contains("trips"));
    }

    #[test]
    fn test_llm_errors_map_to_llm_unavailable() {
        assert_eq!(Error::llm("anthropic", "503").kind(), ErrorKind::LlmUnavailable);
        assert_eq!(Error::timeout(8000).kind(), ErrorKind::LlmUnavailable);
    }

    #[test]
    fn test_tool_error_carries_entity() {
        let err = Error::tool(ErrorKind::VehicleUnavailable, "vehicle", "KA-01 overlaps trip 9");
        match err {
            Error::Domain { entity_type, .. } => assert_eq!(entity_type.as_deref(), Some("vehicle")),
            _ => panic!("expected domain error"),
        }
    }
}
