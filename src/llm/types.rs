//! Types shared across the LLM client, prompt assembly, and intent parsing.

use crate::actions::Action;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Chat roles understood by the providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

/// A completion request, provider-agnostic.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub model: Option<String>,
    pub system: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
}

/// A completion response, reduced to what the agent consumes.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
    pub model: String,
}

/// The parsed intent: an action plus typed parameters plus confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub action: Action,
    pub target_label: Option<String>,
    pub target_entity_id: Option<i64>,
    pub target_time: Option<String>,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    pub confidence: f64,
    #[serde(default)]
    pub clarify: bool,
    #[serde(default)]
    pub clarify_options: Vec<String>,
    /// Logged only, never shown to the user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

impl Intent {
    pub fn unknown() -> Self {
        Self {
            action: Action::Unknown,
            target_label: None,
            target_entity_id: None,
            target_time: None,
            parameters: Map::new(),
            confidence: 0.0,
            clarify: false,
            clarify_options: Vec::new(),
            explanation: None,
        }
    }

    pub fn of(action: Action, confidence: f64) -> Self {
        Self {
            action,
            confidence,
            ..Self::unknown()
        }
    }
}

/// Context handed to the parser alongside the user text.
#[derive(Debug, Clone, Default)]
pub struct ParseContext {
    pub selected_entity_id: Option<i64>,
    pub current_page: String,
    /// Compact recent history, newest last.
    pub recent: Vec<String>,
}

/// An intent plus how it was obtained.
#[derive(Debug, Clone)]
pub struct ParsedIntent {
    pub intent: Intent,
    /// True when both providers failed and the regex fallback produced the
    /// intent.
    pub via_regex_fallback: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intent_defaults() {
        let intent = Intent::unknown();
        assert_eq!(intent.action, Action::Unknown);
        assert_eq!(intent.confidence, 0.0);
        assert!(intent.parameters.is_empty());
    }

    #[test]
    fn test_intent_deserialises_with_missing_optionals() {
        let intent: Intent =
            serde_json::from_str(r#"{"action": "cancel_trip", "target_label": null, "target_entity_id": 5, "target_time": null, "confidence": 0.9}"#)
                .unwrap();
        assert_eq!(intent.action, Action::CancelTrip);
        assert_eq!(intent.target_entity_id, Some(5));
        assert!(!intent.clarify);
    }
}
