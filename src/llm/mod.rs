//! The LLM layer: provider clients, prompt assembly, JSON extraction, and
//! the layered intent extractor.

pub mod client;
pub mod fallback;
pub mod parse;
pub mod prompt;
pub mod types;

pub use client::{AnthropicClient, ClientConfig, LlmClient, OpenAiClient};
pub use fallback::RegexFallbackParser;
pub use types::{ChatMessage, ChatRole, CompletionRequest, CompletionResponse, Intent, ParseContext, ParsedIntent};

use crate::error::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Layered intent extraction: primary provider, then secondary, then the
/// regex fallback. The fallback guarantees the agent never blocks on an
/// external model for the common command surface.
pub struct IntentExtractor {
    primary: Arc<dyn LlmClient>,
    secondary: Option<Arc<dyn LlmClient>>,
    fallback: RegexFallbackParser,
    timeout: Duration,
    system_prompt: String,
}

impl IntentExtractor {
    pub fn new(primary: Arc<dyn LlmClient>, timeout_ms: u64) -> Self {
        Self {
            primary,
            secondary: None,
            fallback: RegexFallbackParser::new(),
            timeout: Duration::from_millis(timeout_ms),
            system_prompt: prompt::build_system_prompt(),
        }
    }

    pub fn with_secondary(mut self, secondary: Arc<dyn LlmClient>) -> Self {
        self.secondary = Some(secondary);
        self
    }

    /// Parse user text into an intent. Infallible by construction: provider
    /// failures degrade to the regex fallback.
    pub async fn parse(&self, text: &str, context: &ParseContext) -> ParsedIntent {
        let request = CompletionRequest {
            model: None,
            system: Some(self.system_prompt.clone()),
            messages: vec![ChatMessage::user(prompt::build_user_prompt(text, context))],
            max_tokens: Some(512),
            temperature: Some(0.0),
        };

        match self.complete_with_failover(request).await {
            Ok(content) => {
                let intent = parse::extract_json_object(&content)
                    .map(|value| parse::intent_from_json(&value))
                    .unwrap_or_else(Intent::unknown);
                debug!(action = %intent.action, confidence = intent.confidence, "LLM intent");
                ParsedIntent {
                    intent,
                    via_regex_fallback: false,
                }
            }
            Err(err) => {
                warn!(error = %err, "all LLM providers failed, using regex fallback");
                ParsedIntent {
                    intent: self.fallback.parse(text),
                    via_regex_fallback: true,
                }
            }
        }
    }

    async fn complete_with_failover(&self, request: CompletionRequest) -> Result<String> {
        let primary = self.call_bounded(&self.primary, request.clone()).await;
        match primary {
            Ok(content) => Ok(content),
            Err(err) => {
                warn!(provider = self.primary.provider(), error = %err, "primary LLM failed");
                let Some(secondary) = &self.secondary else {
                    return Err(err);
                };
                self.call_bounded(secondary, request).await
            }
        }
    }

    async fn call_bounded(&self, client: &Arc<dyn LlmClient>, request: CompletionRequest) -> Result<String> {
        match tokio::time::timeout(self.timeout, client.complete(request)).await {
            Ok(Ok(response)) => Ok(response.content),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(crate::error::Error::timeout(self.timeout.as_millis() as u64)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::client::testing::{FailingLlm, ScriptedLlm};
    use super::*;
    use crate::actions::Action;
    use serde_json::json;

    fn context() -> ParseContext {
        ParseContext {
            selected_entity_id: None,
            current_page: "trip_ops".into(),
            recent: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_parse_via_primary() {
        let primary = Arc::new(ScriptedLlm::always(json!({
            "action": "cancel_trip",
            "target_entity_id": 5,
            "confidence": 0.92,
        })));
        let extractor = IntentExtractor::new(primary, 1000);

        let parsed = extractor.parse("cancel trip 5", &context()).await;
        assert!(!parsed.via_regex_fallback);
        assert_eq!(parsed.intent.action, Action::CancelTrip);
        assert_eq!(parsed.intent.target_entity_id, Some(5));
    }

    #[tokio::test]
    async fn test_failover_to_secondary() {
        let primary = Arc::new(FailingLlm);
        let secondary = Arc::new(ScriptedLlm::always(json!({
            "action": "list_all_stops",
            "confidence": 0.99,
        })));
        let extractor = IntentExtractor::new(primary, 1000).with_secondary(secondary);

        let parsed = extractor.parse("list all stops", &context()).await;
        assert!(!parsed.via_regex_fallback);
        assert_eq!(parsed.intent.action, Action::ListAllStops);
    }

    #[tokio::test]
    async fn test_regex_fallback_when_all_providers_fail() {
        let extractor =
            IntentExtractor::new(Arc::new(FailingLlm), 1000).with_secondary(Arc::new(FailingLlm));

        let parsed = extractor.parse("remove vehicle from trip 5", &context()).await;
        assert!(parsed.via_regex_fallback);
        assert_eq!(parsed.intent.action, Action::RemoveVehicle);
        assert_eq!(parsed.intent.target_entity_id, Some(5));
        assert_eq!(parsed.intent.confidence, 0.8);
    }

    #[tokio::test]
    async fn test_prose_response_becomes_unknown() {
        let primary = Arc::new(ScriptedLlm::new(["I'm sorry, I can't.".to_string()]));
        let extractor = IntentExtractor::new(primary, 1000);

        let parsed = extractor.parse("do something", &context()).await;
        assert!(!parsed.via_regex_fallback);
        assert_eq!(parsed.intent.action, Action::Unknown);
        assert_eq!(parsed.intent.confidence, 0.0);
    }
}
