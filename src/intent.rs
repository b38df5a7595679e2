//! Intent classification: wizard continuation, structured commands, context
//! shortcuts, and LLM parsing, tried in that order.

use crate::actions::{normalize_action, Action};
use crate::error::Result;
use crate::graph::{nodes, GraphNode};
use crate::llm::{IntentExtractor, ParseContext, RegexFallbackParser};
use crate::state::{keys, State};
use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::debug;

/// Sentinel prefix for deterministic commands emitted by UI buttons.
pub const STRUCTURED_CMD_PREFIX: &str = "STRUCTURED_CMD:";

const CONTEXT_REFERENCES: &[&str] = &[
    "this trip",
    "this one",
    "current trip",
    "selected trip",
    " it",
    " here",
];

const CONTEXT_SHORTCUT_CONFIDENCE: f64 = 0.95;

/// A parsed `STRUCTURED_CMD:` text.
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredCommand {
    pub action: Action,
    pub params: Map<String, Value>,
    pub from_selection_ui: bool,
}

/// Parse a structured command. Returns `None` when the sentinel is absent.
/// Unknown keys are tolerated and kept in `params`; malformed fields
/// (no colon) are skipped.
pub fn parse_structured_command(text: &str) -> Option<StructuredCommand> {
    let body = text.trim().strip_prefix(STRUCTURED_CMD_PREFIX)?;
    let mut fields = body.split('|');
    let action = normalize_action(fields.next()?.trim());

    let mut params = Map::new();
    let mut from_selection_ui = false;
    for field in fields {
        let Some((key, value)) = field.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();
        if key.is_empty() || value.is_empty() {
            continue;
        }
        if key == "context" {
            from_selection_ui = from_selection_ui || value == "selection_ui";
        }
        params.insert(key.to_string(), Value::String(value.to_string()));
    }

    Some(StructuredCommand {
        action,
        params,
        from_selection_ui,
    })
}

/// Build the structured command text for an action and parameter pairs.
pub fn format_structured_command(action: Action, params: &[(&str, String)]) -> String {
    let mut out = format!("{}{}", STRUCTURED_CMD_PREFIX, action.as_str());
    for (key, value) in params {
        out.push('|');
        out.push_str(key);
        out.push(':');
        out.push_str(value);
    }
    out
}

/// The intent parser node: classifies input and enriches the state.
/// `action` is always set after this node, possibly to `unknown`.
pub struct IntentParserNode {
    extractor: IntentExtractor,
    shortcut: RegexFallbackParser,
}

impl IntentParserNode {
    pub fn new(extractor: IntentExtractor) -> Self {
        Self {
            extractor,
            shortcut: RegexFallbackParser::new(),
        }
    }

    fn has_context_reference(text: &str) -> bool {
        let lower = format!(" {}", text.trim().to_ascii_lowercase());
        CONTEXT_REFERENCES.iter().any(|r| lower.contains(r))
    }
}

#[async_trait]
impl GraphNode for IntentParserNode {
    fn name(&self) -> &'static str {
        nodes::PARSE_INTENT
    }

    async fn run(&self, mut state: State) -> Result<State> {
        let text = state.get_str(keys::TEXT).unwrap_or("").to_string();

        // 1. Wizard continuation: the session carries an active wizard, so
        //    the text is a step answer and skips every other parser.
        if state.flag(keys::WIZARD_ACTIVE) {
            state.set(keys::ACTION, Action::WizardStepInput.as_str());
            state.set(keys::SOURCE, "wizard");
            state.set(keys::NEXT_NODE, nodes::WIZARD);
            return Ok(state);
        }

        // 2. Structured command from a UI button: trusted, never LLM-parsed.
        if let Some(command) = parse_structured_command(&text) {
            debug!(action = %command.action, "structured command");
            state.set(keys::ACTION, command.action.as_str());
            state.set(keys::SOURCE, "structured_command");
            state.set(keys::CONFIDENCE, 1.0);
            if command.from_selection_ui {
                state.set(keys::FROM_SELECTION_UI, true);
            }
            state.set(keys::PARSED_PARAMS, Value::Object(command.params));
            return Ok(state);
        }

        // 3. Context shortcut: a selected entity plus "this trip"-style
        //    reference and a detectable keyword; no LLM round trip needed.
        if let Some(selected) = state.get_i64(keys::SELECTED_ENTITY_ID) {
            if Self::has_context_reference(&text) {
                if let Some(action) = self.shortcut.detect_action(&text) {
                    debug!(%action, selected, "context shortcut");
                    state.set(keys::ACTION, action.as_str());
                    state.set(keys::SOURCE, "context_shortcut");
                    state.set(keys::TARGET_ENTITY_ID, selected);
                    state.set(keys::CONFIDENCE, CONTEXT_SHORTCUT_CONFIDENCE);
                    return Ok(state);
                }
            }
        }

        // 4. Full LLM parse.
        let context = ParseContext {
            selected_entity_id: state.get_i64(keys::SELECTED_ENTITY_ID),
            current_page: state.get_str(keys::CURRENT_PAGE).unwrap_or("").to_string(),
            recent: Vec::new(),
        };
        let parsed = self.extractor.parse(&text, &context).await;
        let intent = parsed.intent;

        state.set(keys::ACTION, intent.action.as_str());
        state.set(keys::SOURCE, "llm");
        state.set(keys::CONFIDENCE, intent.confidence);
        if let Some(label) = intent.target_label {
            state.set(keys::TARGET_LABEL, label);
        }
        if let Some(time) = intent.target_time {
            state.set(keys::TARGET_TIME, time);
        }
        // The UI selection is always more reliable than an LLM-suggested id.
        match state.get_i64(keys::SELECTED_ENTITY_ID) {
            Some(selected) => state.set(keys::TARGET_ENTITY_ID, selected),
            None => {
                if let Some(id) = intent.target_entity_id {
                    state.set(keys::TARGET_ENTITY_ID, id);
                }
            }
        }
        if !intent.parameters.is_empty() {
            state.set(keys::PARSED_PARAMS, Value::Object(intent.parameters));
        }
        if intent.clarify {
            state.set(keys::NEEDS_CLARIFICATION, true);
            state.set(
                keys::CLARIFY_OPTIONS,
                Value::Array(intent.clarify_options.into_iter().map(Value::String).collect()),
            );
        }
        if parsed.via_regex_fallback {
            state.set(keys::LLM_FALLBACK_USED, true);
        }
        Ok(state)
    }
}
