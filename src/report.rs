//! Terminal nodes and the structured output the UI consumes.
//!
//! `report_result` assembles `final_output` from whatever the pipeline
//! produced; `fallback` does the same for crashed or unroutable requests.
//! Both always emit a well-formed output with a status and a message.

use crate::error::Result;
use crate::graph::{nodes, GraphNode};
use crate::state::{keys, State};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Shape tag for `AgentOutput::data`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    /// Multi-row reads.
    Table,
    /// Ordered items (suggestions, options).
    List,
    /// Single-entity reads.
    Object,
    /// Narrative responses.
    Help,
}

/// A contextual next action offered to the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub action: String,
    pub label: String,
    /// Structured command the UI sends when the button is pressed.
    pub command: String,
    #[serde(default)]
    pub warning: bool,
}

/// A pickable option (vehicle, driver, ambiguous trip).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionOption {
    pub id: i64,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

/// The final structured output returned to the caller. Mirrors the
/// `final_output` mapping in the state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentOutput {
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trip_id: Option<i64>,
    pub status: String,
    pub message: String,
    pub needs_confirmation: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consequences: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestions: Option<Vec<Suggestion>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<SelectionOption>>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<OutputKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wizard: Option<Value>,
}

impl AgentOutput {
    /// Deserialise from the `final_output` state value, with a defensive
    /// default for outputs a custom node built by hand.
    pub fn from_state(state: &State) -> AgentOutput {
        state
            .get(keys::FINAL_OUTPUT)
            .cloned()
            .map(Self::from_value)
            .unwrap_or_else(Self::internal_failure)
    }

    /// Deserialise a `final_output` mapping.
    pub fn from_value(value: Value) -> AgentOutput {
        serde_json::from_value(value).unwrap_or_else(|_| Self::internal_failure())
    }

    fn internal_failure() -> AgentOutput {
        AgentOutput {
            action: "unknown".into(),
            trip_id: None,
            status: "failed".into(),
            message: crate::error::ErrorKind::InternalError.user_message().into(),
            needs_confirmation: false,
            session_id: None,
            error: Some("internal_error".into()),
            consequences: None,
            suggestions: None,
            options: None,
            kind: None,
            data: None,
            wizard: None,
        }
    }
}

/// Statuses written to `final_output.status`.
pub mod status {
    pub const EXECUTED: &str = "executed";
    pub const FAILED: &str = "failed";
    pub const CANCELLED: &str = "cancelled";
    pub const AWAITING_CONFIRMATION: &str = "awaiting_confirmation";
    pub const AWAITING_INPUT: &str = "awaiting_input";
    pub const NEEDS_CLARIFICATION: &str = "needs_clarification";
}

/// Build the `final_output` mapping from the state. Shared by both
/// terminals and the confirmation endpoint.
pub fn build_final_output(state: &State) -> Value {
    let action = state.get_str(keys::ACTION).unwrap_or("unknown");
    let error = state.error_kind();

    let status = match state.get_str(keys::STATUS) {
        Some(status) => status.to_string(),
        None if error.is_some() => status::FAILED.to_string(),
        None if state.get_str(keys::RESOLVE_RESULT) == Some(crate::resolve::outcome::MULTIPLE) => {
            status::NEEDS_CLARIFICATION.to_string()
        }
        None if state.flag(keys::WIZARD_ACTIVE) => status::AWAITING_INPUT.to_string(),
        None => status::EXECUTED.to_string(),
    };

    let message = state
        .get_str(keys::MESSAGE)
        .map(str::to_string)
        .unwrap_or_else(|| match error {
            Some(_) => crate::error::ErrorKind::InternalError.user_message().to_string(),
            None => "Done.".to_string(),
        });

    let mut output = json!({
        "action": action,
        "status": status,
        "message": message,
        "needs_confirmation": state.flag(keys::NEEDS_CONFIRMATION) && state.flag(keys::CONFIRMATION_REQUIRED),
    });
    let object = output.as_object_mut().expect("literal object");

    if let Some(trip_id) = state.get_i64(keys::TRIP_ID) {
        object.insert("trip_id".into(), json!(trip_id));
    }
    if let Some(error) = error {
        object.insert("error".into(), json!(error));
    }
    if state.flag(keys::CONFIRMATION_REQUIRED) {
        if let Some(session_id) = state.get_str(keys::SESSION_ID) {
            object.insert("session_id".into(), json!(session_id));
        }
        if let Some(consequences) = state.get(keys::CONSEQUENCES) {
            object.insert("consequences".into(), consequences.clone());
        }
    }
    if state.flag(keys::WIZARD_ACTIVE) || state.flag(keys::WIZARD_COMPLETED) || state.flag(keys::WIZARD_CANCELLED) {
        object.insert(
            "wizard".into(),
            json!({
                "active": state.flag(keys::WIZARD_ACTIVE),
                "type": state.get_str(keys::WIZARD_TYPE),
                "step": state.get_i64(keys::WIZARD_STEP),
                "steps_total": state.get_i64(keys::WIZARD_STEPS_TOTAL),
                "question": state.get_str(keys::WIZARD_QUESTION),
                "hint": state.get_str(keys::WIZARD_HINT),
                "completed": state.flag(keys::WIZARD_COMPLETED),
                "cancelled": state.flag(keys::WIZARD_CANCELLED),
            }),
        );
        if let Some(session_id) = state.get_str(keys::SESSION_ID) {
            object.insert("session_id".into(), json!(session_id));
        }
    }
    if let Some(suggestions) = state.get(keys::SUGGESTIONS) {
        object.insert("suggestions".into(), suggestions.clone());
    }
    // Ambiguous resolution surfaces its candidates as options.
    if let Some(options) = state.get(keys::OPTIONS) {
        object.insert("options".into(), options.clone());
    } else if let Some(matches) = state.get_array(keys::MATCHES) {
        let options: Vec<Value> = matches
            .iter()
            .map(|m| json!({"id": m.get("trip_id"), "label": m.get("label")}))
            .collect();
        object.insert("options".into(), Value::Array(options));
    }
    if let Some(kind) = state.get_str(keys::OUTPUT_TYPE) {
        object.insert("type".into(), json!(kind));
    }
    if let Some(data) = state.get(keys::DATA) {
        object.insert("data".into(), data.clone());
    }

    output
}

/// The standard terminal: reports whatever the pipeline produced.
#[derive(Debug, Default)]
pub struct ReportResultNode;

impl ReportResultNode {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl GraphNode for ReportResultNode {
    fn name(&self) -> &'static str {
        nodes::REPORT_RESULT
    }

    async fn run(&self, mut state: State) -> Result<State> {
        let output = build_final_output(&state);
        state.set(keys::FINAL_OUTPUT, output);
        Ok(state)
    }
}

/// The crash-barrier terminal: always produces a well-formed failure
/// output, whatever the state looks like.
#[derive(Debug, Default)]
pub struct FallbackNode;

impl FallbackNode {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl GraphNode for FallbackNode {
    fn name(&self) -> &'static str {
        nodes::FALLBACK
    }

    async fn run(&self, mut state: State) -> Result<State> {
        if state.error_kind().is_none() {
            state.set_error(
                crate::error::ErrorKind::InternalError,
                crate::error::ErrorKind::InternalError.user_message(),
            );
        }
        state.set(keys::STATUS, status::FAILED);
        let output = build_final_output(&state);
        state.set(keys::FINAL_OUTPUT, output);
        Ok(state)
    }
}
