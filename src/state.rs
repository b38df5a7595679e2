//! The request-scoped state threaded through the graph.
//!
//! A [`State`] is a mapping from documented string keys to JSON values. The
//! runtime clones the caller's input into a fresh `State` at the start of
//! every run, so no two requests ever observe each other's writes. Each node
//! reads and writes a documented subset of keys; a node must treat any nested
//! value it did not produce as read-only and assign rebuilt collections to a
//! fresh key instead of mutating in place.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Documented state keys, grouped by the node that writes them.
pub mod keys {
    // Inputs, set by the caller and read-only afterwards.
    pub const TEXT: &str = "text";
    pub const USER_ID: &str = "user_id";
    pub const SESSION_ID: &str = "session_id";
    pub const SELECTED_ENTITY_ID: &str = "selected_entity_id";
    pub const CURRENT_PAGE: &str = "current_page";
    pub const FROM_IMAGE: &str = "from_image";

    // Classification, set by the intent parser.
    pub const ACTION: &str = "action";
    pub const TARGET_LABEL: &str = "target_label";
    pub const TARGET_TIME: &str = "target_time";
    pub const TARGET_ENTITY_ID: &str = "target_entity_id";
    pub const PARSED_PARAMS: &str = "parsed_params";
    pub const CONFIDENCE: &str = "confidence";
    pub const NEEDS_CLARIFICATION: &str = "needs_clarification";
    pub const CLARIFY_OPTIONS: &str = "clarify_options";
    pub const SOURCE: &str = "source";
    pub const FROM_SELECTION_UI: &str = "from_selection_ui";

    // Resolution, set by the target resolver.
    pub const TRIP_ID: &str = "trip_id";
    pub const PATH_ID: &str = "path_id";
    pub const ROUTE_ID: &str = "route_id";
    pub const TRIP_LABEL: &str = "trip_label";
    pub const RESOLVE_RESULT: &str = "resolve_result";
    pub const MATCHES: &str = "matches";

    // Routing, set by the decision router.
    pub const NEXT_NODE: &str = "next_node";
    pub const SELECTION_KIND: &str = "selection_kind";

    // Consequences, set by the consequence analyser.
    pub const CONSEQUENCES: &str = "consequences";
    pub const NEEDS_CONFIRMATION: &str = "needs_confirmation";
    pub const WARNING_MESSAGES: &str = "warning_messages";

    // Confirmation, set by the confirmation gate.
    pub const STATUS: &str = "status";
    pub const CONFIRMATION_REQUIRED: &str = "confirmation_required";
    pub const PENDING_ACTION: &str = "pending_action";

    // Wizard, set by the wizard engine and persisted via the session store.
    pub const WIZARD_ACTIVE: &str = "wizard_active";
    pub const WIZARD_TYPE: &str = "wizard_type";
    pub const WIZARD_STEP: &str = "wizard_step";
    pub const WIZARD_STEPS_TOTAL: &str = "wizard_steps_total";
    pub const WIZARD_DATA: &str = "wizard_data";
    pub const WIZARD_QUESTION: &str = "wizard_question";
    pub const WIZARD_HINT: &str = "wizard_hint";
    pub const OPTIONS: &str = "options";
    pub const WIZARD_COMPLETED: &str = "wizard_completed";
    pub const WIZARD_CANCELLED: &str = "wizard_cancelled";

    // Execution, set by the action executor.
    pub const EXECUTION_RESULT: &str = "execution_result";
    /// Set when a pending action is replayed through the confirmation
    /// endpoint; approves replacements the user already agreed to.
    pub const CONFIRMED: &str = "confirmed";
    /// Diagnostic flag: the regex fallback produced the intent.
    pub const LLM_FALLBACK_USED: &str = "llm_fallback_used";

    // Errors and messaging, set by any node; read by the terminals.
    pub const ERROR: &str = "error";
    pub const MESSAGE: &str = "message";
    pub const SUGGESTIONS: &str = "suggestions";
    pub const OUTPUT_TYPE: &str = "output_type";
    pub const DATA: &str = "data";

    // Output, set by a terminal node.
    pub const FINAL_OUTPUT: &str = "final_output";
}

/// Per-request key/value state.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct State {
    values: Map<String, Value>,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a key to any JSON-convertible value.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.values.insert(key.to_string(), value.into());
    }

    /// Remove a key, returning its prior value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        match self.values.get(key) {
            Some(Value::Number(n)) => n.as_i64(),
            // Structured commands and stored snapshots may carry numeric ids as strings.
            Some(Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.values.get(key).and_then(Value::as_f64)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.values.get(key).and_then(Value::as_bool)
    }

    /// Boolean flag, defaulting to `false` when absent or not a boolean.
    pub fn flag(&self, key: &str) -> bool {
        self.get_bool(key).unwrap_or(false)
    }

    pub fn get_object(&self, key: &str) -> Option<&Map<String, Value>> {
        self.values.get(key).and_then(Value::as_object)
    }

    pub fn get_array(&self, key: &str) -> Option<&Vec<Value>> {
        self.values.get(key).and_then(Value::as_array)
    }

    /// Look up a value inside the `parsed_params` mapping.
    pub fn param(&self, name: &str) -> Option<&Value> {
        self.get_object(keys::PARSED_PARAMS).and_then(|p| p.get(name))
    }

    /// Integer parameter, tolerating string-encoded numbers.
    pub fn param_i64(&self, name: &str) -> Option<i64> {
        match self.param(name)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn param_str(&self, name: &str) -> Option<&str> {
        self.param(name).and_then(Value::as_str)
    }

    /// Record a failure kind and its user-facing message.
    pub fn set_error(&mut self, kind: crate::error::ErrorKind, message: impl Into<String>) {
        self.set(keys::ERROR, kind.as_str());
        self.set(keys::MESSAGE, message.into());
    }

    pub fn error_kind(&self) -> Option<&str> {
        self.get_str(keys::ERROR)
    }

    /// Iterate over all entries (used when persisting wizard snapshots).
    pub fn entries(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }
}

impl From<Map<String, Value>> for State {
    fn from(values: Map<String, Value>) -> Self {
        Self { values }
    }
}
