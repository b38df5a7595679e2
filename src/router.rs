//! The decision router: the single point where policy is enforced.
//!
//! Routing checks run in a fixed order: page-context validation, wizard
//! state, wizard entry, OCR provenance, resolution outcome, selection
//! requirements, then the safe/risky split. The router only ever writes
//! `next_node` (plus an error for rejections); it performs no I/O.

use crate::actions::{Action, Page};
use crate::error::{ErrorKind, Result};
use crate::graph::{nodes, GraphNode};
use crate::resolve::outcome;
use crate::state::{keys, State};
use async_trait::async_trait;
use tracing::debug;

/// The decision router node.
#[derive(Debug, Default)]
pub struct DecisionRouterNode;

impl DecisionRouterNode {
    pub fn new() -> Self {
        Self
    }

    fn route(state: &mut State, target: &str) {
        debug!(target, "routing");
        state.set(keys::NEXT_NODE, target);
    }
}

#[async_trait]
impl GraphNode for DecisionRouterNode {
    fn name(&self) -> &'static str {
        nodes::ROUTE_DECISION
    }

    async fn run(&self, mut state: State) -> Result<State> {
        let action = state
            .get_str(keys::ACTION)
            .and_then(Action::from_canonical)
            .unwrap_or(Action::Unknown);
        let page = Page::parse(state.get_str(keys::CURRENT_PAGE).unwrap_or(""));

        // 1. Page-context validation: defence-in-depth against UIs that
        //    fail to hide buttons.
        if !action.allowed_on(page) {
            let destination = if action.is_configuration() {
                "the configuration page"
            } else {
                "the trip-operations page"
            };
            state.set_error(
                ErrorKind::PageContextMismatch,
                format!("'{}' is only available from {}.", action, destination),
            );
            Self::route(&mut state, nodes::REPORT_RESULT);
            return Ok(state);
        }

        // 2. An active wizard consumes every input.
        if state.flag(keys::WIZARD_ACTIVE) {
            Self::route(&mut state, nodes::WIZARD);
            return Ok(state);
        }

        // 3. Wizard entry actions start a flow.
        if action.wizard_entry().is_some() {
            Self::route(&mut state, nodes::WIZARD);
            return Ok(state);
        }

        // 4/5. OCR provenance: a verified match offers contextual next
        //    actions; no match offers creation.
        if state.flag(keys::FROM_IMAGE) {
            match state.get_str(keys::RESOLVE_RESULT) {
                Some(outcome::FOUND) => {
                    Self::route(&mut state, nodes::SUGGEST_ACTIONS);
                    return Ok(state);
                }
                Some(outcome::NONE) => {
                    Self::route(&mut state, nodes::OFFER_CREATION);
                    return Ok(state);
                }
                _ => {}
            }
        }

        // 6. Ambiguity: ask the user which trip they meant.
        if state.get_str(keys::RESOLVE_RESULT) == Some(outcome::MULTIPLE) {
            state.set_error(
                ErrorKind::AmbiguousTarget,
                ErrorKind::AmbiguousTarget.user_message(),
            );
            Self::route(&mut state, nodes::REPORT_RESULT);
            return Ok(state);
        }

        // Unknown action: nothing below can handle it.
        if action == Action::Unknown {
            state.set_error(ErrorKind::UnknownAction, ErrorKind::UnknownAction.user_message());
            Self::route(&mut state, nodes::REPORT_RESULT);
            return Ok(state);
        }

        // A target-requiring action with no resolved trip has nowhere to go.
        if action.needs_target() && state.get_str(keys::RESOLVE_RESULT) == Some(outcome::NONE) {
            if state.error_kind().is_none() {
                // Pass the parser's own clarification offers along.
                let clarifications = state
                    .get_array(keys::CLARIFY_OPTIONS)
                    .map(|options| {
                        options
                            .iter()
                            .filter_map(|o| o.as_str())
                            .collect::<Vec<_>>()
                            .join(", ")
                    })
                    .filter(|joined| !joined.is_empty());
                let message = match clarifications {
                    Some(joined) => format!(
                        "{} Did you mean: {}?",
                        ErrorKind::TargetNotFound.user_message(),
                        joined
                    ),
                    None => ErrorKind::TargetNotFound.user_message().to_string(),
                };
                state.set_error(ErrorKind::TargetNotFound, message);
            }
            Self::route(&mut state, nodes::REPORT_RESULT);
            return Ok(state);
        }

        // Explicit suggestion requests go to the suggestion provider.
        if action == Action::GetSuggestions {
            Self::route(&mut state, nodes::SUGGEST_ACTIONS);
            return Ok(state);
        }

        // 7. Selection requirements: the UI renders pickers for these.
        if action.needs_vehicle_selection() && state.param_i64("vehicle_id").is_none() {
            state.set(keys::SELECTION_KIND, "vehicle");
            Self::route(&mut state, nodes::OFFER_SELECTION);
            return Ok(state);
        }
        if action.needs_driver_selection() && state.param_i64("driver_id").is_none() {
            state.set(keys::SELECTION_KIND, "driver");
            Self::route(&mut state, nodes::OFFER_SELECTION);
            return Ok(state);
        }

        // 8. Safe actions execute immediately. Driver assignment is the one
        //    safe mutation that still visits the analyser: replacing a
        //    driver on an in-flight trip warrants confirmation.
        if action.is_safe() && action != Action::AssignDriver {
            Self::route(&mut state, nodes::EXECUTE_ACTION);
            return Ok(state);
        }

        // 9. Everything else is risky and gets its consequences analysed.
        Self::route(&mut state, nodes::ANALYSE_CONSEQUENCES);
        Ok(state)
    }
}
