//! Target resolution: mapping intent references to verified entity ids.
//!
//! Resolution follows a strict priority order; the first priority that
//! produces a verified id wins and every later one is skipped. A trip id
//! only ever enters the state after a database lookup confirmed it —
//! LLM-suggested ids that match no row fall through silently instead of
//! surfacing as errors.

use crate::actions::Action;
use crate::db::{ToolLayer, Trip, TripCandidate};
use crate::error::{ErrorKind, Result};
use crate::graph::{nodes, GraphNode};
use crate::llm::RegexFallbackParser;
use crate::normalize;
use crate::state::{keys, State};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

/// Outcome values written to `resolve_result`.
pub mod outcome {
    pub const FOUND: &str = "found";
    pub const MULTIPLE: &str = "multiple";
    pub const NONE: &str = "none";
    pub const SKIPPED: &str = "skipped";
}

/// The target resolver node.
pub struct TargetResolverNode {
    tools: Arc<ToolLayer>,
    patterns: RegexFallbackParser,
}

impl TargetResolverNode {
    pub fn new(tools: Arc<ToolLayer>) -> Self {
        Self {
            tools,
            patterns: RegexFallbackParser::new(),
        }
    }

    fn accept(state: &mut State, trip: &Trip) {
        state.set(keys::TRIP_ID, trip.trip_id);
        state.set(keys::TRIP_LABEL, trip.display_name.clone());
        state.set(keys::ROUTE_ID, trip.route_id);
        state.set(keys::RESOLVE_RESULT, outcome::FOUND);
    }

    fn accept_candidates(state: &mut State, candidates: Vec<TripCandidate>) {
        match candidates.len() {
            0 => {}
            1 => {
                let only = &candidates[0];
                state.set(keys::TRIP_ID, only.trip_id);
                state.set(keys::TRIP_LABEL, only.display_name.clone());
                state.set(keys::RESOLVE_RESULT, outcome::FOUND);
            }
            _ => {
                let matches: Vec<Value> = candidates
                    .iter()
                    .map(|c| {
                        json!({
                            "trip_id": c.trip_id,
                            "label": c.label(),
                        })
                    })
                    .collect();
                state.set(keys::MATCHES, Value::Array(matches));
                state.set(keys::RESOLVE_RESULT, outcome::MULTIPLE);
            }
        }
    }

    /// Verify an id against the database, distinguishing cancelled and past
    /// trips from plain absence.
    fn verify_eligible(&self, state: &mut State, trip_id: i64) -> Result<bool> {
        let Some(trip) = self.tools.get_trip(trip_id)? else {
            return Ok(false);
        };
        if trip.live_status == crate::db::LiveStatus::Cancelled {
            state.set(keys::RESOLVE_RESULT, outcome::NONE);
            state.set_error(
                ErrorKind::TripCancelled,
                format!("Trip '{}' has been cancelled.", trip.display_name),
            );
            return Ok(true);
        }
        if trip.trip_date < Utc::now().date_naive() {
            state.set(keys::RESOLVE_RESULT, outcome::NONE);
            state.set_error(
                ErrorKind::TripPast,
                format!("Trip '{}' is in the past.", trip.display_name),
            );
            return Ok(true);
        }
        Self::accept(state, &trip);
        Ok(true)
    }
}

#[async_trait]
impl GraphNode for TargetResolverNode {
    fn name(&self) -> &'static str {
        nodes::RESOLVE_TARGET
    }

    async fn run(&self, mut state: State) -> Result<State> {
        let action = state
            .get_str(keys::ACTION)
            .and_then(Action::from_canonical)
            .unwrap_or(Action::Unknown);

        if !action.needs_target() {
            state.set(keys::RESOLVE_RESULT, outcome::SKIPPED);
            return Ok(state);
        }

        // 1. Structured command: the authoritative signal from the UI.
        //    A cheap existence check is all the verification it gets.
        if state.get_str(keys::SOURCE) == Some("structured_command") {
            if let Some(trip_id) = state.param_i64("trip_id").or_else(|| state.get_i64(keys::TRIP_ID)) {
                if let Some(trip) = self.tools.get_trip(trip_id)? {
                    debug!(trip_id, "resolved via structured command");
                    Self::accept(&mut state, &trip);
                    return Ok(state);
                }
            }
            state.set(keys::RESOLVE_RESULT, outcome::NONE);
            return Ok(state);
        }

        // 2. OCR path: the image ingest sets selected_entity_id upstream;
        //    verify it and distinguish ineligible trips.
        if state.flag(keys::FROM_IMAGE) {
            if let Some(selected) = state.get_i64(keys::SELECTED_ENTITY_ID) {
                if self.verify_eligible(&mut state, selected)? {
                    return Ok(state);
                }
            }
        }

        // 3. Numeric id from the parser. A hallucinated id (no row) falls
        //    through to lower priorities rather than erroring.
        if let Some(target_id) = state.get_i64(keys::TARGET_ENTITY_ID) {
            if self.verify_eligible(&mut state, target_id)? {
                return Ok(state);
            }
            debug!(target_id, "target id matched no row, falling through");
        }

        // 4. Time slot for the current date.
        if let Some(time_text) = state.get_str(keys::TARGET_TIME).map(str::to_string) {
            if let Some(time) = normalize::parse_time(&time_text) {
                let candidates = self.tools.find_trips_by_time(time, Utc::now().date_naive())?;
                if !candidates.is_empty() {
                    Self::accept_candidates(&mut state, candidates);
                    return Ok(state);
                }
            }
        }

        // 5. Label search.
        if let Some(label) = state.get_str(keys::TARGET_LABEL).map(str::to_string) {
            let candidates = self.tools.identify_trip_from_label(&label)?;
            if !candidates.is_empty() {
                Self::accept_candidates(&mut state, candidates);
                return Ok(state);
            }
        }

        // 6. Obvious patterns in the raw text ("trip 42", "#42").
        if let Some(text) = state.get_str(keys::TEXT).map(str::to_string) {
            if let Some(trip_id) = self.patterns.extract_trip_id(&text) {
                if self.verify_eligible(&mut state, trip_id)? {
                    return Ok(state);
                }
            }
        }

        state.set(keys::RESOLVE_RESULT, outcome::NONE);
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tools::fixtures::{add_trip, seeded};
    use pretty_assertions::assert_eq;

    fn resolver() -> (TargetResolverNode, Arc<ToolLayer>, i64) {
        let (tools, trip_id) = seeded();
        let tools = Arc::new(tools);
        (TargetResolverNode::new(tools.clone()), tools, trip_id)
    }

    fn base_state(action: &str, text: &str) -> State {
        let mut state = State::new();
        state.set(keys::ACTION, action);
        state.set(keys::TEXT, text);
        state
    }

    #[tokio::test]
    async fn test_no_target_action_skips() {
        let (node, _, _) = resolver();
        let state = base_state("list_all_stops", "list all stops");
        let out = node.run(state).await.unwrap();
        assert_eq!(out.get_str(keys::RESOLVE_RESULT), Some(outcome::SKIPPED));
        assert!(!out.contains(keys::TRIP_ID));
    }

    #[tokio::test]
    async fn test_structured_command_wins_over_everything() {
        let (node, _, trip_id) = resolver();
        let mut state = base_state("get_trip_status", "trip 99999");
        state.set(keys::SOURCE, "structured_command");
        state.set(keys::PARSED_PARAMS, serde_json::json!({"trip_id": trip_id.to_string()}));
        // A conflicting numeric id from the parser is ignored entirely.
        state.set(keys::TARGET_ENTITY_ID, 99999);

        let out = node.run(state).await.unwrap();
        assert_eq!(out.get_str(keys::RESOLVE_RESULT), Some(outcome::FOUND));
        assert_eq!(out.get_i64(keys::TRIP_ID), Some(trip_id));
    }

    #[tokio::test]
    async fn test_verified_numeric_id() {
        let (node, _, trip_id) = resolver();
        let mut state = base_state("cancel_trip", "cancel the trip");
        state.set(keys::TARGET_ENTITY_ID, trip_id);

        let out = node.run(state).await.unwrap();
        assert_eq!(out.get_str(keys::RESOLVE_RESULT), Some(outcome::FOUND));
        assert_eq!(out.get_i64(keys::TRIP_ID), Some(trip_id));
        assert_eq!(out.get_str(keys::TRIP_LABEL), Some("Path-3 - 07:30"));
    }

    #[tokio::test]
    async fn test_hallucinated_id_falls_through_to_label() {
        let (node, _, trip_id) = resolver();
        let mut state = base_state("cancel_trip", "cancel Path-3");
        state.set(keys::TARGET_ENTITY_ID, 424242);
        state.set(keys::TARGET_LABEL, "Path-3");

        let out = node.run(state).await.unwrap();
        assert_eq!(out.get_str(keys::RESOLVE_RESULT), Some(outcome::FOUND));
        assert_eq!(out.get_i64(keys::TRIP_ID), Some(trip_id));
    }

    #[tokio::test]
    async fn test_label_multiple_candidates() {
        let (node, tools, _) = resolver();
        add_trip(&tools, "Path-3A - 07:30", 1, "07:30");
        let mut state = base_state("remove_vehicle", "remove vehicle from the morning trip");
        state.set(keys::TARGET_LABEL, "Path-3");

        let out = node.run(state).await.unwrap();
        assert_eq!(out.get_str(keys::RESOLVE_RESULT), Some(outcome::MULTIPLE));
        let matches = out.get_array(keys::MATCHES).unwrap();
        assert_eq!(matches.len(), 2);
        assert!(matches[0]["label"].as_str().unwrap().contains("Path-3"));
        assert!(!out.contains(keys::TRIP_ID));
    }

    #[tokio::test]
    async fn test_raw_text_pattern_last_resort() {
        let (node, _, trip_id) = resolver();
        let state = base_state("get_trip_status", &format!("how is trip {} doing", trip_id));
        let out = node.run(state).await.unwrap();
        assert_eq!(out.get_str(keys::RESOLVE_RESULT), Some(outcome::FOUND));
        assert_eq!(out.get_i64(keys::TRIP_ID), Some(trip_id));
    }

    #[tokio::test]
    async fn test_nothing_resolves() {
        let (node, _, _) = resolver();
        let state = base_state("cancel_trip", "cancel the ghost trip");
        let out = node.run(state).await.unwrap();
        assert_eq!(out.get_str(keys::RESOLVE_RESULT), Some(outcome::NONE));
    }

    #[tokio::test]
    async fn test_ocr_verified_match() {
        let (node, _, trip_id) = resolver();
        let mut state = base_state("get_trip_status", "Path-3 - 07:30");
        state.set(keys::FROM_IMAGE, true);
        state.set(keys::SELECTED_ENTITY_ID, trip_id);

        let out = node.run(state).await.unwrap();
        assert_eq!(out.get_str(keys::RESOLVE_RESULT), Some(outcome::FOUND));
        assert_eq!(out.get_i64(keys::TRIP_ID), Some(trip_id));
    }

    #[tokio::test]
    async fn test_ocr_cancelled_trip_is_distinguished() {
        let (node, tools, trip_id) = resolver();
        tools.cancel_trip(trip_id, 1).unwrap();
        let mut state = base_state("get_trip_status", "Path-3 - 07:30");
        state.set(keys::FROM_IMAGE, true);
        state.set(keys::SELECTED_ENTITY_ID, trip_id);

        let out = node.run(state).await.unwrap();
        assert_eq!(out.get_str(keys::RESOLVE_RESULT), Some(outcome::NONE));
        assert_eq!(out.error_kind(), Some("trip_cancelled"));
    }

    #[tokio::test]
    async fn test_priority_id_beats_label() {
        // Both signals present and resolving to different trips: the id wins.
        let (node, tools, trip_id) = resolver();
        let decoy = add_trip(&tools, "Evening shuttle", 1, "19:00");
        let mut state = base_state("cancel_trip", "cancel");
        state.set(keys::TARGET_ENTITY_ID, decoy);
        state.set(keys::TARGET_LABEL, "Path-3");

        let out = node.run(state).await.unwrap();
        assert_eq!(out.get_i64(keys::TRIP_ID), Some(decoy));
        assert_ne!(out.get_i64(keys::TRIP_ID), Some(trip_id));
    }
}
