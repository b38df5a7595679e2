//! Contextual suggestion and selection providers.
//!
//! The suggestion provider examines a trip's state and emits a small
//! ordered list of next actions; the selection providers list currently
//! available vehicles or drivers. Every button the UI renders from these
//! maps back to a structured command, which round-trips through the intent
//! parser without an LLM call.

use crate::actions::Action;
use crate::db::{LiveStatus, ToolLayer};
use crate::error::{ErrorKind, Result};
use crate::graph::{nodes, GraphNode};
use crate::intent::format_structured_command;
use crate::report::{status, Suggestion};
use crate::state::{keys, State};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

fn trip_command(action: Action, trip_id: i64) -> String {
    format_structured_command(
        action,
        &[("trip_id", trip_id.to_string()), ("context", "selection_ui".to_string())],
    )
}

/// Suggestion provider: contextual next actions for a trip.
pub struct SuggestionProviderNode {
    tools: Arc<ToolLayer>,
}

impl SuggestionProviderNode {
    pub fn new(tools: Arc<ToolLayer>) -> Self {
        Self { tools }
    }
}

#[async_trait]
impl GraphNode for SuggestionProviderNode {
    fn name(&self) -> &'static str {
        nodes::SUGGEST_ACTIONS
    }

    async fn run(&self, mut state: State) -> Result<State> {
        let Some(trip_id) = state.get_i64(keys::TRIP_ID).or_else(|| state.get_i64(keys::SELECTED_ENTITY_ID))
        else {
            state.set_error(ErrorKind::TargetNotFound, "Which trip should I look at?");
            state.set(keys::NEXT_NODE, nodes::REPORT_RESULT);
            return Ok(state);
        };

        let trip_status = self.tools.get_trip_status(trip_id)?;
        let has_vehicle = trip_status.deployment.as_ref().is_some_and(|d| d.vehicle_id.is_some());
        let has_driver = trip_status.deployment.as_ref().is_some_and(|d| d.driver_id.is_some());

        let mut suggestions: Vec<Suggestion> = Vec::new();
        suggestions.push(Suggestion {
            action: Action::GetTripStatus.as_str().into(),
            label: "Show full status".into(),
            command: trip_command(Action::GetTripStatus, trip_id),
            warning: false,
        });
        if !has_vehicle {
            suggestions.push(Suggestion {
                action: Action::AssignVehicle.as_str().into(),
                label: "Assign a vehicle".into(),
                command: trip_command(Action::AssignVehicle, trip_id),
                warning: false,
            });
        } else {
            suggestions.push(Suggestion {
                action: Action::RemoveVehicle.as_str().into(),
                label: "Remove the vehicle".into(),
                command: trip_command(Action::RemoveVehicle, trip_id),
                warning: trip_status.booking_count > 0,
            });
        }
        if !has_driver {
            suggestions.push(Suggestion {
                action: Action::AssignDriver.as_str().into(),
                label: "Assign a driver".into(),
                command: trip_command(Action::AssignDriver, trip_id),
                warning: false,
            });
        }
        if trip_status.booking_count > 0 {
            suggestions.push(Suggestion {
                action: Action::GetBookings.as_str().into(),
                label: format!("View {} booking(s)", trip_status.booking_count),
                command: trip_command(Action::GetBookings, trip_id),
                warning: false,
            });
        }
        if trip_status.trip.live_status == LiveStatus::Scheduled {
            suggestions.push(Suggestion {
                action: Action::UpdateTripTime.as_str().into(),
                label: "Change the time".into(),
                command: trip_command(Action::UpdateTripTime, trip_id),
                warning: false,
            });
            suggestions.push(Suggestion {
                action: Action::CancelTrip.as_str().into(),
                label: "Cancel this trip".into(),
                command: trip_command(Action::CancelTrip, trip_id),
                warning: trip_status.booking_count > 0,
            });
        }

        state.set(keys::TRIP_ID, trip_id);
        state.set(keys::SUGGESTIONS, serde_json::to_value(&suggestions)?);
        state.set(keys::OUTPUT_TYPE, "list");
        state.set(keys::STATUS, status::EXECUTED);
        state.set(
            keys::MESSAGE,
            format!(
                "Found '{}' on {}. Here is what you can do next.",
                trip_status.trip.display_name,
                trip_status.trip.trip_date.format("%Y-%m-%d"),
            ),
        );
        state.set(keys::NEXT_NODE, nodes::REPORT_RESULT);
        Ok(state)
    }
}

/// Selection provider: available vehicles or drivers for the target trip.
pub struct SelectionProviderNode {
    tools: Arc<ToolLayer>,
}

impl SelectionProviderNode {
    pub fn new(tools: Arc<ToolLayer>) -> Self {
        Self { tools }
    }
}

#[async_trait]
impl GraphNode for SelectionProviderNode {
    fn name(&self) -> &'static str {
        nodes::OFFER_SELECTION
    }

    async fn run(&self, mut state: State) -> Result<State> {
        let trip_id = state.get_i64(keys::TRIP_ID).ok_or_else(|| {
            crate::error::Error::domain(ErrorKind::TargetNotFound, ErrorKind::TargetNotFound.user_message())
        })?;
        let action = state
            .get_str(keys::ACTION)
            .and_then(Action::from_canonical)
            .unwrap_or(Action::AssignVehicle);
        let kind = state.get_str(keys::SELECTION_KIND).unwrap_or("vehicle").to_string();

        let options: Vec<Value> = if kind == "driver" {
            self.tools
                .list_available_drivers(trip_id)?
                .into_iter()
                .map(|d| {
                    let command = format_structured_command(
                        action,
                        &[
                            ("trip_id", trip_id.to_string()),
                            ("driver_id", d.driver_id.to_string()),
                            ("driver_name", d.name.clone()),
                            ("context", "selection_ui".to_string()),
                        ],
                    );
                    json!({"id": d.driver_id, "label": d.name, "command": command})
                })
                .collect()
        } else {
            self.tools
                .list_available_vehicles(trip_id)?
                .into_iter()
                .map(|v| {
                    let label = format!("{} ({}, {} seats)", v.registration_number, v.vehicle_type.as_str(), v.capacity);
                    let command = format_structured_command(
                        action,
                        &[
                            ("trip_id", trip_id.to_string()),
                            ("vehicle_id", v.vehicle_id.to_string()),
                            ("vehicle_name", v.registration_number.clone()),
                            ("context", "selection_ui".to_string()),
                        ],
                    );
                    json!({"id": v.vehicle_id, "label": label, "command": command})
                })
                .collect()
        };

        state.set(
            keys::MESSAGE,
            if options.is_empty() {
                format!("No {}s are free in that time window.", kind)
            } else {
                format!("Pick a {} for trip {}.", kind, trip_id)
            },
        );
        state.set(keys::OPTIONS, Value::Array(options));
        state.set(keys::OUTPUT_TYPE, "list");
        state.set(keys::STATUS, status::NEEDS_CLARIFICATION);
        state.set(keys::NEXT_NODE, nodes::REPORT_RESULT);
        Ok(state)
    }
}

/// Offered when an OCR ingest matched no known trip: propose creating one.
pub struct OfferCreationNode;

impl OfferCreationNode {
    pub fn new() -> Self {
        Self
    }
}

impl Default for OfferCreationNode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GraphNode for OfferCreationNode {
    fn name(&self) -> &'static str {
        nodes::OFFER_CREATION
    }

    async fn run(&self, mut state: State) -> Result<State> {
        let suggestions = vec![Suggestion {
            action: Action::CreateTripWizard.as_str().into(),
            label: "Create this trip".into(),
            command: format_structured_command(
                Action::CreateTripWizard,
                &[("context", "selection_ui".to_string())],
            ),
            warning: false,
        }];
        state.set(keys::SUGGESTIONS, serde_json::to_value(&suggestions)?);
        state.set(keys::OUTPUT_TYPE, "list");
        state.set(keys::STATUS, status::NEEDS_CLARIFICATION);
        if state.get_str(keys::MESSAGE).is_none() {
            state.set(
                keys::MESSAGE,
                "I couldn't match that to a known trip. Want to create it?",
            );
        }
        state.set(keys::NEXT_NODE, nodes::REPORT_RESULT);
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tools::fixtures::{add_bookings, seeded};
    use crate::intent::parse_structured_command;
    use pretty_assertions::assert_eq;

    fn tools() -> (Arc<ToolLayer>, i64) {
        let (tools, trip_id) = seeded();
        (Arc::new(tools), trip_id)
    }

    #[tokio::test]
    async fn test_suggestions_for_bare_trip() {
        let (tools, trip_id) = tools();
        let node = SuggestionProviderNode::new(tools);
        let mut state = State::new();
        state.set(keys::TRIP_ID, trip_id);

        let out = node.run(state).await.unwrap();
        let suggestions: Vec<Suggestion> =
            serde_json::from_value(out.get(keys::SUGGESTIONS).unwrap().clone()).unwrap();
        let actions: Vec<&str> = suggestions.iter().map(|s| s.action.as_str()).collect();
        assert!(actions.contains(&"assign_vehicle"));
        assert!(actions.contains(&"assign_driver"));
        assert!(actions.contains(&"cancel_trip"));
        assert!(!actions.contains(&"remove_vehicle"));
        // Nothing is booked, so cancellation carries no warning.
        assert!(suggestions.iter().all(|s| !s.warning));
    }

    #[tokio::test]
    async fn test_cancellation_warns_when_booked() {
        let (tools, trip_id) = tools();
        add_bookings(&tools, trip_id, 4);
        tools.assign_vehicle(trip_id, 1, None, false, 1).unwrap();
        let node = SuggestionProviderNode::new(tools);
        let mut state = State::new();
        state.set(keys::TRIP_ID, trip_id);

        let out = node.run(state).await.unwrap();
        let suggestions: Vec<Suggestion> =
            serde_json::from_value(out.get(keys::SUGGESTIONS).unwrap().clone()).unwrap();
        let cancel = suggestions.iter().find(|s| s.action == "cancel_trip").unwrap();
        assert!(cancel.warning);
        let remove = suggestions.iter().find(|s| s.action == "remove_vehicle").unwrap();
        assert!(remove.warning);
    }

    #[tokio::test]
    async fn test_suggestion_commands_round_trip() {
        let (tools, trip_id) = tools();
        let node = SuggestionProviderNode::new(tools);
        let mut state = State::new();
        state.set(keys::TRIP_ID, trip_id);

        let out = node.run(state).await.unwrap();
        let suggestions: Vec<Suggestion> =
            serde_json::from_value(out.get(keys::SUGGESTIONS).unwrap().clone()).unwrap();
        for suggestion in suggestions {
            let command = parse_structured_command(&suggestion.command).unwrap();
            assert_eq!(command.action.as_str(), suggestion.action);
            assert_eq!(command.params["trip_id"], trip_id.to_string().as_str());
            assert!(command.from_selection_ui);
        }
    }

    #[tokio::test]
    async fn test_vehicle_selection_options() {
        let (tools, trip_id) = tools();
        let node = SelectionProviderNode::new(tools);
        let mut state = State::new();
        state.set(keys::ACTION, "assign_vehicle");
        state.set(keys::TRIP_ID, trip_id);
        state.set(keys::SELECTION_KIND, "vehicle");

        let out = node.run(state).await.unwrap();
        let options = out.get_array(keys::OPTIONS).unwrap();
        assert_eq!(options.len(), 2);
        let command = parse_structured_command(options[0]["command"].as_str().unwrap()).unwrap();
        assert_eq!(command.action, Action::AssignVehicle);
        assert!(command.params.contains_key("vehicle_id"));
    }

    #[tokio::test]
    async fn test_driver_selection_excludes_busy() {
        let (tools, trip_id) = tools();
        let other = crate::db::tools::fixtures::add_trip(&tools, "Path-3 - 07:45", 1, "07:45");
        tools.assign_driver(other, 1, 1).unwrap();

        let node = SelectionProviderNode::new(tools);
        let mut state = State::new();
        state.set(keys::ACTION, "assign_driver");
        state.set(keys::TRIP_ID, trip_id);
        state.set(keys::SELECTION_KIND, "driver");

        let out = node.run(state).await.unwrap();
        let options = out.get_array(keys::OPTIONS).unwrap();
        assert_eq!(options.len(), 1);
        assert_eq!(options[0]["label"], "Ravi");
    }

    #[tokio::test]
    async fn test_offer_creation() {
        let node = OfferCreationNode::new();
        let out = node.run(State::new()).await.unwrap();
        let suggestions: Vec<Suggestion> =
            serde_json::from_value(out.get(keys::SUGGESTIONS).unwrap().clone()).unwrap();
        assert_eq!(suggestions[0].action, "create_trip_wizard");
    }
}
