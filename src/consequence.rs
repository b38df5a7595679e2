//! Consequence analysis for risky actions: what would this mutation touch,
//! and does it need the user's explicit confirmation?

use crate::actions::Action;
use crate::config::AgentConfig;
use crate::db::{LiveStatus, ToolLayer};
use crate::error::Result;
use crate::graph::{nodes, GraphNode};
use crate::normalize::finite_number;
use crate::state::{keys, State};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

/// The consequence analyser node.
pub struct ConsequenceAnalyserNode {
    tools: Arc<ToolLayer>,
    config: AgentConfig,
}

impl ConsequenceAnalyserNode {
    pub fn new(tools: Arc<ToolLayer>, config: AgentConfig) -> Self {
        Self { tools, config }
    }
}

#[async_trait]
impl GraphNode for ConsequenceAnalyserNode {
    fn name(&self) -> &'static str {
        nodes::ANALYSE_CONSEQUENCES
    }

    async fn run(&self, mut state: State) -> Result<State> {
        let action = state
            .get_str(keys::ACTION)
            .and_then(Action::from_canonical)
            .unwrap_or(Action::Unknown);

        // Deletes of static entities have no trip to inspect; they are in
        // the always-confirm set and gate on that alone.
        let trip_id = state.get_i64(keys::TRIP_ID);
        let status = match trip_id {
            Some(trip_id) => Some(self.tools.get_trip_status(trip_id)?),
            None => None,
        };

        let booking_count = status.as_ref().map(|s| s.booking_count).unwrap_or(0);
        let has_deployment = status
            .as_ref()
            .map(|s| s.deployment.as_ref().is_some_and(|d| d.vehicle_id.is_some()))
            .unwrap_or(false);
        let live_status = status.as_ref().map(|s| s.trip.live_status);
        // Capacity of the deployed vehicle, or the configured default: a
        // single lookup, used only for the percentage.
        let capacity = status
            .as_ref()
            .and_then(|s| s.vehicle.as_ref())
            .map(|v| v.capacity)
            .unwrap_or(self.config.default_capacity);
        let booking_percentage = if capacity > 0 {
            booking_count as f64 / capacity as f64
        } else {
            0.0
        };

        let mut warnings: Vec<String> = Vec::new();
        let mut needs_confirmation = false;

        // Driver-only assignment has no passenger impact of its own; for it,
        // only the in-flight rule below applies.
        if booking_count > 0 && action != Action::AssignDriver {
            needs_confirmation = true;
            warnings.push(format!(
                "This trip has {} confirmed booking(s) that would be affected.",
                booking_count
            ));
        }
        if live_status == Some(LiveStatus::InProgress) {
            needs_confirmation = true;
            warnings.push("This trip is currently in progress.".to_string());
        }
        if action == Action::AssignVehicle && has_deployment {
            needs_confirmation = true;
            warnings.push("A vehicle is already assigned and would be replaced.".to_string());
        }
        if action.always_confirm() {
            needs_confirmation = true;
            warnings.push(format!("'{}' cannot be undone.", action));
        }

        state.set(
            keys::CONSEQUENCES,
            json!({
                "booking_count": booking_count,
                "booking_percentage": finite_number(booking_percentage),
                "has_deployment": has_deployment,
                "live_status": live_status.map(|s| s.as_str()),
            }),
        );
        state.set(keys::NEEDS_CONFIRMATION, needs_confirmation);
        state.set(
            keys::WARNING_MESSAGES,
            Value::Array(warnings.into_iter().map(Value::String).collect()),
        );
        Ok(state)
    }
}
