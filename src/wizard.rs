//! The wizard engine: declarative multi-step guided creation flows.
//!
//! Each wizard kind is a fixed, ordered sequence of steps. A step names the
//! field it populates, asks a question, validates the answer with a typed
//! validator, and may fetch a dynamic option list. State lives in the
//! request state between nodes and in the session store between requests.

use crate::actions::{Action, WizardKind};
use crate::db::{NewTrip, ToolLayer};
use crate::error::{Error, ErrorKind, Result};
use crate::graph::{nodes, GraphNode};
use crate::normalize;
use crate::report::status;
use crate::state::{keys, State};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, info};

const CANCEL_KEYWORDS: &[&str] = &["cancel", "abort", "quit", "exit", "nevermind", "never mind"];
const SKIP_KEYWORDS: &[&str] = &["skip", "none"];

/// Typed validators for wizard answers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepValidator {
    FreeText,
    IsoDate,
    TimeHhMm,
    PositiveInt,
    EnumMember(&'static [&'static str]),
    /// An id picked from the step's dynamically fetched option list.
    SelectionId,
}

/// Where a step's option list comes from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OptionsSource {
    Paths,
    Stops,
    Routes,
    AvailableVehicles,
    AvailableDrivers,
}

/// One step of a wizard.
pub struct WizardStep {
    pub field: &'static str,
    pub question: &'static str,
    pub hint: Option<&'static str>,
    pub validator: StepValidator,
    pub options: Option<OptionsSource>,
    /// Optional steps accept "skip" and store null.
    pub optional: bool,
}

const CREATE_TRIP_STEPS: &[WizardStep] = &[
    WizardStep {
        field: "path_id",
        question: "Which path does this trip run on?",
        hint: Some("Pick a path from the list."),
        validator: StepValidator::SelectionId,
        options: Some(OptionsSource::Paths),
        optional: false,
    },
    WizardStep {
        field: "direction",
        question: "Which direction, up or down?",
        hint: None,
        validator: StepValidator::EnumMember(&["up", "down"]),
        options: None,
        optional: false,
    },
    WizardStep {
        field: "trip_date",
        question: "What date does the trip run?",
        hint: Some("Use YYYY-MM-DD."),
        validator: StepValidator::IsoDate,
        options: None,
        optional: false,
    },
    WizardStep {
        field: "scheduled_time",
        question: "What time does it leave?",
        hint: Some("Use HH:MM, e.g. 07:30."),
        validator: StepValidator::TimeHhMm,
        options: None,
        optional: false,
    },
    WizardStep {
        field: "display_name",
        question: "What should the trip be called?",
        hint: Some("e.g. 'Path-3 - 07:30'."),
        validator: StepValidator::FreeText,
        options: None,
        optional: false,
    },
    WizardStep {
        field: "vehicle_id",
        question: "Which vehicle should run it?",
        hint: Some("Pick one, or say 'skip' to assign later."),
        validator: StepValidator::SelectionId,
        options: Some(OptionsSource::AvailableVehicles),
        optional: true,
    },
    WizardStep {
        field: "driver_id",
        question: "Who drives it?",
        hint: Some("Pick one, or say 'skip' to assign later."),
        validator: StepValidator::SelectionId,
        options: Some(OptionsSource::AvailableDrivers),
        optional: true,
    },
];

const CREATE_ROUTE_STEPS: &[WizardStep] = &[
    WizardStep {
        field: "path_id",
        question: "Which path does the route follow?",
        hint: None,
        validator: StepValidator::SelectionId,
        options: Some(OptionsSource::Paths),
        optional: false,
    },
    WizardStep {
        field: "direction",
        question: "Which direction, up or down?",
        hint: None,
        validator: StepValidator::EnumMember(&["up", "down"]),
        options: None,
        optional: false,
    },
    WizardStep {
        field: "shift_time",
        question: "What is the shift time?",
        hint: Some("Use HH:MM."),
        validator: StepValidator::TimeHhMm,
        options: None,
        optional: false,
    },
    WizardStep {
        field: "name",
        question: "What should the route be called?",
        hint: None,
        validator: StepValidator::FreeText,
        options: None,
        optional: false,
    },
];

const CREATE_PATH_STEPS: &[WizardStep] = &[
    WizardStep {
        field: "name",
        question: "What should the path be called?",
        hint: None,
        validator: StepValidator::FreeText,
        options: None,
        optional: false,
    },
    WizardStep {
        field: "start_stop_id",
        question: "Where does it start?",
        hint: Some("Pick a stop."),
        validator: StepValidator::SelectionId,
        options: Some(OptionsSource::Stops),
        optional: false,
    },
    WizardStep {
        field: "end_stop_id",
        question: "Where does it end?",
        hint: Some("Pick a stop."),
        validator: StepValidator::SelectionId,
        options: Some(OptionsSource::Stops),
        optional: false,
    },
];

const CREATE_STOP_STEPS: &[WizardStep] = &[
    WizardStep {
        field: "name",
        question: "What is the stop called?",
        hint: None,
        validator: StepValidator::FreeText,
        options: None,
        optional: false,
    },
    WizardStep {
        field: "code",
        question: "Does it have a short code?",
        hint: Some("Say 'skip' if not."),
        validator: StepValidator::FreeText,
        options: None,
        optional: true,
    },
    WizardStep {
        field: "landmark",
        question: "Any landmark nearby?",
        hint: Some("Say 'skip' if not."),
        validator: StepValidator::FreeText,
        options: None,
        optional: true,
    },
    WizardStep {
        field: "zone",
        question: "Which zone is it in?",
        hint: Some("Say 'skip' if unknown."),
        validator: StepValidator::FreeText,
        options: None,
        optional: true,
    },
];

/// The fixed step sequence for a wizard kind.
pub fn steps_for(kind: WizardKind) -> &'static [WizardStep] {
    match kind {
        WizardKind::CreateTrip => CREATE_TRIP_STEPS,
        WizardKind::CreateRoute => CREATE_ROUTE_STEPS,
        WizardKind::CreatePath => CREATE_PATH_STEPS,
        WizardKind::CreateStop => CREATE_STOP_STEPS,
    }
}

/// The wizard engine node.
pub struct WizardEngineNode {
    tools: Arc<ToolLayer>,
}

impl WizardEngineNode {
    pub fn new(tools: Arc<ToolLayer>) -> Self {
        Self { tools }
    }

    fn options_for(&self, source: OptionsSource, data: &Map<String, Value>) -> Result<Vec<Value>> {
        let options = match source {
            OptionsSource::Paths => self
                .tools
                .list_all_paths()?
                .into_iter()
                .map(|p| json!({"id": p.path_id, "label": p.name}))
                .collect(),
            OptionsSource::Stops => self
                .tools
                .list_all_stops()?
                .into_iter()
                .map(|s| json!({"id": s.stop_id, "label": s.name}))
                .collect(),
            OptionsSource::Routes => self
                .tools
                .list_all_routes()?
                .into_iter()
                .map(|r| json!({"id": r.route_id, "label": format!("{} ({})", r.name, r.direction.as_str())}))
                .collect(),
            OptionsSource::AvailableVehicles => {
                let (date, time) = Self::slot_from_data(data);
                match (date, time) {
                    (Some(date), Some(time)) => self
                        .tools
                        .list_available_vehicles_at(date, time)?
                        .into_iter()
                        .map(|v| {
                            json!({
                                "id": v.vehicle_id,
                                "label": format!("{} ({} seats)", v.registration_number, v.capacity),
                            })
                        })
                        .collect(),
                    _ => self
                        .tools
                        .list_all_vehicles()?
                        .into_iter()
                        .map(|v| json!({"id": v.vehicle_id, "label": v.registration_number}))
                        .collect(),
                }
            }
            OptionsSource::AvailableDrivers => {
                let (date, time) = Self::slot_from_data(data);
                match (date, time) {
                    (Some(date), Some(time)) => self
                        .tools
                        .list_available_drivers_at(date, time)?
                        .into_iter()
                        .map(|d| json!({"id": d.driver_id, "label": d.name}))
                        .collect(),
                    _ => self
                        .tools
                        .list_all_drivers()?
                        .into_iter()
                        .map(|d| json!({"id": d.driver_id, "label": d.name}))
                        .collect(),
                }
            }
        };
        Ok(options)
    }

    fn slot_from_data(data: &Map<String, Value>) -> (Option<chrono::NaiveDate>, Option<chrono::NaiveTime>) {
        let date = data
            .get("trip_date")
            .and_then(Value::as_str)
            .and_then(normalize::parse_date);
        let time = data
            .get("scheduled_time")
            .and_then(Value::as_str)
            .and_then(normalize::parse_time);
        (date, time)
    }

    /// Validate an answer against a step. Ok(value) stores into wizard_data;
    /// Err(message) re-asks the same step.
    fn validate(
        &self,
        step: &WizardStep,
        input: &str,
        data: &Map<String, Value>,
    ) -> std::result::Result<Value, String> {
        let input = input.trim();
        if step.optional && SKIP_KEYWORDS.contains(&input.to_ascii_lowercase().as_str()) {
            return Ok(Value::Null);
        }
        if input.is_empty() {
            return Err("I need an answer for this step.".to_string());
        }
        match step.validator {
            StepValidator::FreeText => Ok(Value::String(input.to_string())),
            StepValidator::IsoDate => {
                let date = normalize::parse_date(input)
                    .ok_or_else(|| "That doesn't look like a date. Use YYYY-MM-DD.".to_string())?;
                if date < Utc::now().date_naive() {
                    return Err("That date is in the past.".to_string());
                }
                Ok(Value::String(normalize::date_str(date)))
            }
            StepValidator::TimeHhMm => {
                let time = normalize::parse_time(input)
                    .ok_or_else(|| "That doesn't look like a time. Use HH:MM.".to_string())?;
                Ok(Value::String(normalize::time_str(time)))
            }
            StepValidator::PositiveInt => {
                let n: i64 = input
                    .parse()
                    .map_err(|_| "I need a whole number here.".to_string())?;
                if n <= 0 {
                    return Err("I need a positive number here.".to_string());
                }
                Ok(json!(n))
            }
            StepValidator::EnumMember(allowed) => normalize::canonical_enum(input, allowed)
                .map(|canonical| Value::String(canonical.to_string()))
                .ok_or_else(|| format!("Please pick one of: {}.", allowed.join(", "))),
            StepValidator::SelectionId => {
                let options = match step.options {
                    Some(source) => self
                        .options_for(source, data)
                        .map_err(|_| "I couldn't load the options. Try again.".to_string())?,
                    None => Vec::new(),
                };
                // Accept an id or an exact label.
                let by_id = input
                    .parse::<i64>()
                    .ok()
                    .filter(|id| options.iter().any(|o| o.get("id").and_then(Value::as_i64) == Some(*id)));
                let resolved = by_id.or_else(|| {
                    options
                        .iter()
                        .find(|o| {
                            o.get("label")
                                .and_then(Value::as_str)
                                .is_some_and(|l| l.eq_ignore_ascii_case(input))
                        })
                        .and_then(|o| o.get("id").and_then(Value::as_i64))
                });
                resolved
                    .map(|id| json!(id))
                    .ok_or_else(|| "That's not one of the listed options.".to_string())
            }
        }
    }

    fn emit_step(&self, state: &mut State, kind: WizardKind, step_index: usize, data: &Map<String, Value>) -> Result<()> {
        let steps = steps_for(kind);
        let step = &steps[step_index - 1];
        state.set(keys::WIZARD_ACTIVE, true);
        state.set(keys::WIZARD_TYPE, kind.as_str());
        state.set(keys::WIZARD_STEP, step_index as i64);
        state.set(keys::WIZARD_STEPS_TOTAL, steps.len() as i64);
        state.set(keys::WIZARD_DATA, Value::Object(data.clone()));
        state.set(keys::WIZARD_QUESTION, step.question);
        if let Some(hint) = step.hint {
            state.set(keys::WIZARD_HINT, hint);
        } else {
            state.remove(keys::WIZARD_HINT);
        }
        if let Some(source) = step.options {
            state.set(keys::OPTIONS, Value::Array(self.options_for(source, data)?));
        } else {
            state.remove(keys::OPTIONS);
        }
        state.set(
            keys::MESSAGE,
            format!("Step {}/{}: {}", step_index, steps.len(), step.question),
        );
        state.set(keys::STATUS, status::AWAITING_INPUT);
        Ok(())
    }

    fn clear_wizard(state: &mut State) {
        state.set(keys::WIZARD_ACTIVE, false);
        state.remove(keys::WIZARD_QUESTION);
        state.remove(keys::WIZARD_HINT);
        state.remove(keys::OPTIONS);
    }

    /// Run the creation tool for a completed wizard.
    fn complete(&self, state: &mut State, kind: WizardKind, data: &Map<String, Value>) -> Result<String> {
        let user_id = state.get_i64(keys::USER_ID).unwrap_or(0);
        let field_i64 = |name: &str| data.get(name).and_then(Value::as_i64);
        let field_str = |name: &str| data.get(name).and_then(Value::as_str);
        let missing = |name: &str| Error::domain(ErrorKind::InvalidRequest, format!("Missing wizard field '{}'.", name));

        match kind {
            WizardKind::CreateTrip => {
                let path_id = field_i64("path_id").ok_or_else(|| missing("path_id"))?;
                let direction = field_str("direction").ok_or_else(|| missing("direction"))?.to_string();
                let trip_date = field_str("trip_date")
                    .and_then(normalize::parse_date)
                    .ok_or_else(|| missing("trip_date"))?;
                let scheduled_time = field_str("scheduled_time")
                    .and_then(normalize::parse_time)
                    .ok_or_else(|| missing("scheduled_time"))?;
                let display_name = field_str("display_name").ok_or_else(|| missing("display_name"))?.to_string();

                // Reuse the route for this path and direction, or create one
                // shifted at the trip's departure time.
                let parsed_direction = crate::db::Direction::parse(&direction)
                    .ok_or_else(|| Error::domain(ErrorKind::InvalidRequest, "Direction must be 'up' or 'down'."))?;
                let route_id = match self.tools.find_route_for_path(path_id, parsed_direction)? {
                    Some(route_id) => route_id,
                    None => {
                        let path = self
                            .tools
                            .list_all_paths()?
                            .into_iter()
                            .find(|p| p.path_id == path_id)
                            .ok_or_else(|| Error::tool(ErrorKind::TargetNotFound, "path", "That path no longer exists."))?;
                        let route_name = format!("{} {}", path.name, parsed_direction.as_str());
                        self.tools
                            .create_route(&route_name, path_id, parsed_direction.as_str(), scheduled_time, user_id)?
                            .route_id
                    }
                };

                let trip = self.tools.create_trip(
                    NewTrip {
                        display_name,
                        trip_date,
                        scheduled_time,
                        route_id,
                        vehicle_id: field_i64("vehicle_id"),
                        driver_id: field_i64("driver_id"),
                    },
                    user_id,
                )?;
                state.set(keys::TRIP_ID, trip.trip_id);
                Ok(format!(
                    "Trip '{}' created for {} at {}.",
                    trip.display_name,
                    normalize::date_str(trip.trip_date),
                    normalize::time_str(trip.scheduled_time),
                ))
            }
            WizardKind::CreateRoute => {
                let path_id = field_i64("path_id").ok_or_else(|| missing("path_id"))?;
                let direction = field_str("direction").ok_or_else(|| missing("direction"))?.to_string();
                let shift_time = field_str("shift_time")
                    .and_then(normalize::parse_time)
                    .ok_or_else(|| missing("shift_time"))?;
                let name = field_str("name").ok_or_else(|| missing("name"))?.to_string();
                let route = self.tools.create_route(&name, path_id, &direction, shift_time, user_id)?;
                Ok(format!("Route '{}' created.", route.name))
            }
            WizardKind::CreatePath => {
                let name = field_str("name").ok_or_else(|| missing("name"))?.to_string();
                let start = field_i64("start_stop_id").ok_or_else(|| missing("start_stop_id"))?;
                let end = field_i64("end_stop_id").ok_or_else(|| missing("end_stop_id"))?;
                let path = self.tools.create_path(&name, &[start, end], user_id)?;
                Ok(format!("Path '{}' created.", path.name))
            }
            WizardKind::CreateStop => {
                let name = field_str("name").ok_or_else(|| missing("name"))?.to_string();
                let stop = self.tools.create_stop(
                    crate::db::CreateStopParams {
                        name,
                        code: field_str("code").map(str::to_string),
                        landmark: field_str("landmark").map(str::to_string),
                        zone: field_str("zone").map(str::to_string),
                    },
                    user_id,
                )?;
                Ok(format!("Stop '{}' created.", stop.name))
            }
        }
    }
}

#[async_trait]
impl GraphNode for WizardEngineNode {
    fn name(&self) -> &'static str {
        nodes::WIZARD
    }

    async fn run(&self, mut state: State) -> Result<State> {
        let action = state
            .get_str(keys::ACTION)
            .and_then(Action::from_canonical)
            .unwrap_or(Action::Unknown);

        // Entry: start a fresh wizard at step 1.
        if let Some(kind) = action.wizard_entry() {
            info!(wizard = kind.as_str(), "wizard started");
            let data = Map::new();
            self.emit_step(&mut state, kind, 1, &data)?;
            state.set(keys::NEXT_NODE, nodes::REPORT_RESULT);
            return Ok(state);
        }

        // Continuation: the state was hydrated from the session store.
        let kind = state
            .get_str(keys::WIZARD_TYPE)
            .and_then(WizardKind::parse)
            .ok_or_else(|| Error::internal("wizard continuation without wizard_type"))?;
        let steps = steps_for(kind);
        let step_index = state.get_i64(keys::WIZARD_STEP).unwrap_or(1).clamp(1, steps.len() as i64) as usize;
        let data = state
            .get_object(keys::WIZARD_DATA)
            .cloned()
            .unwrap_or_default();
        let input = state.get_str(keys::TEXT).unwrap_or("").trim().to_string();

        // Cancellation clears state with zero side effects.
        if CANCEL_KEYWORDS.contains(&input.to_ascii_lowercase().as_str()) {
            info!(wizard = kind.as_str(), step = step_index, "wizard cancelled");
            Self::clear_wizard(&mut state);
            state.set(keys::WIZARD_CANCELLED, true);
            state.set(keys::STATUS, status::CANCELLED);
            state.set(keys::MESSAGE, "Okay, I've cancelled that. Nothing was created.");
            state.set(keys::NEXT_NODE, nodes::REPORT_RESULT);
            return Ok(state);
        }

        let step = &steps[step_index - 1];
        match self.validate(step, &input, &data) {
            Err(problem) => {
                debug!(wizard = kind.as_str(), step = step_index, %problem, "invalid step answer");
                // Same step again, with the validation problem up front.
                self.emit_step(&mut state, kind, step_index, &data)?;
                state.set(keys::MESSAGE, format!("{} {}", problem, step.question));
            }
            Ok(value) => {
                let mut data = data;
                data.insert(step.field.to_string(), value);
                if step_index == steps.len() {
                    // Final step answered: execute the creation tool.
                    let message = self.complete(&mut state, kind, &data)?;
                    Self::clear_wizard(&mut state);
                    state.set(keys::WIZARD_COMPLETED, true);
                    state.set(keys::WIZARD_DATA, Value::Object(data));
                    state.set(keys::STATUS, status::EXECUTED);
                    state.set(keys::EXECUTION_RESULT, json!({"ok": true, "message": &message}));
                    state.set(keys::MESSAGE, message);
                    info!(wizard = kind.as_str(), "wizard completed");
                } else {
                    self.emit_step(&mut state, kind, step_index + 1, &data)?;
                }
            }
        }
        state.set(keys::NEXT_NODE, nodes::REPORT_RESULT);
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tools::fixtures::seeded;
    use pretty_assertions::assert_eq;

    fn engine() -> (WizardEngineNode, Arc<ToolLayer>) {
        let (tools, _) = seeded();
        let tools = Arc::new(tools);
        (WizardEngineNode::new(tools.clone()), tools)
    }

    fn entry_state(action: &str) -> State {
        let mut state = State::new();
        state.set(keys::ACTION, action);
        state.set(keys::USER_ID, 1);
        state
    }

    fn answer(mut state: State, text: &str) -> State {
        state.set(keys::ACTION, "wizard_step_input");
        state.set(keys::TEXT, text);
        state
    }

    #[test]
    fn test_typed_validators() {
        let (engine, _) = engine();
        let data = Map::new();
        let step = |validator, optional| WizardStep {
            field: "f",
            question: "?",
            hint: None,
            validator,
            options: None,
            optional,
        };

        let count = step(StepValidator::PositiveInt, false);
        assert_eq!(engine.validate(&count, "32", &data).unwrap(), json!(32));
        assert!(engine.validate(&count, "0", &data).is_err());
        assert!(engine.validate(&count, "many", &data).is_err());

        let time = step(StepValidator::TimeHhMm, false);
        assert_eq!(engine.validate(&time, "7:05", &data).unwrap(), json!("07:05"));
        assert!(engine.validate(&time, "noonish", &data).is_err());

        let direction = step(StepValidator::EnumMember(&["up", "down"]), false);
        assert_eq!(engine.validate(&direction, "UP", &data).unwrap(), json!("up"));
        assert!(engine.validate(&direction, "sideways", &data).is_err());

        let optional_text = step(StepValidator::FreeText, true);
        assert_eq!(engine.validate(&optional_text, "skip", &data).unwrap(), Value::Null);
        assert!(engine.validate(&step(StepValidator::FreeText, false), "  ", &data).is_err());
    }

    #[test]
    fn test_step_counts() {
        assert_eq!(steps_for(WizardKind::CreateTrip).len(), 7);
        assert_eq!(steps_for(WizardKind::CreateRoute).len(), 4);
        assert_eq!(steps_for(WizardKind::CreatePath).len(), 3);
        assert_eq!(steps_for(WizardKind::CreateStop).len(), 4);
    }

    #[tokio::test]
    async fn test_entry_emits_first_question_with_options() {
        let (engine, _) = engine();
        let out = engine.run(entry_state("create_trip_wizard")).await.unwrap();
        assert!(out.flag(keys::WIZARD_ACTIVE));
        assert_eq!(out.get_i64(keys::WIZARD_STEP), Some(1));
        assert_eq!(out.get_i64(keys::WIZARD_STEPS_TOTAL), Some(7));
        assert_eq!(out.get_str(keys::WIZARD_QUESTION), Some("Which path does this trip run on?"));
        assert_eq!(out.get_array(keys::OPTIONS).unwrap().len(), 1);
        assert_eq!(out.get_str(keys::STATUS), Some("awaiting_input"));
    }

    #[tokio::test]
    async fn test_invalid_answer_repeats_step() {
        let (engine, _) = engine();
        let started = engine.run(entry_state("create_trip_wizard")).await.unwrap();
        let out = engine.run(answer(started, "999")).await.unwrap();

        assert_eq!(out.get_i64(keys::WIZARD_STEP), Some(1));
        assert!(out.get_str(keys::MESSAGE).unwrap().contains("not one of the listed options"));
        assert!(out.flag(keys::WIZARD_ACTIVE));
    }

    #[tokio::test]
    async fn test_valid_answer_advances_and_stores() {
        let (engine, _) = engine();
        let started = engine.run(entry_state("create_trip_wizard")).await.unwrap();
        let out = engine.run(answer(started, "1")).await.unwrap();

        assert_eq!(out.get_i64(keys::WIZARD_STEP), Some(2));
        let data = out.get_object(keys::WIZARD_DATA).unwrap();
        assert_eq!(data["path_id"], 1);
    }

    #[tokio::test]
    async fn test_cancellation_clears_state_without_side_effects() {
        let (engine, tools) = engine();
        let started = engine.run(entry_state("create_stop_wizard")).await.unwrap();
        let out = engine.run(answer(started, "cancel")).await.unwrap();

        assert!(!out.flag(keys::WIZARD_ACTIVE));
        assert!(out.flag(keys::WIZARD_CANCELLED));
        assert_eq!(out.get_str(keys::STATUS), Some("cancelled"));
        // No stop was created and no audit row written.
        assert_eq!(tools.list_all_stops().unwrap().len(), 2);
        assert!(tools.recent_audit(10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_full_stop_wizard() {
        let (engine, tools) = engine();
        let mut state = engine.run(entry_state("create_stop_wizard")).await.unwrap();
        for input in ["Central Square", "CSQ", "skip", "North"] {
            state = engine.run(answer(state, input)).await.unwrap();
        }

        assert!(state.flag(keys::WIZARD_COMPLETED));
        assert!(!state.flag(keys::WIZARD_ACTIVE));
        assert_eq!(state.get_str(keys::STATUS), Some("executed"));

        let stop = tools.find_stop_by_name("Central Square").unwrap().unwrap();
        assert_eq!(stop.code.as_deref(), Some("CSQ"));
        assert_eq!(stop.landmark, None);
        assert_eq!(stop.zone.as_deref(), Some("North"));
        assert_eq!(tools.recent_audit(10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_full_trip_wizard_with_deployment() {
        let (engine, tools) = engine();
        let date = normalize::date_str(Utc::now().date_naive() + chrono::Duration::days(2));
        let mut state = engine.run(entry_state("create_trip_wizard")).await.unwrap();
        for input in ["1", "down", date.as_str(), "18:30", "Path-3 evening", "1", "2"] {
            state = engine.run(answer(state, input)).await.unwrap();
        }

        assert!(state.flag(keys::WIZARD_COMPLETED));
        let trip_id = state.get_i64(keys::TRIP_ID).unwrap();
        let trip = tools.get_trip(trip_id).unwrap().unwrap();
        assert_eq!(trip.display_name, "Path-3 evening");
        let deployment = tools.get_deployment(trip_id).unwrap().unwrap();
        assert_eq!(deployment.vehicle_id, Some(1));
        assert_eq!(deployment.driver_id, Some(2));

        // A new 'down' route was created for the path, then the trip.
        let routes = tools.list_all_routes().unwrap();
        assert_eq!(routes.len(), 2);
    }

    #[tokio::test]
    async fn test_trip_wizard_skips_deployment() {
        let (engine, tools) = engine();
        let date = normalize::date_str(Utc::now().date_naive() + chrono::Duration::days(2));
        let mut state = engine.run(entry_state("create_trip_wizard")).await.unwrap();
        for input in ["1", "up", date.as_str(), "10:00", "Midday run", "skip", "skip"] {
            state = engine.run(answer(state, input)).await.unwrap();
        }

        assert!(state.flag(keys::WIZARD_COMPLETED));
        let trip_id = state.get_i64(keys::TRIP_ID).unwrap();
        assert!(tools.get_deployment(trip_id).unwrap().is_none());
        // The existing 'up' route was reused.
        assert_eq!(tools.list_all_routes().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_past_date_rejected() {
        let (engine, _) = engine();
        let mut state = engine.run(entry_state("create_trip_wizard")).await.unwrap();
        state = engine.run(answer(state, "1")).await.unwrap();
        state = engine.run(answer(state, "up")).await.unwrap();
        let out = engine.run(answer(state, "2020-01-01")).await.unwrap();

        assert_eq!(out.get_i64(keys::WIZARD_STEP), Some(3));
        assert!(out.get_str(keys::MESSAGE).unwrap().contains("past"));
    }

    #[tokio::test]
    async fn test_selection_by_label() {
        let (engine, _) = engine();
        let started = engine.run(entry_state("create_path_wizard")).await.unwrap();
        let named = engine.run(answer(started, "Lake loop")).await.unwrap();
        let out = engine.run(answer(named, "Depot")).await.unwrap();

        let data = out.get_object(keys::WIZARD_DATA).unwrap();
        assert_eq!(data["start_stop_id"], 1);
    }
}
