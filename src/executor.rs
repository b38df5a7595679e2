//! The action executor: table-driven dispatch from action to handler.
//!
//! The handler table is the source of truth for what the agent can execute;
//! the Action Registry is checked against it in tests so a declared action
//! can never silently lack an implementation. Compound actions (vehicle and
//! driver together) run as one tool transaction, never two executions.

use crate::actions::Action;
use crate::config::AgentConfig;
use crate::db::{CreateStopParams, ToolLayer};
use crate::error::{Error, ErrorKind, Result};
use crate::graph::{nodes, GraphNode};
use crate::normalize;
use crate::report::{status, OutputKind};
use crate::state::{keys, State};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// What a handler produced on success.
pub struct Execution {
    pub message: String,
    pub kind: OutputKind,
    pub data: Option<Value>,
}

impl Execution {
    fn table(message: impl Into<String>, data: Value) -> Self {
        Self {
            message: message.into(),
            kind: OutputKind::Table,
            data: Some(data),
        }
    }

    fn object(message: impl Into<String>, data: Value) -> Self {
        Self {
            message: message.into(),
            kind: OutputKind::Object,
            data: Some(data),
        }
    }

    fn help(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: OutputKind::Help,
            data: None,
        }
    }
}

struct HandlerCtx<'a> {
    tools: &'a ToolLayer,
    config: &'a AgentConfig,
    state: &'a State,
}

impl HandlerCtx<'_> {
    fn user_id(&self) -> i64 {
        self.state.get_i64(keys::USER_ID).unwrap_or(0)
    }

    fn trip_id(&self) -> Result<i64> {
        self.state
            .get_i64(keys::TRIP_ID)
            .ok_or_else(|| Error::domain(ErrorKind::TargetNotFound, ErrorKind::TargetNotFound.user_message()))
    }

    fn required_param(&self, name: &str) -> Result<i64> {
        self.state.param_i64(name).ok_or_else(|| {
            Error::domain(
                ErrorKind::InvalidRequest,
                format!("Missing required parameter '{}'.", name),
            )
        })
    }

    fn required_param_str(&self, name: &str) -> Result<String> {
        self.state
            .param_str(name)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                Error::domain(
                    ErrorKind::InvalidRequest,
                    format!("Missing required parameter '{}'.", name),
                )
            })
    }

    /// Replacement is approved either by an explicit parameter or by a
    /// confirmed pending action.
    fn replace_approved(&self) -> bool {
        self.state.flag(keys::CONFIRMED)
            || self
                .state
                .param_str("replace")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false)
    }
}

type Handler = for<'a> fn(&HandlerCtx<'a>) -> Result<Execution>;

/// The action executor node.
pub struct ActionExecutorNode {
    tools: Arc<ToolLayer>,
    config: AgentConfig,
    handlers: HashMap<Action, Handler>,
}

impl ActionExecutorNode {
    pub fn new(tools: Arc<ToolLayer>, config: AgentConfig) -> Self {
        let mut handlers: HashMap<Action, Handler> = HashMap::new();
        handlers.insert(Action::GetTripStatus, get_trip_status);
        handlers.insert(Action::GetBookings, get_bookings);
        handlers.insert(Action::SearchTrips, search_trips);
        handlers.insert(Action::ListAllTrips, list_all_trips);
        handlers.insert(Action::ListTripsForDate, list_trips_for_date);
        handlers.insert(Action::GetUnassignedTrips, get_unassigned_trips);
        handlers.insert(Action::ListAllStops, list_all_stops);
        handlers.insert(Action::ListAllPaths, list_all_paths);
        handlers.insert(Action::ListAllRoutes, list_all_routes);
        handlers.insert(Action::ListAllVehicles, list_all_vehicles);
        handlers.insert(Action::ListAllDrivers, list_all_drivers);
        handlers.insert(Action::Help, help);
        handlers.insert(Action::AssignVehicle, assign_vehicle);
        handlers.insert(Action::AssignDriver, assign_driver);
        handlers.insert(Action::AssignVehicleAndDriver, assign_vehicle_and_driver);
        handlers.insert(Action::RemoveVehicle, remove_vehicle);
        handlers.insert(Action::RemoveDriver, remove_driver);
        handlers.insert(Action::CancelTrip, cancel_trip);
        handlers.insert(Action::UpdateTripTime, update_trip_time);
        handlers.insert(Action::DuplicateTrip, duplicate_trip);
        handlers.insert(Action::CreateStop, create_stop);
        handlers.insert(Action::CreatePath, create_path);
        handlers.insert(Action::CreateRoute, create_route);
        handlers.insert(Action::AddVehicle, add_vehicle);
        handlers.insert(Action::AddDriver, add_driver);
        handlers.insert(Action::DeleteStop, delete_stop);
        handlers.insert(Action::DeletePath, delete_path);
        handlers.insert(Action::DeleteRoute, delete_route);
        Self {
            tools,
            config,
            handlers,
        }
    }

    /// Actions the executor dispatches directly.
    pub fn handled_actions(&self) -> Vec<Action> {
        self.handlers.keys().copied().collect()
    }

    /// Execute the state's action synchronously against the tool layer.
    /// Used by the graph node and, directly, by the confirmation endpoint.
    pub fn execute(&self, state: &mut State) -> Result<()> {
        let action = state
            .get_str(keys::ACTION)
            .and_then(Action::from_canonical)
            .unwrap_or(Action::Unknown);

        let handler = self.handlers.get(&action).ok_or_else(|| {
            Error::domain(ErrorKind::UnknownAction, ErrorKind::UnknownAction.user_message())
        })?;

        let ctx = HandlerCtx {
            tools: &self.tools,
            config: &self.config,
            state,
        };
        match handler(&ctx) {
            Ok(execution) => {
                info!(action = %action, "action executed");
                state.set(keys::STATUS, status::EXECUTED);
                state.set(
                    keys::EXECUTION_RESULT,
                    json!({"ok": true, "message": &execution.message}),
                );
                state.set(keys::MESSAGE, execution.message);
                state.set(keys::OUTPUT_TYPE, serde_json::to_value(execution.kind)?);
                if let Some(data) = execution.data {
                    state.set(keys::DATA, data);
                }
                Ok(())
            }
            Err(err) => {
                let kind = err.kind();
                let message = err.user_message();
                state.set(keys::STATUS, status::FAILED);
                state.set(keys::EXECUTION_RESULT, json!({"ok": false, "message": &message}));
                state.set_error(kind, message);
                Ok(())
            }
        }
    }
}

#[async_trait]
impl GraphNode for ActionExecutorNode {
    fn name(&self) -> &'static str {
        nodes::EXECUTE_ACTION
    }

    async fn run(&self, mut state: State) -> Result<State> {
        self.execute(&mut state)?;
        Ok(state)
    }
}

// ==================== Handlers ====================

fn get_trip_status(ctx: &HandlerCtx<'_>) -> Result<Execution> {
    let trip_id = ctx.trip_id()?;
    let status = ctx.tools.get_trip_status(trip_id)?;
    let vehicle_text = status
        .vehicle
        .as_ref()
        .map(|v| v.registration_number.clone())
        .unwrap_or_else(|| "no vehicle".to_string());
    let driver_text = status
        .driver
        .as_ref()
        .map(|d| d.name.clone())
        .unwrap_or_else(|| "no driver".to_string());
    let message = format!(
        "'{}' on {} at {} is {} with {} booking(s), {}, {}.",
        status.trip.display_name,
        normalize::date_str(status.trip.trip_date),
        normalize::time_str(status.trip.scheduled_time),
        status.trip.live_status.as_str(),
        status.booking_count,
        vehicle_text,
        driver_text,
    );
    Ok(Execution::object(message, serde_json::to_value(&status)?))
}

fn get_bookings(ctx: &HandlerCtx<'_>) -> Result<Execution> {
    let trip_id = ctx.trip_id()?;
    let bookings = ctx.tools.get_bookings(trip_id)?;
    Ok(Execution::table(
        format!("{} confirmed booking(s).", bookings.len()),
        serde_json::to_value(&bookings)?,
    ))
}

fn search_trips(ctx: &HandlerCtx<'_>) -> Result<Execution> {
    let query = ctx
        .state
        .param_str("query")
        .or_else(|| ctx.state.get_str(keys::TARGET_LABEL))
        .or_else(|| ctx.state.get_str(keys::TEXT))
        .unwrap_or("")
        .to_string();
    let candidates = ctx.tools.identify_trip_from_label(&query)?;
    Ok(Execution::table(
        format!("{} trip(s) match '{}'.", candidates.len(), query.trim()),
        serde_json::to_value(&candidates)?,
    ))
}

fn list_all_trips(ctx: &HandlerCtx<'_>) -> Result<Execution> {
    let trips = ctx.tools.list_all_trips()?;
    Ok(Execution::table(
        format!("{} upcoming trip(s).", trips.len()),
        serde_json::to_value(&trips)?,
    ))
}

fn list_trips_for_date(ctx: &HandlerCtx<'_>) -> Result<Execution> {
    let date = ctx
        .state
        .param_str("date")
        .and_then(normalize::parse_date)
        .ok_or_else(|| Error::domain(ErrorKind::InvalidRequest, "Which date? Use YYYY-MM-DD."))?;
    let trips = ctx.tools.list_trips_for_date(date)?;
    Ok(Execution::table(
        format!("{} trip(s) on {}.", trips.len(), normalize::date_str(date)),
        serde_json::to_value(&trips)?,
    ))
}

fn get_unassigned_trips(ctx: &HandlerCtx<'_>) -> Result<Execution> {
    let trips = ctx.tools.get_unassigned_trips()?;
    Ok(Execution::table(
        format!("{} trip(s) without a vehicle.", trips.len()),
        serde_json::to_value(&trips)?,
    ))
}

fn list_all_stops(ctx: &HandlerCtx<'_>) -> Result<Execution> {
    let stops = ctx.tools.list_all_stops()?;
    Ok(Execution::table(format!("{} stop(s).", stops.len()), serde_json::to_value(&stops)?))
}

fn list_all_paths(ctx: &HandlerCtx<'_>) -> Result<Execution> {
    let paths = ctx.tools.list_all_paths()?;
    Ok(Execution::table(format!("{} path(s).", paths.len()), serde_json::to_value(&paths)?))
}

fn list_all_routes(ctx: &HandlerCtx<'_>) -> Result<Execution> {
    let routes = ctx.tools.list_all_routes()?;
    Ok(Execution::table(format!("{} route(s).", routes.len()), serde_json::to_value(&routes)?))
}

fn list_all_vehicles(ctx: &HandlerCtx<'_>) -> Result<Execution> {
    let vehicles = ctx.tools.list_all_vehicles()?;
    Ok(Execution::table(
        format!("{} vehicle(s).", vehicles.len()),
        serde_json::to_value(&vehicles)?,
    ))
}

fn list_all_drivers(ctx: &HandlerCtx<'_>) -> Result<Execution> {
    let drivers = ctx.tools.list_all_drivers()?;
    Ok(Execution::table(
        format!("{} driver(s).", drivers.len()),
        serde_json::to_value(&drivers)?,
    ))
}

fn help(_ctx: &HandlerCtx<'_>) -> Result<Execution> {
    Ok(Execution::help(
        "I can check trip status ('status of trip 5'), assign or remove vehicles and drivers, \
         cancel or reschedule trips, list stops, paths, routes, vehicles and drivers, and walk \
         you through creating trips, routes, paths and stops step by step.",
    ))
}

fn assign_vehicle(ctx: &HandlerCtx<'_>) -> Result<Execution> {
    let trip_id = ctx.trip_id()?;
    let vehicle_id = ctx.required_param("vehicle_id")?;
    let driver_id = ctx.state.param_i64("driver_id");
    let deployment =
        ctx.tools
            .assign_vehicle(trip_id, vehicle_id, driver_id, ctx.replace_approved(), ctx.user_id())?;
    Ok(Execution::object(
        format!("Vehicle assigned to trip {}.", trip_id),
        serde_json::to_value(&deployment)?,
    ))
}

fn assign_driver(ctx: &HandlerCtx<'_>) -> Result<Execution> {
    let trip_id = ctx.trip_id()?;
    let driver_id = ctx.required_param("driver_id")?;
    let deployment = ctx.tools.assign_driver(trip_id, driver_id, ctx.user_id())?;
    Ok(Execution::object(
        format!("Driver assigned to trip {}.", trip_id),
        serde_json::to_value(&deployment)?,
    ))
}

fn assign_vehicle_and_driver(ctx: &HandlerCtx<'_>) -> Result<Execution> {
    let trip_id = ctx.trip_id()?;
    let vehicle_id = ctx.required_param("vehicle_id")?;
    let driver_id = ctx.required_param("driver_id")?;
    // One tool transaction for the compound binding.
    let deployment = ctx.tools.assign_vehicle(
        trip_id,
        vehicle_id,
        Some(driver_id),
        ctx.replace_approved(),
        ctx.user_id(),
    )?;
    Ok(Execution::object(
        format!("Vehicle and driver assigned to trip {}.", trip_id),
        serde_json::to_value(&deployment)?,
    ))
}

fn remove_vehicle(ctx: &HandlerCtx<'_>) -> Result<Execution> {
    let trip_id = ctx.trip_id()?;
    let deployment = ctx.tools.remove_vehicle(trip_id, ctx.user_id())?;
    Ok(Execution::object(
        format!("Vehicle removed from trip {}.", trip_id),
        serde_json::to_value(&deployment)?,
    ))
}

fn remove_driver(ctx: &HandlerCtx<'_>) -> Result<Execution> {
    let trip_id = ctx.trip_id()?;
    let deployment = ctx.tools.remove_driver(trip_id, ctx.user_id())?;
    Ok(Execution::object(
        format!("Driver removed from trip {}.", trip_id),
        serde_json::to_value(&deployment)?,
    ))
}

fn cancel_trip(ctx: &HandlerCtx<'_>) -> Result<Execution> {
    let trip_id = ctx.trip_id()?;
    let booking_count = ctx.tools.get_trip_status(trip_id)?.booking_count;
    let trip = ctx.tools.cancel_trip(trip_id, ctx.user_id())?;
    Ok(Execution::object(
        format!(
            "Trip '{}' cancelled; {} booking(s) were cancelled with it.",
            trip.display_name, booking_count
        ),
        serde_json::to_value(&trip)?,
    ))
}

fn update_trip_time(ctx: &HandlerCtx<'_>) -> Result<Execution> {
    let trip_id = ctx.trip_id()?;
    let time_text = ctx
        .state
        .param_str("new_time")
        .or_else(|| ctx.state.get_str(keys::TARGET_TIME))
        .ok_or_else(|| Error::domain(ErrorKind::InvalidRequest, "What time should the trip move to?"))?;
    let new_time = normalize::parse_time(time_text)
        .ok_or_else(|| Error::domain(ErrorKind::InvalidRequest, "Times look like HH:MM, e.g. 07:30."))?;
    let trip = ctx.tools.update_trip_time(trip_id, new_time, ctx.user_id())?;
    Ok(Execution::object(
        format!("Trip '{}' moved to {}.", trip.display_name, normalize::time_str(new_time)),
        serde_json::to_value(&trip)?,
    ))
}

fn duplicate_trip(ctx: &HandlerCtx<'_>) -> Result<Execution> {
    let trip_id = ctx.trip_id()?;
    let new_date = match ctx.state.param_str("new_date") {
        Some(text) => normalize::parse_date(text)
            .ok_or_else(|| Error::domain(ErrorKind::InvalidRequest, "Dates look like YYYY-MM-DD."))?,
        None => Utc::now().date_naive() + Duration::days(1),
    };
    let trip = ctx.tools.duplicate_trip(trip_id, new_date, ctx.user_id())?;
    Ok(Execution::object(
        format!("Trip duplicated as '{}' on {}.", trip.display_name, normalize::date_str(new_date)),
        serde_json::to_value(&trip)?,
    ))
}

fn create_stop(ctx: &HandlerCtx<'_>) -> Result<Execution> {
    let name = ctx.required_param_str("name")?;
    let stop = ctx.tools.create_stop(
        CreateStopParams {
            name,
            code: ctx.state.param_str("code").map(str::to_string),
            landmark: ctx.state.param_str("landmark").map(str::to_string),
            zone: ctx.state.param_str("zone").map(str::to_string),
        },
        ctx.user_id(),
    )?;
    Ok(Execution::object(
        format!("Stop '{}' created.", stop.name),
        serde_json::to_value(&stop)?,
    ))
}

fn create_path(ctx: &HandlerCtx<'_>) -> Result<Execution> {
    let name = ctx.required_param_str("name")?;
    // Stops arrive as a comma-separated list of existing stop names.
    let stops_text = ctx.required_param_str("stops")?;
    let mut stop_ids = Vec::new();
    for stop_name in stops_text.split(',') {
        let stop_name = stop_name.trim();
        let stop = ctx.tools.find_stop_by_name(stop_name)?.ok_or_else(|| {
            Error::tool(
                ErrorKind::TargetNotFound,
                "stop",
                format!("Stop '{}' does not exist.", stop_name),
            )
        })?;
        stop_ids.push(stop.stop_id);
    }
    let path = ctx.tools.create_path(&name, &stop_ids, ctx.user_id())?;
    Ok(Execution::object(
        format!("Path '{}' created with {} stop(s).", path.name, stop_ids.len()),
        serde_json::to_value(&path)?,
    ))
}

fn create_route(ctx: &HandlerCtx<'_>) -> Result<Execution> {
    let name = ctx.required_param_str("name")?;
    let direction = ctx.required_param_str("direction")?;
    let shift_time = ctx
        .required_param_str("shift_time")
        .ok()
        .as_deref()
        .and_then(normalize::parse_time)
        .ok_or_else(|| Error::domain(ErrorKind::InvalidRequest, "Shift times look like HH:MM."))?;
    let path_id = match ctx.state.param_i64("path_id") {
        Some(id) => id,
        None => {
            let path_name = ctx.required_param_str("path")?;
            ctx.tools
                .find_path_by_name(&path_name)?
                .map(|p| p.path_id)
                .ok_or_else(|| {
                    Error::tool(
                        ErrorKind::TargetNotFound,
                        "path",
                        format!("Path '{}' does not exist.", path_name),
                    )
                })?
        }
    };
    let route = ctx
        .tools
        .create_route(&name, path_id, &direction, shift_time, ctx.user_id())?;
    Ok(Execution::object(
        format!("Route '{}' created.", route.name),
        serde_json::to_value(&route)?,
    ))
}

fn add_vehicle(ctx: &HandlerCtx<'_>) -> Result<Execution> {
    let registration = ctx
        .state
        .param_str("registration_number")
        .or_else(|| ctx.state.param_str("vehicle_name"))
        .map(str::to_string)
        .ok_or_else(|| Error::domain(ErrorKind::InvalidRequest, "What is the registration number?"))?;
    let vehicle_type = ctx.state.param_str("vehicle_type").unwrap_or("Bus").to_string();
    let capacity = ctx.state.param_i64("capacity").unwrap_or(ctx.config.default_capacity);
    let vehicle = ctx
        .tools
        .add_vehicle(&registration, &vehicle_type, capacity, ctx.user_id())?;
    Ok(Execution::object(
        format!("Vehicle '{}' registered.", vehicle.registration_number),
        serde_json::to_value(&vehicle)?,
    ))
}

fn add_driver(ctx: &HandlerCtx<'_>) -> Result<Execution> {
    let name = ctx
        .state
        .param_str("name")
        .or_else(|| ctx.state.param_str("driver_name"))
        .map(str::to_string)
        .ok_or_else(|| Error::domain(ErrorKind::InvalidRequest, "What is the driver's name?"))?;
    let driver = ctx.tools.add_driver(&name, ctx.user_id())?;
    Ok(Execution::object(
        format!("Driver '{}' registered.", driver.name),
        serde_json::to_value(&driver)?,
    ))
}

fn delete_stop(ctx: &HandlerCtx<'_>) -> Result<Execution> {
    let stop_id = match ctx.state.param_i64("stop_id") {
        Some(id) => id,
        None => {
            let name = ctx.required_param_str("name")?;
            ctx.tools
                .find_stop_by_name(&name)?
                .map(|s| s.stop_id)
                .ok_or_else(|| {
                    Error::tool(ErrorKind::TargetNotFound, "stop", format!("Stop '{}' does not exist.", name))
                })?
        }
    };
    ctx.tools.delete_stop(stop_id, ctx.user_id())?;
    Ok(Execution::object("Stop deleted.".to_string(), json!({"stop_id": stop_id})))
}

fn delete_path(ctx: &HandlerCtx<'_>) -> Result<Execution> {
    let path_id = match ctx.state.param_i64("path_id") {
        Some(id) => id,
        None => {
            let name = ctx.required_param_str("name")?;
            ctx.tools
                .find_path_by_name(&name)?
                .map(|p| p.path_id)
                .ok_or_else(|| {
                    Error::tool(ErrorKind::TargetNotFound, "path", format!("Path '{}' does not exist.", name))
                })?
        }
    };
    ctx.tools.delete_path(path_id, ctx.user_id())?;
    Ok(Execution::object("Path deleted.".to_string(), json!({"path_id": path_id})))
}

fn delete_route(ctx: &HandlerCtx<'_>) -> Result<Execution> {
    let route_id = match ctx.state.param_i64("route_id") {
        Some(id) => id,
        None => {
            let name = ctx.required_param_str("name")?;
            ctx.tools.find_route_by_name(&name)?.ok_or_else(|| {
                Error::tool(ErrorKind::TargetNotFound, "route", format!("Route '{}' does not exist.", name))
            })?
        }
    };
    ctx.tools.delete_route(route_id, ctx.user_id())?;
    Ok(Execution::object("Route deleted.".to_string(), json!({"route_id": route_id})))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tools::fixtures::{add_bookings, seeded};
    use pretty_assertions::assert_eq;

    fn executor() -> (ActionExecutorNode, Arc<ToolLayer>, i64) {
        let (tools, trip_id) = seeded();
        let tools = Arc::new(tools);
        (
            ActionExecutorNode::new(tools.clone(), AgentConfig::default()),
            tools,
            trip_id,
        )
    }

    fn state_for(action: &str) -> State {
        let mut state = State::new();
        state.set(keys::ACTION, action);
        state.set(keys::USER_ID, 1);
        state
    }

    #[test]
    fn test_registry_drift_is_impossible() {
        let (node, _, _) = executor();
        let handled = node.handled_actions();
        for action in Action::all() {
            let is_meta = matches!(
                action,
                Action::Unknown
                    | Action::GetSuggestions
                    | Action::WizardStepInput
                    | Action::CancelWizard
                    | Action::CreateTripWizard
                    | Action::CreateRouteWizard
                    | Action::CreatePathWizard
                    | Action::CreateStopWizard
            );
            assert!(
                handled.contains(action) != is_meta,
                "action '{}' must be either handled or routed elsewhere, not both or neither",
                action
            );
        }
    }

    #[tokio::test]
    async fn test_safe_read_table_output() {
        let (node, _, _) = executor();
        let out = node.run(state_for("list_all_stops")).await.unwrap();
        assert_eq!(out.get_str(keys::STATUS), Some("executed"));
        assert_eq!(out.get_str(keys::OUTPUT_TYPE), Some("table"));
        assert_eq!(out.get(keys::DATA).unwrap().as_array().unwrap().len(), 2);
        let result = out.get(keys::EXECUTION_RESULT).unwrap();
        assert_eq!(result["ok"], true);
    }

    #[tokio::test]
    async fn test_get_trip_status_object_output() {
        let (node, tools, trip_id) = executor();
        add_bookings(&tools, trip_id, 3);
        let mut state = state_for("get_trip_status");
        state.set(keys::TRIP_ID, trip_id);

        let out = node.run(state).await.unwrap();
        assert_eq!(out.get_str(keys::OUTPUT_TYPE), Some("object"));
        assert!(out.get_str(keys::MESSAGE).unwrap().contains("3 booking(s)"));
    }

    #[tokio::test]
    async fn test_compound_assignment_single_transaction() {
        let (node, tools, trip_id) = executor();
        let mut state = state_for("assign_vehicle_and_driver");
        state.set(keys::TRIP_ID, trip_id);
        state.set(keys::PARSED_PARAMS, json!({"vehicle_id": "1", "driver_id": "2"}));

        let out = node.run(state).await.unwrap();
        assert_eq!(out.get_str(keys::STATUS), Some("executed"));

        let deployment = tools.get_deployment(trip_id).unwrap().unwrap();
        assert_eq!(deployment.vehicle_id, Some(1));
        assert_eq!(deployment.driver_id, Some(2));
        // One logical mutation, one audit record.
        let audit = tools.recent_audit(10).unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].action, "assign_vehicle_and_driver");
    }

    #[tokio::test]
    async fn test_failure_sets_error_kind_without_crashing() {
        let (node, _, trip_id) = executor();
        let mut state = state_for("remove_vehicle");
        state.set(keys::TRIP_ID, trip_id);

        let out = node.run(state).await.unwrap();
        assert_eq!(out.get_str(keys::STATUS), Some("failed"));
        assert_eq!(out.error_kind(), Some("no_deployment"));
        let result = out.get(keys::EXECUTION_RESULT).unwrap();
        assert_eq!(result["ok"], false);
    }

    #[tokio::test]
    async fn test_missing_parameter_is_invalid_request() {
        let (node, _, trip_id) = executor();
        let mut state = state_for("assign_vehicle");
        state.set(keys::TRIP_ID, trip_id);

        let out = node.run(state).await.unwrap();
        assert_eq!(out.error_kind(), Some("invalid_request"));
    }

    #[tokio::test]
    async fn test_confirmed_replacement() {
        let (node, tools, trip_id) = executor();
        tools.assign_vehicle(trip_id, 1, None, false, 1).unwrap();

        let mut state = state_for("assign_vehicle");
        state.set(keys::TRIP_ID, trip_id);
        state.set(keys::PARSED_PARAMS, json!({"vehicle_id": "2"}));
        state.set(keys::CONFIRMED, true);

        let out = node.run(state).await.unwrap();
        assert_eq!(out.get_str(keys::STATUS), Some("executed"));
        assert_eq!(tools.get_deployment(trip_id).unwrap().unwrap().vehicle_id, Some(2));
    }

    #[tokio::test]
    async fn test_cancel_trip_reports_booking_count() {
        let (node, tools, trip_id) = executor();
        add_bookings(&tools, trip_id, 5);
        let mut state = state_for("cancel_trip");
        state.set(keys::TRIP_ID, trip_id);

        let out = node.run(state).await.unwrap();
        assert!(out.get_str(keys::MESSAGE).unwrap().contains("5 booking(s)"));
    }

    #[tokio::test]
    async fn test_create_path_by_stop_names() {
        let (node, tools, _) = executor();
        let mut state = state_for("create_path");
        state.set(keys::PARSED_PARAMS, json!({"name": "Lake loop", "stops": "Depot, Tech Park"}));

        let out = node.run(state).await.unwrap();
        assert_eq!(out.get_str(keys::STATUS), Some("executed"));
        assert!(tools.find_path_by_name("Lake loop").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_update_trip_time_from_target_time() {
        let (node, tools, trip_id) = executor();
        let mut state = state_for("update_trip_time");
        state.set(keys::TRIP_ID, trip_id);
        state.set(keys::TARGET_TIME, "9:15");

        let out = node.run(state).await.unwrap();
        assert_eq!(out.get_str(keys::STATUS), Some("executed"));
        let trip = tools.get_trip(trip_id).unwrap().unwrap();
        assert_eq!(normalize::time_str(trip.scheduled_time), "09:15");
    }
}
