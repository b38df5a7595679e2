//! The Action Registry: the closed set of operations the agent can perform,
//! plus the classification tables the router and policy layer consult.
//!
//! The synonym/fuzzy normaliser lives here so that the LLM parser and the
//! regex fallback accept exactly the same set of action names.

use serde::{Deserialize, Serialize};

/// A named operation the agent can perform. Closed set; unknown inputs
/// normalise to [`Action::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    // Reads and listings
    GetTripStatus,
    GetBookings,
    SearchTrips,
    ListAllTrips,
    ListTripsForDate,
    GetUnassignedTrips,
    ListAllStops,
    ListAllPaths,
    ListAllRoutes,
    ListAllVehicles,
    ListAllDrivers,
    GetSuggestions,
    Help,

    // Trip mutations
    AssignVehicle,
    AssignDriver,
    AssignVehicleAndDriver,
    RemoveVehicle,
    RemoveDriver,
    CancelTrip,
    UpdateTripTime,
    DuplicateTrip,

    // Static-entity creation and deletion
    CreateStop,
    CreatePath,
    CreateRoute,
    AddVehicle,
    AddDriver,
    DeleteStop,
    DeletePath,
    DeleteRoute,

    // Wizard entries and control
    CreateTripWizard,
    CreateRouteWizard,
    CreatePathWizard,
    CreateStopWizard,
    WizardStepInput,
    CancelWizard,

    Unknown,
}

/// Multi-step guided flows the wizard engine knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WizardKind {
    CreateTrip,
    CreateRoute,
    CreatePath,
    CreateStop,
}

impl WizardKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateTrip => "create_trip",
            Self::CreateRoute => "create_route",
            Self::CreatePath => "create_path",
            Self::CreateStop => "create_stop",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "create_trip" => Some(Self::CreateTrip),
            "create_route" => Some(Self::CreateRoute),
            "create_path" => Some(Self::CreatePath),
            "create_stop" => Some(Self::CreateStop),
            _ => None,
        }
    }
}

impl Action {
    /// Every registry member, in a stable order. Derived from the same list
    /// the executor's handler table is checked against in its tests.
    pub fn all() -> &'static [Action] {
        use Action::*;
        &[
            GetTripStatus,
            GetBookings,
            SearchTrips,
            ListAllTrips,
            ListTripsForDate,
            GetUnassignedTrips,
            ListAllStops,
            ListAllPaths,
            ListAllRoutes,
            ListAllVehicles,
            ListAllDrivers,
            GetSuggestions,
            Help,
            AssignVehicle,
            AssignDriver,
            AssignVehicleAndDriver,
            RemoveVehicle,
            RemoveDriver,
            CancelTrip,
            UpdateTripTime,
            DuplicateTrip,
            CreateStop,
            CreatePath,
            CreateRoute,
            AddVehicle,
            AddDriver,
            DeleteStop,
            DeletePath,
            DeleteRoute,
            CreateTripWizard,
            CreateRouteWizard,
            CreatePathWizard,
            CreateStopWizard,
            WizardStepInput,
            CancelWizard,
            Unknown,
        ]
    }

    /// Canonical snake_case name.
    pub fn as_str(&self) -> &'static str {
        use Action::*;
        match self {
            GetTripStatus => "get_trip_status",
            GetBookings => "get_bookings",
            SearchTrips => "search_trips",
            ListAllTrips => "list_all_trips",
            ListTripsForDate => "list_trips_for_date",
            GetUnassignedTrips => "get_unassigned_trips",
            ListAllStops => "list_all_stops",
            ListAllPaths => "list_all_paths",
            ListAllRoutes => "list_all_routes",
            ListAllVehicles => "list_all_vehicles",
            ListAllDrivers => "list_all_drivers",
            GetSuggestions => "get_suggestions",
            Help => "help",
            AssignVehicle => "assign_vehicle",
            AssignDriver => "assign_driver",
            AssignVehicleAndDriver => "assign_vehicle_and_driver",
            RemoveVehicle => "remove_vehicle",
            RemoveDriver => "remove_driver",
            CancelTrip => "cancel_trip",
            UpdateTripTime => "update_trip_time",
            DuplicateTrip => "duplicate_trip",
            CreateStop => "create_stop",
            CreatePath => "create_path",
            CreateRoute => "create_route",
            AddVehicle => "add_vehicle",
            AddDriver => "add_driver",
            DeleteStop => "delete_stop",
            DeletePath => "delete_path",
            DeleteRoute => "delete_route",
            CreateTripWizard => "create_trip_wizard",
            CreateRouteWizard => "create_route_wizard",
            CreatePathWizard => "create_path_wizard",
            CreateStopWizard => "create_stop_wizard",
            WizardStepInput => "wizard_step_input",
            CancelWizard => "cancel_wizard",
            Unknown => "unknown",
        }
    }

    /// Exact canonical-name lookup. For tolerant matching use [`normalize_action`].
    pub fn from_canonical(s: &str) -> Option<Action> {
        Action::all().iter().copied().find(|a| a.as_str() == s)
    }

    /// Whether the target resolver should attempt trip resolution.
    pub fn needs_target(&self) -> bool {
        use Action::*;
        !matches!(
            self,
            SearchTrips
                | ListAllTrips
                | ListTripsForDate
                | GetUnassignedTrips
                | ListAllStops
                | ListAllPaths
                | ListAllRoutes
                | ListAllVehicles
                | ListAllDrivers
                | GetSuggestions
                | Help
                | CreateStop
                | CreatePath
                | CreateRoute
                | AddVehicle
                | AddDriver
                | DeleteStop
                | DeletePath
                | DeleteRoute
                | CreateTripWizard
                | CreateRouteWizard
                | CreatePathWizard
                | CreateStopWizard
                | WizardStepInput
                | CancelWizard
                | Unknown
        )
    }

    /// Safe actions execute without confirmation. Reads and listings are
    /// safe; creation of static entities is safe; driver-only assignment is
    /// safe. Everything mutating passengers' experience is risky.
    pub fn is_safe(&self) -> bool {
        use Action::*;
        matches!(
            self,
            GetTripStatus
                | GetBookings
                | SearchTrips
                | ListAllTrips
                | ListTripsForDate
                | GetUnassignedTrips
                | ListAllStops
                | ListAllPaths
                | ListAllRoutes
                | ListAllVehicles
                | ListAllDrivers
                | GetSuggestions
                | Help
                | AssignDriver
                | CreateStop
                | CreatePath
                | CreateRoute
                | AddVehicle
                | AddDriver
        )
    }

    /// Actions that always require confirmation regardless of consequences.
    pub fn always_confirm(&self) -> bool {
        use Action::*;
        matches!(self, CancelTrip | DeleteStop | DeletePath | DeleteRoute)
    }

    /// Actions whose execution needs a vehicle selection.
    pub fn needs_vehicle_selection(&self) -> bool {
        matches!(self, Action::AssignVehicle | Action::AssignVehicleAndDriver)
    }

    /// Actions whose execution needs a driver selection.
    pub fn needs_driver_selection(&self) -> bool {
        matches!(self, Action::AssignDriver)
    }

    /// The wizard this action starts, if any.
    pub fn wizard_entry(&self) -> Option<WizardKind> {
        match self {
            Action::CreateTripWizard => Some(WizardKind::CreateTrip),
            Action::CreateRouteWizard => Some(WizardKind::CreateRoute),
            Action::CreatePathWizard => Some(WizardKind::CreatePath),
            Action::CreateStopWizard => Some(WizardKind::CreateStop),
            _ => None,
        }
    }

    /// The trip-operations set: permitted only from the trip-operations page.
    pub fn is_trip_operation(&self) -> bool {
        use Action::*;
        matches!(
            self,
            GetTripStatus
                | GetBookings
                | AssignVehicle
                | AssignDriver
                | AssignVehicleAndDriver
                | RemoveVehicle
                | RemoveDriver
                | CancelTrip
                | UpdateTripTime
                | DuplicateTrip
                | CreateTripWizard
        )
    }

    /// The configuration set: permitted only from the configuration page.
    pub fn is_configuration(&self) -> bool {
        use Action::*;
        matches!(
            self,
            CreateStop
                | CreatePath
                | CreateRoute
                | DeleteStop
                | DeletePath
                | DeleteRoute
                | CreateRouteWizard
                | CreatePathWizard
                | CreateStopWizard
        )
    }

    /// Page-context validation: defence-in-depth against UIs that fail to
    /// hide buttons. Actions outside both closed sets are allowed anywhere.
    pub fn allowed_on(&self, page: Page) -> bool {
        if self.is_trip_operation() {
            return matches!(page, Page::TripOps | Page::Unknown);
        }
        if self.is_configuration() {
            return matches!(page, Page::Config | Page::Unknown);
        }
        true
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The page the user is on, as reported by the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Page {
    TripOps,
    Config,
    /// Unreported or unrecognised pages: validation is skipped rather than
    /// blocking a user whose UI sends a page name the core has never seen.
    Unknown,
}

impl Page {
    pub fn parse(s: &str) -> Page {
        match s.trim().to_ascii_lowercase().as_str() {
            "trip_ops" | "trips" | "trip_operations" | "operations" => Page::TripOps,
            "config" | "configuration" | "setup" => Page::Config,
            _ => Page::Unknown,
        }
    }
}

/// Normalise a raw action name into the registry.
///
/// Accepts canonical names, common synonyms, plural forms, and spaced or
/// dashed spellings. Anything else becomes [`Action::Unknown`].
pub fn normalize_action(raw: &str) -> Action {
    let mut name: String = raw
        .trim()
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c == ' ' || c == '-' { '_' } else { c })
        .collect();
    while name.contains("__") {
        name = name.replace("__", "_");
    }

    if let Some(action) = Action::from_canonical(&name) {
        return action;
    }

    if let Some(action) = synonym(&name) {
        return action;
    }

    // Tolerate simple plurals: "list_all_stop" / "get_booking" style typos.
    if let Some(stripped) = name.strip_suffix('s') {
        if let Some(action) = Action::from_canonical(stripped).or_else(|| synonym(stripped)) {
            return action;
        }
    }
    let pluralised = format!("{}s", name);
    if let Some(action) = Action::from_canonical(&pluralised).or_else(|| synonym(&pluralised)) {
        return action;
    }

    Action::Unknown
}

fn synonym(name: &str) -> Option<Action> {
    use Action::*;
    let action = match name {
        "trip_status" | "show_trip_status" | "status" | "show_status" | "trip_info" => GetTripStatus,
        "show_bookings" | "list_bookings" | "bookings" | "view_bookings" => GetBookings,
        "find_trips" | "find_trip" | "search_trip" => SearchTrips,
        "list_trips" | "show_trips" | "all_trips" => ListAllTrips,
        "trips_for_date" | "trips_on_date" => ListTripsForDate,
        "unassigned_trips" | "list_unassigned_trips" => GetUnassignedTrips,
        "list_stops" | "show_stops" | "all_stops" => ListAllStops,
        "list_paths" | "show_paths" | "all_paths" => ListAllPaths,
        "list_routes" | "show_routes" | "all_routes" => ListAllRoutes,
        "list_vehicles" | "show_vehicles" | "all_vehicles" | "list_buses" => ListAllVehicles,
        "list_drivers" | "show_drivers" | "all_drivers" => ListAllDrivers,
        "suggestions" | "suggest" | "what_can_i_do" => GetSuggestions,
        "commands" | "capabilities" | "hi" | "hello" => Help,
        "assign_bus" | "assign_cab" | "deploy_vehicle" | "add_vehicle_to_trip" => AssignVehicle,
        "deploy_driver" | "add_driver_to_trip" | "set_driver" => AssignDriver,
        "assign_vehicle_driver" | "assign_both" | "deploy_vehicle_and_driver" => AssignVehicleAndDriver,
        "remove_bus" | "remove_cab" | "unassign_vehicle" | "undeploy_vehicle" => RemoveVehicle,
        "unassign_driver" | "undeploy_driver" => RemoveDriver,
        "cancel" | "cancel_trips" | "abort_trip" => CancelTrip,
        "change_trip_time" | "update_time" | "change_time" | "reschedule_trip" | "reschedule" => UpdateTripTime,
        "copy_trip" | "clone_trip" | "repeat_trip" => DuplicateTrip,
        "new_stop" | "add_stop" => CreateStop,
        "new_path" | "add_path" => CreatePath,
        "new_route" | "add_route" => CreateRoute,
        "new_vehicle" | "register_vehicle" | "add_bus" | "add_cab" => AddVehicle,
        "new_driver" | "register_driver" => AddDriver,
        "remove_stop" => DeleteStop,
        "remove_path" => DeletePath,
        "remove_route" => DeleteRoute,
        "create_trip" | "new_trip" | "create_trip_from_scratch" | "add_trip" => CreateTripWizard,
        "route_wizard" => CreateRouteWizard,
        "path_wizard" => CreatePathWizard,
        "stop_wizard" => CreateStopWizard,
        _ => return None,
    };
    Some(action)
}
