//! The typed tool layer: every database operation the agent can perform.
//!
//! Each operation accepts typed parameters, returns a uniform
//! success-or-domain-error result, and performs its writes inside a single
//! transaction that also inserts the matching audit record. Enum-valued
//! inputs are normalised to canonical casing before insertion.
//!
//! Availability is true interval overlap per trip date: a candidate is
//! available when none of its existing deployments occupies a window
//! overlapping the target trip's window. A fixed window (configurable,
//! default 60 minutes) applies when explicit end times are absent.

use super::types::*;
use super::{db_err, Database};
use crate::config::AgentConfig;
use crate::error::{Error, ErrorKind, Result};
use crate::normalize;
use chrono::{NaiveDate, NaiveTime, Timelike, Utc};
use rusqlite::{params, Connection, OptionalExtension, ToSql};
use serde_json::{json, Value};
use tracing::info;

const TRIP_COLS: &str = "trip_id, display_name, trip_date, scheduled_time, route_id, live_status";

type RawTrip = (i64, String, String, String, i64, String);

/// Typed database operations with audit writes.
#[derive(Clone)]
pub struct ToolLayer {
    db: Database,
    config: AgentConfig,
}

/// Parameters for stop creation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreateStopParams {
    pub name: String,
    pub code: Option<String>,
    pub landmark: Option<String>,
    pub zone: Option<String>,
}

impl ToolLayer {
    pub fn new(db: Database, config: AgentConfig) -> Self {
        Self { db, config }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    fn today() -> NaiveDate {
        Utc::now().date_naive()
    }

    // ==================== Reads ====================

    /// Fetch a trip by id.
    pub fn get_trip(&self, trip_id: i64) -> Result<Option<Trip>> {
        self.db.with_conn(|conn| Self::trip_by_id(conn, trip_id))
    }

    /// Trip attributes plus deployment summary and booking count.
    pub fn get_trip_status(&self, trip_id: i64) -> Result<TripStatus> {
        self.db.with_conn(|conn| {
            let trip = Self::trip_by_id(conn, trip_id)?.ok_or_else(|| Self::trip_not_found(trip_id))?;
            let deployment = Self::deployment_for_trip(conn, trip_id)?;
            let vehicle = match deployment.as_ref().and_then(|d| d.vehicle_id) {
                Some(id) => Self::vehicle_by_id(conn, id)?,
                None => None,
            };
            let driver = match deployment.as_ref().and_then(|d| d.driver_id) {
                Some(id) => Self::driver_by_id(conn, id)?,
                None => None,
            };
            let booking_count = Self::confirmed_booking_count(conn, trip_id)?;
            Ok(TripStatus {
                trip,
                deployment,
                vehicle,
                driver,
                booking_count,
            })
        })
    }

    /// All `CONFIRMED` bookings for a trip.
    pub fn get_bookings(&self, trip_id: i64) -> Result<Vec<Booking>> {
        self.db.with_conn(|conn| {
            Self::trip_by_id(conn, trip_id)?.ok_or_else(|| Self::trip_not_found(trip_id))?;
            let mut stmt = conn
                .prepare(
                    "SELECT booking_id, trip_id, status FROM bookings
                     WHERE trip_id = ?1 AND status = 'CONFIRMED' ORDER BY booking_id",
                )
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![trip_id], |row| {
                    Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?, row.get::<_, String>(2)?))
                })
                .map_err(db_err)?;
            let mut out = Vec::new();
            for row in rows {
                let (booking_id, trip_id, status) = row.map_err(db_err)?;
                let status = BookingStatus::parse(&status)
                    .ok_or_else(|| Error::database(format!("bad booking status '{}'", status)))?;
                out.push(Booking { booking_id, trip_id, status });
            }
            Ok(out)
        })
    }

    pub fn get_deployment(&self, trip_id: i64) -> Result<Option<Deployment>> {
        self.db.with_conn(|conn| Self::deployment_for_trip(conn, trip_id))
    }

    pub fn get_vehicle(&self, vehicle_id: i64) -> Result<Option<Vehicle>> {
        self.db.with_conn(|conn| Self::vehicle_by_id(conn, vehicle_id))
    }

    pub fn get_driver(&self, driver_id: i64) -> Result<Option<Driver>> {
        self.db.with_conn(|conn| Self::driver_by_id(conn, driver_id))
    }

    /// Active trips (today or later, not cancelled), soonest first.
    pub fn list_all_trips(&self) -> Result<Vec<Trip>> {
        let today = normalize::date_str(Self::today());
        self.db.with_conn(|conn| {
            Self::trips_where(
                conn,
                "trip_date >= ?1 AND live_status != 'CANCELLED'
                 ORDER BY trip_date, scheduled_time",
                &[&today],
            )
        })
    }

    pub fn list_trips_for_date(&self, date: NaiveDate) -> Result<Vec<Trip>> {
        let date = normalize::date_str(date);
        self.db.with_conn(|conn| {
            Self::trips_where(
                conn,
                "trip_date = ?1 AND live_status != 'CANCELLED' ORDER BY scheduled_time",
                &[&date],
            )
        })
    }

    /// Active trips with no deployment row, or a deployment with no vehicle.
    pub fn get_unassigned_trips(&self) -> Result<Vec<Trip>> {
        let today = normalize::date_str(Self::today());
        self.db.with_conn(|conn| {
            Self::trips_where(
                conn,
                "trip_date >= ?1 AND live_status != 'CANCELLED'
                 AND trip_id NOT IN (SELECT trip_id FROM deployments WHERE vehicle_id IS NOT NULL)
                 ORDER BY trip_date, scheduled_time",
                &[&today],
            )
        })
    }

    /// Ordered prefix-then-contains search over active trips. Returns at
    /// most `max_candidates` verified candidates.
    pub fn identify_trip_from_label(&self, label: &str) -> Result<Vec<TripCandidate>> {
        let label = label.trim();
        if label.is_empty() {
            return Ok(Vec::new());
        }
        let today = normalize::date_str(Self::today());
        let prefix = format!("{}%", label);
        let contains = format!("%{}%", label);
        let limit = self.config.max_candidates as i64;
        self.db.with_conn(|conn| {
            let mut found = Self::trips_where(
                conn,
                "trip_date >= ?1 AND live_status != 'CANCELLED'
                 AND display_name LIKE ?2 COLLATE NOCASE
                 ORDER BY trip_date, scheduled_time LIMIT ?3",
                &[&today, &prefix, &limit],
            )?;
            if found.is_empty() {
                found = Self::trips_where(
                    conn,
                    "trip_date >= ?1 AND live_status != 'CANCELLED'
                     AND display_name LIKE ?2 COLLATE NOCASE
                     ORDER BY trip_date, scheduled_time LIMIT ?3",
                    &[&today, &contains, &limit],
                )?;
            }
            Ok(found.into_iter().map(Self::candidate).collect())
        })
    }

    /// Trips in the given time slot for a date.
    pub fn find_trips_by_time(&self, time: NaiveTime, date: NaiveDate) -> Result<Vec<TripCandidate>> {
        let date = normalize::date_str(date);
        let time = normalize::time_str(time);
        let limit = self.config.max_candidates as i64;
        self.db.with_conn(|conn| {
            let found = Self::trips_where(
                conn,
                "trip_date = ?1 AND scheduled_time = ?2 AND live_status != 'CANCELLED'
                 ORDER BY trip_id LIMIT ?3",
                &[&date, &time, &limit],
            )?;
            Ok(found.into_iter().map(Self::candidate).collect())
        })
    }

    pub fn list_all_stops(&self) -> Result<Vec<Stop>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT stop_id, name, code, landmark, zone FROM stops ORDER BY stop_id")
                .map_err(db_err)?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(Stop {
                        stop_id: row.get(0)?,
                        name: row.get(1)?,
                        code: row.get(2)?,
                        landmark: row.get(3)?,
                        zone: row.get(4)?,
                    })
                })
                .map_err(db_err)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
        })
    }

    pub fn list_all_paths(&self) -> Result<Vec<Path>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT path_id, name FROM paths ORDER BY path_id")
                .map_err(db_err)?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(Path { path_id: row.get(0)?, name: row.get(1)? })
                })
                .map_err(db_err)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
        })
    }

    pub fn list_all_routes(&self) -> Result<Vec<Route>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT route_id, name, path_id, direction, shift_time FROM routes ORDER BY route_id")
                .map_err(db_err)?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                })
                .map_err(db_err)?;
            let mut out = Vec::new();
            for row in rows {
                let (route_id, name, path_id, direction, shift_time) = row.map_err(db_err)?;
                out.push(Route {
                    route_id,
                    name,
                    path_id,
                    direction: Direction::parse(&direction)
                        .ok_or_else(|| Error::database(format!("bad direction '{}'", direction)))?,
                    shift_time: normalize::parse_time(&shift_time)
                        .ok_or_else(|| Error::database(format!("bad shift time '{}'", shift_time)))?,
                });
            }
            Ok(out)
        })
    }

    pub fn list_all_vehicles(&self) -> Result<Vec<Vehicle>> {
        self.db.with_conn(Self::all_vehicles)
    }

    pub fn list_all_drivers(&self) -> Result<Vec<Driver>> {
        self.db.with_conn(Self::all_drivers)
    }

    /// Vehicles free in the trip's window on the trip's date.
    pub fn list_available_vehicles(&self, trip_id: i64) -> Result<Vec<Vehicle>> {
        self.db.with_conn(|conn| {
            let trip = Self::trip_by_id(conn, trip_id)?.ok_or_else(|| Self::trip_not_found(trip_id))?;
            self.available_vehicles_at(conn, trip.trip_date, trip.scheduled_time, Some(trip_id))
        })
    }

    /// Vehicles free around a (date, time) slot — used while a trip is still
    /// being assembled by the wizard.
    pub fn list_available_vehicles_at(&self, date: NaiveDate, time: NaiveTime) -> Result<Vec<Vehicle>> {
        self.db.with_conn(|conn| self.available_vehicles_at(conn, date, time, None))
    }

    pub fn list_available_drivers(&self, trip_id: i64) -> Result<Vec<Driver>> {
        self.db.with_conn(|conn| {
            let trip = Self::trip_by_id(conn, trip_id)?.ok_or_else(|| Self::trip_not_found(trip_id))?;
            self.available_drivers_at(conn, trip.trip_date, trip.scheduled_time, Some(trip_id))
        })
    }

    pub fn list_available_drivers_at(&self, date: NaiveDate, time: NaiveTime) -> Result<Vec<Driver>> {
        self.db.with_conn(|conn| self.available_drivers_at(conn, date, time, None))
    }

    pub fn find_stop_by_name(&self, name: &str) -> Result<Option<Stop>> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT stop_id, name, code, landmark, zone FROM stops
                 WHERE name = ?1 COLLATE NOCASE",
                params![name.trim()],
                |row| {
                    Ok(Stop {
                        stop_id: row.get(0)?,
                        name: row.get(1)?,
                        code: row.get(2)?,
                        landmark: row.get(3)?,
                        zone: row.get(4)?,
                    })
                },
            )
            .optional()
            .map_err(db_err)
        })
    }

    pub fn find_path_by_name(&self, name: &str) -> Result<Option<Path>> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT path_id, name FROM paths WHERE name = ?1 COLLATE NOCASE",
                params![name.trim()],
                |row| Ok(Path { path_id: row.get(0)?, name: row.get(1)? }),
            )
            .optional()
            .map_err(db_err)
        })
    }

    pub fn find_route_by_name(&self, name: &str) -> Result<Option<i64>> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT route_id FROM routes WHERE name = ?1 COLLATE NOCASE",
                params![name.trim()],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)
        })
    }

    /// Route for a (path, direction) pair, if one exists.
    pub fn find_route_for_path(&self, path_id: i64, direction: Direction) -> Result<Option<i64>> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT route_id FROM routes WHERE path_id = ?1 AND direction = ?2",
                params![path_id, direction.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)
        })
    }

    /// Most recent audit records, newest first.
    pub fn recent_audit(&self, limit: usize) -> Result<Vec<AuditRecord>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT audit_id, user_id, action, entity_type, entity_id,
                            before_state, after_state, timestamp
                     FROM audit_log ORDER BY audit_id DESC LIMIT ?1",
                )
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![limit as i64], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, Option<String>>(5)?,
                        row.get::<_, Option<String>>(6)?,
                        row.get::<_, String>(7)?,
                    ))
                })
                .map_err(db_err)?;
            let mut out = Vec::new();
            for row in rows {
                let (audit_id, user_id, action, entity_type, entity_id, before, after, timestamp) =
                    row.map_err(db_err)?;
                out.push(AuditRecord {
                    audit_id,
                    user_id,
                    action,
                    entity_type,
                    entity_id,
                    before: before.as_deref().map(serde_json::from_str).transpose()?,
                    after: after.as_deref().map(serde_json::from_str).transpose()?,
                    timestamp: timestamp
                        .parse()
                        .map_err(|e| Error::database(format!("bad audit timestamp: {}", e)))?,
                });
            }
            Ok(out)
        })
    }

    // ==================== Mutations ====================

    /// Bind a vehicle (and optionally a driver) to a trip.
    ///
    /// Fails with `already_deployed` when a vehicle is bound and `replace`
    /// was not set, and with `vehicle_unavailable`/`driver_unavailable` on
    /// an overlapping deployment.
    pub fn assign_vehicle(
        &self,
        trip_id: i64,
        vehicle_id: i64,
        driver_id: Option<i64>,
        replace: bool,
        user_id: i64,
    ) -> Result<Deployment> {
        let window = self.config.availability_window_mins;
        self.db.with_conn(|conn| {
            let tx = conn.transaction().map_err(db_err)?;
            let trip = Self::trip_by_id(&tx, trip_id)?.ok_or_else(|| Self::trip_not_found(trip_id))?;
            Self::ensure_operable(&trip)?;

            let existing = Self::deployment_for_trip(&tx, trip_id)?;
            if let Some(dep) = &existing {
                if dep.vehicle_id.is_some() && !replace {
                    return Err(Error::tool(
                        ErrorKind::AlreadyDeployed,
                        "deployment",
                        format!("Trip '{}' already has a vehicle assigned.", trip.display_name),
                    ));
                }
            }

            Self::check_vehicle_free(&tx, vehicle_id, &trip, window)?;
            if let Some(driver_id) = driver_id {
                Self::check_driver_free(&tx, driver_id, &trip, window)?;
            }

            let before = existing.as_ref().map(|d| json!({"vehicle_id": d.vehicle_id, "driver_id": d.driver_id}));
            let deployment = Self::upsert_deployment(&tx, trip_id, Some(vehicle_id), driver_id, existing)?;
            let after = json!({"vehicle_id": deployment.vehicle_id, "driver_id": deployment.driver_id});

            let action = if driver_id.is_some() { "assign_vehicle_and_driver" } else { "assign_vehicle" };
            Self::write_audit(&tx, user_id, action, "trip", trip_id, before, Some(after))?;
            tx.commit().map_err(db_err)?;
            info!(trip_id, vehicle_id, ?driver_id, "vehicle assigned");
            Ok(deployment)
        })
    }

    /// Bind a driver to a trip, preserving any vehicle binding.
    pub fn assign_driver(&self, trip_id: i64, driver_id: i64, user_id: i64) -> Result<Deployment> {
        let window = self.config.availability_window_mins;
        self.db.with_conn(|conn| {
            let tx = conn.transaction().map_err(db_err)?;
            let trip = Self::trip_by_id(&tx, trip_id)?.ok_or_else(|| Self::trip_not_found(trip_id))?;
            Self::ensure_operable(&trip)?;
            Self::check_driver_free(&tx, driver_id, &trip, window)?;

            let existing = Self::deployment_for_trip(&tx, trip_id)?;
            let before = existing.as_ref().map(|d| json!({"vehicle_id": d.vehicle_id, "driver_id": d.driver_id}));
            let vehicle_id = existing.as_ref().and_then(|d| d.vehicle_id);
            let deployment = Self::upsert_deployment(&tx, trip_id, vehicle_id, Some(driver_id), existing)?;
            let after = json!({"vehicle_id": deployment.vehicle_id, "driver_id": deployment.driver_id});

            Self::write_audit(&tx, user_id, "assign_driver", "trip", trip_id, before, Some(after))?;
            tx.commit().map_err(db_err)?;
            info!(trip_id, driver_id, "driver assigned");
            Ok(deployment)
        })
    }

    /// Null the vehicle on a trip's deployment. The driver binding stays.
    pub fn remove_vehicle(&self, trip_id: i64, user_id: i64) -> Result<Deployment> {
        self.remove_binding(trip_id, user_id, "remove_vehicle")
    }

    /// Null the driver on a trip's deployment.
    pub fn remove_driver(&self, trip_id: i64, user_id: i64) -> Result<Deployment> {
        self.remove_binding(trip_id, user_id, "remove_driver")
    }

    fn remove_binding(&self, trip_id: i64, user_id: i64, action: &str) -> Result<Deployment> {
        self.db.with_conn(|conn| {
            let tx = conn.transaction().map_err(db_err)?;
            let trip = Self::trip_by_id(&tx, trip_id)?.ok_or_else(|| Self::trip_not_found(trip_id))?;
            let existing = Self::deployment_for_trip(&tx, trip_id)?.ok_or_else(|| {
                Error::tool(
                    ErrorKind::NoDeployment,
                    "deployment",
                    format!("Trip '{}' has no deployment to modify.", trip.display_name),
                )
            })?;

            let removing_vehicle = action == "remove_vehicle";
            if removing_vehicle && existing.vehicle_id.is_none() {
                return Err(Error::tool(
                    ErrorKind::NoDeployment,
                    "deployment",
                    format!("Trip '{}' has no vehicle assigned.", trip.display_name),
                ));
            }
            if !removing_vehicle && existing.driver_id.is_none() {
                return Err(Error::tool(
                    ErrorKind::NoDeployment,
                    "deployment",
                    format!("Trip '{}' has no driver assigned.", trip.display_name),
                ));
            }

            let before = json!({"vehicle_id": existing.vehicle_id, "driver_id": existing.driver_id});
            let (vehicle_id, driver_id) = if removing_vehicle {
                (None, existing.driver_id)
            } else {
                (existing.vehicle_id, None)
            };
            let deployment = Self::upsert_deployment(&tx, trip_id, vehicle_id, driver_id, Some(existing))?;
            let after = json!({"vehicle_id": deployment.vehicle_id, "driver_id": deployment.driver_id});

            Self::write_audit(&tx, user_id, action, "trip", trip_id, Some(before), Some(after))?;
            tx.commit().map_err(db_err)?;
            info!(trip_id, action, "binding removed");
            Ok(deployment)
        })
    }

    /// Cancel a trip and every `CONFIRMED` booking on it, atomically.
    pub fn cancel_trip(&self, trip_id: i64, user_id: i64) -> Result<Trip> {
        self.db.with_conn(|conn| {
            let tx = conn.transaction().map_err(db_err)?;
            let trip = Self::trip_by_id(&tx, trip_id)?.ok_or_else(|| Self::trip_not_found(trip_id))?;
            if trip.live_status == LiveStatus::Cancelled {
                return Err(Error::tool(
                    ErrorKind::TripCancelled,
                    "trip",
                    format!("Trip '{}' is already cancelled.", trip.display_name),
                ));
            }

            let booking_count = Self::confirmed_booking_count(&tx, trip_id)?;
            tx.execute(
                "UPDATE trips SET live_status = 'CANCELLED' WHERE trip_id = ?1",
                params![trip_id],
            )
            .map_err(db_err)?;
            tx.execute(
                "UPDATE bookings SET status = 'CANCELLED' WHERE trip_id = ?1 AND status = 'CONFIRMED'",
                params![trip_id],
            )
            .map_err(db_err)?;

            let before = json!({"live_status": trip.live_status.as_str(), "confirmed_bookings": booking_count});
            let after = json!({"live_status": "CANCELLED", "cancelled_bookings": booking_count});
            Self::write_audit(&tx, user_id, "cancel_trip", "trip", trip_id, Some(before), Some(after))?;
            tx.commit().map_err(db_err)?;
            info!(trip_id, booking_count, "trip cancelled");

            Ok(Trip { live_status: LiveStatus::Cancelled, ..trip })
        })
    }

    /// Move a trip to a new time. Past timestamps are rejected.
    pub fn update_trip_time(&self, trip_id: i64, new_time: NaiveTime, user_id: i64) -> Result<Trip> {
        self.db.with_conn(|conn| {
            let tx = conn.transaction().map_err(db_err)?;
            let trip = Self::trip_by_id(&tx, trip_id)?.ok_or_else(|| Self::trip_not_found(trip_id))?;
            Self::ensure_operable(&trip)?;

            let now = Utc::now();
            let proposed = trip.trip_date.and_time(new_time).and_utc();
            if proposed < now {
                return Err(Error::tool(
                    ErrorKind::InvalidRequest,
                    "trip",
                    format!(
                        "{} on {} is in the past.",
                        normalize::time_str(new_time),
                        normalize::date_str(trip.trip_date)
                    ),
                ));
            }

            tx.execute(
                "UPDATE trips SET scheduled_time = ?1 WHERE trip_id = ?2",
                params![normalize::time_str(new_time), trip_id],
            )
            .map_err(db_err)?;

            let before = json!({"scheduled_time": normalize::time_str(trip.scheduled_time)});
            let after = json!({"scheduled_time": normalize::time_str(new_time)});
            Self::write_audit(&tx, user_id, "update_trip_time", "trip", trip_id, Some(before), Some(after))?;
            tx.commit().map_err(db_err)?;
            info!(trip_id, new_time = %normalize::time_str(new_time), "trip time updated");

            Ok(Trip { scheduled_time: new_time, ..trip })
        })
    }

    /// Create a trip, optionally with an initial deployment, in one
    /// transaction with a single audit record.
    pub fn create_trip(&self, new_trip: NewTrip, user_id: i64) -> Result<Trip> {
        let window = self.config.availability_window_mins;
        self.db.with_conn(|conn| {
            let tx = conn.transaction().map_err(db_err)?;
            let route_exists: Option<i64> = tx
                .query_row(
                    "SELECT route_id FROM routes WHERE route_id = ?1",
                    params![new_trip.route_id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(db_err)?;
            if route_exists.is_none() {
                return Err(Error::tool(
                    ErrorKind::TargetNotFound,
                    "route",
                    format!("Route {} does not exist.", new_trip.route_id),
                ));
            }

            tx.execute(
                "INSERT INTO trips (display_name, trip_date, scheduled_time, route_id, live_status)
                 VALUES (?1, ?2, ?3, ?4, 'SCHEDULED')",
                params![
                    new_trip.display_name,
                    normalize::date_str(new_trip.trip_date),
                    normalize::time_str(new_trip.scheduled_time),
                    new_trip.route_id,
                ],
            )
            .map_err(db_err)?;
            let trip_id = tx.last_insert_rowid();

            let trip = Trip {
                trip_id,
                display_name: new_trip.display_name.clone(),
                trip_date: new_trip.trip_date,
                scheduled_time: new_trip.scheduled_time,
                route_id: new_trip.route_id,
                live_status: LiveStatus::Scheduled,
            };

            if new_trip.vehicle_id.is_some() || new_trip.driver_id.is_some() {
                if let Some(vehicle_id) = new_trip.vehicle_id {
                    Self::check_vehicle_free(&tx, vehicle_id, &trip, window)?;
                }
                if let Some(driver_id) = new_trip.driver_id {
                    Self::check_driver_free(&tx, driver_id, &trip, window)?;
                }
                Self::upsert_deployment(&tx, trip_id, new_trip.vehicle_id, new_trip.driver_id, None)?;
            }

            let after = json!({
                "display_name": &trip.display_name,
                "trip_date": normalize::date_str(trip.trip_date),
                "scheduled_time": normalize::time_str(trip.scheduled_time),
                "route_id": trip.route_id,
                "vehicle_id": new_trip.vehicle_id,
                "driver_id": new_trip.driver_id,
            });
            Self::write_audit(&tx, user_id, "create_trip", "trip", trip_id, None, Some(after))?;
            tx.commit().map_err(db_err)?;
            info!(trip_id, "trip created");
            Ok(trip)
        })
    }

    /// Copy a trip to a new date without its deployment or bookings.
    pub fn duplicate_trip(&self, trip_id: i64, new_date: NaiveDate, user_id: i64) -> Result<Trip> {
        self.db.with_conn(|conn| {
            let tx = conn.transaction().map_err(db_err)?;
            let source = Self::trip_by_id(&tx, trip_id)?.ok_or_else(|| Self::trip_not_found(trip_id))?;

            tx.execute(
                "INSERT INTO trips (display_name, trip_date, scheduled_time, route_id, live_status)
                 VALUES (?1, ?2, ?3, ?4, 'SCHEDULED')",
                params![
                    source.display_name,
                    normalize::date_str(new_date),
                    normalize::time_str(source.scheduled_time),
                    source.route_id,
                ],
            )
            .map_err(db_err)?;
            let new_id = tx.last_insert_rowid();

            let after = json!({
                "duplicated_from": trip_id,
                "trip_date": normalize::date_str(new_date),
            });
            Self::write_audit(&tx, user_id, "duplicate_trip", "trip", new_id, None, Some(after))?;
            tx.commit().map_err(db_err)?;
            info!(source = trip_id, new_id, "trip duplicated");

            Ok(Trip {
                trip_id: new_id,
                trip_date: new_date,
                live_status: LiveStatus::Scheduled,
                ..source
            })
        })
    }

    pub fn create_stop(&self, stop: CreateStopParams, user_id: i64) -> Result<Stop> {
        let name = stop.name.trim().to_string();
        if name.is_empty() {
            return Err(Error::tool(ErrorKind::InvalidRequest, "stop", "A stop needs a name."));
        }
        self.db.with_conn(|conn| {
            let tx = conn.transaction().map_err(db_err)?;
            tx.execute(
                "INSERT INTO stops (name, code, landmark, zone) VALUES (?1, ?2, ?3, ?4)",
                params![name, stop.code, stop.landmark, stop.zone],
            )
            .map_err(db_err)?;
            let created = Stop {
                stop_id: tx.last_insert_rowid(),
                name,
                code: stop.code,
                landmark: stop.landmark,
                zone: stop.zone,
            };
            let after = serde_json::to_value(&created)?;
            Self::write_audit(&tx, user_id, "create_stop", "stop", created.stop_id, None, Some(after))?;
            tx.commit().map_err(db_err)?;
            Ok(created)
        })
    }

    /// Create a path and its ordered stop memberships atomically.
    pub fn create_path(&self, name: &str, stop_ids: &[i64], user_id: i64) -> Result<Path> {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(Error::tool(ErrorKind::InvalidRequest, "path", "A path needs a name."));
        }
        if stop_ids.is_empty() {
            return Err(Error::tool(
                ErrorKind::InvalidRequest,
                "path",
                "A path needs at least one stop.",
            ));
        }
        self.db.with_conn(|conn| {
            let tx = conn.transaction().map_err(db_err)?;
            for stop_id in stop_ids {
                let exists: Option<i64> = tx
                    .query_row("SELECT stop_id FROM stops WHERE stop_id = ?1", params![stop_id], |r| r.get(0))
                    .optional()
                    .map_err(db_err)?;
                if exists.is_none() {
                    return Err(Error::tool(
                        ErrorKind::TargetNotFound,
                        "stop",
                        format!("Stop {} does not exist.", stop_id),
                    ));
                }
            }

            tx.execute("INSERT INTO paths (name) VALUES (?1)", params![name]).map_err(db_err)?;
            let path_id = tx.last_insert_rowid();
            for (position, stop_id) in stop_ids.iter().enumerate() {
                tx.execute(
                    "INSERT INTO path_stops (path_id, stop_id, position) VALUES (?1, ?2, ?3)",
                    params![path_id, stop_id, position as i64],
                )
                .map_err(db_err)?;
            }

            let after = json!({"name": &name, "stop_ids": stop_ids});
            Self::write_audit(&tx, user_id, "create_path", "path", path_id, None, Some(after))?;
            tx.commit().map_err(db_err)?;
            Ok(Path { path_id, name })
        })
    }

    /// Create a route over a path. `direction` is normalised to canonical
    /// casing before insertion.
    pub fn create_route(
        &self,
        name: &str,
        path_id: i64,
        direction: &str,
        shift_time: NaiveTime,
        user_id: i64,
    ) -> Result<Route> {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(Error::tool(ErrorKind::InvalidRequest, "route", "A route needs a name."));
        }
        let direction = Direction::parse(direction).ok_or_else(|| {
            Error::tool(
                ErrorKind::InvalidRequest,
                "route",
                "Direction must be 'up' or 'down'.",
            )
        })?;
        self.db.with_conn(|conn| {
            let tx = conn.transaction().map_err(db_err)?;
            let exists: Option<i64> = tx
                .query_row("SELECT path_id FROM paths WHERE path_id = ?1", params![path_id], |r| r.get(0))
                .optional()
                .map_err(db_err)?;
            if exists.is_none() {
                return Err(Error::tool(
                    ErrorKind::TargetNotFound,
                    "path",
                    format!("Path {} does not exist.", path_id),
                ));
            }

            tx.execute(
                "INSERT INTO routes (name, path_id, direction, shift_time) VALUES (?1, ?2, ?3, ?4)",
                params![name, path_id, direction.as_str(), normalize::time_str(shift_time)],
            )
            .map_err(db_err)?;
            let route_id = tx.last_insert_rowid();

            let after = json!({
                "name": &name,
                "path_id": path_id,
                "direction": direction.as_str(),
                "shift_time": normalize::time_str(shift_time),
            });
            Self::write_audit(&tx, user_id, "create_route", "route", route_id, None, Some(after))?;
            tx.commit().map_err(db_err)?;
            Ok(Route { route_id, name, path_id, direction, shift_time })
        })
    }

    /// Register a vehicle. `vehicle_type` is normalised to canonical casing.
    pub fn add_vehicle(
        &self,
        registration_number: &str,
        vehicle_type: &str,
        capacity: i64,
        user_id: i64,
    ) -> Result<Vehicle> {
        let registration = registration_number.trim().to_string();
        if registration.is_empty() {
            return Err(Error::tool(
                ErrorKind::InvalidRequest,
                "vehicle",
                "A vehicle needs a registration number.",
            ));
        }
        let vehicle_type = VehicleType::parse(vehicle_type).ok_or_else(|| {
            Error::tool(
                ErrorKind::InvalidRequest,
                "vehicle",
                "Vehicle type must be 'Bus' or 'Cab'.",
            )
        })?;
        if capacity <= 0 {
            return Err(Error::tool(
                ErrorKind::InvalidRequest,
                "vehicle",
                "Capacity must be a positive number.",
            ));
        }
        self.db.with_conn(|conn| {
            let tx = conn.transaction().map_err(db_err)?;
            let duplicate: Option<i64> = tx
                .query_row(
                    "SELECT vehicle_id FROM vehicles WHERE registration_number = ?1",
                    params![registration],
                    |r| r.get(0),
                )
                .optional()
                .map_err(db_err)?;
            if duplicate.is_some() {
                return Err(Error::tool(
                    ErrorKind::InvalidRequest,
                    "vehicle",
                    format!("Vehicle '{}' is already registered.", registration),
                ));
            }

            tx.execute(
                "INSERT INTO vehicles (registration_number, vehicle_type, capacity, status)
                 VALUES (?1, ?2, ?3, 'available')",
                params![registration, vehicle_type.as_str(), capacity],
            )
            .map_err(db_err)?;
            let vehicle_id = tx.last_insert_rowid();

            let after = json!({
                "registration_number": &registration,
                "vehicle_type": vehicle_type.as_str(),
                "capacity": capacity,
            });
            Self::write_audit(&tx, user_id, "add_vehicle", "vehicle", vehicle_id, None, Some(after))?;
            tx.commit().map_err(db_err)?;
            Ok(Vehicle {
                vehicle_id,
                registration_number: registration,
                vehicle_type,
                capacity,
                status: VehicleStatus::Available,
            })
        })
    }

    pub fn add_driver(&self, name: &str, user_id: i64) -> Result<Driver> {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(Error::tool(ErrorKind::InvalidRequest, "driver", "A driver needs a name."));
        }
        self.db.with_conn(|conn| {
            let tx = conn.transaction().map_err(db_err)?;
            tx.execute(
                "INSERT INTO drivers (name, status) VALUES (?1, 'available')",
                params![name],
            )
            .map_err(db_err)?;
            let driver_id = tx.last_insert_rowid();
            let after = json!({"name": &name});
            Self::write_audit(&tx, user_id, "add_driver", "driver", driver_id, None, Some(after))?;
            tx.commit().map_err(db_err)?;
            Ok(Driver { driver_id, name, status: DriverStatus::Available })
        })
    }

    pub fn delete_stop(&self, stop_id: i64, user_id: i64) -> Result<()> {
        self.db.with_conn(|conn| {
            let tx = conn.transaction().map_err(db_err)?;
            let stop: Option<String> = tx
                .query_row("SELECT name FROM stops WHERE stop_id = ?1", params![stop_id], |r| r.get(0))
                .optional()
                .map_err(db_err)?;
            let name = stop.ok_or_else(|| {
                Error::tool(ErrorKind::TargetNotFound, "stop", format!("Stop {} does not exist.", stop_id))
            })?;

            let referenced: i64 = tx
                .query_row(
                    "SELECT COUNT(*) FROM path_stops WHERE stop_id = ?1",
                    params![stop_id],
                    |r| r.get(0),
                )
                .map_err(db_err)?;
            if referenced > 0 {
                return Err(Error::tool(
                    ErrorKind::InvalidRequest,
                    "stop",
                    format!("Stop '{}' is still used by {} path(s).", name, referenced),
                ));
            }

            tx.execute("DELETE FROM stops WHERE stop_id = ?1", params![stop_id]).map_err(db_err)?;
            let before = json!({"name": name});
            Self::write_audit(&tx, user_id, "delete_stop", "stop", stop_id, Some(before), None)?;
            tx.commit().map_err(db_err)?;
            Ok(())
        })
    }

    pub fn delete_path(&self, path_id: i64, user_id: i64) -> Result<()> {
        self.db.with_conn(|conn| {
            let tx = conn.transaction().map_err(db_err)?;
            let path: Option<String> = tx
                .query_row("SELECT name FROM paths WHERE path_id = ?1", params![path_id], |r| r.get(0))
                .optional()
                .map_err(db_err)?;
            let name = path.ok_or_else(|| {
                Error::tool(ErrorKind::TargetNotFound, "path", format!("Path {} does not exist.", path_id))
            })?;

            let referenced: i64 = tx
                .query_row("SELECT COUNT(*) FROM routes WHERE path_id = ?1", params![path_id], |r| r.get(0))
                .map_err(db_err)?;
            if referenced > 0 {
                return Err(Error::tool(
                    ErrorKind::InvalidRequest,
                    "path",
                    format!("Path '{}' is still used by {} route(s).", name, referenced),
                ));
            }

            tx.execute("DELETE FROM paths WHERE path_id = ?1", params![path_id]).map_err(db_err)?;
            let before = json!({"name": name});
            Self::write_audit(&tx, user_id, "delete_path", "path", path_id, Some(before), None)?;
            tx.commit().map_err(db_err)?;
            Ok(())
        })
    }

    pub fn delete_route(&self, route_id: i64, user_id: i64) -> Result<()> {
        self.db.with_conn(|conn| {
            let tx = conn.transaction().map_err(db_err)?;
            let route: Option<String> = tx
                .query_row("SELECT name FROM routes WHERE route_id = ?1", params![route_id], |r| r.get(0))
                .optional()
                .map_err(db_err)?;
            let name = route.ok_or_else(|| {
                Error::tool(ErrorKind::TargetNotFound, "route", format!("Route {} does not exist.", route_id))
            })?;

            let referenced: i64 = tx
                .query_row("SELECT COUNT(*) FROM trips WHERE route_id = ?1", params![route_id], |r| r.get(0))
                .map_err(db_err)?;
            if referenced > 0 {
                return Err(Error::tool(
                    ErrorKind::InvalidRequest,
                    "route",
                    format!("Route '{}' still has {} trip(s).", name, referenced),
                ));
            }

            tx.execute("DELETE FROM routes WHERE route_id = ?1", params![route_id]).map_err(db_err)?;
            let before = json!({"name": name});
            Self::write_audit(&tx, user_id, "delete_route", "route", route_id, Some(before), None)?;
            tx.commit().map_err(db_err)?;
            Ok(())
        })
    }

    // ==================== Internal helpers ====================

    fn trip_not_found(trip_id: i64) -> Error {
        Error::tool(ErrorKind::TargetNotFound, "trip", format!("Trip {} does not exist.", trip_id))
    }

    fn ensure_operable(trip: &Trip) -> Result<()> {
        match trip.live_status {
            LiveStatus::Cancelled => Err(Error::tool(
                ErrorKind::TripCancelled,
                "trip",
                format!("Trip '{}' has been cancelled.", trip.display_name),
            )),
            LiveStatus::Completed => Err(Error::tool(
                ErrorKind::TripPast,
                "trip",
                format!("Trip '{}' has already completed.", trip.display_name),
            )),
            _ if trip.trip_date < Self::today() => Err(Error::tool(
                ErrorKind::TripPast,
                "trip",
                format!("Trip '{}' is in the past.", trip.display_name),
            )),
            _ => Ok(()),
        }
    }

    fn trip_by_id(conn: &Connection, trip_id: i64) -> Result<Option<Trip>> {
        let raw: Option<RawTrip> = conn
            .query_row(
                &format!("SELECT {} FROM trips WHERE trip_id = ?1", TRIP_COLS),
                params![trip_id],
                Self::raw_trip,
            )
            .optional()
            .map_err(db_err)?;
        raw.map(Self::trip_from_raw).transpose()
    }

    fn trips_where(conn: &Connection, clause: &str, params: &[&dyn ToSql]) -> Result<Vec<Trip>> {
        let sql = format!("SELECT {} FROM trips WHERE {}", TRIP_COLS, clause);
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt.query_map(params, Self::raw_trip).map_err(db_err)?;
        let mut out = Vec::new();
        for raw in rows {
            out.push(Self::trip_from_raw(raw.map_err(db_err)?)?);
        }
        Ok(out)
    }

    fn raw_trip(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawTrip> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
        ))
    }

    fn trip_from_raw(raw: RawTrip) -> Result<Trip> {
        let (trip_id, display_name, date, time, route_id, status) = raw;
        Ok(Trip {
            trip_id,
            display_name,
            trip_date: normalize::parse_date(&date)
                .ok_or_else(|| Error::database(format!("bad trip date '{}'", date)))?,
            scheduled_time: normalize::parse_time(&time)
                .ok_or_else(|| Error::database(format!("bad trip time '{}'", time)))?,
            route_id,
            live_status: LiveStatus::parse(&status)
                .ok_or_else(|| Error::database(format!("bad live status '{}'", status)))?,
        })
    }

    fn candidate(trip: Trip) -> TripCandidate {
        TripCandidate {
            trip_id: trip.trip_id,
            display_name: trip.display_name,
            trip_date: trip.trip_date,
            scheduled_time: trip.scheduled_time,
        }
    }

    fn deployment_for_trip(conn: &Connection, trip_id: i64) -> Result<Option<Deployment>> {
        let raw: Option<(i64, i64, Option<i64>, Option<i64>, String)> = conn
            .query_row(
                "SELECT deployment_id, trip_id, vehicle_id, driver_id, deployed_at
                 FROM deployments WHERE trip_id = ?1",
                params![trip_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
            )
            .optional()
            .map_err(db_err)?;
        raw.map(|(deployment_id, trip_id, vehicle_id, driver_id, deployed_at)| {
            Ok(Deployment {
                deployment_id,
                trip_id,
                vehicle_id,
                driver_id,
                deployed_at: deployed_at
                    .parse()
                    .map_err(|e| Error::database(format!("bad deployed_at: {}", e)))?,
            })
        })
        .transpose()
    }

    fn vehicle_by_id(conn: &Connection, vehicle_id: i64) -> Result<Option<Vehicle>> {
        let raw: Option<(i64, String, String, i64, String)> = conn
            .query_row(
                "SELECT vehicle_id, registration_number, vehicle_type, capacity, status
                 FROM vehicles WHERE vehicle_id = ?1",
                params![vehicle_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
            )
            .optional()
            .map_err(db_err)?;
        raw.map(Self::vehicle_from_raw).transpose()
    }

    fn vehicle_from_raw(raw: (i64, String, String, i64, String)) -> Result<Vehicle> {
        let (vehicle_id, registration_number, vehicle_type, capacity, status) = raw;
        Ok(Vehicle {
            vehicle_id,
            registration_number,
            vehicle_type: VehicleType::parse(&vehicle_type)
                .ok_or_else(|| Error::database(format!("bad vehicle type '{}'", vehicle_type)))?,
            capacity,
            status: VehicleStatus::parse(&status)
                .ok_or_else(|| Error::database(format!("bad vehicle status '{}'", status)))?,
        })
    }

    fn all_vehicles(conn: &mut Connection) -> Result<Vec<Vehicle>> {
        let mut stmt = conn
            .prepare(
                "SELECT vehicle_id, registration_number, vehicle_type, capacity, status
                 FROM vehicles ORDER BY vehicle_id",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
            })
            .map_err(db_err)?;
        let mut out = Vec::new();
        for raw in rows {
            out.push(Self::vehicle_from_raw(raw.map_err(db_err)?)?);
        }
        Ok(out)
    }

    fn driver_by_id(conn: &Connection, driver_id: i64) -> Result<Option<Driver>> {
        let raw: Option<(i64, String, String)> = conn
            .query_row(
                "SELECT driver_id, name, status FROM drivers WHERE driver_id = ?1",
                params![driver_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .map_err(db_err)?;
        raw.map(Self::driver_from_raw).transpose()
    }

    fn driver_from_raw(raw: (i64, String, String)) -> Result<Driver> {
        let (driver_id, name, status) = raw;
        Ok(Driver {
            driver_id,
            name,
            status: DriverStatus::parse(&status)
                .ok_or_else(|| Error::database(format!("bad driver status '{}'", status)))?,
        })
    }

    fn all_drivers(conn: &mut Connection) -> Result<Vec<Driver>> {
        let mut stmt = conn
            .prepare("SELECT driver_id, name, status FROM drivers ORDER BY driver_id")
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
            .map_err(db_err)?;
        let mut out = Vec::new();
        for raw in rows {
            out.push(Self::driver_from_raw(raw.map_err(db_err)?)?);
        }
        Ok(out)
    }

    fn confirmed_booking_count(conn: &Connection, trip_id: i64) -> Result<i64> {
        conn.query_row(
            "SELECT COUNT(*) FROM bookings WHERE trip_id = ?1 AND status = 'CONFIRMED'",
            params![trip_id],
            |row| row.get(0),
        )
        .map_err(db_err)
    }

    fn upsert_deployment(
        conn: &Connection,
        trip_id: i64,
        vehicle_id: Option<i64>,
        driver_id: Option<i64>,
        existing: Option<Deployment>,
    ) -> Result<Deployment> {
        let now = Utc::now();
        match existing {
            Some(dep) => {
                conn.execute(
                    "UPDATE deployments SET vehicle_id = ?1, driver_id = ?2, deployed_at = ?3
                     WHERE deployment_id = ?4",
                    params![vehicle_id, driver_id, now.to_rfc3339(), dep.deployment_id],
                )
                .map_err(db_err)?;
                Ok(Deployment {
                    vehicle_id,
                    driver_id,
                    deployed_at: now,
                    ..dep
                })
            }
            None => {
                conn.execute(
                    "INSERT INTO deployments (trip_id, vehicle_id, driver_id, deployed_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![trip_id, vehicle_id, driver_id, now.to_rfc3339()],
                )
                .map_err(db_err)?;
                Ok(Deployment {
                    deployment_id: conn.last_insert_rowid(),
                    trip_id,
                    vehicle_id,
                    driver_id,
                    deployed_at: now,
                })
            }
        }
    }

    /// Minutes-since-midnight window of a trip. The end may exceed 24h for
    /// windows crossing midnight; both sides of a comparison use the same
    /// scale, so overlap arithmetic stays correct.
    fn window_minutes(time: NaiveTime, window_mins: i64) -> (i64, i64) {
        let start = (time.num_seconds_from_midnight() / 60) as i64;
        (start, start + window_mins)
    }

    fn windows_overlap(a: (i64, i64), b: (i64, i64)) -> bool {
        !(a.1 <= b.0 || a.0 >= b.1)
    }

    /// Times of non-cancelled trips on `date` that hold a deployment for the
    /// given vehicle or driver column.
    fn deployed_times(
        conn: &Connection,
        column: &str,
        entity_id: i64,
        date: NaiveDate,
        exclude_trip: Option<i64>,
    ) -> Result<Vec<(i64, String, NaiveTime)>> {
        let sql = format!(
            "SELECT t.trip_id, t.display_name, t.scheduled_time
             FROM deployments d JOIN trips t ON t.trip_id = d.trip_id
             WHERE d.{} = ?1 AND t.trip_date = ?2 AND t.live_status != 'CANCELLED'
               AND t.trip_id != ?3",
            column
        );
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt
            .query_map(
                params![entity_id, normalize::date_str(date), exclude_trip.unwrap_or(-1)],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?)),
            )
            .map_err(db_err)?;
        let mut out = Vec::new();
        for row in rows {
            let (trip_id, name, time) = row.map_err(db_err)?;
            let time = normalize::parse_time(&time)
                .ok_or_else(|| Error::database(format!("bad trip time '{}'", time)))?;
            out.push((trip_id, name, time));
        }
        Ok(out)
    }

    fn check_vehicle_free(conn: &Connection, vehicle_id: i64, trip: &Trip, window_mins: i64) -> Result<()> {
        let vehicle = Self::vehicle_by_id(conn, vehicle_id)?.ok_or_else(|| {
            Error::tool(
                ErrorKind::TargetNotFound,
                "vehicle",
                format!("Vehicle {} does not exist.", vehicle_id),
            )
        })?;
        if vehicle.status == VehicleStatus::Maintenance {
            return Err(Error::tool(
                ErrorKind::VehicleUnavailable,
                "vehicle",
                format!("Vehicle '{}' is under maintenance.", vehicle.registration_number),
            ));
        }

        let target = Self::window_minutes(trip.scheduled_time, window_mins);
        for (other_id, other_name, other_time) in
            Self::deployed_times(conn, "vehicle_id", vehicle_id, trip.trip_date, Some(trip.trip_id))?
        {
            if Self::windows_overlap(target, Self::window_minutes(other_time, window_mins)) {
                return Err(Error::tool(
                    ErrorKind::VehicleUnavailable,
                    "vehicle",
                    format!(
                        "Vehicle '{}' is already deployed on '{}' (trip {}) in an overlapping window.",
                        vehicle.registration_number, other_name, other_id
                    ),
                ));
            }
        }
        Ok(())
    }

    fn check_driver_free(conn: &Connection, driver_id: i64, trip: &Trip, window_mins: i64) -> Result<()> {
        let driver = Self::driver_by_id(conn, driver_id)?.ok_or_else(|| {
            Error::tool(
                ErrorKind::TargetNotFound,
                "driver",
                format!("Driver {} does not exist.", driver_id),
            )
        })?;
        if driver.status == DriverStatus::OffDuty {
            return Err(Error::tool(
                ErrorKind::DriverUnavailable,
                "driver",
                format!("Driver '{}' is off duty.", driver.name),
            ));
        }

        let target = Self::window_minutes(trip.scheduled_time, window_mins);
        for (other_id, other_name, other_time) in
            Self::deployed_times(conn, "driver_id", driver_id, trip.trip_date, Some(trip.trip_id))?
        {
            if Self::windows_overlap(target, Self::window_minutes(other_time, window_mins)) {
                return Err(Error::tool(
                    ErrorKind::DriverUnavailable,
                    "driver",
                    format!(
                        "Driver '{}' is already assigned to '{}' (trip {}) in an overlapping window.",
                        driver.name, other_name, other_id
                    ),
                ));
            }
        }
        Ok(())
    }

    fn available_vehicles_at(
        &self,
        conn: &mut Connection,
        date: NaiveDate,
        time: NaiveTime,
        exclude_trip: Option<i64>,
    ) -> Result<Vec<Vehicle>> {
        let window = self.config.availability_window_mins;
        let target = Self::window_minutes(time, window);
        let vehicles = Self::all_vehicles(conn)?;
        let mut out = Vec::new();
        for vehicle in vehicles {
            if vehicle.status == VehicleStatus::Maintenance {
                continue;
            }
            let busy = Self::deployed_times(conn, "vehicle_id", vehicle.vehicle_id, date, exclude_trip)?
                .into_iter()
                .any(|(_, _, t)| Self::windows_overlap(target, Self::window_minutes(t, window)));
            if !busy {
                out.push(vehicle);
            }
        }
        Ok(out)
    }

    fn available_drivers_at(
        &self,
        conn: &mut Connection,
        date: NaiveDate,
        time: NaiveTime,
        exclude_trip: Option<i64>,
    ) -> Result<Vec<Driver>> {
        let window = self.config.availability_window_mins;
        let target = Self::window_minutes(time, window);
        let drivers = Self::all_drivers(conn)?;
        let mut out = Vec::new();
        for driver in drivers {
            if driver.status == DriverStatus::OffDuty {
                continue;
            }
            let busy = Self::deployed_times(conn, "driver_id", driver.driver_id, date, exclude_trip)?
                .into_iter()
                .any(|(_, _, t)| Self::windows_overlap(target, Self::window_minutes(t, window)));
            if !busy {
                out.push(driver);
            }
        }
        Ok(out)
    }

    fn write_audit(
        conn: &Connection,
        user_id: i64,
        action: &str,
        entity_type: &str,
        entity_id: i64,
        before: Option<Value>,
        after: Option<Value>,
    ) -> Result<()> {
        conn.execute(
            "INSERT INTO audit_log (user_id, action, entity_type, entity_id, before_state, after_state, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                user_id,
                action,
                entity_type,
                entity_id,
                before.map(|v| v.to_string()),
                after.map(|v| v.to_string()),
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Shared seed data for tool, node, and end-to-end tests.

    use super::*;
    use chrono::Duration;

    /// A database with one path, one route, two vehicles, two drivers and a
    /// trip tomorrow at 07:30 (trip id 1, display name "Path-3 - 07:30").
    pub fn seeded_db() -> Database {
        let db = Database::in_memory().unwrap();
        let tomorrow = normalize::date_str(Utc::now().date_naive() + Duration::days(1));
        db.with_conn(|conn| {
            conn.execute_batch(&format!(
                "INSERT INTO stops (name) VALUES ('Depot'), ('Tech Park');
                 INSERT INTO paths (name) VALUES ('Path-3');
                 INSERT INTO path_stops (path_id, stop_id, position) VALUES (1, 1, 0), (1, 2, 1);
                 INSERT INTO routes (name, path_id, direction, shift_time)
                     VALUES ('Path-3 up', 1, 'up', '07:30');
                 INSERT INTO trips (display_name, trip_date, scheduled_time, route_id)
                     VALUES ('Path-3 - 07:30', '{date}', '07:30', 1);
                 INSERT INTO vehicles (registration_number, vehicle_type, capacity) VALUES
                     ('KA-01-AB-1234', 'Bus', 40), ('KA-02-CD-5678', 'Cab', 6);
                 INSERT INTO drivers (name) VALUES ('Asha'), ('Ravi');",
                date = tomorrow
            ))
            .map_err(db_err)?;
            Ok(())
        })
        .unwrap();
        db
    }

    /// Tool layer over [`seeded_db`], plus the seeded trip's id.
    pub fn seeded() -> (ToolLayer, i64) {
        (ToolLayer::new(seeded_db(), AgentConfig::default()), 1)
    }

    pub fn add_bookings(tools: &ToolLayer, trip_id: i64, count: usize) {
        tools
            .database()
            .with_conn(|conn| {
                for _ in 0..count {
                    conn.execute(
                        "INSERT INTO bookings (trip_id, status) VALUES (?1, 'CONFIRMED')",
                        params![trip_id],
                    )
                    .map_err(db_err)?;
                }
                Ok(())
            })
            .unwrap();
    }

    pub fn add_trip(tools: &ToolLayer, name: &str, days_ahead: i64, time: &str) -> i64 {
        let date = normalize::date_str(Utc::now().date_naive() + Duration::days(days_ahead));
        tools
            .database()
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO trips (display_name, trip_date, scheduled_time, route_id)
                     VALUES (?1, ?2, ?3, 1)",
                    params![name, date, time],
                )
                .map_err(db_err)?;
                Ok(conn.last_insert_rowid())
            })
            .unwrap()
    }
}
